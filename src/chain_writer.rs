use std::time::Duration;

use alloy_primitives::{Address, TxHash};
use alloy_sol_types::SolCall;

use crate::{
    config::Settings,
    contracts::IProtocolToken,
    gateway::{GatewayError, ProviderGateway, TxReceipt},
};

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("transaction {0} reverted")]
    Reverted(TxHash),

    #[error("transaction {hash} not confirmed after {waited_secs}s")]
    ConfirmationTimeout { hash: TxHash, waited_secs: u64 },
}

#[derive(Clone)]
pub struct ChainWriter {
    gateway: ProviderGateway,
    token: Address,
    confirm_poll: Duration,
    confirm_timeout: Duration,
}

impl ChainWriter {
    pub fn new(gateway: ProviderGateway, settings: &Settings) -> Self {
        Self {
            gateway,
            token: settings.token_address,
            confirm_poll: Duration::from_millis(settings.tx_confirm_poll_ms),
            confirm_timeout: Duration::from_secs(settings.tx_confirm_timeout_secs),
        }
    }

    /// Signs and submits `rebalanceLiquidity()` and waits for the receipt.
    pub async fn rebalance(&self) -> Result<TxReceipt, WriteError> {
        let signer = self.gateway.get_signer()?;
        let data = IProtocolToken::rebalanceLiquidityCall {}.abi_encode();
        let hash = signer.send_transaction(self.token, data.into()).await?;
        log::info!("writer.rebalance.sent tx={}", hash);

        let receipt = self.wait_for_receipt(hash).await?;
        if !receipt.success {
            return Err(WriteError::Reverted(hash));
        }
        log::info!(
            "writer.rebalance.confirmed tx={} block={:?}",
            hash,
            receipt.block_number
        );
        Ok(receipt)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, WriteError> {
        let provider = self.gateway.provider();
        let poll = async {
            let mut tick = tokio::time::interval(self.confirm_poll);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if let Some(r) = provider.transaction_receipt(hash).await? {
                    return Ok::<_, WriteError>(r);
                }
            }
        };
        match tokio::time::timeout(self.confirm_timeout, poll).await {
            Ok(res) => res,
            Err(_) => Err(WriteError::ConfirmationTimeout {
                hash,
                waited_secs: self.confirm_timeout.as_secs(),
            }),
        }
    }
}
