//! In-memory wallet and price source for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    contracts::IERC20,
    gateway::{GatewayError, TxReceipt, WalletProvider},
    price_oracle::RateSource,
};

#[derive(Default)]
struct WalletState {
    accounts: Vec<Address>,
    reject_requests: bool,
    chain_id: u64,
    balances: HashMap<Address, U256>,
    names: HashMap<Address, String>,
    calls: HashMap<(Address, Vec<u8>), Vec<u8>>,
    failing_calls: bool,
    sent: Vec<(Address, Address, Bytes)>,
    receipt_success: bool,
    receipt_pending: bool,
    request_delay: Duration,
    log: Vec<String>,
}

/// Wallet that answers from tables set up by the test.
///
/// Unknown `eth_call`s return a single zero word.
#[derive(Clone)]
pub struct MockWallet {
    state: Arc<Mutex<WalletState>>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WalletState {
                chain_id: 1,
                receipt_success: true,
                ..Default::default()
            })),
        }
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().accounts = accounts;
    }

    pub fn reject_requests(&self, reject: bool) {
        self.state.lock().reject_requests = reject;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().chain_id = chain_id;
    }

    pub fn set_balance(&self, who: Address, wei: U256) {
        self.state.lock().balances.insert(who, wei);
    }

    pub fn set_name(&self, who: Address, name: &str) {
        self.state.lock().names.insert(who, name.to_string());
    }

    pub fn set_call(&self, to: Address, calldata: Vec<u8>, ret: Vec<u8>) {
        self.state.lock().calls.insert((to, calldata), ret);
    }

    pub fn set_u256(&self, to: Address, calldata: Vec<u8>, value: U256) {
        self.set_call(to, calldata, value.to_be_bytes::<32>().to_vec());
    }

    pub fn set_token_balance(&self, token: Address, owner: Address, raw: U256) {
        self.set_u256(token, IERC20::balanceOfCall { account: owner }.abi_encode(), raw);
    }

    /// Makes `request_accounts` take `delay` before answering.
    pub fn set_request_delay(&self, delay: Duration) {
        self.state.lock().request_delay = delay;
    }

    pub fn fail_calls(&self, fail: bool) {
        self.state.lock().failing_calls = fail;
    }

    pub fn set_receipt(&self, success: bool, pending: bool) {
        let mut s = self.state.lock();
        s.receipt_success = success;
        s.receipt_pending = pending;
    }

    pub fn sent(&self) -> Vec<(Address, Address, Bytes)> {
        self.state.lock().sent.clone()
    }

    /// Method names in call order.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    fn record(&self, method: &str) {
        self.state.lock().log.push(method.to_string());
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, GatewayError> {
        self.record("request_accounts");
        let delay = self.state.lock().request_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let s = self.state.lock();
        if s.reject_requests {
            return Err(GatewayError::Rejected("User denied account authorization".into()));
        }
        Ok(s.accounts.clone())
    }

    async fn accounts(&self) -> Result<Vec<Address>, GatewayError> {
        self.record("accounts");
        Ok(self.state.lock().accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64, GatewayError> {
        self.record("chain_id");
        Ok(self.state.lock().chain_id)
    }

    async fn balance(&self, address: Address) -> Result<U256, GatewayError> {
        self.record("balance");
        Ok(self
            .state
            .lock()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, GatewayError> {
        self.record("call");
        let s = self.state.lock();
        if s.failing_calls {
            return Err(GatewayError::Transport("connection reset".into()));
        }
        let ret = s
            .calls
            .get(&(to, data.to_vec()))
            .cloned()
            .unwrap_or_else(|| vec![0u8; 32]);
        Ok(ret.into())
    }

    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<TxHash, GatewayError> {
        self.record("send_transaction");
        let mut s = self.state.lock();
        if s.reject_requests {
            return Err(GatewayError::Rejected("User denied transaction signature".into()));
        }
        s.sent.push((from, to, data));
        Ok(B256::repeat_byte(s.sent.len() as u8))
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, GatewayError> {
        self.record("transaction_receipt");
        let s = self.state.lock();
        if s.receipt_pending {
            return Ok(None);
        }
        Ok(Some(TxReceipt {
            transaction_hash: hash,
            block_number: Some(1),
            success: s.receipt_success,
        }))
    }

    async fn lookup_address(&self, address: Address) -> Result<Option<String>, GatewayError> {
        self.record("lookup_address");
        Ok(self.state.lock().names.get(&address).cloned())
    }
}

/// Price source returning a fixed table, or failing.
pub struct MockRates {
    rates: Mutex<Option<HashMap<String, f64>>>,
    delay: Duration,
}

impl MockRates {
    pub fn ok(pairs: &[(&str, f64)]) -> Self {
        Self {
            rates: Mutex::new(Some(
                pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            )),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            rates: Mutex::new(None),
            delay: Duration::ZERO,
        }
    }

    /// Answers only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl RateSource for MockRates {
    async fn fetch_rates(&self) -> anyhow::Result<HashMap<String, f64>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.rates
            .lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("price api unreachable"))
    }
}
