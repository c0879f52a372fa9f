use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use chrono::{DateTime, Utc};

use crate::{
    config::{PriceConvention, Settings},
    contracts::{IProtocolToken, IERC20},
    gateway::{GatewayError, ProviderGateway},
    session::PoolState,
    utils::{round_to_precision, units_to_decimal},
};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("cannot decode {method} result: {message}")]
    Decode {
        method: &'static str,
        message: String,
    },

    #[error("protocol parameter {name} has a zero divisor")]
    ZeroDivisor { name: &'static str },

    #[error("pool reserve used as denominator is empty")]
    EmptyReserve,

    #[error("timestamp out of range: {0}")]
    BadTimestamp(U256),
}

/// Pool price from the two reserves, rounded to `precision` places.
pub fn pool_price(
    reserve_a: f64,
    reserve_b: f64,
    convention: PriceConvention,
    precision: u32,
) -> Result<f64, ChainError> {
    let (num, den) = match convention {
        PriceConvention::APerB => (reserve_a, reserve_b),
        PriceConvention::BPerA => (reserve_b, reserve_a),
    };
    if den == 0.0 {
        return Err(ChainError::EmptyReserve);
    }
    Ok(round_to_precision(num / den, precision))
}

/// Protocol divisors are percentages expressed as `100 / divisor`.
pub fn divisor_to_fraction(name: &'static str, raw: U256) -> Result<f64, ChainError> {
    if raw.is_zero() {
        return Err(ChainError::ZeroDivisor { name });
    }
    Ok(100.0 / units_to_decimal(raw, 0))
}

/// Stateless reads against the token, its pair and the protocol contract.
#[derive(Clone)]
pub struct ChainReader {
    gateway: ProviderGateway,
    token: Address,
    pair: Address,
    quote_token: Address,
    decimals: u8,
    convention: PriceConvention,
    precision: u32,
}

impl ChainReader {
    pub fn new(gateway: ProviderGateway, settings: &Settings) -> Self {
        Self {
            gateway,
            token: settings.token_address,
            pair: settings.pair_address,
            quote_token: settings.weth_address,
            decimals: settings.token_decimals,
            convention: settings.pool_price_convention,
            precision: settings.price_precision,
        }
    }

    async fn call_u256<C: SolCall>(
        &self,
        to: Address,
        method: &'static str,
        call: C,
        pick: impl FnOnce(C::Return) -> U256,
    ) -> Result<U256, ChainError> {
        let raw = self
            .gateway
            .provider()
            .call(to, call.abi_encode().into())
            .await?;
        let ret = C::abi_decode_returns(&raw, true).map_err(|e| ChainError::Decode {
            method,
            message: e.to_string(),
        })?;
        Ok(pick(ret))
    }

    async fn raw_balance_of(&self, token: Address, account: Address) -> Result<U256, ChainError> {
        self.call_u256(token, "balanceOf", IERC20::balanceOfCall { account }, |r| r.balance)
            .await
    }

    pub async fn token_balance(&self, token: Address, account: Address) -> Result<f64, ChainError> {
        let raw = self.raw_balance_of(token, account).await?;
        Ok(units_to_decimal(raw, self.decimals))
    }

    /// Protocol tokens held by the token contract itself.
    pub async fn protocol_token_balance(&self) -> Result<f64, ChainError> {
        self.token_balance(self.token, self.token).await
    }

    pub async fn pool_state(&self) -> Result<PoolState, ChainError> {
        let reserve_a = self.token_balance(self.token, self.pair).await?;
        let reserve_b = self.token_balance(self.quote_token, self.pair).await?;
        let price = pool_price(reserve_a, reserve_b, self.convention, self.precision)?;
        log::debug!(
            "reader.pool reserve_a={} reserve_b={} price={} convention={:?}",
            reserve_a,
            reserve_b,
            price,
            self.convention
        );
        Ok(PoolState {
            price,
            reserve_a,
            reserve_b,
        })
    }

    pub async fn protocol_params(&self) -> Result<BTreeMap<String, f64>, ChainError> {
        let lock = self
            .call_u256(
                self.token,
                "liquidityLockDivisor",
                IProtocolToken::liquidityLockDivisorCall {},
                |r| r.divisor,
            )
            .await?;
        let reward = self
            .call_u256(
                self.token,
                "callerRewardDivisor",
                IProtocolToken::callerRewardDivisorCall {},
                |r| r.divisor,
            )
            .await?;
        let rebalance = self
            .call_u256(
                self.token,
                "rebalanceDivisor",
                IProtocolToken::rebalanceDivisorCall {},
                |r| r.divisor,
            )
            .await?;

        let mut out = BTreeMap::new();
        out.insert(
            "liquidity_lock".to_string(),
            divisor_to_fraction("liquidityLockDivisor", lock)?,
        );
        out.insert(
            "caller_reward".to_string(),
            divisor_to_fraction("callerRewardDivisor", reward)?,
        );
        out.insert(
            "rebalance".to_string(),
            divisor_to_fraction("rebalanceDivisor", rebalance)?,
        );
        Ok(out)
    }

    pub async fn next_rebalance(&self) -> Result<DateTime<Utc>, ChainError> {
        let last = self
            .call_u256(
                self.token,
                "lastRebalance",
                IProtocolToken::lastRebalanceCall {},
                |r| r.timestamp,
            )
            .await?;
        let interval = self
            .call_u256(
                self.token,
                "rebalanceInterval",
                IProtocolToken::rebalanceIntervalCall {},
                |r| r.interval,
            )
            .await?;
        let at = last.saturating_add(interval);
        let secs: u64 = at.try_into().map_err(|_| ChainError::BadTimestamp(at))?;
        let secs = i64::try_from(secs).map_err(|_| ChainError::BadTimestamp(at))?;
        DateTime::<Utc>::from_timestamp(secs, 0).ok_or(ChainError::BadTimestamp(at))
    }
}
