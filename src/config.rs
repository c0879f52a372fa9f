use std::env;
use std::str::FromStr;

use alloy_primitives::{address, Address};
use anyhow::{anyhow, Result};
use serde::Serialize;

// Goerli deployment of the protocol token and its WETH pair.
const DEFAULT_TOKEN: Address = address!("1a476b75c780e9d51a488380d48c744589b5b45a");
const DEFAULT_PAIR: Address = address!("56c8b97d17f518c947da3e9c9ca4cb10d65558a0");
const DEFAULT_WETH: Address = address!("b4fbf271143f4fbf7b91a5ded31805e42b2208d6");
// Same network as the contracts above.
const DEFAULT_PUBLIC_RPC: &str = "https://rpc.ankr.com/eth_goerli";

fn get_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_bool(key: &str, default: bool) -> bool {
    match get_env(key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
    }
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<u64>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<usize>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn narrow_int<T: TryFrom<u64>>(key: &str, v: u64) -> Result<T> {
    T::try_from(v).map_err(|_| anyhow!("{key} out of range: {v}"))
}

fn get_env_u32(key: &str, default: u32) -> Result<u32> {
    narrow_int(key, get_env_u64(key, default as u64)?)
}

fn get_env_u16(key: &str, default: u16) -> Result<u16> {
    narrow_int(key, get_env_u64(key, default as u64)?)
}

fn get_env_string(key: &str, default: &str) -> String {
    get_env(key).unwrap_or_else(|| default.to_string())
}

fn get_env_address(key: &str, default: Address) -> Result<Address> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Address::from_str(&v).map_err(|e| anyhow!("{key} invalid address: {e}")),
    }
}

/// Which side of the pair the pool price is quoted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceConvention {
    /// `reserve_a / reserve_b`: protocol tokens per quote token.
    APerB,
    /// `reserve_b / reserve_a`: quote tokens per protocol token.
    BPerA,
}

impl FromStr for PriceConvention {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "a_per_b" => Ok(Self::APerB),
            "b_per_a" => Ok(Self::BPerA),
            other => Err(anyhow!(
                "POOL_PRICE_CONVENTION must be a_per_b|b_per_a (got {other})"
            )),
        }
    }
}

/// `SYM:coingecko-id` pairs, e.g. `ETH:ethereum,WETH:weth`.
pub fn parse_price_ids(raw: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (sym, id) = item
            .split_once(':')
            .ok_or_else(|| anyhow!("PRICE_IDS entry must be SYMBOL:id (got {item})"))?;
        let (sym, id) = (sym.trim(), id.trim());
        if sym.is_empty() || id.is_empty() {
            return Err(anyhow!("PRICE_IDS entry must be SYMBOL:id (got {item})"));
        }
        out.push((sym.to_uppercase(), id.to_string()));
    }
    Ok(out)
}

pub fn parse_address_list(raw: &str) -> Result<Vec<Address>> {
    let mut out: Vec<Address> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let a = Address::from_str(item).map_err(|e| anyhow!("invalid address {item}: {e}"))?;
        if !out.contains(&a) {
            out.push(a);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct Settings {
    // Connection
    pub wallet_rpc_url: Option<String>,
    pub public_rpc_url: String,
    pub rpc_timeout_ms: u64,

    // Contracts
    pub token_address: Address,
    pub pair_address: Address,
    pub weth_address: Address,
    pub tracked_tokens: Vec<Address>,
    pub token_decimals: u8,

    // Pool price
    pub pool_price_convention: PriceConvention,
    pub price_precision: u32,

    // Reference prices
    pub price_api_url: String,
    pub price_ids: Vec<(String, String)>,
    pub price_vs_currency: String,

    // Events / transactions
    pub event_channel_capacity: usize,
    pub wallet_poll_ms: u64,
    pub tx_confirm_poll_ms: u64,
    pub tx_confirm_timeout_secs: u64,

    // Dashboard
    pub dashboard_enabled: bool,
    pub dashboard_host: String,
    pub dashboard_port: u16,
    pub dashboard_open_browser: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let token_address = get_env_address("TOKEN_ADDRESS", DEFAULT_TOKEN)?;
        let weth_address = get_env_address("WETH_ADDRESS", DEFAULT_WETH)?;

        let tracked_tokens = match get_env("TRACKED_TOKENS") {
            Some(v) => parse_address_list(&v)?,
            None => vec![token_address, weth_address],
        };

        let token_decimals = get_env_u64("TOKEN_DECIMALS", 18)?;
        if token_decimals > 77 {
            return Err(anyhow!("TOKEN_DECIMALS must be <= 77 (got {token_decimals})"));
        }

        let s = Self {
            wallet_rpc_url: get_env("WALLET_RPC_URL"),
            public_rpc_url: get_env_string("PUBLIC_RPC_URL", DEFAULT_PUBLIC_RPC),
            rpc_timeout_ms: get_env_u64("RPC_TIMEOUT_MS", 15_000)?,
            token_address,
            pair_address: get_env_address("PAIR_ADDRESS", DEFAULT_PAIR)?,
            weth_address,
            tracked_tokens,
            token_decimals: token_decimals as u8,
            pool_price_convention: get_env_string("POOL_PRICE_CONVENTION", "a_per_b").parse()?,
            price_precision: get_env_u32("PRICE_PRECISION", 4)?,
            price_api_url: get_env_string(
                "PRICE_API_URL",
                "https://api.coingecko.com/api/v3/simple/price",
            ),
            price_ids: parse_price_ids(&get_env_string("PRICE_IDS", "ETH:ethereum"))?,
            price_vs_currency: get_env_string("PRICE_VS_CURRENCY", "usd").to_lowercase(),
            event_channel_capacity: get_env_usize("EVENT_CHANNEL_CAPACITY", 64)?,
            wallet_poll_ms: get_env_u64("WALLET_POLL_MS", 1_000)?,
            tx_confirm_poll_ms: get_env_u64("TX_CONFIRM_POLL_MS", 2_000)?,
            tx_confirm_timeout_secs: get_env_u64("TX_CONFIRM_TIMEOUT_SECS", 600)?,
            dashboard_enabled: get_env_bool("DASHBOARD_ENABLED", true),
            dashboard_host: get_env_string("DASHBOARD_HOST", "127.0.0.1"),
            dashboard_port: get_env_u16("DASHBOARD_PORT", 8000)?,
            dashboard_open_browser: get_env_bool("DASHBOARD_OPEN_BROWSER", false),
        };

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<()> {
        if self.public_rpc_url.trim().is_empty() {
            return Err(anyhow!("PUBLIC_RPC_URL is empty"));
        }
        if self.rpc_timeout_ms < 1 {
            return Err(anyhow!("RPC_TIMEOUT_MS must be >= 1 (got {})", self.rpc_timeout_ms));
        }
        if self.price_precision > 12 {
            return Err(anyhow!(
                "PRICE_PRECISION must be <= 12 (got {})",
                self.price_precision
            ));
        }
        if self.price_ids.is_empty() {
            return Err(anyhow!("PRICE_IDS must name at least one SYMBOL:id"));
        }
        if self.event_channel_capacity < 1 {
            return Err(anyhow!(
                "EVENT_CHANNEL_CAPACITY must be >= 1 (got {})",
                self.event_channel_capacity
            ));
        }
        if self.wallet_poll_ms < 1 {
            return Err(anyhow!("WALLET_POLL_MS must be >= 1 (got {})", self.wallet_poll_ms));
        }
        if self.tx_confirm_poll_ms < 1 {
            return Err(anyhow!(
                "TX_CONFIRM_POLL_MS must be >= 1 (got {})",
                self.tx_confirm_poll_ms
            ));
        }
        if self.tx_confirm_timeout_secs < 1 {
            return Err(anyhow!(
                "TX_CONFIRM_TIMEOUT_SECS must be >= 1 (got {})",
                self.tx_confirm_timeout_secs
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
impl Settings {
    /// Defaults without touching the process environment.
    pub fn for_tests() -> Self {
        Self {
            wallet_rpc_url: None,
            public_rpc_url: "http://127.0.0.1:8545".to_string(),
            rpc_timeout_ms: 1_000,
            token_address: DEFAULT_TOKEN,
            pair_address: DEFAULT_PAIR,
            weth_address: DEFAULT_WETH,
            tracked_tokens: vec![DEFAULT_TOKEN, DEFAULT_WETH],
            token_decimals: 18,
            pool_price_convention: PriceConvention::APerB,
            price_precision: 4,
            price_api_url: "http://127.0.0.1:9/simple/price".to_string(),
            price_ids: vec![("ETH".to_string(), "ethereum".to_string())],
            price_vs_currency: "usd".to_string(),
            event_channel_capacity: 8,
            wallet_poll_ms: 10,
            tx_confirm_poll_ms: 1,
            tx_confirm_timeout_secs: 1,
            dashboard_enabled: false,
            dashboard_host: "127.0.0.1".to_string(),
            dashboard_port: 0,
            dashboard_open_browser: false,
        }
    }
}
