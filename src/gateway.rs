//! Access to the wallet / RPC connection.
//!
//! The gateway is detected once at startup. An injected wallet endpoint (one
//! that holds accounts and signs `eth_sendTransaction`) gives full capability;
//! otherwise the public read-only RPC is used and every signer request fails
//! with [`GatewayError::NoWallet`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{hex, keccak256, Address, Bytes, TxHash, B256, U256};
use alloy_sol_types::SolCall;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::{
    config::Settings,
    contracts::{IEnsRegistry, IEnsResolver},
    session::NetworkInfo,
};

const ENS_REGISTRY: Address = alloy_primitives::address!("00000000000c2e074ec69a0dfb2997ba6c7d2e1e");

// EIP-1193 "user rejected request".
const USER_REJECTED: i64 = 4001;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no injected wallet; connect a wallet to sign")]
    NoWallet,

    #[error("wallet has no connected account")]
    NoAccount,

    #[error("request rejected by user: {0}")]
    Rejected(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Injected,
    ReadOnly,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::Injected => "injected",
            ConnectionMode::ReadOnly => "read_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

/// The wallet/RPC surface the rest of the crate relies on.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the wallet for account access (may prompt the user).
    async fn request_accounts(&self) -> Result<Vec<Address>, GatewayError>;

    /// Accounts the wallet currently exposes, without prompting.
    async fn accounts(&self) -> Result<Vec<Address>, GatewayError>;

    async fn chain_id(&self) -> Result<u64, GatewayError>;

    async fn balance(&self, address: Address) -> Result<U256, GatewayError>;

    /// Read-only contract call against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, GatewayError>;

    /// Submit a transaction for the wallet to sign.
    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<TxHash, GatewayError>;

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, GatewayError>;

    /// Reverse name for `address`, if one is set.
    async fn lookup_address(&self, address: Address) -> Result<Option<String>, GatewayError> {
        ens_reverse_lookup(self, address).await
    }
}

/// ENS namehash (EIP-137).
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        node = keccak256([node.as_slice(), label_hash.as_slice()].concat());
    }
    node
}

pub async fn ens_reverse_lookup<P: WalletProvider + ?Sized>(
    provider: &P,
    address: Address,
) -> Result<Option<String>, GatewayError> {
    let node = namehash(&format!("{}.addr.reverse", hex::encode(address.as_slice())));

    let data = IEnsRegistry::resolverCall { node }.abi_encode();
    let raw = provider.call(ENS_REGISTRY, data.into()).await?;
    let resolver = IEnsRegistry::resolverCall::abi_decode_returns(&raw, true)
        .map_err(|e| GatewayError::Decode(format!("ens resolver: {e}")))?
        .resolverAddress;
    if resolver == Address::ZERO {
        return Ok(None);
    }

    let data = IEnsResolver::nameCall { node }.abi_encode();
    let raw = provider.call(resolver, data.into()).await?;
    let name = IEnsResolver::nameCall::abi_decode_returns(&raw, true)
        .map_err(|e| GatewayError::Decode(format!("ens name: {e}")))?
        .ensName;
    Ok(Some(name).filter(|n| !n.is_empty()))
}

pub fn parse_quantity_u64(raw: &str) -> Result<u64, GatewayError> {
    let s = raw.trim();
    let hex = s
        .strip_prefix("0x")
        .ok_or_else(|| GatewayError::Decode(format!("quantity without 0x: {s}")))?;
    u64::from_str_radix(hex, 16).map_err(|e| GatewayError::Decode(format!("quantity {s}: {e}")))
}

pub fn parse_quantity_u256(raw: &str) -> Result<U256, GatewayError> {
    let s = raw.trim();
    let hex = s
        .strip_prefix("0x")
        .ok_or_else(|| GatewayError::Decode(format!("quantity without 0x: {s}")))?;
    U256::from_str_radix(hex, 16).map_err(|e| GatewayError::Decode(format!("quantity {s}: {e}")))
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: JsonValue,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    block_number: Option<String>,
    status: Option<String>,
}

/// JSON-RPC 2.0 over HTTP.
pub struct JsonRpcProvider {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        if url.trim().is_empty() {
            anyhow::bail!("rpc url is empty");
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.trim().to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: JsonValue) -> Result<JsonValue, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{method}: {e}")))?
            .error_for_status()
            .map_err(|e| GatewayError::Transport(format!("{method}: {e}")))?;
        let env: RpcEnvelope = resp
            .json()
            .await
            .map_err(|e| GatewayError::Decode(format!("{method}: {e}")))?;

        match env.error {
            Some(err) if err.code == USER_REJECTED => Err(GatewayError::Rejected(err.message)),
            Some(err) => Err(GatewayError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(env.result),
        }
    }

    async fn request_as<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: JsonValue,
    ) -> Result<T, GatewayError> {
        let v = self.request(method, params).await?;
        serde_json::from_value(v).map_err(|e| GatewayError::Decode(format!("{method}: {e}")))
    }
}

#[async_trait]
impl WalletProvider for JsonRpcProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, GatewayError> {
        self.request_as("eth_requestAccounts", json!([])).await
    }

    async fn accounts(&self) -> Result<Vec<Address>, GatewayError> {
        self.request_as("eth_accounts", json!([])).await
    }

    async fn chain_id(&self) -> Result<u64, GatewayError> {
        let raw: String = self.request_as("eth_chainId", json!([])).await?;
        parse_quantity_u64(&raw)
    }

    async fn balance(&self, address: Address) -> Result<U256, GatewayError> {
        let raw: String = self
            .request_as("eth_getBalance", json!([address, "latest"]))
            .await?;
        parse_quantity_u256(&raw)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, GatewayError> {
        self.request_as("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }

    async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> Result<TxHash, GatewayError> {
        self.request_as(
            "eth_sendTransaction",
            json!([{ "from": from, "to": to, "data": data }]),
        )
        .await
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, GatewayError> {
        let raw: Option<RpcReceipt> = self
            .request_as("eth_getTransactionReceipt", json!([hash]))
            .await?;
        let Some(r) = raw else {
            return Ok(None);
        };
        let block_number = r.block_number.as_deref().map(parse_quantity_u64).transpose()?;
        // Pre-byzantium receipts carry no status; treat inclusion as success.
        let success = match r.status.as_deref() {
            Some(s) => parse_quantity_u64(s)? == 1,
            None => true,
        };
        Ok(Some(TxReceipt {
            transaction_hash: r.transaction_hash,
            block_number,
            success,
        }))
    }
}

/// Authenticated handle for the wallet's first account.
#[derive(Clone)]
pub struct Signer {
    provider: Arc<dyn WalletProvider>,
}

impl Signer {
    pub async fn address(&self) -> Result<Address, GatewayError> {
        self.provider
            .accounts()
            .await?
            .into_iter()
            .next()
            .ok_or(GatewayError::NoAccount)
    }

    pub async fn send_transaction(&self, to: Address, data: Bytes) -> Result<TxHash, GatewayError> {
        let from = self.address().await?;
        self.provider.send_transaction(from, to, data).await
    }
}

#[derive(Clone)]
pub struct ProviderGateway {
    provider: Arc<dyn WalletProvider>,
    mode: ConnectionMode,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn WalletProvider>, mode: ConnectionMode) -> Self {
        Self { provider, mode }
    }

    /// One-shot detection: prefer the wallet endpoint if it answers, else
    /// fall back to the public RPC in read-only mode.
    pub async fn detect(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_millis(settings.rpc_timeout_ms);

        if let Some(url) = settings.wallet_rpc_url.as_deref() {
            let wallet = JsonRpcProvider::new(url, timeout)?;
            match wallet.chain_id().await {
                Ok(chain_id) => {
                    log::info!("gateway.injected url={} chain_id={}", wallet.url(), chain_id);
                    return Ok(Self::new(Arc::new(wallet), ConnectionMode::Injected));
                }
                Err(e) => {
                    log::warn!("gateway.injected.unavailable url={} err={}", wallet.url(), e);
                }
            }
        }

        let public = JsonRpcProvider::new(&settings.public_rpc_url, timeout)?;
        log::warn!(
            "gateway.read_only url={} (a wallet is required to log in and rebalance)",
            public.url()
        );
        Ok(Self::new(Arc::new(public), ConnectionMode::ReadOnly))
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn has_injected_wallet(&self) -> bool {
        self.mode == ConnectionMode::Injected
    }

    pub fn provider(&self) -> Arc<dyn WalletProvider> {
        self.provider.clone()
    }

    pub fn get_signer(&self) -> Result<Signer, GatewayError> {
        if !self.has_injected_wallet() {
            return Err(GatewayError::NoWallet);
        }
        Ok(Signer {
            provider: self.provider.clone(),
        })
    }

    pub async fn request_accounts(&self) -> Result<Vec<Address>, GatewayError> {
        if !self.has_injected_wallet() {
            return Err(GatewayError::NoWallet);
        }
        self.provider.request_accounts().await
    }

    pub async fn get_network(&self) -> Result<NetworkInfo, GatewayError> {
        Ok(NetworkInfo::from_chain_id(self.provider.chain_id().await?))
    }
}
