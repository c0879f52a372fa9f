//! The owned session and its merge/generation bookkeeping.
//!
//! Every write goes through [`SessionStore::merge`] or a [`SequenceGuard`].
//! A sequence (bootstrap or login) gets a generation number when it starts;
//! merges from a generation that is no longer current are dropped, so a slow
//! read from a superseded sequence cannot overwrite newer data.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub chain_id: u64,
    pub name: String,
}

impl NetworkInfo {
    pub fn from_chain_id(chain_id: u64) -> Self {
        let name = match chain_id {
            1 => "homestead",
            3 => "ropsten",
            4 => "rinkeby",
            5 => "goerli",
            10 => "optimism",
            42 => "kovan",
            56 => "bnb",
            137 => "matic",
            8453 => "base",
            17000 => "holesky",
            42161 => "arbitrum",
            11155111 => "sepolia",
            _ => "unknown",
        };
        Self {
            chain_id,
            name: name.to_string(),
        }
    }
}

/// Chain ids arrive as decimal strings from the legacy `networkChanged` event
/// and as `0x` quantities from `chainChanged` / `eth_chainId`.
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let s = raw.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u64>().ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoolState {
    pub price: f64,
    pub reserve_a: f64,
    pub reserve_b: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Session {
    pub loading: bool,
    pub address: Option<Address>,
    pub network: NetworkInfo,
    pub name: String,
    pub balance: f64,
    pub token_balances: HashMap<Address, f64>,
    pub protocol_token_balance: f64,
    pub pool: PoolState,
    pub protocol_params: BTreeMap<String, f64>,
    pub next_rebalance_at: Option<DateTime<Utc>>,
    pub exchange_rates: HashMap<String, f64>,
}

/// Partial update. `None` leaves the field alone.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub loading: Option<bool>,
    pub address: Option<Option<Address>>,
    pub network: Option<NetworkInfo>,
    pub name: Option<String>,
    pub balance: Option<f64>,
    pub token_balances: Option<HashMap<Address, f64>>,
    pub protocol_token_balance: Option<f64>,
    pub pool: Option<PoolState>,
    pub protocol_params: Option<BTreeMap<String, f64>>,
    pub next_rebalance_at: Option<Option<DateTime<Utc>>>,
    pub exchange_rates: Option<HashMap<String, f64>>,
}

impl SessionPatch {
    pub fn loading(v: bool) -> Self {
        Self {
            loading: Some(v),
            ..Default::default()
        }
    }

    /// Clears everything that belongs to the authenticated account.
    pub fn signed_out() -> Self {
        Self {
            loading: Some(false),
            address: Some(None),
            name: Some(String::new()),
            balance: Some(0.0),
            token_balances: Some(HashMap::new()),
            protocol_token_balance: Some(0.0),
            pool: Some(PoolState::default()),
            protocol_params: Some(BTreeMap::new()),
            next_rebalance_at: Some(None),
            ..Default::default()
        }
    }

    /// Names of the fields this patch touches, in declaration order.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.loading.is_some() {
            out.push("loading");
        }
        if self.address.is_some() {
            out.push("address");
        }
        if self.network.is_some() {
            out.push("network");
        }
        if self.name.is_some() {
            out.push("name");
        }
        if self.balance.is_some() {
            out.push("balance");
        }
        if self.token_balances.is_some() {
            out.push("token_balances");
        }
        if self.protocol_token_balance.is_some() {
            out.push("protocol_token_balance");
        }
        if self.pool.is_some() {
            out.push("pool");
        }
        if self.protocol_params.is_some() {
            out.push("protocol_params");
        }
        if self.next_rebalance_at.is_some() {
            out.push("next_rebalance_at");
        }
        if self.exchange_rates.is_some() {
            out.push("exchange_rates");
        }
        out
    }

    fn apply(&self, s: &mut Session) {
        if let Some(v) = self.loading {
            s.loading = v;
        }
        if let Some(v) = self.address {
            s.address = v;
        }
        if let Some(v) = &self.network {
            s.network = v.clone();
        }
        if let Some(v) = &self.name {
            s.name = v.clone();
        }
        if let Some(v) = self.balance {
            s.balance = v;
        }
        if let Some(v) = &self.token_balances {
            s.token_balances = v.clone();
        }
        if let Some(v) = self.protocol_token_balance {
            s.protocol_token_balance = v;
        }
        if let Some(v) = self.pool {
            s.pool = v;
        }
        if let Some(v) = &self.protocol_params {
            s.protocol_params = v.clone();
        }
        if let Some(v) = self.next_rebalance_at {
            s.next_rebalance_at = v;
        }
        if let Some(v) = &self.exchange_rates {
            s.exchange_rates = v.clone();
        }
    }
}

/// Published after every applied merge.
#[derive(Debug, Clone)]
pub struct SessionChange {
    pub generation: u64,
    pub patch: SessionPatch,
}

struct Inner {
    session: Session,
    generation: u64,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<Inner>>,
    changes: broadcast::Sender<SessionChange>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                session: Session::default(),
                generation: 0,
            })),
            changes,
        }
    }

    pub fn snapshot(&self) -> Session {
        self.inner.read().session.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    /// Unconditional merge: applies every set field of `patch`.
    pub fn merge(&self, patch: SessionPatch) {
        let mut g = self.inner.write();
        let generation = g.generation;
        self.apply_locked(&mut g, generation, patch);
    }

    /// Applies `patch` only while `generation` is still current.
    pub fn merge_if_current(&self, generation: u64, patch: SessionPatch) -> bool {
        let mut g = self.inner.write();
        if g.generation != generation {
            log::debug!(
                "session.merge.stale gen={} current={} fields={:?}",
                generation,
                g.generation,
                patch.fields()
            );
            return false;
        }
        self.apply_locked(&mut g, generation, patch);
        true
    }

    fn apply_locked(&self, g: &mut Inner, generation: u64, patch: SessionPatch) {
        patch.apply(&mut g.session);
        log::trace!("session.merge gen={} fields={:?}", generation, patch.fields());
        // No subscribers is fine; the snapshot is still authoritative.
        let _ = self.changes.send(SessionChange { generation, patch });
    }

    /// Starts a new sequence: supersedes whatever was in flight and raises
    /// `loading`. The returned guard releases `loading` when dropped.
    pub fn begin_sequence(&self, label: &'static str) -> SequenceGuard {
        let generation = {
            let mut g = self.inner.write();
            g.generation += 1;
            let generation = g.generation;
            self.apply_locked(&mut g, generation, SessionPatch::loading(true));
            generation
        };
        log::debug!("session.sequence.begin label={} gen={}", label, generation);
        SequenceGuard {
            store: self.clone(),
            generation,
            label,
            released: AtomicBool::new(false),
        }
    }

    /// Drops the authenticated account and invalidates in-flight sequences.
    pub fn reset_account(&self) {
        let mut g = self.inner.write();
        g.generation += 1;
        let generation = g.generation;
        self.apply_locked(&mut g, generation, SessionPatch::signed_out());
    }

    /// Reaction to the wallet's network-change notification. Returns whether
    /// the payload was understood.
    pub fn on_network_changed(&self, chain_id_raw: &str) -> bool {
        let Some(chain_id) = parse_chain_id(chain_id_raw) else {
            log::warn!("session.network_changed.unparseable raw={:?}", chain_id_raw);
            return false;
        };
        let network = NetworkInfo::from_chain_id(chain_id);
        log::info!("session.network_changed chain_id={} name={}", chain_id, network.name);
        self.merge(SessionPatch {
            network: Some(network),
            ..Default::default()
        });
        true
    }
}

/// Write handle for one bootstrap/login run.
pub struct SequenceGuard {
    store: SessionStore,
    generation: u64,
    label: &'static str,
    released: AtomicBool,
}

impl SequenceGuard {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_current(&self) -> bool {
        self.store.generation() == self.generation
    }

    pub fn merge(&self, patch: SessionPatch) -> bool {
        let releases = patch.loading == Some(false);
        let applied = self.store.merge_if_current(self.generation, patch);
        if applied && releases {
            self.released.store(true, Ordering::Relaxed);
        }
        applied
    }
}

impl Drop for SequenceGuard {
    fn drop(&mut self) {
        if self.released.load(Ordering::Relaxed) {
            return;
        }
        if self
            .store
            .merge_if_current(self.generation, SessionPatch::loading(false))
        {
            log::debug!(
                "session.sequence.released label={} gen={}",
                self.label,
                self.generation
            );
        }
    }
}
