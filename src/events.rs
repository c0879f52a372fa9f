//! Typed wallet/session events and the wallet watcher that produces them.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use tokio::sync::mpsc;

use crate::gateway::ProviderGateway;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Bootstrap,
    Login,
    /// Accounts exposed by the wallet, as delivered (hex strings).
    AccountsChanged(Vec<String>),
    /// Raw chain id payload (decimal or `0x` hex).
    NetworkChanged(String),
    Disconnected,
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Bootstrap => "bootstrap",
            SessionEvent::Login => "login",
            SessionEvent::AccountsChanged(_) => "accounts_changed",
            SessionEvent::NetworkChanged(_) => "network_changed",
            SessionEvent::Disconnected => "disconnected",
        }
    }
}

pub fn channel(capacity: usize) -> (mpsc::Sender<SessionEvent>, mpsc::Receiver<SessionEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Valid addresses from an accounts payload; garbage entries are dropped.
pub fn parse_accounts(raw: &[String]) -> Vec<Address> {
    raw.iter()
        .filter_map(|s| match Address::from_str(s.trim()) {
            Ok(a) => Some(a),
            Err(e) => {
                log::warn!("events.accounts.invalid value={:?} err={}", s, e);
                None
            }
        })
        .collect()
}

/// Polls the wallet for account and chain changes and forwards them as
/// events. The first observation is the baseline and emits nothing.
pub async fn watch_wallet(
    gateway: ProviderGateway,
    tx: mpsc::Sender<SessionEvent>,
    poll: Duration,
) {
    let provider = gateway.provider();
    let mut last_accounts: Option<Vec<Address>> = None;
    let mut last_chain: Option<u64> = None;

    let mut tick = tokio::time::interval(poll);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tick.tick().await;

        match provider.accounts().await {
            Ok(accounts) => {
                if last_accounts.as_ref().is_some_and(|prev| *prev != accounts) {
                    let payload = accounts.iter().map(|a| a.to_string()).collect();
                    if tx.send(SessionEvent::AccountsChanged(payload)).await.is_err() {
                        break;
                    }
                }
                last_accounts = Some(accounts);
            }
            Err(e) => log::debug!("events.watch.accounts_failed err={}", e),
        }

        match provider.chain_id().await {
            Ok(chain_id) => {
                if last_chain.is_some_and(|prev| prev != chain_id) {
                    let ev = SessionEvent::NetworkChanged(chain_id.to_string());
                    if tx.send(ev).await.is_err() {
                        break;
                    }
                }
                last_chain = Some(chain_id);
            }
            Err(e) => log::debug!("events.watch.chain_failed err={}", e),
        }
    }
    log::info!("events.watch.stopped");
}
