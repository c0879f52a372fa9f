//! Startup / login sequencing and the event dispatcher.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    chain_reader::ChainReader,
    chain_writer::{ChainWriter, WriteError},
    events::{parse_accounts, SessionEvent},
    gateway::{ProviderGateway, TxReceipt},
    price_oracle::RateSource,
    session::{SequenceGuard, SessionPatch, SessionStore},
    utils::units_to_decimal,
};

#[derive(Clone)]
pub struct BootstrapController {
    store: SessionStore,
    gateway: ProviderGateway,
    reader: ChainReader,
    writer: ChainWriter,
    rates: Arc<dyn RateSource>,
    tracked_tokens: Vec<Address>,
}

impl BootstrapController {
    pub fn new(
        store: SessionStore,
        gateway: ProviderGateway,
        reader: ChainReader,
        writer: ChainWriter,
        rates: Arc<dyn RateSource>,
        tracked_tokens: Vec<Address>,
    ) -> Self {
        Self {
            store,
            gateway,
            reader,
            writer,
            rates,
            tracked_tokens,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Startup sequence: reference prices, then login if the wallet already
    /// exposes an account. A price failure aborts the run and is returned.
    pub async fn bootstrap(&self) -> Result<()> {
        let seq = self.store.begin_sequence("bootstrap");

        let exchange_rates = self
            .rates
            .fetch_rates()
            .await
            .context("bootstrap exchange rates")?;
        seq.merge(SessionPatch {
            exchange_rates: Some(exchange_rates),
            ..Default::default()
        });

        if self.gateway.has_injected_wallet() {
            match self.gateway.get_signer() {
                Ok(signer) => match signer.address().await {
                    Ok(address) if address != Address::ZERO => self.login_in(&seq).await,
                    Ok(_) => log::info!("bootstrap.no_signer gen={}", seq.generation()),
                    Err(e) => log::info!("bootstrap.no_signer gen={} err={}", seq.generation(), e),
                },
                Err(e) => log::info!("bootstrap.no_signer gen={} err={}", seq.generation(), e),
            }
        }

        seq.merge(SessionPatch::loading(false));
        Ok(())
    }

    pub async fn login(&self) {
        if !self.gateway.has_injected_wallet() {
            log::error!("login.wallet_required mode={}", self.gateway.mode().as_str());
            return;
        }
        let seq = self.store.begin_sequence("login");
        self.login_in(&seq).await;
    }

    async fn login_in(&self, seq: &SequenceGuard) {
        if let Err(e) = self.try_login(seq).await {
            if !seq.is_current() {
                log::debug!(
                    "login.superseded label={} gen={} err={:#}",
                    seq.label(),
                    seq.generation(),
                    e
                );
                return;
            }
            log::error!(
                "login.failed label={} gen={} err={:#}",
                seq.label(),
                seq.generation(),
                e
            );
        }
    }

    async fn try_login(&self, seq: &SequenceGuard) -> Result<()> {
        self.gateway
            .request_accounts()
            .await
            .context("request account access")?;
        let address = self
            .gateway
            .get_signer()?
            .address()
            .await
            .context("signer address")?;

        let provider = self.gateway.provider();
        let (name, balance, network) = tokio::try_join!(
            provider.lookup_address(address),
            provider.balance(address),
            self.gateway.get_network(),
        )
        .context("account details")?;

        seq.merge(SessionPatch {
            address: Some(Some(address)),
            ..Default::default()
        });
        log::info!("login.address gen={} address={}", seq.generation(), address);

        self.refresh_token_balances(seq, address).await?;
        self.refresh_protocol_token_balance(seq).await?;
        self.refresh_pool(seq).await?;
        self.refresh_protocol_params(seq).await?;
        self.refresh_next_rebalance(seq).await?;

        seq.merge(SessionPatch {
            name: Some(name.unwrap_or_default()),
            balance: Some(units_to_decimal(balance, 18)),
            network: Some(network),
            loading: Some(false),
            ..Default::default()
        });
        Ok(())
    }

    async fn refresh_token_balances(&self, seq: &SequenceGuard, account: Address) -> Result<()> {
        let mut balances = HashMap::with_capacity(self.tracked_tokens.len());
        for token in &self.tracked_tokens {
            let bal = self
                .reader
                .token_balance(*token, account)
                .await
                .with_context(|| format!("balanceOf token={token}"))?;
            balances.insert(*token, bal);
        }
        seq.merge(SessionPatch {
            token_balances: Some(balances),
            ..Default::default()
        });
        Ok(())
    }

    async fn refresh_protocol_token_balance(&self, seq: &SequenceGuard) -> Result<()> {
        let bal = self
            .reader
            .protocol_token_balance()
            .await
            .context("protocol token balance")?;
        seq.merge(SessionPatch {
            protocol_token_balance: Some(bal),
            ..Default::default()
        });
        Ok(())
    }

    async fn refresh_pool(&self, seq: &SequenceGuard) -> Result<()> {
        let pool = self.reader.pool_state().await.context("pool price")?;
        seq.merge(SessionPatch {
            pool: Some(pool),
            ..Default::default()
        });
        Ok(())
    }

    async fn refresh_protocol_params(&self, seq: &SequenceGuard) -> Result<()> {
        let params = self
            .reader
            .protocol_params()
            .await
            .context("protocol params")?;
        seq.merge(SessionPatch {
            protocol_params: Some(params),
            ..Default::default()
        });
        Ok(())
    }

    async fn refresh_next_rebalance(&self, seq: &SequenceGuard) -> Result<()> {
        let at = self
            .reader
            .next_rebalance()
            .await
            .context("next rebalance")?;
        seq.merge(SessionPatch {
            next_rebalance_at: Some(Some(at)),
            ..Default::default()
        });
        Ok(())
    }

    pub async fn rebalance(&self) -> Result<TxReceipt, WriteError> {
        match self.writer.rebalance().await {
            Ok(r) => Ok(r),
            Err(e) => {
                log::error!("rebalance.failed err={}", e);
                Err(e)
            }
        }
    }
}

fn spawn_sequence(
    inflight: &mut Option<JoinHandle<()>>,
    controller: &BootstrapController,
    event: SessionEvent,
) {
    if let Some(prev) = inflight.take() {
        if !prev.is_finished() {
            log::info!("dispatch.superseded by={}", event.kind());
            prev.abort();
        }
    }
    let ctl = controller.clone();
    *inflight = Some(tokio::spawn(async move {
        match event {
            SessionEvent::Login => ctl.login().await,
            _ => {
                if let Err(e) = ctl.bootstrap().await {
                    log::error!("bootstrap.failed err={:#}", e);
                }
            }
        }
    }));
}

/// A login without a signing wallet never opens a sequence, so it must not
/// supersede the one in flight either.
fn login_or_skip(
    inflight: &mut Option<JoinHandle<()>>,
    controller: &BootstrapController,
    source: &str,
) {
    if !controller.gateway.has_injected_wallet() {
        log::error!(
            "login.wallet_required mode={} source={}",
            controller.gateway.mode().as_str(),
            source
        );
        return;
    }
    spawn_sequence(inflight, controller, SessionEvent::Login);
}

/// Consumes session events in arrival order. Returns once every sender is
/// gone and the last sequence has finished.
pub async fn run_dispatcher(controller: BootstrapController, mut rx: mpsc::Receiver<SessionEvent>) {
    let mut inflight: Option<JoinHandle<()>> = None;

    while let Some(event) = rx.recv().await {
        log::debug!("dispatch.event kind={}", event.kind());
        match event {
            SessionEvent::Bootstrap => {
                spawn_sequence(&mut inflight, &controller, SessionEvent::Bootstrap)
            }
            SessionEvent::Login => login_or_skip(&mut inflight, &controller, "login"),
            SessionEvent::AccountsChanged(raw) => {
                let accounts = parse_accounts(&raw);
                if accounts.is_empty() {
                    log::info!("dispatch.accounts_changed accounts=0 -> reset+bootstrap");
                    controller.store.reset_account();
                    spawn_sequence(&mut inflight, &controller, SessionEvent::Bootstrap);
                } else {
                    log::info!("dispatch.accounts_changed accounts={} -> login", accounts.len());
                    login_or_skip(&mut inflight, &controller, "accounts_changed");
                }
            }
            SessionEvent::NetworkChanged(raw) => {
                controller.store.on_network_changed(&raw);
            }
            SessionEvent::Disconnected => {
                let interrupted = match inflight.take() {
                    Some(prev) if !prev.is_finished() => {
                        prev.abort();
                        true
                    }
                    _ => false,
                };
                log::info!("dispatch.disconnected interrupted={}", interrupted);
                controller.store.reset_account();
                // The interrupted run may not have loaded reference prices yet.
                if interrupted {
                    spawn_sequence(&mut inflight, &controller, SessionEvent::Bootstrap);
                }
            }
        }
    }

    if let Some(last) = inflight.take() {
        let _ = last.await;
    }
    log::info!("dispatch.stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::U256;
    use alloy_sol_types::SolCall;

    use super::*;
    use crate::{
        config::Settings,
        contracts::IProtocolToken,
        events,
        gateway::ConnectionMode,
        mock::{MockRates, MockWallet},
        session::SessionChange,
    };

    const E18: u128 = 1_000_000_000_000_000_000;

    struct Harness {
        wallet: MockWallet,
        settings: Settings,
        controller: BootstrapController,
    }

    fn harness(mode: ConnectionMode, rates: MockRates) -> Harness {
        let settings = Settings::for_tests();
        let wallet = MockWallet::new();
        let gw = ProviderGateway::new(Arc::new(wallet.clone()), mode);
        let controller = BootstrapController::new(
            SessionStore::new(),
            gw.clone(),
            ChainReader::new(gw.clone(), &settings),
            ChainWriter::new(gw, &settings),
            Arc::new(rates),
            settings.tracked_tokens.clone(),
        );
        Harness {
            wallet,
            settings,
            controller,
        }
    }

    /// Populates the chain so that a full login succeeds for `who`.
    fn seed_chain(h: &Harness, who: Address) {
        let s = &h.settings;
        let w = &h.wallet;
        w.set_balance(who, U256::from(3 * E18 / 2));
        w.set_name(who, "alice.eth");
        w.set_chain_id(1);
        w.set_token_balance(s.token_address, who, U256::from(10 * E18));
        w.set_token_balance(s.weth_address, who, U256::from(E18));
        w.set_token_balance(s.token_address, s.token_address, U256::from(7 * E18));
        w.set_token_balance(s.token_address, s.pair_address, U256::from(100 * E18));
        w.set_token_balance(s.weth_address, s.pair_address, U256::from(50 * E18));
        let t = s.token_address;
        w.set_u256(t, IProtocolToken::liquidityLockDivisorCall {}.abi_encode(), U256::from(25u64));
        w.set_u256(t, IProtocolToken::callerRewardDivisorCall {}.abi_encode(), U256::from(50u64));
        w.set_u256(t, IProtocolToken::rebalanceDivisorCall {}.abi_encode(), U256::from(100u64));
        w.set_u256(t, IProtocolToken::lastRebalanceCall {}.abi_encode(), U256::from(1_000u64));
        w.set_u256(t, IProtocolToken::rebalanceIntervalCall {}.abi_encode(), U256::from(500u64));
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionChange>) -> Vec<Vec<&'static str>> {
        let mut out = Vec::new();
        while let Ok(c) = rx.try_recv() {
            out.push(c.patch.fields());
        }
        out
    }

    async fn wait_until(store: &SessionStore, pred: impl Fn(&crate::session::Session) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if pred(&store.snapshot()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("session never reached expected state");
    }

    #[tokio::test]
    async fn bootstrap_without_wallet_is_read_only() {
        let h = harness(ConnectionMode::ReadOnly, MockRates::ok(&[("ETH", 1800.0)]));
        h.wallet.set_accounts(vec![Address::repeat_byte(1)]);

        h.controller.bootstrap().await.unwrap();

        let s = h.controller.store().snapshot();
        assert!(!s.loading);
        assert!(s.address.is_none());
        assert_eq!(s.exchange_rates["ETH"], 1800.0);
        assert_eq!(s.balance, 0.0);
        assert!(s.token_balances.is_empty());
        assert!(s.protocol_params.is_empty());
        assert!(s.next_rebalance_at.is_none());
        assert!(!h.wallet.log().contains(&"request_accounts".to_string()));
    }

    #[tokio::test]
    async fn bootstrap_with_unconnected_wallet_stays_signed_out() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[("ETH", 1.0)]));

        h.controller.bootstrap().await.unwrap();

        let s = h.controller.store().snapshot();
        assert!(!s.loading);
        assert!(s.address.is_none());
        assert!(!s.exchange_rates.is_empty());
    }

    #[tokio::test]
    async fn rates_failure_aborts_but_releases_loading() {
        let h = harness(ConnectionMode::Injected, MockRates::failing());
        let who = Address::repeat_byte(0x0a);
        h.wallet.set_accounts(vec![who]);
        seed_chain(&h, who);

        assert!(h.controller.bootstrap().await.is_err());

        let s = h.controller.store().snapshot();
        assert!(!s.loading);
        assert!(s.address.is_none());
        assert!(h.wallet.log().is_empty());
    }

    #[tokio::test]
    async fn login_sets_address_before_details() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[("ETH", 1.0)]));
        let who = Address::repeat_byte(0x0a);
        h.wallet.set_accounts(vec![who]);
        seed_chain(&h, who);
        let mut rx = h.controller.store().subscribe();

        h.controller.login().await;

        let merges = drain(&mut rx);
        assert_eq!(
            merges,
            vec![
                vec!["loading"],
                vec!["address"],
                vec!["token_balances"],
                vec!["protocol_token_balance"],
                vec!["pool"],
                vec!["protocol_params"],
                vec!["next_rebalance_at"],
                vec!["loading", "network", "name", "balance"],
            ]
        );

        let s = h.controller.store().snapshot();
        let st = &h.settings;
        assert!(!s.loading);
        assert_eq!(s.address, Some(who));
        assert_eq!(s.name, "alice.eth");
        assert_eq!(s.balance, 1.5);
        assert_eq!(s.network.name, "homestead");
        assert_eq!(s.token_balances[&st.token_address], 10.0);
        assert_eq!(s.token_balances[&st.weth_address], 1.0);
        assert_eq!(s.protocol_token_balance, 7.0);
        assert_eq!(s.pool.price, 2.0);
        assert_eq!(s.protocol_params["liquidity_lock"], 4.0);
        assert_eq!(s.protocol_params["caller_reward"], 2.0);
        assert_eq!(s.protocol_params["rebalance"], 1.0);
        assert_eq!(s.next_rebalance_at.unwrap().timestamp(), 1_500);
    }

    #[tokio::test]
    async fn login_without_wallet_does_not_touch_session() {
        let h = harness(ConnectionMode::ReadOnly, MockRates::ok(&[]));
        let mut rx = h.controller.store().subscribe();
        h.controller.login().await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(h.controller.store().generation(), 0);
    }

    #[tokio::test]
    async fn rejected_login_leaves_session_unauthenticated() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[]));
        h.wallet.set_accounts(vec![Address::repeat_byte(2)]);
        h.wallet.reject_requests(true);

        h.controller.login().await;

        let s = h.controller.store().snapshot();
        assert!(s.address.is_none());
        assert!(!s.loading);
    }

    #[tokio::test]
    async fn refresh_failure_mid_login_keeps_partial_state_and_releases_loading() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[]));
        let who = Address::repeat_byte(0x0b);
        h.wallet.set_accounts(vec![who]);
        // Pair is empty: the pool price refresh fails after balances landed.
        h.wallet.set_token_balance(h.settings.token_address, who, U256::from(E18));

        h.controller.login().await;

        let s = h.controller.store().snapshot();
        assert_eq!(s.address, Some(who));
        assert_eq!(s.token_balances[&h.settings.token_address], 1.0);
        assert_eq!(s.pool, Default::default());
        assert!(s.name.is_empty());
        assert!(!s.loading);
    }

    #[tokio::test]
    async fn empty_accounts_event_resets_and_bootstraps() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[("ETH", 2.0)]));
        let who = Address::repeat_byte(0x0c);
        h.wallet.set_accounts(vec![who]);
        seed_chain(&h, who);
        h.controller.login().await;
        assert_eq!(h.controller.store().snapshot().address, Some(who));

        h.wallet.set_accounts(vec![]);
        let gen_before = h.controller.store().generation();
        let (tx, rx) = events::channel(4);
        let dispatcher = tokio::spawn(run_dispatcher(h.controller.clone(), rx));
        tx.send(SessionEvent::AccountsChanged(vec![])).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let store = h.controller.store();
        let s = store.snapshot();
        assert!(s.address.is_none());
        assert!(s.token_balances.is_empty());
        assert_eq!(s.balance, 0.0);
        assert!(!s.loading);
        assert_eq!(s.exchange_rates["ETH"], 2.0);
        // reset + a fresh bootstrap generation
        assert_eq!(store.generation(), gen_before + 2);
    }

    #[tokio::test]
    async fn connecting_mid_session_logs_in() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[("ETH", 2.0)]));
        let (tx, rx) = events::channel(4);
        let dispatcher = tokio::spawn(run_dispatcher(h.controller.clone(), rx));

        tx.send(SessionEvent::Bootstrap).await.unwrap();
        let store = h.controller.store().clone();
        wait_until(&store, |s| !s.loading && !s.exchange_rates.is_empty()).await;
        assert!(store.snapshot().address.is_none());

        let who = Address::repeat_byte(0xab);
        h.wallet.set_accounts(vec![who]);
        seed_chain(&h, who);
        tx.send(SessionEvent::AccountsChanged(vec![who.to_string()]))
            .await
            .unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let s = store.snapshot();
        assert_eq!(s.address, Some(who));
        assert_eq!(s.balance, 1.5);
        assert_eq!(s.pool.reserve_a, 100.0);
        assert_eq!(s.pool.reserve_b, 50.0);
        assert!(!s.loading);
    }

    #[tokio::test]
    async fn network_event_only_updates_network() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[]));
        let (tx, rx) = events::channel(4);
        let dispatcher = tokio::spawn(run_dispatcher(h.controller.clone(), rx));
        tx.send(SessionEvent::NetworkChanged("11155111".into()))
            .await
            .unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let s = h.controller.store().snapshot();
        assert_eq!(s.network.name, "sepolia");
        assert!(h.wallet.log().is_empty());
    }

    #[tokio::test]
    async fn stale_sequence_cannot_clobber_newer_one() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[]));
        let store = h.controller.store().clone();
        let stale = store.begin_sequence("login");
        h.controller.bootstrap().await.unwrap();

        let who = Address::repeat_byte(0x99);
        assert!(!stale.merge(SessionPatch {
            address: Some(Some(who)),
            ..Default::default()
        }));
        drop(stale);
        let s = store.snapshot();
        assert!(s.address.is_none());
        assert!(!s.loading);
    }

    #[tokio::test]
    async fn disconnect_clears_account() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[]));
        let who = Address::repeat_byte(0x0d);
        h.wallet.set_accounts(vec![who]);
        seed_chain(&h, who);
        h.controller.login().await;

        let (tx, rx) = events::channel(4);
        let dispatcher = tokio::spawn(run_dispatcher(h.controller.clone(), rx));
        tx.send(SessionEvent::Disconnected).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let s = h.controller.store().snapshot();
        assert!(s.address.is_none());
        assert!(s.protocol_params.is_empty());
        assert!(!s.loading);
    }

    #[tokio::test]
    async fn account_event_without_wallet_leaves_bootstrap_running() {
        let rates = MockRates::ok(&[("ETH", 1800.0)]).with_delay(Duration::from_millis(50));
        let h = harness(ConnectionMode::ReadOnly, rates);
        let (tx, rx) = events::channel(4);
        let dispatcher = tokio::spawn(run_dispatcher(h.controller.clone(), rx));

        tx.send(SessionEvent::Bootstrap).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(SessionEvent::AccountsChanged(vec![
            Address::repeat_byte(1).to_string()
        ]))
        .await
        .unwrap();
        tx.send(SessionEvent::Login).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let store = h.controller.store();
        let s = store.snapshot();
        assert_eq!(s.exchange_rates["ETH"], 1800.0);
        assert!(!s.loading);
        assert!(s.address.is_none());
        assert_eq!(store.generation(), 1);
        assert!(!h.wallet.log().contains(&"request_accounts".to_string()));
    }

    #[tokio::test]
    async fn account_removal_supersedes_slow_login() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[("ETH", 2.0)]));
        let who = Address::repeat_byte(0x0f);
        h.wallet.set_accounts(vec![who]);
        seed_chain(&h, who);
        h.wallet.set_request_delay(Duration::from_millis(100));
        let store = h.controller.store().clone();

        let (tx, rx) = events::channel(4);
        let dispatcher = tokio::spawn(run_dispatcher(h.controller.clone(), rx));
        tx.send(SessionEvent::Login).await.unwrap();
        wait_until(&store, |s| s.loading).await;

        h.wallet.set_accounts(vec![]);
        tx.send(SessionEvent::AccountsChanged(vec![])).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();
        // Long enough for the old login to have finished had it survived.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let s = store.snapshot();
        assert!(s.address.is_none());
        assert!(s.token_balances.is_empty());
        assert!(s.name.is_empty());
        assert!(!s.loading);
        assert_eq!(s.exchange_rates["ETH"], 2.0);
        // login, reset, bootstrap
        assert_eq!(store.generation(), 3);
    }

    #[tokio::test]
    async fn second_bootstrap_replaces_first_mid_fetch() {
        let rates = MockRates::ok(&[("ETH", 3.0)]).with_delay(Duration::from_millis(30));
        let h = harness(ConnectionMode::ReadOnly, rates);
        let mut changes = h.controller.store().subscribe();
        let (tx, rx) = events::channel(4);
        let dispatcher = tokio::spawn(run_dispatcher(h.controller.clone(), rx));

        tx.send(SessionEvent::Bootstrap).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(SessionEvent::Bootstrap).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let store = h.controller.store();
        assert_eq!(store.generation(), 2);
        let s = store.snapshot();
        assert_eq!(s.exchange_rates["ETH"], 3.0);
        assert!(!s.loading);

        // Nothing from the first run landed after the second began.
        let mut seen_second = false;
        while let Ok(c) = changes.try_recv() {
            if c.generation == 2 {
                seen_second = true;
            }
            assert!(!(seen_second && c.generation == 1));
        }
        assert!(seen_second);
    }

    #[tokio::test]
    async fn disconnect_mid_bootstrap_still_loads_rates() {
        let rates = MockRates::ok(&[("ETH", 4.0)]).with_delay(Duration::from_millis(30));
        let h = harness(ConnectionMode::ReadOnly, rates);
        let (tx, rx) = events::channel(4);
        let dispatcher = tokio::spawn(run_dispatcher(h.controller.clone(), rx));

        tx.send(SessionEvent::Bootstrap).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(SessionEvent::Disconnected).await.unwrap();
        drop(tx);
        dispatcher.await.unwrap();

        let store = h.controller.store();
        let s = store.snapshot();
        assert_eq!(s.exchange_rates["ETH"], 4.0);
        assert!(!s.loading);
        assert!(s.address.is_none());
        assert_eq!(store.generation(), 3);
    }

    #[tokio::test]
    async fn rebalance_goes_through_writer() {
        let h = harness(ConnectionMode::Injected, MockRates::ok(&[]));
        h.wallet.set_accounts(vec![Address::repeat_byte(0x0e)]);
        let receipt = h.controller.rebalance().await.unwrap();
        assert!(receipt.success);
        assert_eq!(h.wallet.sent().len(), 1);
    }
}
