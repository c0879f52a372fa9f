mod chain_reader;
mod chain_writer;
mod config;
mod contracts;
mod controller;
mod dashboard;
mod events;
mod gateway;
mod price_oracle;
mod session;
mod utils;

#[cfg(test)]
mod mock;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::{
    chain_reader::ChainReader,
    chain_writer::ChainWriter,
    config::Settings,
    controller::{run_dispatcher, BootstrapController},
    dashboard::DashboardState,
    events::SessionEvent,
    gateway::ProviderGateway,
    price_oracle::PriceOracleClient,
    session::SessionStore,
};

#[derive(Debug, Parser)]
#[command(name = "pooldash", version)]
struct Cli {
    /// Override WALLET_RPC_URL (wallet endpoint that can sign)
    #[arg(long)]
    wallet_rpc: Option<String>,

    /// Do not start the HTTP dashboard
    #[arg(long)]
    no_dashboard: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(url) = cli.wallet_rpc {
        settings.wallet_rpc_url = Some(url);
    }
    if cli.no_dashboard {
        settings.dashboard_enabled = false;
    }

    let store = SessionStore::new();
    let gateway = ProviderGateway::detect(&settings).await?;

    log::info!(
        "app.start wallet_mode={} token={} pair={} convention={:?}",
        gateway.mode().as_str(),
        settings.token_address,
        settings.pair_address,
        settings.pool_price_convention
    );

    let controller = BootstrapController::new(
        store.clone(),
        gateway.clone(),
        ChainReader::new(gateway.clone(), &settings),
        ChainWriter::new(gateway.clone(), &settings),
        Arc::new(PriceOracleClient::new(&settings)?),
        settings.tracked_tokens.clone(),
    );

    let (events_tx, events_rx) = events::channel(settings.event_channel_capacity);

    if gateway.has_injected_wallet() {
        tokio::spawn(events::watch_wallet(
            gateway.clone(),
            events_tx.clone(),
            Duration::from_millis(settings.wallet_poll_ms),
        ));
    }

    // Session change log for operators.
    {
        let mut changes = store.subscribe();
        tokio::spawn(async move {
            while let Ok(c) = changes.recv().await {
                log::debug!("session.change gen={} fields={:?}", c.generation, c.patch.fields());
            }
        });
    }

    // Start dashboard server (optional) in the background.
    if settings.dashboard_enabled {
        let state = DashboardState {
            settings: settings.clone(),
            store: store.clone(),
            controller: controller.clone(),
            events: events_tx.clone(),
            mode: gateway.mode(),
        };
        let url = format!("http://{}:{}/", settings.dashboard_host, settings.dashboard_port);
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve_dashboard(state).await {
                log::error!("dashboard.error {}", e);
            }
        });

        if settings.dashboard_open_browser {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(650)).await;
                let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
            });
        }
    }

    events_tx.send(SessionEvent::Bootstrap).await?;
    drop(events_tx);

    tokio::select! {
        _ = run_dispatcher(controller.clone(), events_rx) => {}
        r = tokio::signal::ctrl_c() => {
            r?;
            log::info!("app.shutdown reason=ctrl_c");
        }
    }

    let s = store.snapshot();
    log::info!(
        "app.stop address={:?} network={} loading={} generation={}",
        s.address,
        s.network.name,
        s.loading,
        store.generation()
    );
    Ok(())
}
