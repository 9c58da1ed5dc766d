use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use tokio::sync::watch;

use chainsync_relayer::api::{self, ApiState};
use chainsync_relayer::chain::{EvmChainClient, RelayContract, TransferEventSource};
use chainsync_relayer::config::Config;
use chainsync_relayer::confirmation::{ConfirmationTracker, EvmReceiptSource, ReceiptSource};
use chainsync_relayer::relay::RelayCoordinator;
use chainsync_relayer::store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
use chainsync_relayer::transfer::TransferStateMachine;
use chainsync_relayer::types::ChainId;
use chainsync_relayer::watchers::{CursorBoard, WatcherConfig, WatcherManager};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting ChainSync relayer");

    let config = Config::load()?;
    tracing::info!(
        chains = config.chains.len(),
        token_mappings = config.tokens.map.len(),
        database = config.database.is_some(),
        "Configuration loaded"
    );

    // Ledger
    let store: Arc<dyn LedgerStore> = match &config.database {
        Some(db) => {
            let store = PgLedgerStore::connect(&db.url).await?;
            tracing::info!("Database connected, migrations complete");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory ledger");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    // Chain clients
    let mut sources: Vec<(Arc<dyn TransferEventSource>, WatcherConfig)> = Vec::new();
    let mut destinations: HashMap<ChainId, Arc<dyn RelayContract>> = HashMap::new();
    let mut receipts: HashMap<ChainId, Arc<dyn ReceiptSource>> = HashMap::new();

    for chain in config.enabled_chains() {
        let client = Arc::new(
            EvmChainClient::new(chain, &config.relayer, &config.validator.private_key)
                .wrap_err_with(|| format!("Failed to create client for chain {}", chain.name))?,
        );

        match client.is_validator().await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                chain = %chain.name,
                validator = %client.validator_address(),
                "Signer is not a registered validator, relays will revert"
            ),
            Err(e) => tracing::warn!(
                chain = %chain.name,
                error = %e,
                "Could not check validator registration"
            ),
        }
        if let Ok(balance) = client.validator_gas_balance().await {
            tracing::info!(chain = client.name(), balance = %balance, "Validator gas balance");
        }

        sources.push((
            client.clone() as Arc<dyn TransferEventSource>,
            WatcherConfig {
                poll_interval: config.relayer.poll_interval,
                max_block_range: config.relayer.max_block_range,
                start_block: chain.start_block,
                start_lag: config.relayer.start_block_lag,
            },
        ));
        destinations.insert(chain.chain_id, client);
        receipts.insert(
            chain.chain_id,
            Arc::new(EvmReceiptSource::new(
                chain.rpc_url.clone(),
                chain.required_confirmations,
            )?),
        );

        tracing::info!(
            chain = %chain.name,
            chain_id = chain.chain_id,
            contract = %chain.contract_address,
            "Chain client initialized"
        );
    }

    let coordinator = Arc::new(
        RelayCoordinator::new(
            config.tokens.map.clone(),
            destinations,
            config.relayer.retry_config(),
        )
        .with_state_machine(TransferStateMachine::new(store.clone())),
    );
    let cursors = Arc::new(CursorBoard::new());
    let watcher_manager = WatcherManager::new(sources, coordinator.clone(), cursors.clone());
    let confirmation_tracker =
        ConfirmationTracker::new(store.clone(), receipts, config.relayer.poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(watchers = watcher_manager.len(), "Managers initialized, starting processing");

    let api_state = ApiState::new(cursors, coordinator.clone());
    let (watchers, maintenance, confirmations, api) = tokio::join!(
        watcher_manager.run(shutdown_rx.clone()),
        run_maintenance(
            coordinator,
            config.relayer.poll_interval,
            config.relayer.processed_max_age,
            shutdown_rx.clone(),
        ),
        confirmation_tracker.run(shutdown_rx.clone()),
        api::start_api_server(config.api.port, api_state, shutdown_rx),
    );

    for (name, result) in [
        ("watcher manager", watchers),
        ("maintenance", maintenance),
        ("confirmation tracker", confirmations),
        ("API server", api),
    ] {
        if let Err(e) = result {
            tracing::error!(component = name, error = %e, "Component stopped with error");
        }
    }

    tracing::info!("ChainSync relayer stopped");
    Ok(())
}

/// Re-drive due relay retries and prune the processed set
async fn run_maintenance(
    coordinator: Arc<RelayCoordinator>,
    interval: Duration,
    processed_max_age: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) -> eyre::Result<()> {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let retried = coordinator.retry_due().await;
        if retried > 0 {
            tracing::debug!(retried, "Retried pending relays");
        }
        if let Some(max_age) = processed_max_age {
            coordinator.prune_processed(max_age);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("Maintenance task stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chainsync_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
