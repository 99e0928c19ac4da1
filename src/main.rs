//! Swap Bridge Relayer - ETH/BSC swap bridge control plane
//!
//! Runs one chain observer per chain and the swap, swap-pair and retry
//! engines against a shared Postgres record store.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use swap_bridge_relayer::alert;
use swap_bridge_relayer::api::{self, AppState};
use swap_bridge_relayer::chain::{
    finality, Chain, ChainObserver, ChainProvider, EventSource, ObserverConfig, PerChain,
};
use swap_bridge_relayer::config::{ChainConfig, Settings};
use swap_bridge_relayer::engine::EngineContext;
use swap_bridge_relayer::error::RelayerResult;
use swap_bridge_relayer::events::SwapAgentAbi;
use swap_bridge_relayer::integrity::RecordHasher;
use swap_bridge_relayer::metrics::MetricsServer;
use swap_bridge_relayer::retry::RetryEngine;
use swap_bridge_relayer::state::{PgStore, RecordStore};
use swap_bridge_relayer::swap::{SwapEngine, SwapPairRegistry};
use swap_bridge_relayer::swap_pair::SwapPairEngine;
use swap_bridge_relayer::tx::{ChainSender, RemoteSigner, TransactionSigner, TxTracker};
use swap_bridge_relayer::worker::run_periodic;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Swap Bridge Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for instance {}",
        settings.relayer.instance_id
    );

    // Initialize database connection
    let pg = PgStore::new(&settings.database).await?;
    info!("Database connection established");

    // Run migrations
    pg.run_migrations().await?;
    info!("Database migrations complete");
    let store: Arc<dyn RecordStore> = Arc::new(pg);

    // Chain connections
    let providers = PerChain::new(
        connect(Chain::Eth, &settings.chains.eth).await?,
        connect(Chain::Bsc, &settings.chains.bsc).await?,
    );
    let eth_source: Arc<dyn EventSource> = providers.eth.clone();
    let bsc_source: Arc<dyn EventSource> = providers.bsc.clone();
    let sources = PerChain::new(eth_source, bsc_source);

    let abi = Arc::new(SwapAgentAbi::new()?);
    let notifier = alert::from_config(&settings.alerts, &settings.relayer.instance_id)?;
    let signer: Arc<dyn TransactionSigner> = Arc::new(RemoteSigner::new(&settings.signer)?);

    let sender = |chain: Chain, config: &ChainConfig| -> Result<Arc<ChainSender>> {
        Ok(Arc::new(ChainSender::new(
            chain,
            config.chain_id,
            config.sender()?,
            sources.get(chain).clone(),
            signer.clone(),
            store.clone(),
            notifier.clone(),
        )))
    };

    let ctx = EngineContext {
        store: store.clone(),
        hasher: Arc::new(RecordHasher::new(&settings.relayer.hmac_key)),
        abi: abi.clone(),
        senders: PerChain::new(
            sender(Chain::Eth, &settings.chains.eth)?,
            sender(Chain::Bsc, &settings.chains.bsc)?,
        ),
        tracker: Arc::new(TxTracker::new(
            sources.clone(),
            PerChain::new(
                settings.chains.eth.confirmation_blocks,
                settings.chains.bsc.confirmation_blocks,
            ),
            settings.relayer.max_track_retry,
        )),
        notifier: notifier.clone(),
        agents: PerChain::new(
            settings.chains.eth.swap_agent()?,
            settings.chains.bsc.swap_agent()?,
        ),
        batch_size: settings.relayer.batch_size,
        send_tx_delay: settings.relayer.send_tx_delay(),
    };

    // Routing table from already published pairs
    let registry = SwapPairRegistry::load(store.as_ref()).await?;
    let swap_engine = Arc::new(SwapEngine::new(ctx.clone(), registry));
    let pair_engine = Arc::new(SwapPairEngine::new(ctx.clone(), settings.swap_pair.clone()));
    let retry_engine = Arc::new(RetryEngine::new(ctx.clone()));
    info!("Engines initialized");

    let cancel = CancellationToken::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // Chain observers with their pruning and liveness companions
    let liveness_threshold = Duration::from_secs(settings.alerts.liveness_threshold_secs);
    let prune_interval = Duration::from_secs(settings.relayer.prune_interval_secs);
    let liveness_interval = Duration::from_secs(settings.relayer.liveness_check_interval_secs);
    for chain in Chain::all() {
        let config = match chain {
            Chain::Eth => &settings.chains.eth,
            Chain::Bsc => &settings.chains.bsc,
        };
        let observer = Arc::new(ChainObserver::new(
            chain,
            sources.get(chain).clone(),
            store.clone(),
            abi.clone(),
            notifier.clone(),
            ObserverConfig {
                start_height: config.start_height,
                confirmations: config.confirmation_blocks,
                fetch_interval: config.fetch_interval(),
                contract: config.swap_agent()?,
                prune_window: config.prune_window,
                liveness_threshold,
            },
        )?);

        handles.push(tokio::spawn(observer.clone().run(cancel.clone())));

        let pruner = observer.clone();
        handles.push(spawn_daemon(
            format!("{} pruner", chain),
            prune_interval,
            &cancel,
            move || {
                let pruner = pruner.clone();
                async move { pruner.prune().await.map(drop) }
            },
        ));

        let watchdog = observer;
        handles.push(spawn_daemon(
            format!("{} liveness", chain),
            liveness_interval,
            &cancel,
            move || {
                let watchdog = watchdog.clone();
                async move { watchdog.check_liveness(chrono::Utc::now()).await.map(drop) }
            },
        ));
    }

    // Engine daemons
    let poll = settings.relayer.poll_interval();
    macro_rules! daemon {
        ($name:expr, $engine:expr, $step:ident $(, $arg:ident)?) => {{
            let engine = $engine.clone();
            $(let $arg = $arg.clone();)?
            let ctx = ctx.clone();
            handles.push(spawn_daemon($name.to_string(), poll, &cancel, move || {
                let engine = engine.clone();
                $(let $arg = $arg.clone();)?
                let ctx = ctx.clone();
                async move {
                    let result = engine.$step($(&$arg)?).await.map(drop);
                    if let Err(e) = &result {
                        ctx.escalate($name, e).await;
                    }
                    result
                }
            }));
        }};
    }
    daemon!("swap intake", swap_engine, intake_seen);
    daemon!("swap confirm", swap_engine, confirm_requests);
    daemon!("swap send", swap_engine, send_pending);
    daemon!("swap track", swap_engine, track_fills);
    daemon!("swap pair intake", pair_engine, intake_seen);
    daemon!("swap pair confirm", pair_engine, confirm_requests);
    daemon!("swap pair send", pair_engine, send_pending);
    daemon!("swap pair track", pair_engine, track_creations);
    // finalization hands published pairs to the swap engine's routing table
    daemon!("swap pair finalize", pair_engine, publish, swap_engine);
    daemon!("retry send", retry_engine, process_pending);
    daemon!("retry track", retry_engine, track_retries);

    // Start API server
    handles.push(tokio::spawn({
        let state = AppState {
            store: store.clone(),
            retry: retry_engine.clone(),
            chains: vec![providers.eth.clone(), providers.bsc.clone()],
        };
        let config = settings.api.clone();
        let cancel = cancel.clone();
        async move {
            if let Err(e) = api::run_server(config, state, cancel).await {
                error!("API server error: {}", e);
            }
        }
    }));

    // Start metrics server
    if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = server.run(cancel).await {
                error!("Metrics server error: {}", e);
            }
        }));
    }

    info!("Swap Bridge Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Task ended abnormally: {}", e);
        }
    }

    info!("Swap Bridge Relayer stopped");
    Ok(())
}

/// Connect to a chain and make sure the RPC serves the configured network
async fn connect(chain: Chain, config: &ChainConfig) -> Result<Arc<ChainProvider>> {
    let provider = ChainProvider::new(chain, config)?;
    let reported = provider
        .chain_id()
        .await
        .with_context(|| format!("{} chain id lookup", chain))?;
    if reported != config.chain_id {
        anyhow::bail!(
            "{} RPC serves chain id {}, configured {}",
            chain,
            reported,
            config.chain_id
        );
    }

    let recommended = finality::recommended_confirmations(config.chain_id);
    if config.confirmation_blocks < recommended {
        warn!(
            "{} waits for {} confirmations, {} recommended for chain {}",
            chain, config.confirmation_blocks, recommended, config.chain_id
        );
    }

    info!("Connected to {} (chain id {})", chain, reported);
    Ok(Arc::new(provider))
}

fn spawn_daemon<F, Fut>(
    name: String,
    period: Duration,
    cancel: &CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = RelayerResult<()>> + Send + 'static,
{
    let cancel = cancel.clone();
    tokio::spawn(async move { run_periodic(&name, period, cancel, tick).await })
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,swap_bridge_relayer=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
