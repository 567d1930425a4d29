mod cli;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foundry_core::{
    collaborators::{
        CommandDispatcher, CommandPublisher, Dispatcher, InboxTriggerSource, ProcessGenerator,
    },
    load_config, load_config_or_default,
    orchestrator::{Promoter, SystemClock},
    supervisor::{HttpHealthProbe, OsProcessSupervisor},
    validate_config, Config, LedgerStore, Orchestrator, PromotionRetryWorker, ServiceSupervisor,
    SqliteLedger, StatusReporter,
};

use cli::{Cli, LogFormat};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn load(cli: &Cli) -> Result<Config> {
    let (path, explicit) = cli.config_path();
    info!("Loading configuration from {:?}", path);
    let mut config = if explicit {
        load_config(&path)
    } else {
        load_config_or_default(&path)
    }
    .with_context(|| format!("Failed to load config from {:?}", path))?;

    if let Some(requested) = cli.apply(&mut config.orchestrator) {
        warn!(
            requested,
            interval = config.orchestrator.interval_secs,
            "Interval below minimum, raised"
        );
    }
    validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    info!("foundry {} starting", VERSION);
    let config = load(&cli)?;
    info!("Database path: {:?}", config.database.path);
    info!("Status path: {:?}", config.status.path);

    let ttl = chrono::Duration::from_std(config.database.token_ttl())
        .context("database.token_ttl_hours is out of range")?;
    let ledger: Arc<dyn LedgerStore> = Arc::new(
        SqliteLedger::new(&config.database.path)
            .context("Failed to open ledger")?
            .with_token_ttl(ttl),
    );
    info!("Ledger initialized");

    let status = StatusReporter::new(&config.status.path);
    let generator = Arc::new(ProcessGenerator::new(config.generator.clone()));

    let mut builder = Orchestrator::builder(
        config.orchestrator.clone(),
        Arc::clone(&ledger),
        generator,
        status,
    );

    if config.services.is_empty() {
        info!("No companion services configured");
    } else {
        let probe = HttpHealthProbe::new(config.supervisor.probe_timeout())
            .context("Failed to create health probe")?;
        let supervisor = ServiceSupervisor::new(
            config.services.clone(),
            Arc::new(OsProcessSupervisor::new(&config.supervisor)),
            Arc::new(probe),
            config.supervisor.clone(),
        );
        info!("Supervising {} companion service(s)", config.services.len());
        builder = builder.services(Arc::new(supervisor));
    }

    match &config.publisher {
        Some(publisher) => {
            info!("Using publisher command {:?}", publisher.program);
            builder = builder.publisher(Arc::new(CommandPublisher::new(publisher.clone())));
        }
        None => info!("No publisher configured, deployment disabled"),
    }

    let dispatcher: Option<Arc<dyn Dispatcher>> = config.dispatcher.as_ref().map(|d| {
        info!("Using dispatcher command {:?}", d.program);
        Arc::new(CommandDispatcher::new(d.clone())) as Arc<dyn Dispatcher>
    });
    match &dispatcher {
        Some(dispatcher) => builder = builder.dispatcher(Arc::clone(dispatcher)),
        None => info!("No dispatcher configured, promotion disabled"),
    }

    if let Some(inbox) = &config.orchestrator.trigger_inbox {
        info!("Watching trigger inbox {:?}", inbox);
        builder = builder.triggers(Arc::new(InboxTriggerSource::new(inbox)));
    }

    let orchestrator = Arc::new(builder.build());

    // Promotion retry worker
    let worker_handle = match &dispatcher {
        Some(dispatcher) if config.worker.enabled && config.orchestrator.publish => {
            let promoter = Promoter::new(
                Arc::clone(&ledger),
                Arc::clone(dispatcher),
                Arc::new(SystemClock),
                config.orchestrator.promotion_channels.clone(),
            );
            let worker =
                PromotionRetryWorker::new(Arc::clone(&ledger), promoter, config.worker.clone());
            Some(worker.spawn(orchestrator.subscribe_shutdown()))
        }
        _ => None,
    };

    // Stop the loop on Ctrl+C or SIGTERM
    let signalled = Arc::clone(&orchestrator);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signalled.shutdown();
    });

    let running = Arc::clone(&orchestrator);
    let outcome = tokio::spawn(async move { running.run().await }).await;

    orchestrator.shutdown();
    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            warn!("Promotion retry worker ended abnormally: {}", e);
        }
    }

    match outcome {
        Ok(summary) => {
            info!(
                ticks = summary.ticks,
                failed = summary.failed_ticks,
                cooldowns = summary.cooldowns,
                "Orchestrator stopped"
            );
            Ok(())
        }
        Err(e) => {
            orchestrator.mark_crashed(&e.to_string()).await;
            Err(anyhow!("orchestrator loop crashed: {}", e))
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
