use std::sync::Arc;

use clap::Parser;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use train_conductor::config::TrainerConfig;
use train_conductor::orchestrator::{KubeOrchestrator, OrchestratorClient};
use train_conductor::registry::{RedisRegistry, RegistryClient};
use train_conductor::{eventloop, util::colors::FG2};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eosin_common::init();
    tracing_subscriber::fmt::init();

    let cfg = TrainerConfig::parse();
    if let Err(e) = cfg.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    println!(
        "{} {}",
        "train-conductor starting •".color(FG2),
        format!(
            "namespace={} image={} reconcile_interval={}s",
            cfg.target_namespace, cfg.tuning_image, cfg.reconcile_interval_secs
        )
        .color(FG2)
    );

    let orchestrator: Arc<dyn OrchestratorClient> =
        Arc::new(KubeOrchestrator::try_new(&cfg.target_namespace).await?);
    let registry: Arc<dyn RegistryClient> = Arc::new(RedisRegistry::connect(&cfg).await?);

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        eosin_common::shutdown::shutdown_signal().await;
        shutdown_cancel.cancel();
    });

    #[cfg(feature = "metrics")]
    if let Some(port) = cfg.metrics_port {
        let metrics = train_conductor::util::metrics::ReconcilerMetrics::new("train_conductor");
        train_conductor::util::metrics::install(metrics);
        tokio::spawn(train_conductor::util::metrics::serve(port));
    }

    eosin_common::signal_ready();
    eventloop::run(Arc::new(cfg), orchestrator, registry, cancel).await;

    println!("{}", "train-conductor stopped".red());
    Ok(())
}
