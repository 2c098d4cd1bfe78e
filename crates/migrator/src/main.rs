use anyhow::Result;
use clap::Parser;
use migrator::config::Cli;
use migrator::config::Commands;
use migrator::config::RunArgs;
use migrator::config::Settings;
use migrator::ApplicationBuilder;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate(args) => run_migrate(args).await,
        Commands::Plan(args) => run_plan(args).await,
    }
}

/// Load settings, then start logging at the configured level.
///
/// Logging falls back to INFO so a bad settings file is still reported.
async fn load_settings(args: &RunArgs) -> Result<(Settings, Option<logging::WorkerGuard>)> {
    match Settings::load(&args.config).await {
        Ok(settings) => {
            let guard = logging::init(&settings.log_level);
            Ok((settings, guard))
        }
        Err(report) => {
            let _guard = logging::init("INFO");
            tracing::error!("Failed to load settings: {report:?}");
            Err(anyhow::anyhow!("failed to load settings: {report:?}"))
        }
    }
}

async fn run_migrate(args: RunArgs) -> Result<()> {
    let (settings, _guard) = load_settings(&args).await?;

    tracing::info!(branch = version::branch(), "Starting migrator {}", &**version::VERSION);

    let migrator = ApplicationBuilder::new(settings)
        .with_pod_filter(args.pod)
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("failed to build migrator: {e:?}"))?;

    let report = migrator.run().await;
    if !report.is_clean() {
        tracing::warn!(
            pods_skipped = report.pods_skipped,
            nodes_skipped = report.nodes_skipped,
            containers_failed = report.containers_failed,
            containers_orphaned = report.containers_orphaned,
            pod_listing_failed = report.pod_listing_failed,
            container_listing_failed = report.container_listing_failed,
            "Migration finished with skipped records"
        );
    }

    Ok(())
}

async fn run_plan(args: RunArgs) -> Result<()> {
    let (settings, _guard) = load_settings(&args).await?;

    let migrator = ApplicationBuilder::new(settings)
        .with_pod_filter(args.pod)
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("failed to build migrator: {e:?}"))?;

    let plan = migrator
        .plan()
        .await
        .map_err(|e| anyhow::anyhow!("failed to plan migration: {e:?}"))?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
