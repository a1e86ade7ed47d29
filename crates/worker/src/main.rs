use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowhub_events::EventBus;
use flowhub_parsers::{ParserRegistry, SubprocessRunner, ToolRunner};
use flowhub_store::PgWorkflowStore;
use flowhub_worker::{CliGitCloner, VersionIngestor, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowhub_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        womtool = %config.womtool_path,
        cwltool = %config.cwltool_path,
        nextflow = %config.nextflow_path,
        timeout_secs = config.command_timeout_secs,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    sqlx::migrate!("../store/migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgWorkflowStore::new(pool));

    // --- Parsers ---
    let runner: Arc<dyn ToolRunner> = Arc::new(SubprocessRunner);
    let registry = Arc::new(
        ParserRegistry::build(&config.parser_config(), Arc::clone(&runner))
            .expect("Failed to build parser registry"),
    );

    // --- Git ---
    let cloner = Arc::new(CliGitCloner::new(
        Arc::clone(&runner),
        config.command_timeout(),
    ));

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let receiver = event_bus.subscribe();
    tracing::info!("Event bus created");

    // --- Ingestor ---
    let cancel = tokio_util::sync::CancellationToken::new();
    let ingestor = VersionIngestor::new(store, registry, cloner);

    let loop_cancel = cancel.clone();
    let ingest_handle = tokio::spawn(async move {
        ingestor.run(receiver, loop_cancel).await;
    });

    tracing::info!("Worker started, waiting for version events");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    if let Err(e) = ingest_handle.await {
        tracing::error!(error = %e, "Ingestor task panicked during shutdown");
    }
    tracing::info!("Worker stopped");
}
