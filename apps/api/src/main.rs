mod agent;
mod artifacts;
mod config;
mod db;
mod errors;
mod generation;
mod models;
mod queue;
mod routes;
mod state;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::agent::{provider, AgentProcessRunner};
use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::db::create_pool;
use crate::models::queue::QueueItemType;
use crate::queue::company::{AgentCompanyStages, CompanyAnalysisHandler};
use crate::queue::dispatcher::Dispatcher;
use crate::queue::scoring::WeightedSourceScorer;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Workbench API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    let artifacts = ArtifactStore::new(s3, config.s3_bucket.clone());
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Initialize the agent runner with the default provider chain
    let providers = provider::default_chain(Path::new(&config.agent_credentials_dir));
    info!(
        "Agent provider chain: {}",
        providers
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    let agent = AgentProcessRunner::new(
        providers,
        PathBuf::from(&config.agent_workdir),
        Duration::from_secs(config.agent_timeout_secs),
    );

    // Initialize source scorer (WeightedSourceScorer by default)
    let scorer = Arc::new(WeightedSourceScorer::default());

    // Queue worker: company analysis behind the agent-backed stages
    let stages = Arc::new(AgentCompanyStages::new(agent.clone()));
    let dispatcher = Arc::new(
        Dispatcher::new(db.clone(), config.stale_claim_secs).register(
            QueueItemType::Company,
            Arc::new(CompanyAnalysisHandler::new(db.clone(), stages)),
        ),
    );
    tokio::spawn(
        dispatcher.run(Duration::from_millis(config.worker_poll_interval_ms)),
    );

    // Periodic sweep for generation steps orphaned by a crash
    tokio::spawn(recover_stale_steps_loop(db.clone(), config.stale_claim_secs));

    // Build app state
    let state = AppState {
        db,
        artifacts,
        agent,
        scorer,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Requeues generation steps stuck in_progress past the staleness threshold.
async fn recover_stale_steps_loop(db: sqlx::PgPool, threshold_secs: i64) {
    let interval = Duration::from_secs((threshold_secs / 2).max(60) as u64);
    loop {
        tokio::time::sleep(interval).await;
        match generation::store::recover_stale_steps(&db, threshold_secs).await {
            Ok(0) => {}
            Ok(n) => warn!("Recovered {n} stale generation step(s)"),
            Err(e) => warn!("Stale step sweep failed: {e}"),
        }
    }
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "workbench-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
