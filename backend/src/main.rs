//! Harara heatwave risk pipeline - run-once binary
//!
//! Loads configuration and pretrained artifacts, connects the stores,
//! executes one prediction run for every town and prints the run report.
//! Scheduling is left to an external trigger.

use std::{sync::Arc, time::Duration};

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harara_backend::external::google_auth::{DATASTORE_SCOPE, EARTH_ENGINE_SCOPE};
use harara_backend::external::{
    EarthEngineClient, FirestoreDocumentStore, GoogleAuth, ServiceAccountKey,
};
use harara_backend::services::{
    InMemoryPredictionStore, PgPredictionStore, PipelineContext, PredictionMirror,
    PredictionStore, RunOrchestrator, SourceCollector,
};
use harara_backend::{AppError, AppResult, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load_validated()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "harara_pipeline=debug,harara_backend=debug,sqlx=warn".into()
    });
    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Harara heatwave pipeline");
    tracing::info!("Environment: {}", config.environment);

    let context = Arc::new(PipelineContext::load(&config).await?);
    let predictions = connect_prediction_store(&config).await?;
    let mirror = connect_document_mirror(&config).await?;
    let collector = connect_provider(&config).await?;

    let orchestrator = RunOrchestrator::new(context, collector, predictions, mirror);
    let report = orchestrator.run_now().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn connect_prediction_store(config: &Config) -> AppResult<Arc<dyn PredictionStore>> {
    let Some(url) = config.database.url.as_deref() else {
        tracing::warn!("No database configured; predictions are kept in memory only");
        return Ok(Arc::new(InMemoryPredictionStore::new()));
    };

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.is_development() {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    Ok(Arc::new(PgPredictionStore::new(db_pool)))
}

async fn connect_document_mirror(config: &Config) -> AppResult<Option<PredictionMirror>> {
    let store_config = &config.document_store;
    let Some(credentials) = store_config.credentials_path.as_deref() else {
        tracing::warn!("No document store credentials; mirror disabled");
        return Ok(None);
    };

    let key = ServiceAccountKey::from_file(credentials).await?;
    let timeout = Duration::from_secs(store_config.timeout_secs);
    let auth = GoogleAuth::new(key, DATASTORE_SCOPE, timeout)?;
    let project_id = store_config
        .project_id
        .clone()
        .or_else(|| auth.project_id().map(str::to_string))
        .ok_or_else(|| {
            AppError::Configuration("document_store.project_id is not set".to_string())
        })?;

    tracing::info!(project = %project_id, "Document mirror enabled");
    let store =
        FirestoreDocumentStore::new(store_config.base_url.clone(), project_id, auth, timeout)?;
    Ok(Some(PredictionMirror::new(Arc::new(store))))
}

async fn connect_provider(config: &Config) -> AppResult<SourceCollector> {
    let provider = &config.provider;
    let timeout = Duration::from_secs(provider.timeout_secs);
    let auth = match provider.credentials_path.as_deref() {
        Some(path) => Some(GoogleAuth::new(
            ServiceAccountKey::from_file(path).await?,
            EARTH_ENGINE_SCOPE,
            timeout,
        )?),
        None => {
            tracing::warn!("No provider credentials; requests are unauthenticated");
            None
        }
    };

    let client = EarthEngineClient::new(provider.endpoint.clone(), timeout, auth)?;
    Ok(SourceCollector::new(Arc::new(client), timeout))
}
