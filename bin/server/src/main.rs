use opsflow_scheduler::{ScheduleEngine, SchedulerJob};
use opsflow_server::api::{self, AppState};
use opsflow_server::config::ServerConfig;
use opsflow_server::db::{PgCanvasStore, PgScheduleStore, RunQueueExecutor, WorkflowRunRepository};
use rootcause::Report;
use sqlx::postgres::PgPoolOptions;
use std::fmt;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reasons the server fails to come up or shut down cleanly.
#[derive(Debug)]
enum StartupError {
    Config { details: String },
    Database { details: String },
    Migrations { details: String },
    Bind { addr: String, details: String },
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "failed to load configuration: {details}"),
            Self::Database { details } => write!(f, "failed to connect to database: {details}"),
            Self::Migrations { details } => write!(f, "failed to run migrations: {details}"),
            Self::Bind { addr, details } => write!(f, "failed to bind to {addr}: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            tracing::error!(error = %report, "server exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Report<StartupError>> {
    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!(listen_addr = %config.listen_addr, "loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Migrations {
            details: e.to_string(),
        })?;

    let schedules = ScheduleEngine::new(
        Arc::new(PgScheduleStore::new(db_pool.clone())),
        Arc::new(RunQueueExecutor::new(WorkflowRunRepository::new(
            db_pool.clone(),
        ))),
    );
    let scheduler = Arc::new(SchedulerJob::new(schedules.clone(), config.scheduler));
    scheduler.start();

    let app = api::router(AppState {
        canvas: Arc::new(PgCanvasStore::new(db_pool.clone())),
        schedules,
        scheduler: Arc::clone(&scheduler),
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: config.listen_addr.to_string(),
            details: e.to_string(),
        })?;
    tracing::info!("listening on http://{}", config.listen_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.stop().await;
    scheduler.wait_idle().await;
    db_pool.close().await;
    tracing::info!("server stopped");

    served.map_err(|e| {
        StartupError::Serve {
            details: e.to_string(),
        }
        .into()
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
