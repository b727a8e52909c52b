use actix_web::web;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use tokenkeeper::auth::{PasswordHasher, SigningKey};
use tokenkeeper::clock::{Clock, SystemClock};
use tokenkeeper::configuration::get_configuration;
use tokenkeeper::session::SessionEngine;
use tokenkeeper::startup::run;
use tokenkeeper::store::{CredentialStore, PgCredentialStore};
use tokenkeeper::sweeper::ExpirySweeper;
use tokenkeeper::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // The log format depends on the environment, so settings are read first
    // and any failure is reported once logging is up.
    let configuration = get_configuration();
    let environment = configuration
        .as_ref()
        .map(|c| c.environment)
        .unwrap_or_default();
    init_telemetry(environment);

    tracing::info!(environment = ?environment, "Starting application");

    let configuration = match configuration {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(startup_error(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let key = SigningKey::load(&configuration.secret).map_err(|e| {
        tracing::error!("Failed to load signing key: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Signing key error")
    })?;

    let hasher = PasswordHasher::new(&configuration.password).map_err(|e| {
        tracing::error!("Invalid password hashing settings: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Password settings error")
    })?;

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        startup_error(std::io::ErrorKind::Other, "Migration error")
    })?;
    tracing::info!("Database ready");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pool));
    let engine = web::Data::new(SessionEngine::new(
        store.clone(),
        Arc::new(key),
        hasher,
        clock.clone(),
        &configuration.token,
    ));

    let sweeper = if configuration.sweeper.enabled {
        Some(ExpirySweeper::start(
            store,
            clock,
            Duration::from_secs(configuration.sweeper.interval_secs.max(1)),
        ))
    } else {
        tracing::info!("Expiry sweeper disabled");
        None
    };

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    // Resolves once a shutdown signal arrived and in-flight requests drained
    let result = run(listener, engine)?.await;
    tracing::info!("HTTP server stopped");

    if let Some(sweeper) = sweeper {
        sweeper.stop().await;
    }

    result
}
