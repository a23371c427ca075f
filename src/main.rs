use std::sync::Arc;

use tempmail::api::{self, AppState};
use tempmail::config::AppConfig;
use tempmail::retention;
use tempmail::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env();

    eprintln!("📬 tempmail v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{}/functions/v1/email-webhook", config.port);
    eprintln!("   Client API: http://0.0.0.0:{}/functions/v1/tempmail", config.port);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET not set, ingestion webhook is unauthenticated");
    }

    // ── Retention ────────────────────────────────────────────────────────
    let _retention_handle = retention::spawn_retention_task(
        Arc::clone(&db),
        config.sweep_interval,
        config.retention_max_age,
    );

    // ── HTTP ─────────────────────────────────────────────────────────────
    let port = config.port;
    let app = api::routes(AppState::new(db, config));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
