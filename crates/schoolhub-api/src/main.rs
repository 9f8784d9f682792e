use std::net::SocketAddr;
use std::sync::Arc;

use schoolhub_api::app;
use schoolhub_api::clock::SystemClock;
use schoolhub_api::config::AppConfig;
use schoolhub_api::state::AppState;
use sea_orm_migration::MigratorTrait;

async fn init_state(config: AppConfig) -> anyhow::Result<AppState> {
    let db = schoolhub_db::connect(&config.database_url).await?;

    // Apply migrations on boot (idempotent).
    schoolhub_migration::Migrator::up(&db, None).await?;

    Ok(AppState::new(Arc::new(db), config, Arc::new(SystemClock))?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!(%err, "failed to listen for SIGTERM");
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
    tracing::info!("shutting down gracefully");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;
    config.log_disabled_features();
    let addr = config.bind_addr;
    let environment = config.environment;

    let state = init_state(config).await?;
    let db = state.db.clone();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, ?environment, "schoolhub-api HTTP listening");

    axum::serve(
        listener,
        app::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Every other handle went away with the router.
    match Arc::try_unwrap(db) {
        Ok(db) => db.close().await?,
        Err(_) => tracing::warn!("database still shared at shutdown; skipping close"),
    }

    Ok(())
}
