use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vidslim_core::config::RuntimeSettings;
use vidslim_server::recovery;
use vidslim_server::settings::SettingsManager;
use vidslim_server::state::AppState;

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // The database location comes from the environment layer only.
    let bootstrap = RuntimeSettings::load(env_var, Vec::new())
        .context("invalid settings in environment")?;
    let db_path = bootstrap.db_path();
    info!(db_path = %db_path.display(), "connecting to database");

    let pool = vidslim_db::connect(&db_path.to_string_lossy())
        .await
        .context("failed to connect to database")?;
    vidslim_db::migrate::run(&pool)
        .await
        .context("failed to run migrations")?;
    info!("migrations complete");

    let settings = SettingsManager::load(pool.clone(), env_var)
        .await
        .context("failed to load settings")?;
    let current = settings.current().await;

    for dir in [current.processing_dir(), current.trash_dir()] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let report = recovery::recover(&pool, &current.processing_dir())
        .await
        .context("startup recovery failed")?;
    info!(reset = report.reset, purged = report.purged, "recovery complete");

    let state = AppState::new(pool, settings).await;
    state.manager.start().await;

    // Initial scan in the background; the worker picks up jobs as they land.
    {
        let scanner = state.scanner.clone();
        let manager = state.manager.clone();
        let settings = current.clone();
        tokio::spawn(async move {
            if let Ok(report) = scanner.scan(&settings).await {
                if report.created > 0 {
                    manager.wake();
                }
            }
        });
    }

    let manager = state.manager.clone();
    let app = vidslim_server::routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&current.bind_addr)
        .await
        .context("failed to bind")?;
    info!(addr = %current.bind_addr, source = %current.source_dir.display(), "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.stop().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutdown signal received");
}
