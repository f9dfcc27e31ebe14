use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tannoy::config::{Cli, Config};
use tannoy::providers::ProviderRegistry;
use tannoy::publish::Scheduler;
use tannoy::state::AppState;
use tannoy::{db, routes, storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    let uploads_dir = config.uploads_path().clone();
    storage::ensure_uploads_dir(&uploads_dir)?;

    // Initialize database
    let pool = db::create_pool(config.db_path())?;
    db::run_migrations(&pool)?;

    // Network adapters are registered here by the deployment; the core ships
    // with an empty registry and rejects sends until kinds are added.
    let providers = Arc::new(ProviderRegistry::new());
    if providers.is_empty() {
        tracing::warn!("no network providers registered; sends will fail until kinds are added");
    }

    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        Arc::clone(&providers),
        config.scheduler.check_interval_minutes,
    ));

    // Build app state
    let state = AppState {
        db: pool,
        config: config.clone(),
        uploads_dir,
        providers,
        scheduler: Arc::clone(&scheduler),
    };

    if config.scheduler.enabled {
        tokio::spawn(Arc::clone(&scheduler).run());
    } else {
        tracing::info!("scheduler disabled");
    }

    // Build router
    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
