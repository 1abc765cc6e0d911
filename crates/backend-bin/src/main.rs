use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use backend_lib::{
    config::{Settings, DEFAULT_CONFIG_FILE},
    middleware::rate_limit::prune,
    store::{FlatFileStorage, MemoryStorage, Storage},
    ws_router, AppState,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// VoiceRoom WebSocket server
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file, merged over the built-in defaults
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Listen address, overrides `bind_addr`
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Journal directory, overrides `data_dir`
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep all state in memory and lose it on exit
    #[arg(long)]
    ephemeral: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load_from(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    if let Some(data_dir) = args.data_dir {
        settings.data_dir = data_dir;
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if args.ephemeral {
        info!("using in-memory storage");
        serve(MemoryStorage::new(), settings).await
    } else {
        let storage = FlatFileStorage::new(&settings.data_dir)
            .with_context(|| format!("opening journal in {}", settings.data_dir.display()))?;
        info!(data_dir = %settings.data_dir.display(), "using flat-file storage");
        serve(storage, settings).await
    }
}

async fn serve<S: Storage + 'static>(storage: S, settings: Settings) -> anyhow::Result<()> {
    let addr = settings.bind_addr;
    let window = Duration::from_secs(settings.rate_limit.window_secs);

    let state = Arc::new(AppState::new(storage, settings)?);
    state.services.seed_catalog().await?;

    let pruned = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(window);
        loop {
            interval.tick().await;
            prune(&pruned, window);
        }
    });

    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    // peer addresses key the rate limits and login lockouts
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            // a failed signal hookup just means no graceful stop
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}
