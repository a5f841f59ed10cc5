use std::env;

use broker::memstore::InMemoryDomainStore;
use broker::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match broker::config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cfg.log_level.clone()))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "broker starting");

    let store = InMemoryDomainStore::new();
    if let Ok(seed_path) = env::var("DOMAIN_SEED_FILE") {
        if let Err(e) = seed_from_file(&store, &seed_path).await {
            eprintln!("FATAL: failed to load DOMAIN_SEED_FILE '{seed_path}': {e}");
            std::process::exit(1);
        }
    }

    let bind_addr = cfg.bind_addr.clone();
    let state = AppState::new(store, cfg);
    let router = broker::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "broker listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("broker error");
    info!("broker shut down gracefully");
}

/// Seed the in-memory store from a simple `domain,token,enabled` CSV file.
/// Stands in for the real administrative CRUD surface, which is out of
/// scope (spec §1); good enough to run the broker without a database.
async fn seed_from_file(
    store: &std::sync::Arc<InMemoryDomainStore>,
    path: &str,
) -> std::io::Result<()> {
    use tunely_protocol::{DomainMode, DomainRecord};

    let contents = tokio::fs::read_to_string(path).await?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(',');
        let (Some(domain), Some(token), Some(enabled)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        store
            .insert(DomainRecord {
                domain: domain.trim().to_owned(),
                token: token.trim().to_owned(),
                enabled: enabled.trim().eq_ignore_ascii_case("true"),
                mode: DomainMode::Http,
            })
            .await;
    }
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
