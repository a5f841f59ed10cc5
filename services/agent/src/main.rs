use std::env;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "agent starting");

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/tunely/agent.toml"));

    let cfg = match agent::config::load_config_from_path(&config_path) {
        Ok(cfg) => {
            info!(broker_url = %cfg.broker_url, target_url = %cfg.target_url, "config loaded");
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    let err = agent::uplink::run(cfg).await;
    eprintln!("FATAL: {err}");
    std::process::exit(1);
}
