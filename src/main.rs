use clap::Parser;
use gtag_module::config::{AppConfig, HostConfig};
use gtag_module::routing::FsPageSource;
use gtag_module::server::{self, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Serves HTML pages with the gtag.js bootstrap injected into their heads.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Address to bind (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Directory of .html pages (overrides PAGE_ROOT)
    #[arg(long)]
    pages: Option<PathBuf>,
    /// Host config TOML with parameters and modules (overrides GTAG_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(pages) = cli.pages {
        config.page_root = pages;
    }
    if let Some(path) = cli.config {
        config.host_config = Some(path);
    }

    let host = HostConfig::load_or_default(config.host_config.as_deref())?;
    tracing::info!(
        modules = host.modules.len(),
        parameters = host.parameters.0.len(),
        "loaded host config"
    );

    let pages = Arc::new(FsPageSource::new(config.page_root.clone()));
    let addr = config.bind_addr;
    let state = AppState::new(config, host, pages);

    tracing::info!(%addr, "starting gtag page server");
    server::run(addr, state).await?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
