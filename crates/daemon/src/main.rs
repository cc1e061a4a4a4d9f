// wikidocd: standalone page core daemon.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wikidoc_daemon::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "wikidocd", about = "Versioned page content, edit locks and comment threads")]
struct Cli {
    /// Config file (defaults to ~/.wikidoc/config.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the meta.db path.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("failed to load daemon config")?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(db) = cli.db {
        config.db_path = Some(db);
    }

    init_tracing(&config);

    info!(listen_addr = %config.listen_addr, "starting standalone wikidoc daemon");
    wikidoc_daemon::runtime::run(config).await.context("daemon terminated unexpectedly")
}

fn init_tracing(config: &DaemonConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
