//! Composer repository server binary.

use anyhow::Result;
use clap::Parser;
use composer_repo::config::ProxyConfig;
use composer_repo::{run_server, Config};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "composer-server")]
#[command(about = "Composer package repository with an optional caching upstream proxy")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, default_value = "composer-repo.json")]
    config: PathBuf,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for registries, artifacts and cache
    #[arg(long)]
    data: Option<PathBuf>,

    /// Public URL of this repository, used in archive download links
    #[arg(long)]
    url_prefix: Option<String>,

    /// Upstream registry to proxy (enables proxy mode)
    #[arg(long)]
    remote: Option<String>,

    /// Seconds a cached upstream document stays fresh
    #[arg(long)]
    cache_ttl: Option<u64>,

    /// Always fetch from the upstream, never cache
    #[arg(long)]
    no_cache: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Apply command line overrides on top of the file configuration.
    fn apply(self, mut config: Config) -> Config {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(data) = self.data {
            config.storage.data_dir = data;
        }
        if let Some(prefix) = self.url_prefix {
            config.repository.url_prefix = Some(prefix);
        }
        if let Some(remote) = self.remote {
            match config.proxy.as_mut() {
                Some(proxy) => proxy.remote_url = remote,
                None => config.proxy = Some(ProxyConfig::new(remote)),
            }
        }
        if let Some(proxy) = config.proxy.as_mut() {
            if let Some(ttl) = self.cache_ttl {
                proxy.cache.ttl_secs = ttl;
            }
            if self.no_cache {
                proxy.cache.enabled = false;
            }
        }
        config
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = Config::load_or_default(&cli.config)?;
    info!(config = %cli.config.display(), "Loaded configuration");
    let config = cli.apply(config);

    run_server(config).await
}
