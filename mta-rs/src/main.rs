use anyhow::Context as _;
use clap::Parser;
use mta_rs::config::Config;
use mta_rs::context::AppContext;
use mta_rs::queue::{Deliverer, QueueRunner};
use mta_rs::smtp::SmtpServer;
use mta_rs::utils::dns::DnsMxResolver;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "mta-rs", version, about = "SMTP/ESMTP/LMTP mail transfer agent")]
struct Cli {
    /// Configuration file (defaults to ./config.toml when present)
    config: Option<PathBuf>,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None if Path::new("config.toml").exists() => {
            Config::from_file("config.toml").context("loading config.toml")
        }
        None => Ok(Config::default()),
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mta_rs={}", config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    init_logging(&config);

    info!("Starting mta-rs v{}", env!("CARGO_PKG_VERSION"));
    info!("  Domain: {}", config.server.domain);
    info!("  Listening on: {}", config.server.listen_addr);
    info!("  Queue: {}", config.queue.queue_dir);

    let resolver = Arc::new(DnsMxResolver::new(config.delivery.routes.clone()));
    let deliverer = Deliverer::new(&config, resolver);
    let ctx = Arc::new(AppContext::initialize(config).context("initialization failed")?);

    let server = SmtpServer::bind(Arc::clone(&ctx)).await?;
    let runner = QueueRunner::new(Arc::clone(&ctx), deliverer);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("SMTP server error: {}", e);
            }
        }
        _ = runner.run() => {
            error!("Queue runner stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    ctx.finalize()?;
    info!("mta-rs stopped");
    Ok(())
}
