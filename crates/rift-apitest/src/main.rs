use anyhow::Context;
use clap::Parser;
use rift_apitest::config::Config;
use rift_apitest::mocks::{Definition, Loader, Mocks, ServiceMock};
use tracing::{error, info};

/// Run the service mocks described by a configuration file until interrupted.
///
/// On exit, every error collected while serving is printed and the process exits
/// with a failure status if there were any.
#[derive(Parser, Debug)]
#[command(name = "rift-apitest")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "mocks.yaml")]
    config: String,

    /// Log filter used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    let mocks = Mocks::new(config.listen_addrs().map(|(name, addr)| {
        ServiceMock::new(name, Definition::nop()).with_listen_addr(addr)
    }));
    Loader::new(&mocks)
        .load(&serde_json::Value::Object(config.mocks.clone()))
        .context("Failed to load mock definitions")?;

    mocks.start().await?;
    for mock in mocks.services() {
        if let Ok(addr) = mock.server_addr() {
            info!("Service {} mocked at http://{}", mock.name(), addr);
        }
    }
    mocks.reset_running_context();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    let errors = mocks.end_running_context();
    if let Err(e) = mocks.shutdown(config.shutdown_timeout()).await {
        error!("{}", e);
    }

    if errors.is_empty() {
        info!("No mock errors");
        return Ok(());
    }
    for e in &errors {
        println!("{e}");
    }
    anyhow::bail!("{} mock error(s)", errors.len())
}
