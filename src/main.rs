mod config;
mod instance_lock;
mod lifecycle;
mod logging;
mod proxy;
mod proxy_paths;
mod server;

#[cfg(test)]
mod test_support;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::ProxyConfig;
use lifecycle::{StartReport, StopReport};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "worker-proxy")]
#[command(about = "Resilient JSON-RPC proxy in front of long-lived worker processes")]
#[command(version)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the proxy (in this process unless --background)
    Serve(ServeArgs),
    /// Stop the proxy listening on a port
    Stop(TargetArgs),
    /// Print the status of the proxy listening on a port
    Status(TargetArgs),
}

#[derive(Args)]
struct TargetArgs {
    /// Port the proxy listens on
    #[arg(short, long)]
    port: Option<u16>,

    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ServeArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Detach and return once the proxy is up
    #[arg(long)]
    background: bool,

    /// Timeout for connecting to a worker
    #[arg(long)]
    connect_timeout_secs: Option<u64>,

    /// Timeout for a whole forwarded request
    #[arg(long)]
    request_timeout_secs: Option<u64>,
}

impl TargetArgs {
    fn load(&self) -> Result<ProxyConfig> {
        let mut config = ProxyConfig::load(self.config.as_deref())?;
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }
}

impl ServeArgs {
    fn load(&self) -> Result<ProxyConfig> {
        let mut config = self.target.load()?;
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let config = args.load()?;
            match lifecycle::start(&config, args.background, args.target.config.as_deref()).await? {
                StartReport::AlreadyRunning { pid } => println!("already running (pid {})", pid),
                StartReport::Started { pid } => println!("started (pid {})", pid),
                StartReport::Served => {}
            }
        }
        Command::Stop(args) => match lifecycle::stop(&args.load()?).await? {
            StopReport::Stopped { pid } => println!("stopped (pid {})", pid),
            StopReport::NotRunning => println!("not running"),
        },
        Command::Status(args) => {
            let status = lifecycle::status(&args.load()?).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
