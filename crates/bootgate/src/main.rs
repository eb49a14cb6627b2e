//! bootgate - Main executable

use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use bootgate::logging;
use bootgate::{DEFAULT_CONFIG, ServiceManager, Settings};

#[derive(FromArgs, Debug)]
#[argh(
    description = "bootgate - network-boot content gateway serving TFTP and HTTP",
    example = "Run with the default configuration:\n  {command_name}",
    example = "Run with a custom configuration:\n  {command_name} --config ./bootgate.toml"
)]
struct CliConfig {
    #[argh(
        option,
        short = 'c',
        description = "configuration file",
        default = "PathBuf::from(DEFAULT_CONFIG)"
    )]
    config: PathBuf,

    #[argh(switch, short = 'V', description = "print version and exit")]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: CliConfig = argh::from_env();
    if cli.version {
        println!("bootgate v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = Settings::load(&cli.config)?;
    let logging = logging::init(settings.log_format)?;

    ServiceManager::new(cli.config, settings, Some(logging)).run().await
}
