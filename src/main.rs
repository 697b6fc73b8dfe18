use clap::Parser;
use log::{error, info};
use nightshift::configuration::Config;
use nightshift::controller::Controller;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nightshift")]
#[command(version = "0.0.2")]
#[command(about = "Unattended telescope session scheduler")]
struct Args {
    /// TOML configuration file
    config_file: PathBuf,

    /// Overrides `[storage].root` and `NIGHTSHIFT_SESSIONS_DIR`
    #[arg(long)]
    sessions_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration from {}", args.config_file.display());
    let mut config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(dir) = args.sessions_dir {
        config.storage.root = dir;
    }
    info!("Configuration imported successfully");

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
}
