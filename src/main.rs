use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use hugin::config::MonitorConfig;
use hugin::store::SqliteStore;
use hugin::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "hugin", about = "Passive DNS monitoring daemon", version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture interface (overrides config)
    #[arg(short, long)]
    device: Option<String>,

    /// BPF filter expression (overrides config)
    #[arg(short, long)]
    filter: Option<String>,

    /// SQLite database path (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Force promiscuous mode on
    #[arg(long)]
    promisc: bool,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn load_config(cli: &Cli) -> Result<MonitorConfig, hugin::MonitorError> {
    let mut config = match &cli.config {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };
    config.apply_env()?;

    if let Some(device) = &cli.device {
        config.device = device.clone();
    }
    if let Some(filter) = &cli.filter {
        config.filter = filter.clone();
    }
    if let Some(db) = &cli.db {
        config.db_path = db.display().to_string();
    }
    if cli.promisc {
        config.promisc = true;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hugin=info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        return list_devices();
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let store = match SqliteStore::open(&config.db_path) {
        Ok(store) => store,
        Err(e) => {
            error!("cannot open endpoint database {}: {e}", config.db_path);
            return ExitCode::FAILURE;
        }
    };

    match Supervisor::new(config).run(Arc::new(store)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn list_devices() -> ExitCode {
    match pcap::Device::list() {
        Ok(devices) => {
            for device in devices {
                match device.desc {
                    Some(desc) => println!("{}\t{}", device.name, desc),
                    None => println!("{}", device.name),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("cannot list capture devices: {e}");
            ExitCode::FAILURE
        }
    }
}
