use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agent-relay")]
#[command(about = "Agent relay CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the relay HTTP server. Identity and agent settings come from the config file and AGENT_RELAY_* environment variables.
    Serve {
        /// Config file path (default: AGENT_RELAY_CONFIG_PATH or ~/.agent-relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 7071)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Load and validate the configuration, then print the resolved settings with secrets redacted.
    CheckConfig {
        /// Config file path (default: AGENT_RELAY_CONFIG_PATH or ~/.agent-relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("agent-relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::CheckConfig { config }) => {
            if let Err(e) = run_check_config(config) {
                log::error!("configuration invalid: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(config_path: Option<std::path::PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = relay::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    let settings = config.resolve()?;
    log::info!(
        "starting relay on {}:{} (config {})",
        settings.server.bind,
        settings.server.port,
        path.display()
    );
    relay::relay::run_relay(settings).await
}

fn run_check_config(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = relay::config::load_config(config_path)?;
    let settings = config.resolve()?;
    println!("config: {}", path.display());
    println!("{:#?}", settings);
    Ok(())
}
