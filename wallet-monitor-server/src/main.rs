use clap::{Parser, Subcommand};
use wallet_monitor_server::{run, Settings};

#[derive(Parser)]
#[command(
    name = "wallet-monitor",
    about = "Real-time wallet activity monitor for EVM chains"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor with the named configuration.
    Run { config_name: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config_name } => {
            let settings = match Settings::load(&config_name) {
                Ok(settings) => settings,
                Err(err) => {
                    eprintln!("failed to load configuration '{config_name}': {err:#}");
                    std::process::exit(1);
                }
            };
            init_tracing(&settings);
            if let Err(err) = run(settings).await {
                tracing::error!(error = ?err, "monitor failed");
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing(settings: &Settings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.tracing.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
