use clap::{Parser, Subcommand};
use ember_core::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
use commands::{
    handle_config_command, run_batch, run_call, run_status, BatchArgs, CallArgs, ConfigCommands,
};

#[derive(Parser)]
#[command(name = "ember-cli")]
#[command(about = "Ember CLI - resilient Solana JSON-RPC client with failover and batching")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file; falls back to EMBER_CONFIG, then config/config.toml
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Probe every configured endpoint once and print health
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Send one JSON-RPC call
    Call(CallArgs),

    /// Send several calls of one method through the batch coalescer
    Batch(BatchArgs),
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,ember_core={level},cli={level}", level = config.logging.level))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_writer(std::io::stderr);
        registry.with(fmt_layer).init();
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config(config_command) => {
            handle_config_command(config_command)?;
        }

        Commands::Status { json } => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config);
            run_status(config, json).await?;
        }

        Commands::Call(args) => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config);
            run_call(config, args).await?;
        }

        Commands::Batch(args) => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config);
            run_batch(config, args).await?;
        }
    }

    Ok(())
}
