use clap::Subcommand;
use ember_core::config::AppConfig;
use std::path::Path;

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,
    },

    /// Show the effective configuration (file plus environment overrides)
    Show {
        /// Path to config file
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,

        /// Show API keys instead of masking them
        #[arg(long)]
        show_sensitive: bool,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output path for the config file
        #[arg(short, long, default_value = "config/config.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file, show_sensitive } => show_config(&file, show_sensitive),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
    }
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))?;

    print_info("Validating configuration...");
    config.validate().map_err(CliError::Config)?;

    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!("  Endpoints: {}", config.endpoints.len());
    println!(
        "  Batch route: {}",
        config.batch.endpoint_url.as_deref().unwrap_or("selected endpoint")
    );
    println!("  Health interval: {}s", config.health.interval_seconds);
    println!("  Metrics: {}", if config.metrics.enabled { "enabled" } else { "disabled" });

    Ok(())
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{visible}****")
}

fn show_config(file: &str, show_sensitive: bool) -> CliResult<()> {
    let config = AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))?;

    println!("Configuration from {file}:");

    println!("\n[Endpoints] ({} configured)", config.endpoints.len());
    for endpoint in &config.endpoints {
        println!(
            "  {}: {} ({}, priority {}, weight {}{})",
            endpoint.id,
            endpoint.url,
            endpoint.transport_kind,
            endpoint.priority,
            endpoint.weight,
            if endpoint.staked { ", staked" } else { "" }
        );
        if let Some(api_key) = &endpoint.api_key {
            let shown = if show_sensitive { api_key.clone() } else { mask(api_key) };
            println!("    API key: {shown}");
        }
    }

    println!("\n[Health]");
    println!("  Interval: {}s", config.health.interval_seconds);
    println!("  Probe: {} ({}ms timeout)", config.health.probe_method, config.health.probe_timeout_ms);
    println!(
        "  Thresholds: failover {}, recovery {}, degraded {}ms",
        config.health.failover_threshold,
        config.health.recovery_threshold,
        config.health.degraded_threshold_ms
    );

    println!("\n[Failover]");
    println!("  Max retries: {}", config.failover.max_retries);
    println!(
        "  Backoff: {}ms x{}",
        config.failover.retry_delay_ms, config.failover.backoff_multiplier
    );
    println!("  Request timeout: {}ms", config.failover.request_timeout_ms);

    println!("\n[Batch]");
    println!("  Max batch size: {}", config.batch.max_batch_size);
    println!("  Delay: {}ms", config.batch.batch_delay_ms);
    println!(
        "  Timeouts: {}ms per request, {}ms per wire call",
        config.batch.request_timeout_ms, config.batch.wire_timeout_ms
    );
    println!("  Max pending: {}", config.batch.max_pending_requests);
    println!(
        "  Rate limit: {}/s (burst {})",
        config.batch.rate_per_second, config.batch.bucket_capacity
    );
    println!("  Backoff: {:?}ms", config.batch.backoff_ms);

    println!("\n[Logging]");
    println!("  Level: {}", config.logging.level);
    println!("  Format: {}", config.logging.format);

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# Ember RPC client configuration

[[endpoints]]
id = "helius-primary"
url = "https://mainnet.helius-rpc.com"
api_key = "YOUR_API_KEY"
transport_kind = "standard"
priority = 10
weight = 3
staked = true
region = "us-east"

[[endpoints]]
id = "helius-backup"
url = "https://mainnet-backup.helius-rpc.com"
api_key = "YOUR_API_KEY"
transport_kind = "standard"
priority = 5
weight = 1

[[endpoints]]
id = "helius-das"
url = "https://mainnet.helius-rpc.com"
api_key = "YOUR_API_KEY"
transport_kind = "das"
priority = 10

[health]
interval_seconds = 30
probe_method = "getBlockHeight"
probe_timeout_ms = 5000
failover_threshold = 3
recovery_threshold = 2
degraded_threshold_ms = 1000
recovery_latency_ratio = 0.8

[failover]
max_retries = 3
retry_delay_ms = 100
backoff_multiplier = 2.0
request_timeout_ms = 10000

[batch]
max_batch_size = 100
batch_delay_ms = 10
max_pending_requests = 10000
max_retries = 3
backoff_ms = [100, 200, 300, 500, 800]
request_timeout_ms = 30000
wire_timeout_ms = 10000
dedupe_ttl_ms = 5000
rate_per_second = 50
bucket_capacity = 100

[metrics]
enabled = true

[logging]
level = "info"
format = "pretty"
"#;

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    if Path::new(output).exists() && !force {
        return Err(CliError::Config(format!(
            "File {output} already exists. Use --force to overwrite."
        )));
    }

    if let Some(parent) = Path::new(output).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, SAMPLE_CONFIG)?;

    print_success(&format!("Sample configuration written to {output}"));
    print_info("Replace YOUR_API_KEY before use");
    Ok(())
}
