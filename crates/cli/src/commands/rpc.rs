use clap::Args;
use ember_core::{
    batch::{BatchRequest, QueueBatchOptions, QueueOptions},
    config::AppConfig,
    runtime::EmberRuntime,
    types::TransportKind,
    upstream::RequestOptions,
};
use std::time::Duration;

use super::utils::{parse_params, print_error, print_info, CliError, CliResult};

#[derive(Args)]
pub struct CallArgs {
    /// JSON-RPC method, e.g. getSlot
    pub method: String,

    /// Params as a JSON array or object
    #[arg(short, long)]
    pub params: Option<String>,

    /// Endpoint kind to route to
    #[arg(short, long, default_value = "standard")]
    pub kind: TransportKind,

    /// Request timeout in milliseconds
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Send through the batch coalescer instead of the failover path
    #[arg(long)]
    pub queued: bool,
}

#[derive(Args)]
pub struct BatchArgs {
    /// JSON-RPC method used for every entry
    pub method: String,

    /// One JSON params value per request
    #[arg(short, long = "params", required = true)]
    pub params: Vec<String>,

    /// Fail on the first error instead of reporting each result
    #[arg(long)]
    pub stop_on_error: bool,
}

fn build_runtime(config: AppConfig) -> CliResult<EmberRuntime> {
    Ok(EmberRuntime::builder().with_config(config).build()?)
}

/// Probes every configured endpoint once and prints its status.
pub async fn run_status(config: AppConfig, json: bool) -> CliResult<()> {
    let runtime = build_runtime(config)?;
    print_info("Probing endpoints...");
    runtime.check_health().await;

    let statuses = runtime.get_all_endpoints_status();
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        for status in &statuses {
            let health = &status.health;
            println!(
                "{:<20} {:<9} {:<8} latency={:<7} failures={}{}{}",
                status.endpoint.id,
                status.endpoint.transport_kind.as_str(),
                if health.healthy { "healthy" } else { "DOWN" },
                health.latency_ms.map_or_else(|| "-".to_string(), |ms| format!("{ms}ms")),
                health.consecutive_failures,
                if health.degraded { " degraded" } else { "" },
                if status.is_primary { " [primary]" } else { "" },
            );
            if let Some(error) = &health.last_error {
                println!("{:<20} last error: {error}", "");
            }
        }
    }

    let healthy = statuses.iter().filter(|s| s.health.healthy).count();
    runtime.shutdown().await;

    if healthy == 0 {
        print_error("No endpoint answered its probe");
        return Err(CliError::Rpc("no healthy endpoints".to_string()));
    }
    Ok(())
}

pub async fn run_call(config: AppConfig, args: CallArgs) -> CliResult<()> {
    let params = parse_params(args.params.as_deref())?;
    let runtime = build_runtime(config)?;

    let result = if args.queued {
        let mut options = QueueOptions::default();
        options.timeout = args.timeout_ms.map(Duration::from_millis);
        match runtime.queue_request(&args.method, params, options) {
            Ok(handle) => handle.await,
            Err(e) => Err(e),
        }
    } else {
        let mut options = RequestOptions::default().kind(args.kind);
        if let Some(timeout_ms) = args.timeout_ms {
            options = options.timeout(Duration::from_millis(timeout_ms));
        }
        runtime.execute_request(&args.method, params, options).await
    };

    let stats = runtime.get_failover_stats();
    runtime.shutdown().await;

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    tracing::debug!(retries = stats.retries, switches = stats.endpoint_switches, "call finished");
    Ok(())
}

pub async fn run_batch(config: AppConfig, args: BatchArgs) -> CliResult<()> {
    let mut requests = Vec::with_capacity(args.params.len());
    for raw in &args.params {
        requests.push(BatchRequest::new(args.method.clone(), parse_params(Some(raw))?));
    }

    let runtime = build_runtime(config)?;
    let outcome = runtime
        .queue_batch(requests, QueueBatchOptions { stop_on_error: args.stop_on_error, timeout: None })
        .await;
    let stats = runtime.get_batcher_stats();
    runtime.shutdown().await;

    let results = outcome?;
    let mut failures = 0;
    for (index, result) in results.iter().enumerate() {
        match result {
            Ok(value) => println!("[{index}] {value}"),
            Err(e) => {
                failures += 1;
                println!("[{index}] error: {e}");
            }
        }
    }
    println!(
        "{} requests, {} deduplicated, {} wire batches, {} failed",
        results.len(),
        stats.deduplicated,
        stats.batches_dispatched,
        failures
    );
    Ok(())
}
