#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use pole_sort::gateway::{ProviderGateway, TracingUsageSink};
use pole_sort::oracle::{LlmOracle, LlmOracleConfig, SortOrder};
use pole_sort::sort::{
    chunk_size_for_capacity, estimate_max_oracle_calls, sanitize, sort_with_trace,
    JsonlTraceSink, SortConfig, SortRequest, SortRunOptions, TraceSink,
};
use pole_sort::Attribution;

#[derive(Parser)]
#[command(name = "polesort", version, about = "Approximate LLM list sorting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort a request file with the LLM oracle
    Sort {
        #[arg(long)]
        request: PathBuf,
        /// Output path; prints to stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        overrides: ConfigOverrides,
        #[arg(long)]
        model: Option<String>,
        /// Attempts per oracle call, counting the first
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        max_items_per_call: Option<usize>,
        #[arg(long)]
        call_timeout_secs: Option<u64>,
        #[arg(long)]
        latency_budget_secs: Option<u64>,
        /// Write one JSONL record per oracle call
        #[arg(long)]
        trace: Option<PathBuf>,
    },
    /// Print window and call counts without calling the oracle
    Plan {
        #[arg(long)]
        request: PathBuf,
        #[command(flatten)]
        overrides: ConfigOverrides,
        #[arg(long)]
        max_items_per_call: Option<usize>,
    },
    /// Write the sanitized item list
    Sanitize {
        #[arg(long)]
        request: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ConfigOverrides {
    #[arg(long)]
    criterion: Option<String>,
    /// descending | ascending
    #[arg(long)]
    order: Option<SortOrder>,
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long)]
    extreme_k: Option<usize>,
    #[arg(long)]
    iterations: Option<usize>,
}

impl ConfigOverrides {
    fn apply(self, mut config: SortConfig) -> SortConfig {
        if let Some(criterion) = self.criterion {
            config.criterion = criterion;
        }
        if let Some(order) = self.order {
            config.order = order;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(extreme_k) = self.extreme_k {
            config.extreme_k = extreme_k;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        config
    }
}

#[derive(Debug, Serialize)]
struct PlanReport {
    input_len: usize,
    sanitized_len: usize,
    first_sweep_windows: usize,
    max_batch_len: usize,
    oracle_capacity: usize,
    fits_capacity: bool,
    /// Largest chunk size that fits the capacity at this extreme_k.
    suggested_chunk_size: Option<usize>,
    max_oracle_calls: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Sort {
            request,
            out,
            overrides,
            model,
            max_attempts,
            max_items_per_call,
            call_timeout_secs,
            latency_budget_secs,
            trace,
        } => {
            let req: SortRequest = read_json(&request)?;
            let config = overrides.apply(req.config);

            let mut oracle_config = LlmOracleConfig::default();
            if let Some(model) = model.or(req.model) {
                oracle_config.model = model;
            }
            if let Some(max_attempts) = max_attempts {
                oracle_config.max_attempts = max_attempts;
            }
            if let Some(max_items) = max_items_per_call {
                oracle_config.max_items_per_call = max_items;
            }

            let gateway = ProviderGateway::from_env(Arc::new(TracingUsageSink))?;
            let oracle = LlmOracle::new(Arc::new(gateway), oracle_config)?
                .with_attribution(Attribution::for_new_job("polesort::sort"));

            let options = SortRunOptions {
                call_timeout: call_timeout_secs.map(Duration::from_secs),
                latency_budget: latency_budget_secs.map(Duration::from_secs),
            };

            let (trace_sink, trace_worker) = if let Some(path) = trace {
                let (sink, worker) = JsonlTraceSink::new(path)?;
                (Some(sink), Some(worker))
            } else {
                (None, None)
            };
            let trace_ref = trace_sink.as_ref().map(|sink| sink as &dyn TraceSink);

            let result =
                sort_with_trace(&oracle, &req.items, &config, Some(&options), trace_ref, None)
                    .await;

            drop(trace_sink);
            if let Some(worker) = trace_worker {
                worker.join()?;
            }

            let resp = result?;
            match out {
                Some(path) => write_json(&path, &resp)?,
                None => print_json(&resp)?,
            }
        }
        Commands::Plan {
            request,
            overrides,
            max_items_per_call,
        } => {
            let req: SortRequest = read_json(&request)?;
            let config = overrides.apply(req.config);
            let sanitized_len = sanitize(&req.items).len();
            let oracle_capacity =
                max_items_per_call.unwrap_or(LlmOracleConfig::default().max_items_per_call);

            let report = PlanReport {
                input_len: req.items.len(),
                sanitized_len,
                first_sweep_windows: sanitized_len.div_ceil(config.chunk_size.max(1)),
                max_batch_len: config.max_batch_len(),
                oracle_capacity,
                fits_capacity: config.max_batch_len() <= oracle_capacity,
                suggested_chunk_size: chunk_size_for_capacity(oracle_capacity, config.extreme_k),
                max_oracle_calls: estimate_max_oracle_calls(sanitized_len, &config),
            };
            print_json(&report)?;
        }
        Commands::Sanitize { request, out } => {
            let req: SortRequest = read_json(&request)?;
            let items = sanitize(&req.items);
            match out {
                Some(path) => write_json(&path, &items)?,
                None => print_json(&items)?,
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    println!("{json}");
    Ok(())
}
