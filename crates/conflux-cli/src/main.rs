use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conflux_core::sim::{DelayRange, worker_from_spec};
use conflux_core::{Aggregate, DispatchConfig, Dispatcher, Policy, SharedWorker};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    JoinAll,
    CompletionOrder,
    FailFast,
    FailPartial,
    FailSoft,
}

impl From<PolicyArg> for Policy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::JoinAll => Policy::JoinAll,
            PolicyArg::CompletionOrder => Policy::CompletionOrder,
            PolicyArg::FailFast => Policy::FailFast,
            PolicyArg::FailPartial => Policy::FailPartial,
            PolicyArg::FailSoft => Policy::FailSoft,
        }
    }
}

#[derive(Parser)]
#[command(name = "conflux")]
#[command(about = "Fan a message out to simulated workers and aggregate the answers")]
struct Args {
    /// Aggregation policy
    #[arg(long, value_enum)]
    policy: PolicyArg,

    /// Worker as LABEL, or LABEL:fail for a worker that always fails
    #[arg(long = "worker", required = true)]
    workers: Vec<String>,

    /// One shared message, or one message per worker
    #[arg(long = "message", required = true)]
    messages: Vec<String>,

    /// Replacement for failed workers (fail-soft only)
    #[arg(long, default_value = "FALLBACK")]
    fallback: String,

    /// Upper bound of each simulated worker's random delay
    #[arg(long, default_value_t = 20)]
    max_delay_ms: u64,

    /// Give up waiting for the aggregate after this long
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// JSON dispatcher config (separator, fail_fast)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print a JSON report instead of plain text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct DispatchReport {
    id: String,
    policy: Policy,
    tasks: usize,
    output: serde_json::Value,
    elapsed_ms: u128,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DispatchConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DispatchConfig::default(),
    };
    let dispatcher = Dispatcher::new(config);

    let delay = DelayRange::new(Duration::ZERO, Duration::from_millis(args.max_delay_ms));
    let workers = args
        .workers
        .iter()
        .map(|spec| worker_from_spec(spec, delay))
        .collect::<Result<Vec<SharedWorker>, _>>()?;

    let policy = Policy::from(args.policy);
    info!(%policy, workers = workers.len(), messages = args.messages.len(), "starting dispatch");

    let started = Instant::now();
    let (id, tasks, output) = match policy {
        Policy::JoinAll if args.messages.len() == 1 => {
            let aggregate = dispatcher.join_all(&workers, &args.messages[0])?;
            run(aggregate, args.timeout_ms).await?
        }
        Policy::JoinAll => {
            let aggregate = dispatcher.join_all_each(&workers, &args.messages)?;
            run(aggregate, args.timeout_ms).await?
        }
        Policy::CompletionOrder => {
            let message = single_message(&args.messages)?;
            let aggregate = dispatcher.completion_order(&workers, message)?;
            run(aggregate, args.timeout_ms).await?
        }
        Policy::FailFast => {
            let aggregate = dispatcher.fail_fast(&workers, &args.messages)?;
            run(aggregate, args.timeout_ms).await?
        }
        Policy::FailPartial => {
            let aggregate = dispatcher.fail_partial(&workers, &args.messages)?;
            run(aggregate, args.timeout_ms).await?
        }
        Policy::FailSoft => {
            let aggregate = dispatcher.fail_soft(&workers, &args.messages, &args.fallback)?;
            run(aggregate, args.timeout_ms).await?
        }
    };
    let elapsed = started.elapsed();

    if args.json {
        let report = DispatchReport {
            id,
            policy,
            tasks,
            output,
            elapsed_ms: elapsed.as_millis(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match output {
            serde_json::Value::String(s) => println!("{s}"),
            other => println!("{other}"),
        }
    }

    info!(elapsed_ms = elapsed.as_millis() as u64, "dispatch finished");
    Ok(())
}

fn single_message(messages: &[String]) -> anyhow::Result<&str> {
    match messages {
        [message] => Ok(message.as_str()),
        _ => bail!("this policy takes exactly one --message (got {})", messages.len()),
    }
}

/// Await the aggregate, bounded by the caller's timeout if one was given.
async fn run<T: Serialize>(
    aggregate: Aggregate<T>,
    timeout_ms: Option<u64>,
) -> anyhow::Result<(String, usize, serde_json::Value)> {
    let id = aggregate.id().to_string();
    let tasks = aggregate.tasks();

    let result = match timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), aggregate).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%id, timeout_ms = ms, "aggregate timed out");
                bail!("dispatch {id} timed out after {ms}ms");
            }
        },
        None => aggregate.await,
    };

    let value = result.with_context(|| format!("dispatch {id} failed"))?;
    Ok((id, tasks, serde_json::to_value(value)?))
}
