//! kernbus CLI - diagnostics for the kernbus event bus.
//!
//! # Commands
//!
//! | Command | Effect |
//! |---------|--------|
//! | `kernbus demo` | runs concurrent requests through an echo responder |
//! | `kernbus config` | prints the merged configuration as TOML |
//! | `kernbus snapshots <tenant> <job>` | lists persisted snapshots |
//!
//! # Configuration
//!
//! Configuration is loaded from multiple sources with priority:
//!
//! 1. Environment variables (`KERNBUS_*`, highest priority)
//! 2. Project config (`.kernbus/config.toml` under `--project`)
//! 3. Global config (`~/.kernbus/config.toml`)
//! 4. Default values (lowest priority)
//!
//! # Logging
//!
//! `--debug` > `RUST_LOG` > default `info`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use kernbus_runtime::testing::EchoResponder;
use kernbus_runtime::{BusConfig, ConfigLoader, Engine, ExecutionId, RequestError};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_TENANT: &str = "demo";
const DEMO_JOB: &str = "job-1";

/// kernbus CLI - multi-tenant event bus diagnostics
#[derive(Parser, Debug)]
#[command(name = "kernbus")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Project root directory (defaults to current directory)
    #[arg(short = 'C', long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run concurrent request/response round trips
    Demo {
        /// Number of concurrent requests
        #[arg(long, default_value_t = 8)]
        requests: usize,

        /// Per-request timeout in milliseconds
        #[arg(long, default_value_t = 1_000)]
        timeout_ms: u64,
    },

    /// Print the merged configuration
    Config,

    /// List persisted snapshots of an execution
    Snapshots {
        tenant: String,
        job: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let project_root = match args.project {
        Some(path) => path,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let config = ConfigLoader::new()
        .with_project_root(&project_root)
        .load()
        .context("config error")?;
    info!(path = %project_root.display(), "Project root");

    match args.command {
        Command::Demo {
            requests,
            timeout_ms,
        } => demo(config, requests, Duration::from_millis(timeout_ms)).await,
        Command::Config => print_config(&config),
        Command::Snapshots { tenant, job } => snapshots(config, &tenant, &job).await,
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn demo(config: BusConfig, requests: usize, timeout: Duration) -> Result<()> {
    let engine = Engine::builder(config).build()?;
    engine.start()?;

    let execution = engine.execution(DEMO_TENANT, DEMO_JOB)?;
    let echo = Arc::new(EchoResponder::new("tool.response"));
    execution.on("tool.invoke", echo.clone());

    let started = Instant::now();
    let results = join_all((0..requests).map(|n| {
        let execution = Arc::clone(&execution);
        async move {
            execution
                .request(
                    "tool.invoke",
                    json!({ "n": n }),
                    "tool.response",
                    Some(timeout),
                )
                .await
                .map(|reply| (n, reply))
        }
    }))
    .await;

    let mut matched = 0;
    for result in &results {
        match result {
            Ok((n, reply)) if reply["n"] == json!(n) => matched += 1,
            Ok((n, reply)) => warn!(request = n, %reply, "Mismatched response"),
            Err(e) => warn!(error = %e, "Request failed"),
        }
    }
    println!(
        "{matched}/{requests} requests matched in {:?} ({} handler calls)",
        started.elapsed(),
        echo.calls()
    );

    // nothing answers this one
    match execution
        .request("tool.unanswered", json!({}), "tool.never", Some(timeout))
        .await
    {
        Err(RequestError::Timeout { timeout_ms, .. }) => {
            println!("unanswered request timed out after {timeout_ms}ms");
        }
        other => warn!(?other, "Expected a timeout"),
    }

    let metrics = execution.business().metrics();
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    let snapshot = execution.pause("demo finished").await?;
    println!("snapshot {snapshot}");

    engine.shutdown().await;
    Ok(())
}

fn print_config(config: &BusConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

async fn snapshots(config: BusConfig, tenant: &str, job: &str) -> Result<()> {
    let engine = Engine::builder(config).build()?;
    let id = ExecutionId::new(tenant, job);
    let snapshots = engine.snapshots(&id).await?;

    if snapshots.is_empty() {
        println!(
            "no snapshots for {id} (backend: {})",
            engine.persistor().backend()
        );
        return Ok(());
    }
    for snapshot in snapshots {
        let taken = chrono::DateTime::from_timestamp_millis(snapshot.timestamp)
            .map_or_else(|| snapshot.timestamp.to_string(), |t| t.to_rfc3339());
        println!(
            "{}  {}  events={}  {}",
            snapshot.content_hash,
            taken,
            snapshot.state.quotas.consumed_events,
            snapshot.reason.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
