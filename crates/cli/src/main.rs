//! forgeq CLI - command-line client for the queue admin surface

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_ADMIN_URL: &str = "http://127.0.0.1:9538";

#[derive(Parser)]
#[command(name = "forgeq")]
#[command(about = "forgeq queue administration CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Admin server URL
    #[arg(long, env = "FORGEQ_ADMIN_URL", default_value = DEFAULT_ADMIN_URL)]
    admin_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List all registered queues
    List,

    /// Inspect one queue
    Get {
        /// Queue id (see `forgeq list`)
        qid: u64,
    },

    /// Apply a partial settings update to a running queue
    Set {
        /// Queue id
        qid: u64,

        /// Base worker count
        #[arg(long)]
        workers: Option<usize>,

        /// Upper bound for base plus boost workers
        #[arg(long)]
        max_workers: Option<usize>,

        /// Items handed to the handler per call
        #[arg(long)]
        batch_length: Option<usize>,

        /// Temporary workers added when the queue backs up
        #[arg(long)]
        boost_workers: Option<usize>,

        /// Milliseconds boost workers linger after the backlog clears
        #[arg(long)]
        boost_timeout_ms: Option<u64>,
    },

    /// Raise the base worker count
    AddWorkers {
        /// Queue id
        qid: u64,

        /// Workers to add
        #[arg(short, long, default_value = "1")]
        count: usize,
    },

    /// Force-terminate one worker
    CancelWorker {
        /// Queue id
        qid: u64,

        /// Worker pid (see `forgeq get`)
        pid: u64,
    },

    /// Block until a queue is fully drained
    Flush {
        /// Queue id
        qid: u64,

        /// Give up after this many milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// Stop dispatching batches (items still accumulate)
    Pause {
        /// Queue id
        qid: u64,
    },

    /// Resume dispatching after a pause
    Resume {
        /// Queue id
        qid: u64,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Tabled)]
struct QueueRow {
    qid: u64,
    name: String,
    #[tabled(rename = "type")]
    queue_type: String,
    len: String,
    workers: String,
    state: String,
}

fn queue_row(queue: &serde_json::Value) -> QueueRow {
    let workers = &queue["workers"];
    let base = workers["base"].as_u64().unwrap_or(0);
    let boosted = workers["boosted"].as_u64().unwrap_or(0);
    let in_flight = workers["in_flight"].as_u64().unwrap_or(0);

    let state = if !queue["healthy"].as_bool().unwrap_or(true) {
        "UNHEALTHY".red().to_string()
    } else if queue["paused"].as_bool().unwrap_or(false) {
        "PAUSED".yellow().to_string()
    } else {
        "RUNNING".green().to_string()
    };

    QueueRow {
        qid: queue["qid"].as_u64().unwrap_or(0),
        name: queue["name"].as_str().unwrap_or("?").to_string(),
        queue_type: queue["queue_type"].as_str().unwrap_or("?").to_string(),
        len: queue["len"]
            .as_i64()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string()),
        workers: format!("{base}+{boosted} ({in_flight} busy)"),
        state,
    }
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            let result = call_rpc(&cli.admin_url, "queue.list.v1", json!({})).await?;
            let queues = result["queues"].as_array().cloned().unwrap_or_default();

            if queues.is_empty() {
                println!("{}", "No queues registered".yellow());
            } else {
                let rows: Vec<QueueRow> = queues.iter().map(queue_row).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Get { qid } => {
            let result = call_rpc(&cli.admin_url, "queue.get.v1", json!({ "qid": qid })).await?;
            let queue = &result["queue"];

            println!("{}", Table::new(vec![queue_row(queue)]));
            println!();
            println!(
                "  {} {}",
                "Payload type:".bold(),
                queue["payload_type"].as_str().unwrap_or("?")
            );
            let active: Vec<String> = queue["workers"]["active"]
                .as_array()
                .map(|pids| pids.iter().map(|p| p.to_string()).collect())
                .unwrap_or_default();
            println!("  {} {}", "Active pids:".bold(), active.join(", "));
        }

        Commands::Set {
            qid,
            workers,
            max_workers,
            batch_length,
            boost_workers,
            boost_timeout_ms,
        } => {
            let params = json!({
                "qid": qid,
                "workers": workers,
                "max_workers": max_workers,
                "batch_length": batch_length,
                "boost_workers": boost_workers,
                "boost_timeout_ms": boost_timeout_ms,
            });

            call_rpc(&cli.admin_url, "queue.set_settings.v1", params).await?;
            println!("{}", format!("✓ Settings applied to queue {}", qid).green().bold());
        }

        Commands::AddWorkers { qid, count } => {
            let result = call_rpc(
                &cli.admin_url,
                "queue.add_workers.v1",
                json!({ "qid": qid, "count": count }),
            )
            .await?;

            println!(
                "{}",
                format!(
                    "✓ Queue {} now runs {} base workers",
                    qid, result["base_workers"]
                )
                .green()
                .bold()
            );
        }

        Commands::CancelWorker { qid, pid } => {
            let result = call_rpc(
                &cli.admin_url,
                "queue.cancel_worker.v1",
                json!({ "qid": qid, "pid": pid }),
            )
            .await?;

            if result["cancelled"].as_bool().unwrap_or(false) {
                println!("{}", format!("✓ Worker {} cancelled", pid).green().bold());
            } else {
                println!(
                    "{}",
                    format!("Worker {} was not running (already finished?)", pid).yellow()
                );
            }
        }

        Commands::Flush { qid, timeout_ms } => {
            println!("{}", format!("Flushing queue {}...", qid).cyan().bold());
            call_rpc(
                &cli.admin_url,
                "queue.flush.v1",
                json!({ "qid": qid, "timeout_ms": timeout_ms }),
            )
            .await?;
            println!("{}", format!("✓ Queue {} drained", qid).green().bold());
        }

        Commands::Pause { qid } => {
            call_rpc(&cli.admin_url, "queue.pause.v1", json!({ "qid": qid })).await?;
            println!("{}", format!("✓ Queue {} paused", qid).green().bold());
        }

        Commands::Resume { qid } => {
            call_rpc(&cli.admin_url, "queue.resume.v1", json!({ "qid": qid })).await?;
            println!("{}", format!("✓ Queue {} resumed", qid).green().bold());
        }
    }

    Ok(())
}
