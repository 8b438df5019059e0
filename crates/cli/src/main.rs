//! Docflow CLI - Command-line interface for the Docflow daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";

#[derive(Parser)]
#[command(name = "docflow")]
#[command(about = "Docflow bulk document-processing CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "DOCFLOW_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job from a JSON configuration file
    Create {
        /// Path to the job configuration (JSON)
        config: PathBuf,

        /// Start the job right away
        #[arg(long)]
        start: bool,
    },

    /// Start a pending job
    Start { job_id: String },

    /// Pause a running job (in-flight documents finish)
    Pause { job_id: String },

    /// Resume a paused job
    Resume { job_id: String },

    /// Stop a job for good
    Cancel { job_id: String },

    /// Requeue every failed document of a job
    RetryFailed { job_id: String },

    /// List jobs
    Jobs {
        /// Filter by status (pending, running, paused, completed, failed, stopped)
        #[arg(short, long)]
        status: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// List the documents of a job
    Docs {
        job_id: String,

        /// Filter by status (pending, processing, completed, failed, needs_review, cancelled)
        #[arg(short, long)]
        status: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Review queue
    Review {
        #[command(subcommand)]
        command: ReviewCommand,
    },

    /// Show a job's progress
    Status { job_id: String },
}

#[derive(Subcommand)]
enum ReviewCommand {
    /// List review items
    List {
        /// Only items of this job
        #[arg(short, long)]
        job: Option<String>,

        /// open or resolved
        #[arg(short, long)]
        status: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Attach a note to a review item
    Note { review_id: String, text: String },

    /// Requeue the document with a fresh retry budget
    Retry { review_id: String },

    /// Close the item without retrying
    Resolve { review_id: String },
}

#[derive(clap::Args, Serialize)]
struct PageArgs {
    /// Page size
    #[arg(short = 'n', long = "limit")]
    #[serde(rename = "page_size", skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,

    /// Cursor printed after the previous page
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
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
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct PageView<T> {
    data: Vec<T>,
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct JobView {
    id: String,
    name: String,
    status: String,
    priority: u8,
    total_items: i64,
    processed_items: i64,
    failed_items: i64,
    needs_review_items: i64,
    failure_reason: Option<String>,
    discovery_exhausted: bool,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Failed")]
    failed: i64,
    #[tabled(rename = "Review")]
    review: i64,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&JobView> for JobRow {
    fn from(job: &JobView) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            status: job.status.clone(),
            progress: progress(job.processed_items, job.total_items),
            failed: job.failed_items,
            review: job.needs_review_items,
            updated: format_time(job.updated_at),
        }
    }
}

#[derive(Deserialize)]
struct DocumentView {
    id: String,
    display_name: String,
    status: String,
    retry_count: u32,
    last_error: Option<String>,
    processing_time_ms: Option<i64>,
    updated_at: i64,
}

#[derive(Tabled)]
struct DocumentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Document")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Retries")]
    retries: u32,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Last error")]
    last_error: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&DocumentView> for DocumentRow {
    fn from(doc: &DocumentView) -> Self {
        Self {
            id: doc.id.clone(),
            name: doc.display_name.clone(),
            status: doc.status.clone(),
            retries: doc.retry_count,
            time: doc
                .processing_time_ms
                .map(|ms| format!("{} ms", ms))
                .unwrap_or_default(),
            last_error: truncate(doc.last_error.as_deref().unwrap_or(""), 60),
            updated: format_time(doc.updated_at),
        }
    }
}

#[derive(Deserialize)]
struct ReviewView {
    id: String,
    job_id: String,
    source_ref: String,
    reason: String,
    error_message: Option<String>,
    retry_count: u32,
    max_retries: u32,
    #[serde(default)]
    notes: Vec<serde_json::Value>,
    status: String,
    updated_at: i64,
}

#[derive(Tabled)]
struct ReviewRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Job")]
    job_id: String,
    #[tabled(rename = "Document")]
    source_ref: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Retries")]
    retries: String,
    #[tabled(rename = "Notes")]
    notes: usize,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Error")]
    error: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&ReviewView> for ReviewRow {
    fn from(item: &ReviewView) -> Self {
        Self {
            id: item.id.clone(),
            job_id: item.job_id.clone(),
            source_ref: item.source_ref.clone(),
            reason: item.reason.clone(),
            retries: format!("{}/{}", item.retry_count, item.max_retries),
            notes: item.notes.len(),
            status: item.status.clone(),
            error: truncate(item.error_message.as_deref().unwrap_or(""), 60),
            updated: format_time(item.updated_at),
        }
    }
}

#[derive(Deserialize)]
struct RequeueView {
    job: JobView,
    documents: Vec<serde_json::Value>,
    reviews: Vec<serde_json::Value>,
}

fn progress(processed: i64, total: i64) -> String {
    if total == 0 {
        return "0/0".to_string();
    }
    let percent = processed as f64 * 100.0 / total as f64;
    format!("{}/{} ({:.0}%)", processed, total, percent)
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| millis.to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn colored_status(status: &str) -> String {
    match status {
        "running" => status.green().bold().to_string(),
        "paused" => status.yellow().bold().to_string(),
        "completed" => status.cyan().bold().to_string(),
        "failed" | "stopped" => status.red().bold().to_string(),
        _ => status.bold().to_string(),
    }
}

/// Params go out as a one-element array holding the request object
async fn call_rpc<T: DeserializeOwned>(
    url: &str,
    method: &str,
    params: serde_json::Value,
) -> Result<T> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params: json!([params]),
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
        let mut message = format!("RPC error ({}): {}", error.code, error.message);
        if let Some(violations) = error.data.as_ref().and_then(|d| d.as_array()) {
            for v in violations {
                message.push_str(&format!(
                    "\n  - {}: {}",
                    v["field"].as_str().unwrap_or("?"),
                    v["message"].as_str().unwrap_or("?")
                ));
            }
        }
        anyhow::bail!(message);
    }

    let result = response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))?;
    serde_json::from_value(result).context("Unexpected response shape")
}

fn print_page_footer<T>(page: &PageView<T>) {
    if page.data.is_empty() {
        println!("{}", "Nothing to show".yellow());
    }
    if page.has_more {
        if let Some(cursor) = &page.next_cursor {
            println!();
            println!("{} --cursor {}", "More results:".bold(), cursor);
        }
    }
}

fn print_job(job: &JobView) {
    println!("{} {}", "Job".cyan().bold(), job.id);
    println!("  {} {}", "Name:".bold(), job.name);
    println!("  {} {}", "Status:".bold(), colored_status(&job.status));
    println!("  {} {}", "Priority:".bold(), job.priority);
    println!(
        "  {} {}",
        "Progress:".bold(),
        progress(job.processed_items, job.total_items)
    );
    println!("  {} {}", "Failed:".bold(), job.failed_items);
    println!("  {} {}", "Needs review:".bold(), job.needs_review_items);
    println!(
        "  {} {}",
        "Discovery:".bold(),
        if job.discovery_exhausted {
            "finished"
        } else {
            "in progress"
        }
    );
    println!("  {} {}", "Created:".bold(), format_time(job.created_at));
    if let Some(at) = job.started_at {
        println!("  {} {}", "Started:".bold(), format_time(at));
    }
    if let Some(at) = job.completed_at {
        println!("  {} {}", "Finished:".bold(), format_time(at));
    }
    if let Some(reason) = &job.failure_reason {
        println!("  {} {}", "Failure:".bold(), reason.red());
    }
}

async fn job_action(url: &str, method: &str, job_id: &str, done: &str) -> Result<()> {
    let job: JobView = call_rpc(url, method, json!({ "job_id": job_id })).await?;
    println!(
        "{} ({})",
        format!("✓ Job {} {}", job.id, done).green().bold(),
        colored_status(&job.status)
    );
    Ok(())
}

fn print_requeue(result: &RequeueView) {
    println!(
        "{}",
        format!("✓ {} document(s) requeued", result.documents.len())
            .green()
            .bold()
    );
    if !result.reviews.is_empty() {
        println!("  {} review item(s) closed as retried", result.reviews.len());
    }
    println!(
        "  Job {} is {}",
        result.job.id,
        colored_status(&result.job.status)
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let url = cli.rpc_url.as_str();

    match cli.command {
        Commands::Create { config, start } => {
            let raw = std::fs::read_to_string(&config)
                .with_context(|| format!("Failed to read {}", config.display()))?;
            let config_json: serde_json::Value =
                serde_json::from_str(&raw).context("Invalid JSON configuration")?;

            let job: JobView = call_rpc(
                url,
                "job.create.v1",
                json!({ "config": config_json, "start": start }),
            )
            .await?;

            println!("{}", "✓ Job created".green().bold());
            println!();
            println!("{}", Table::new([JobRow::from(&job)]));
        }

        Commands::Start { job_id } => job_action(url, "job.start.v1", &job_id, "started").await?,
        Commands::Pause { job_id } => job_action(url, "job.pause.v1", &job_id, "paused").await?,
        Commands::Resume { job_id } => job_action(url, "job.resume.v1", &job_id, "resumed").await?,
        Commands::Cancel { job_id } => {
            job_action(url, "job.cancel.v1", &job_id, "cancelled").await?
        }

        Commands::RetryFailed { job_id } => {
            let result: RequeueView =
                call_rpc(url, "job.retry_failed.v1", json!({ "job_id": job_id })).await?;
            print_requeue(&result);
        }

        Commands::Jobs { status, page } => {
            let mut params = serde_json::to_value(&page)?;
            params["status"] = json!(status);
            let jobs: PageView<JobView> = call_rpc(url, "job.list.v1", params).await?;

            let rows: Vec<JobRow> = jobs.data.iter().map(JobRow::from).collect();
            if !rows.is_empty() {
                println!("{}", Table::new(rows));
            }
            print_page_footer(&jobs);
        }

        Commands::Docs {
            job_id,
            status,
            page,
        } => {
            let mut params = serde_json::to_value(&page)?;
            params["job_id"] = json!(job_id);
            params["status"] = json!(status);
            let docs: PageView<DocumentView> = call_rpc(url, "document.list.v1", params).await?;

            let rows: Vec<DocumentRow> = docs.data.iter().map(DocumentRow::from).collect();
            if !rows.is_empty() {
                println!("{}", Table::new(rows));
            }
            print_page_footer(&docs);
        }

        Commands::Review { command } => match command {
            ReviewCommand::List { job, status, page } => {
                let mut params = serde_json::to_value(&page)?;
                params["job_id"] = json!(job);
                params["status"] = json!(status);
                let items: PageView<ReviewView> =
                    call_rpc(url, "review.list.v1", params).await?;

                let rows: Vec<ReviewRow> = items.data.iter().map(ReviewRow::from).collect();
                if !rows.is_empty() {
                    println!("{}", Table::new(rows));
                }
                print_page_footer(&items);
            }

            ReviewCommand::Note { review_id, text } => {
                let item: ReviewView = call_rpc(
                    url,
                    "review.note.v1",
                    json!({ "review_id": review_id, "text": text }),
                )
                .await?;
                println!(
                    "{}",
                    format!("✓ Note added ({} total)", item.notes.len())
                        .green()
                        .bold()
                );
            }

            ReviewCommand::Retry { review_id } => {
                let result: RequeueView =
                    call_rpc(url, "review.retry.v1", json!({ "review_id": review_id })).await?;
                print_requeue(&result);
            }

            ReviewCommand::Resolve { review_id } => {
                let item: ReviewView =
                    call_rpc(url, "review.resolve.v1", json!({ "review_id": review_id }))
                        .await?;
                println!(
                    "{}",
                    format!("✓ Review item {} {}", item.id, item.status)
                        .green()
                        .bold()
                );
            }
        },

        Commands::Status { job_id } => {
            let job: JobView = call_rpc(url, "job.get.v1", json!({ "job_id": job_id })).await?;
            print_job(&job);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["docflow", "create", "job.json", "--start"]).unwrap();
        assert!(matches!(cli.command, Commands::Create { start: true, .. }));
        assert_eq!(cli.rpc_url, DEFAULT_RPC_URL);

        let cli = Cli::try_parse_from(["docflow", "retry-failed", "job-1"]).unwrap();
        assert!(matches!(cli.command, Commands::RetryFailed { job_id } if job_id == "job-1"));

        let cli = Cli::try_parse_from([
            "docflow", "review", "note", "rev-1", "rescan requested",
        ])
        .unwrap();
        match cli.command {
            Commands::Review {
                command: ReviewCommand::Note { review_id, text },
            } => {
                assert_eq!(review_id, "rev-1");
                assert_eq!(text, "rescan requested");
            }
            _ => panic!("expected review note"),
        }

        assert!(Cli::try_parse_from(["docflow", "docs"]).is_err());
    }

    #[test]
    fn test_page_args_serialize_as_list_query() {
        let page = PageArgs {
            limit: Some(20),
            cursor: None,
        };
        assert_eq!(serde_json::to_value(&page).unwrap(), json!({ "page_size": 20 }));
    }

    #[test]
    fn test_job_row_from_view() {
        let view: JobView = serde_json::from_value(json!({
            "id": "job-1",
            "name": "invoices",
            "config": {},
            "status": "running",
            "priority": 3,
            "total_items": 8,
            "processed_items": 2,
            "failed_items": 1,
            "needs_review_items": 0,
            "failure_reason": null,
            "discovery_exhausted": false,
            "created_at": 0,
            "updated_at": 0,
            "started_at": null,
            "completed_at": null
        }))
        .unwrap();
        let row = JobRow::from(&view);
        assert_eq!(row.progress, "2/8 (25%)");
        assert_eq!(row.failed, 1);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(progress(0, 0), "0/0");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
