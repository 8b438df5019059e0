//! Dashboard Example
//!
//! Creates a folder job, then follows its progress through the status
//! subscription while keeping a reconciled document list.
//!
//! # Usage
//!
//! 1. Start the daemon:
//!    ```bash
//!    cargo run --package docflow-daemon
//!    ```
//!
//! 2. Run this example against a folder of scans:
//!    ```bash
//!    cargo run --package docflow-sdk --example dashboard -- /srv/scans
//!    ```

use docflow_sdk::{
    DocflowClient, JobConfig, JobDocument, JobStatus, ListQuery, PageCache, SortKey, SortOrder,
    StatusMessage, SyncScope, SyncSettings,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let folder = std::env::args().nth(1).unwrap_or_else(|| "/srv/scans".to_string());

    let client = DocflowClient::connect("http://127.0.0.1:9527").await?;

    let config: JobConfig = serde_json::from_value(json!({
        "name": "scan intake",
        "source": { "type": "folder", "path": folder, "file_types": ["pdf", "tiff"] },
        "processing": { "mode": "once", "batch_size": 50 },
        "options": { "max_retries": 3, "priority": 5 }
    }))?;
    let job = client.create_job(&config, true).await?;
    println!("Job {} started", job.id);

    let mut documents: PageCache<JobDocument> = PageCache::new(SortKey::CreatedAt, SortOrder::Desc);
    documents.extend(
        client
            .list_documents(&job.id, None, &ListQuery::first(100))
            .await?,
    );

    let mut updates = client.watch(
        SyncScope::jobs([job.id.clone()]),
        SyncSettings::default(),
        job.updated_at,
    );
    while let Some(message) = updates.recv().await {
        match message {
            StatusMessage::Job { entity, .. } => {
                println!(
                    "[{:?}] {:?}: {}/{} processed, {} failed, {} in review",
                    updates.mode(),
                    entity.status,
                    entity.processed_items,
                    entity.total_items,
                    entity.failed_items,
                    entity.needs_review_items
                );
                if matches!(
                    entity.status,
                    JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
                ) {
                    break;
                }
            }
            StatusMessage::Document { entity, .. } => {
                documents.apply_authoritative(entity);
            }
            StatusMessage::Review { entity, .. } => {
                println!("Needs review: document {}", entity.document_id);
            }
        }
    }

    println!("{} documents tracked", documents.len());
    updates.close();
    Ok(())
}
