//! Docflow SDK - Rust Client Library
//!
//! Typed JSON-RPC calls against the Docflow daemon plus the remote status
//! transports that feed a dashboard's [`SyncSubscription`].
//!
//! # Example
//!
//! ```no_run
//! use docflow_sdk::{DocflowClient, SyncScope, SyncSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DocflowClient::connect("http://127.0.0.1:9527").await?;
//!
//!     let jobs = client.list_jobs(None, &Default::default()).await?;
//!     println!("{} jobs on the first page", jobs.data.len());
//!
//!     let mut updates = client.watch(SyncScope::all(), SyncSettings::default(), 0);
//!     while let Some(message) = updates.recv().await {
//!         println!("{:?} {} changed", message.kind(), message.entity_id());
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod transport;
mod types;

pub use client::DocflowClient;
pub use error::{Result, SdkError};
pub use transport::{RpcPollSource, RpcPushTransport};
pub use types::{PollResponse, RequeueResult};

pub use docflow_core::application::{
    CacheUpdate, PageCache, SyncSubscription, TransportMode, TransportOverride,
};
pub use docflow_core::domain::{
    DocumentStatus, Job, JobConfig, JobDocument, JobStatus, ListQuery, Page, PushEvent,
    ReviewQueueItem, ReviewStatus, SortKey, SortOrder, StatusMessage, SyncScope,
};
pub use docflow_core::settings::SyncSettings;
