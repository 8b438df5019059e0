//! JSON-RPC API Layer
//!
//! Exposes job control, listings, the review queue and status sync over
//! JSON-RPC 2.0 (HTTP for calls, WebSocket for the status subscription).

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
