// Status Synchronization
//
// Producers publish to the `StatusBus`; consumers hold a `SyncSubscription`
// that reads from a push transport and falls back to polling.

mod bus;
mod cache;
mod channel;
mod transports;

pub use bus::StatusBus;
pub use cache::{CacheUpdate, PageCache};
pub use channel::{SyncSubscription, TransportMode, TransportOverride};
pub use transports::{BusPushTransport, StorePollSource};
