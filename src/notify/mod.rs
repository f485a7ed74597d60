//! Event-to-notification pipeline.
//!
//! Data flow:
//!   `EventSource` → `ContextResolver` → `Deriver` → ack filter → `NotificationStream`
//!
//! - `resolver`: memoised block / dispute / past-draw lookups per batch
//! - `derive`: one pure handler per event kind, key derivation, amount formatting
//! - `ack`: acknowledgment stores and the filter that hides acknowledged keys
//! - `stream`: backfill + live assembly of the visible list, teardown guard

pub mod ack;
pub mod derive;
pub mod error;
pub mod resolver;
pub mod stream;

pub use ack::{
    filter_unacknowledged, partition_acknowledged, AcknowledgmentStore, FileAckStore,
    MemoryAckStore,
};
pub use derive::{Category, Deriver, Notification, TokenSymbols};
pub use error::NotifyError;
pub use resolver::ContextResolver;
pub use stream::{Acknowledger, NotificationStream, NotificationView, Phase, StreamOptions};
