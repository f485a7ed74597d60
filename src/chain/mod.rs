//! Court contract event access.
//!
//! - `types`: decoded events and the on-chain context used to interpret them
//! - `source`: the `EventSource` trait every backend implements
//! - `rpc`: alloy-based JSON-RPC backend (WebSocket subscription or HTTP polling)
//! - `memory`: in-memory backend for tests and dry runs
//! - `abi`: Solidity bindings and topic hashes

pub mod abi;
pub mod memory;
pub mod rpc;
pub mod source;
pub mod types;

pub use memory::MemoryEventSource;
pub use rpc::RpcEventSource;
pub use source::{EventFilter, EventSource, EventSubscription};
pub use types::{BlockContext, ChainEvent, DisputeSnapshot, EventKind, EventPayload, EventPosition, Period};
