//! tlvcached - a two-tier key/value cache with a durable L2 log.
//!
//! # Architecture
//!
//! ```text
//!            put/get/remove
//!                  |
//!                  v
//!           +--------------+
//!           |  Coordinator |  state machine: Created/Starting/Working/Stopping/Stopped
//!           +--------------+
//!             |          |
//!    L1 (in-memory)   L2 (append-only log, single persistence worker)
//!    FIFO/LRU/LFU          position index + numbered tlv<########>.fsc files
//!             \            /
//!              eviction sink
//! ```
//!
//! `put` writes through L1 and invalidates any L2 shadow copy; `get` reads
//! L1 then falls back to L2; evictions from L1 are asynchronously persisted
//! to L2 by a dedicated worker thread draining a bounded queue.
//!
//! # Modules
//!
//! - [`error`] - error types
//! - [`settings`] - validated, immutable cache configuration
//! - [`codec`] - the on-disk record framing used by L2
//! - [`memory`] - the L1 FIFO/LRU/LFU caches
//! - [`filesystem`] - the L2 append-only store
//! - [`coordinator`] - ties L1 and L2 together behind one state machine

pub mod codec;
pub mod coordinator;
pub mod error;
pub mod filesystem;
pub mod memory;
pub mod settings;

pub use coordinator::{Coordinator, State};
pub use error::{Error, Result};
pub use settings::{EvictionStrategy, Settings};
