//! Persistent local store for offline lesson data.
//!
//! The store keeps four partitions:
//! - catalog: cached lesson/quest definitions, keyed by id
//! - progress: one record per lesson/quest, upserted
//! - outbox: writes deferred while offline, auto-numbered and drained FIFO
//! - profile: auxiliary profile data
//!
//! Backends implement [`KeyedAsyncStore`]; [`LocalStore`] is the handle the
//! rest of the crate passes around.

mod local;
mod memory;
mod sqlite;
mod traits;

pub use local::{CatalogPutReport, LocalStore};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::KeyedAsyncStore;

pub(crate) use sqlite::{format_timestamp, parse_timestamp};
