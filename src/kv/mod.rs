//! # KV Module
//!
//! Everything between request handlers and the eventually consistent
//! backing store.
//!
//! ```text
//! handlers
//!    ↓
//! CachedKv ── MemoryCache   (process-local, TTL + LRU, never authoritative)
//!    │     └─ WriteBatcher  (delayed flush, at-most-once)
//!    ↓
//! KvStore  ── MemoryKv | FileKv
//! ```
//!
//! Callers choose a durability class per write through [`PutOptions`]:
//! sessions, user registration and logout are written immediately, derived
//! data (stats, genre caches) is batched and may be lost before a flush.

mod batcher;
mod cache;
mod cached;
mod file;
mod memory;
mod metrics;
mod store;

pub use batcher::{BatchConfig, QueuedWrite, WriteBatcher};
pub use cache::{CacheConfig, MemoryCache};
pub use cached::{CachedKv, PutOptions};
pub use file::FileKv;
pub use memory::MemoryKv;
pub use metrics::{KvMetrics, KvMetricsSnapshot};
pub use store::{KvStore, ListPage};
