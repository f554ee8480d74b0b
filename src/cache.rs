//! Process-local cache with TTL expiry, LRU eviction, and background refresh.

pub mod entry;
pub mod refresher;
pub mod store;
