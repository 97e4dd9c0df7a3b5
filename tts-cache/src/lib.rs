//! # tts-cache: content-addressed audio cache
//!
//! Stores synthesized audio bytes keyed by the fingerprint that identifies
//! the (text, model, voice, speed, codec) tuple that produced them. Writes
//! are durable-before-return and write-once: the fingerprint makes repeat
//! writes safe but wasteful, so callers are expected to guard against them
//! upstream (the queue's singleflight lock does this for the orchestration
//! core — see `tts-queue`).
//!
//! ```
//! use tts_cache::{AudioCache, MemoryCache};
//!
//! # #[tokio::main]
//! # async fn main() -> tts_cache::CacheResult<()> {
//! let cache = MemoryCache::new();
//! let cache_ref = cache.store("deadbeef", b"pcm bytes".to_vec(), "pcm").await?;
//! let fetched = cache.fetch(&cache_ref.fingerprint).await?;
//! assert_eq!(fetched.bytes, b"pcm bytes");
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod filesystem;
mod memory;
pub mod store;
mod types;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use filesystem::FilesystemCache;
pub use memory::MemoryCache;
pub use store::{AudioCache, VacuumReport};
pub use types::{CacheRef, CachedAudio};

/// Convenient re-exports for downstream crates embedding the cache.
pub mod prelude {
    pub use crate::{AudioCache, CacheConfig, CacheError, CacheRef, CacheResult, CachedAudio, MemoryCache};
}
