//! A fixed-capacity, concurrently shared cache of storage blocks.
//!
//! [BlockCache] sits between many client tasks and a slow block-storage
//! [Transport]. It hands out in-memory copies of blocks, deduplicates
//! concurrent requests for the same block, and reassigns the
//! least-recently-released slot when every slot is occupied. The pool is
//! sized once at initialization: no slot is allocated or freed per request.
//!
//! # Locking
//!
//! Two lock tiers keep the cache deadlock-free:
//!
//! - Index locks (one per shard, plus one pool-wide eviction lock) are
//!   short-held and never held across an `.await`. They protect shard
//!   membership, reference counts, and recency stamps. A miss releases its
//!   shard lock before taking the eviction lock, so two misses in different
//!   shards cannot invert the order.
//! - The exclusive-use lock (one per slot) serializes all access to a slot's
//!   payload and is held across transport transfers. It is acquired only
//!   after every index lock has been released, never the reverse.
//!
//! Reference counting guarantees a slot's identity is never reassigned while
//! any holder or pin remains, so no caller can observe another block's bytes
//! mid-access.
//!
//! # Recency
//!
//! Eviction prefers the slot whose reference count has been zero the
//! longest. The recency stamp is written at exactly one point: the
//! transition of a slot's reference count to zero. Stamping on every hit (or
//! capturing the tick before the exclusive lock is released) distorts the
//! eviction order under concurrency; both variants are excluded by
//! construction here.
//!
//! # Durability
//!
//! Writes are write-through: [BlockCache::write] transfers the payload to
//! the transport before returning. Because the exclusive lock serializes all
//! readers and writers of a slot, any read observes the most recent
//! completed write to that block.
//!
//! # Example
//!
//! ```rust
//! use bufcache::{mocks, BlockCache, BlockId, Config};
//! use commonware_runtime::{deterministic, Runner};
//! use commonware_utils::NZUsize;
//!
//! let executor = deterministic::Runner::default();
//! executor.start(|context| async move {
//!     let cache = BlockCache::init(
//!         &context,
//!         mocks::Disk::default(),
//!         Config {
//!             slots: NZUsize!(30),
//!             shards: NZUsize!(13),
//!             block_size: NZUsize!(512),
//!         },
//!     );
//!
//!     // Fill a block and persist it.
//!     let id = BlockId::new(0, 7);
//!     let mut block = cache.read(id).await.unwrap();
//!     block.data_mut()[..5].copy_from_slice(b"hello");
//!     cache.write(&mut block).await.unwrap();
//!     drop(block);
//!
//!     // Read it back (served from the cache, no transport load).
//!     let block = cache.read(id).await.unwrap();
//!     assert_eq!(&block.data()[..5], b"hello");
//! });
//! ```

use std::{future::Future, io::Error as IoError, num::NonZeroUsize};
use thiserror::Error;

mod cache;
mod metrics;
pub mod mocks;
mod shard;
mod slot;

pub use cache::{BlockCache, BlockGuard, BlockPin};
pub use slot::BlockId;

/// Errors that can occur when interacting with the block cache.
///
/// Transport faults are fatal to the operation that issued them: the cache
/// performs no retry of its own. The reference taken by the failed operation
/// is released before the error is returned.
#[derive(Error, Debug)]
pub enum Error {
    #[error("load failed: {0}")]
    LoadFailed(BlockId),
    #[error("store failed: {0}")]
    StoreFailed(BlockId),
    #[error("io error: {0}")]
    Io(#[from] IoError),
}

/// A synchronous block-storage transport.
///
/// Each call transfers exactly one block's worth of bytes at the address
/// named by `id`. The cache invokes the transport only while holding the
/// destination slot's exclusive-use lock, so the buffer cannot change under
/// a transfer. A stalled transfer blocks its caller indefinitely: there is
/// no timeout or cancellation in this layer.
pub trait Transport: Send + Sync + 'static {
    /// Fill `buf` with the durable contents of `id`.
    fn load(
        &self,
        id: BlockId,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Durably persist `buf` as the contents of `id`.
    fn store(&self, id: BlockId, buf: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Configuration for a [BlockCache].
///
/// All values are fixed at initialization and not adjustable at runtime.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of slots in the pool (the maximum number of resident blocks).
    pub slots: NonZeroUsize,

    /// Number of index shards. A small prime spreads load well; a cache hit
    /// contends only on its own shard.
    pub shards: NonZeroUsize,

    /// Size of each block in bytes.
    pub block_size: NonZeroUsize,
}
