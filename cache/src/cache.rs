use crate::{
    metrics::Metrics,
    shard::{Resident, Shard},
    slot::{Frame, Slot},
    BlockId, Config, Error, Transport,
};
use async_lock::MutexGuardArc;
use commonware_runtime::Metrics as RuntimeMetrics;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tracing::{debug, trace};

/// State shared by every handle of one pool.
struct State {
    /// Index shards. A slot's bookkeeping is guarded by the lock of the
    /// shard its identity currently hashes to; membership moves between
    /// shards only during eviction.
    shards: Box<[Mutex<Shard>]>,

    /// Eviction lock: held whenever more than one shard must be inspected
    /// or mutated at once. Never acquired while a shard lock is held.
    eviction: Mutex<()>,

    /// Every payload slot, allocated once at initialization.
    slots: Box<[Slot]>,

    /// Logical clock for recency stamps. Each zero transition takes a fresh
    /// tick, so the least-recently-released order is total.
    ticks: AtomicU64,

    metrics: Metrics,
}

impl State {
    fn shard_index(&self, id: BlockId) -> usize {
        let index = (id.mix() % self.shards.len() as u64) as usize;
        debug_assert!(index < self.shards.len());
        index
    }

    /// Drop one reference to `slot`, stamping recency at the transition to
    /// zero (and only there).
    fn retire(&self, slot: usize, identity: BlockId) {
        let mut shard = self.shards[self.shard_index(identity)].lock().unwrap();
        let resident = shard
            .find_mut(identity)
            .expect("released block is not indexed");
        debug_assert_eq!(resident.slot, slot);
        assert!(resident.refcount > 0, "refcount underflow");
        resident.refcount -= 1;
        if resident.refcount == 0 {
            resident.recency = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        }
    }
}

/// A fixed-capacity, concurrently shared cache of storage blocks.
///
/// Cloning is cheap: all clones share one pool. Operations take `&self` and
/// may be issued from any number of tasks concurrently.
pub struct BlockCache<T: Transport> {
    state: Arc<State>,
    transport: Arc<T>,
}

impl<T: Transport> Clone for BlockCache<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> BlockCache<T> {
    /// Create a pool of `cfg.slots` empty slots indexed by `cfg.shards`
    /// shards, registering metrics on `context`.
    ///
    /// Unassigned slots are distributed round-robin across the shards so
    /// initial allocations do not all contend on one shard. They carry
    /// recency zero and are consumed before any resident block is
    /// displaced.
    pub fn init<E: RuntimeMetrics>(context: &E, transport: T, cfg: Config) -> Self {
        let metrics = Metrics::init(context);
        let slots: Box<[Slot]> = (0..cfg.slots.get())
            .map(|_| Slot::new(cfg.block_size.get()))
            .collect();
        let shard_count = cfg.shards.get();
        let mut shards: Vec<Mutex<Shard>> = (0..shard_count)
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        for ordinal in 0..slots.len() {
            shards[ordinal % shard_count]
                .get_mut()
                .unwrap()
                .residents
                .push(Resident {
                    slot: ordinal,
                    identity: None,
                    refcount: 0,
                    recency: 0,
                });
        }
        debug!(slots = slots.len(), shards = shard_count, "initialized");
        Self {
            state: Arc::new(State {
                shards: shards.into_boxed_slice(),
                eviction: Mutex::new(()),
                slots,
                ticks: AtomicU64::new(0),
                metrics,
            }),
            transport: Arc::new(transport),
        }
    }

    /// Number of slots in the pool.
    pub fn capacity(&self) -> usize {
        self.state.slots.len()
    }

    /// The transport this cache transfers blocks over.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Return an exclusively locked slot holding `id`, taking a reference
    /// that lasts until the guard is dropped.
    ///
    /// The payload is returned as-is and may not reflect the block's
    /// durable contents; callers that need them should use [Self::read].
    ///
    /// # Panics
    ///
    /// Panics if every slot is referenced (cache exhaustion). That is a
    /// resource-sizing or reference-leak bug, not a transient condition,
    /// and is not retried.
    pub async fn acquire(&self, id: BlockId) -> BlockGuard {
        let slot = self.claim(id);
        // Every index lock has been released; blocking on the exclusive
        // lock here cannot deadlock.
        let frame = self.state.slots[slot].frame.lock_arc().await;
        BlockGuard {
            state: self.state.clone(),
            slot,
            identity: id,
            frame: Some(frame),
        }
    }

    /// Find-or-allocate: the ordinal of the slot now holding `id`, with the
    /// caller's reference already counted.
    fn claim(&self, id: BlockId) -> usize {
        let state = self.state.as_ref();
        let target = state.shard_index(id);

        // Hit path: one shard lock, no scan.
        {
            let mut shard = state.shards[target].lock().unwrap();
            if let Some(resident) = shard.find_mut(id) {
                resident.refcount += 1;
                state.metrics.hits.inc();
                trace!(id = %id, slot = resident.slot, "hit");
                return resident.slot;
            }
        }

        // Miss. The shard lock must be dropped before the eviction lock is
        // taken, or a concurrent miss in another shard could invert the
        // order and deadlock.
        let eviction = state.eviction.lock().unwrap();

        // Re-scan under the eviction lock: another task may have claimed
        // `id` while no lock was held.
        {
            let mut shard = state.shards[target].lock().unwrap();
            if let Some(resident) = shard.find_mut(id) {
                resident.refcount += 1;
                state.metrics.hits.inc();
                trace!(id = %id, slot = resident.slot, "hit on re-scan");
                return resident.slot;
            }
        }
        state.metrics.misses.inc();

        // Visit every shard in index order, tracking the unreferenced slot
        // with the globally smallest recency. Only the lock of the shard
        // holding the best candidate so far is retained; the eviction lock
        // serializes scans, so briefly holding two shard locks below cannot
        // deadlock.
        let mut best: Option<(usize, MutexGuard<'_, Shard>, usize, u64)> = None;
        for (index, shard) in state.shards.iter().enumerate() {
            let guard = shard.lock().unwrap();
            let Some((position, recency)) = guard.candidate() else {
                continue;
            };
            // Ties resolve to the candidate scanned last.
            let better = match &best {
                Some((_, _, _, smallest)) => recency <= *smallest,
                None => true,
            };
            if better {
                best = Some((index, guard, position, recency));
            }
        }
        let Some((origin, mut origin_shard, position, _)) = best else {
            panic!("block cache exhausted: every slot is referenced");
        };

        let mut claimed = origin_shard.residents.swap_remove(position);
        let slot = claimed.slot;

        // An unreferenced slot has no holders, and its entry is now in no
        // shard, so nothing can be racing for the exclusive lock:
        // invalidate the payload in place.
        state.slots[slot]
            .frame
            .try_lock()
            .expect("unreferenced slot is locked")
            .valid = false;

        if let Some(displaced) = claimed.identity {
            state.metrics.evictions.inc();
            debug!(displaced = %displaced, id = %id, slot, "evicting");
        }
        claimed.identity = Some(id);
        claimed.refcount = 1;

        if origin == target {
            origin_shard.residents.push(claimed);
        } else {
            // Taking a second shard lock is safe: multi-shard holders are
            // serialized by the eviction lock held above.
            state.shards[target].lock().unwrap().residents.push(claimed);
        }
        drop(origin_shard);
        drop(eviction);
        slot
    }

    /// Return a guard for `id` whose payload reflects the block's durable
    /// contents, loading it over the transport if the slot is invalid.
    ///
    /// On a transport fault the reference is released before the error is
    /// returned.
    ///
    /// # Panics
    ///
    /// Panics on cache exhaustion (see [Self::acquire]).
    pub async fn read(&self, id: BlockId) -> Result<BlockGuard, Error> {
        let mut guard = self.acquire(id).await;
        let slot = guard.slot;
        let frame = guard.frame_mut();
        if !frame.valid {
            self.state.metrics.loads.inc();
            trace!(id = %id, slot, "loading");
            self.transport.load(id, &mut frame.data).await?;
            frame.valid = true;
        }
        Ok(guard)
    }

    /// Write-through: persist the guard's payload to the block it names.
    ///
    /// Possession of the guard is proof the slot's exclusive lock is held,
    /// so the payload cannot change under the transfer. There is no delayed
    /// writeback: when this returns, the transport has the bytes.
    pub async fn write(&self, guard: &mut BlockGuard) -> Result<(), Error> {
        debug_assert!(Arc::ptr_eq(&self.state, &guard.state));
        let id = guard.identity;
        let slot = guard.slot;
        self.state.metrics.stores.inc();
        trace!(id = %id, slot, "storing");
        let frame = guard.frame_mut();
        self.transport.store(id, &frame.data).await?;
        // The payload now equals the durable contents by definition.
        frame.valid = true;
        Ok(())
    }

    /// Keep the guard's block resident after the guard is released.
    ///
    /// A pin is counted like another holder: the slot cannot be evicted
    /// while the returned token is alive. The exclusive lock is neither
    /// required nor taken, so a caller (e.g. a journal) can hold pins
    /// across acquire/release cycles performed by itself or others.
    /// Dropping the token releases the pin.
    pub fn pin(&self, guard: &BlockGuard) -> BlockPin {
        debug_assert!(Arc::ptr_eq(&self.state, &guard.state));
        {
            let state = self.state.as_ref();
            let mut shard = state.shards[state.shard_index(guard.identity)].lock().unwrap();
            let resident = shard
                .find_mut(guard.identity)
                .expect("pinned block is not indexed");
            resident.refcount += 1;
        }
        self.state.metrics.pinned.inc();
        trace!(id = %guard.identity, slot = guard.slot, "pinned");
        BlockPin {
            state: self.state.clone(),
            slot: guard.slot,
            identity: guard.identity,
        }
    }
}

/// An exclusively held block.
///
/// The guard is both a counted reference to the slot and the exclusive-use
/// lock on its payload. Dropping it is the release: the lock is given up
/// first, then the reference is returned and, if it was the last, the
/// slot's recency is stamped. A block must not be touched after its guard
/// is dropped; ownership makes that unrepresentable.
pub struct BlockGuard {
    state: Arc<State>,
    slot: usize,
    identity: BlockId,
    /// `Some` until dropped; taken first so the payload becomes
    /// inaccessible before any bookkeeping changes.
    frame: Option<MutexGuardArc<Frame>>,
}

impl BlockGuard {
    /// Identity of the held block.
    pub fn id(&self) -> BlockId {
        self.identity
    }

    /// The block's payload.
    pub fn data(&self) -> &[u8] {
        &self.frame().data
    }

    /// The block's payload, mutably. Changes are not durable until
    /// [BlockCache::write] is called with this guard.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.frame_mut().data
    }

    fn frame(&self) -> &Frame {
        self.frame.as_ref().expect("frame guard taken")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frame.as_mut().expect("frame guard taken")
    }
}

impl fmt::Debug for BlockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockGuard")
            .field("id", &self.identity)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        // Release the exclusive lock before any bookkeeping: the recency
        // stamp must postdate the last moment this guard could reach the
        // payload.
        drop(self.frame.take());
        self.state.retire(self.slot, self.identity);
    }
}

/// A residency token for one block.
///
/// Holds one reference without the exclusive lock, keeping the slot out of
/// eviction for as long as the token is alive. Dropping the token releases
/// the pin, so pins and unpins balance by ownership.
pub struct BlockPin {
    state: Arc<State>,
    slot: usize,
    identity: BlockId,
}

impl BlockPin {
    /// Identity of the pinned block.
    pub fn id(&self) -> BlockId {
        self.identity
    }
}

impl fmt::Debug for BlockPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPin")
            .field("id", &self.identity)
            .field("slot", &self.slot)
            .finish()
    }
}

impl Drop for BlockPin {
    fn drop(&mut self) {
        self.state.retire(self.slot, self.identity);
        self.state.metrics.pinned.dec();
        trace!(id = %self.identity, slot = self.slot, "unpinned");
    }
}
