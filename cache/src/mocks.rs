//! Mock implementations of [Transport] for testing.

use crate::{BlockId, Error, Transport};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
};

/// An in-memory [Transport] backed by a map of blocks.
///
/// Blocks that were never stored load as zeroes. Loads and stores are
/// counted so tests can assert how many transfers a cache actually issued,
/// and either direction can be forced to fail.
#[derive(Default)]
pub struct Disk {
    blocks: Mutex<HashMap<BlockId, Vec<u8>>>,
    loads: AtomicU64,
    stores: AtomicU64,
    fail_loads: AtomicBool,
    fail_stores: AtomicBool,
}

impl Disk {
    /// Number of loads issued so far.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of stores issued so far.
    pub fn stores(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }

    /// Make every subsequent load fail (until reset).
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::Relaxed);
    }

    /// Make every subsequent store fail (until reset).
    pub fn fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::Relaxed);
    }

    /// Seed the durable contents of `id` without going through a cache.
    pub fn put(&self, id: BlockId, data: Vec<u8>) {
        self.blocks.lock().unwrap().insert(id, data);
    }

    /// Durable contents of `id`, if it was ever stored.
    pub fn get(&self, id: BlockId) -> Option<Vec<u8>> {
        self.blocks.lock().unwrap().get(&id).cloned()
    }
}

impl Transport for Disk {
    async fn load(&self, id: BlockId, buf: &mut [u8]) -> Result<(), Error> {
        if self.fail_loads.load(Ordering::Relaxed) {
            return Err(Error::LoadFailed(id));
        }
        self.loads.fetch_add(1, Ordering::Relaxed);
        match self.blocks.lock().unwrap().get(&id) {
            Some(block) => buf.copy_from_slice(block),
            None => buf.fill(0),
        }
        Ok(())
    }

    async fn store(&self, id: BlockId, buf: &[u8]) -> Result<(), Error> {
        if self.fail_stores.load(Ordering::Relaxed) {
            return Err(Error::StoreFailed(id));
        }
        self.stores.fetch_add(1, Ordering::Relaxed);
        self.blocks.lock().unwrap().insert(id, buf.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};

    #[test_traced]
    fn test_unknown_blocks_load_as_zeroes() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let disk = Disk::default();
            let mut buf = [0xFFu8; 16];
            disk.load(BlockId::new(0, 1), &mut buf).await.unwrap();
            assert_eq!(buf, [0u8; 16]);
            assert_eq!(disk.loads(), 1);
        });
    }

    #[test_traced]
    fn test_store_then_load() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let disk = Disk::default();
            let id = BlockId::new(3, 9);
            disk.store(id, &[7u8; 16]).await.unwrap();

            let mut buf = [0u8; 16];
            disk.load(id, &mut buf).await.unwrap();
            assert_eq!(buf, [7u8; 16]);
            assert_eq!(disk.stores(), 1);
        });
    }

    #[test_traced]
    fn test_fault_injection() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let disk = Disk::default();
            let id = BlockId::new(0, 0);
            let mut buf = [0u8; 16];

            disk.fail_loads(true);
            assert!(matches!(
                disk.load(id, &mut buf).await,
                Err(Error::LoadFailed(_))
            ));
            disk.fail_loads(false);
            disk.load(id, &mut buf).await.unwrap();

            disk.fail_stores(true);
            assert!(matches!(
                disk.store(id, &buf).await,
                Err(Error::StoreFailed(_))
            ));

            // Failed transfers are not counted.
            assert_eq!(disk.loads(), 1);
            assert_eq!(disk.stores(), 0);
        });
    }
}
