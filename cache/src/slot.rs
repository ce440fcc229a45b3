use async_lock::Mutex;
use std::{fmt, sync::Arc};

/// Identity of a storage block: the device it lives on and its number on
/// that device.
///
/// An identity is stable for as long as any reference to its slot is
/// outstanding; it changes only when an idle slot is reassigned to serve a
/// different block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId {
    /// Device identifier.
    pub device: u64,

    /// Block number on the device.
    pub number: u64,
}

impl BlockId {
    /// Create an identity from a device identifier and block number.
    pub const fn new(device: u64, number: u64) -> Self {
        Self { device, number }
    }

    /// Stable mixing of device and block number, reduced modulo the shard
    /// count by the caller.
    ///
    /// The Fibonacci constant spreads adjacent block numbers (the common
    /// access pattern) across shards instead of clustering them.
    pub(crate) const fn mix(&self) -> u64 {
        (self.device ^ self.number).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.number)
    }
}

/// Payload of one slot, reachable only through the slot's exclusive-use
/// lock.
pub(crate) struct Frame {
    /// Whether `data` reflects the durable contents of the identity the
    /// slot currently represents. Cleared when the identity changes, set
    /// after a successful load (or write-through store, which leaves the
    /// payload durably equal by definition).
    pub valid: bool,

    /// One block's worth of bytes.
    pub data: Box<[u8]>,
}

/// One cache line of the pool.
///
/// Only the payload lives here: identity, reference count, and recency are
/// index state and live in the [crate::shard::Shard] that currently indexes
/// the slot.
pub(crate) struct Slot {
    /// The exclusive-use lock. Held across transport transfers and client
    /// payload access, so it must be awaitable; `Arc` so an owned guard can
    /// ride inside a returned handle. Acquired only after every index lock
    /// has been released.
    pub frame: Arc<Mutex<Frame>>,
}

impl Slot {
    /// Create an empty slot with a zeroed payload of `block_size` bytes.
    pub fn new(block_size: usize) -> Self {
        Self {
            frame: Arc::new(Mutex::new(Frame {
                valid: false,
                data: vec![0u8; block_size].into_boxed_slice(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(BlockId::new(1, 33).to_string(), "1:33");
    }

    #[test]
    fn test_mix_differs_for_adjacent_blocks() {
        let a = BlockId::new(0, 1).mix();
        let b = BlockId::new(0, 2).mix();
        assert_ne!(a % 13, b % 13);
    }

    #[test]
    fn test_new_slot_invalid() {
        let slot = Slot::new(512);
        let frame = slot.frame.try_lock().unwrap();
        assert!(!frame.valid);
        assert_eq!(frame.data.len(), 512);
        assert!(frame.data.iter().all(|b| *b == 0));
    }
}
