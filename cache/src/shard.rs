use crate::BlockId;

/// Bookkeeping for one slot, owned by the shard that currently indexes it.
///
/// The record moves between shards only during eviction, while both the
/// eviction lock and the affected shard locks are held.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Resident {
    /// Ordinal of the slot in the pool array.
    pub slot: usize,

    /// Identity the slot currently represents. `None` until the slot is
    /// assigned for the first time.
    pub identity: Option<BlockId>,

    /// Outstanding holders (one per guard) plus pins. The slot is never
    /// reassigned while nonzero.
    pub refcount: u32,

    /// Tick recorded when `refcount` last returned to zero. Meaningful only
    /// while `refcount == 0`; smaller is older.
    pub recency: u64,
}

/// One partition of the index.
///
/// Membership changes only under this shard's lock (plus the eviction lock
/// whenever more than one shard is involved). Entries are unordered;
/// removal is `swap_remove`, so positions are not stable across mutations.
#[derive(Default)]
pub(crate) struct Shard {
    pub residents: Vec<Resident>,
}

impl Shard {
    /// Find the resident entry for `identity`.
    pub fn find_mut(&mut self, identity: BlockId) -> Option<&mut Resident> {
        self.residents
            .iter_mut()
            .find(|r| r.identity == Some(identity))
    }

    /// Position and recency of this shard's best eviction candidate: an
    /// unreferenced entry with the smallest recency. Ties resolve to the
    /// entry scanned last, mirroring the cross-shard rule.
    pub fn candidate(&self) -> Option<(usize, u64)> {
        let mut best: Option<(usize, u64)> = None;
        for (position, resident) in self.residents.iter().enumerate() {
            if resident.refcount != 0 {
                continue;
            }
            match best {
                Some((_, recency)) if resident.recency > recency => {}
                _ => best = Some((position, resident.recency)),
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resident(slot: usize, identity: Option<BlockId>, refcount: u32, recency: u64) -> Resident {
        Resident {
            slot,
            identity,
            refcount,
            recency,
        }
    }

    #[test]
    fn test_find_skips_unassigned() {
        let mut shard = Shard::default();
        shard.residents.push(resident(0, None, 0, 0));
        shard
            .residents
            .push(resident(1, Some(BlockId::new(1, 7)), 2, 0));

        assert!(shard.find_mut(BlockId::new(1, 7)).is_some());
        assert!(shard.find_mut(BlockId::new(1, 8)).is_none());
    }

    #[test]
    fn test_candidate_ignores_referenced() {
        let mut shard = Shard::default();
        shard
            .residents
            .push(resident(0, Some(BlockId::new(0, 1)), 1, 1));
        shard
            .residents
            .push(resident(1, Some(BlockId::new(0, 2)), 0, 9));
        shard
            .residents
            .push(resident(2, Some(BlockId::new(0, 3)), 3, 2));

        assert_eq!(shard.candidate(), Some((1, 9)));
    }

    #[test]
    fn test_candidate_prefers_oldest() {
        let mut shard = Shard::default();
        shard
            .residents
            .push(resident(0, Some(BlockId::new(0, 1)), 0, 5));
        shard
            .residents
            .push(resident(1, Some(BlockId::new(0, 2)), 0, 3));
        shard
            .residents
            .push(resident(2, Some(BlockId::new(0, 3)), 0, 8));

        assert_eq!(shard.candidate(), Some((1, 3)));
    }

    #[test]
    fn test_candidate_tie_resolves_to_last() {
        let mut shard = Shard::default();
        shard
            .residents
            .push(resident(0, Some(BlockId::new(0, 1)), 0, 4));
        shard
            .residents
            .push(resident(1, Some(BlockId::new(0, 2)), 0, 4));

        assert_eq!(shard.candidate(), Some((1, 4)));
    }

    #[test]
    fn test_candidate_none_when_all_referenced() {
        let mut shard = Shard::default();
        shard
            .residents
            .push(resident(0, Some(BlockId::new(0, 1)), 1, 0));

        assert_eq!(shard.candidate(), None);
    }
}
