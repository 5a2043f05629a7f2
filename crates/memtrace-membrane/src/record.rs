//! Allocation record store.
//!
//! Every pointer handed to the traced program gets a record. Records are
//! never physically removed on release: they flip to [`RecordState::Released`]
//! and stay in the store, so a second `free` of the same address is
//! recognized as a double free with a single hash lookup.
//!
//! Records live in an append-only `Vec` (insertion order, used for the leak
//! report) indexed by a map from address to the most recent record for that
//! address.

use std::collections::HashMap;

/// Live/released tag for a tracked allocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordState {
    /// Memory is owned by the traced program.
    #[default]
    Live = 1,
    /// Memory has been handed back to the real allocator.
    Released = 0,
}

impl RecordState {
    /// Returns true if the allocation has not been released yet.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }

    /// Reference count shown in the leak table.
    #[must_use]
    pub const fn ref_count(self) -> u32 {
        self as u32
    }
}

/// Metadata for one (re)allocation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Address returned by the real allocator.
    pub address: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Current state.
    pub state: RecordState,
}

/// Stable handle to a record inside a [`RecordStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordHandle(usize);

impl RecordHandle {
    /// Position of the record in insertion order.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Result of [`RecordStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    /// Handle of the new live record.
    pub handle: RecordHandle,
    /// Live record for the same address that had to be retired, if any.
    pub superseded: Option<AllocationRecord>,
}

/// Result of [`RecordStore::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseResult {
    /// The live record was marked released; carries the record as it was.
    Released(AllocationRecord),
    /// The most recent record for this address is already released.
    AlreadyReleased(AllocationRecord),
    /// The address was never tracked.
    NotFound,
}

/// Address-keyed store of allocation records.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<AllocationRecord>,
    by_address: HashMap<usize, usize>,
    live: usize,
}

impl RecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new live allocation.
    ///
    /// The real allocator never hands out an address that is still live, so
    /// callers are expected to release the previous record first. If a live
    /// record is found anyway, it is retired without byte credit and returned
    /// in [`Inserted::superseded`].
    pub fn insert(&mut self, address: usize, size: usize) -> Inserted {
        let superseded = self.by_address.get(&address).copied().and_then(|idx| {
            let stale = &mut self.records[idx];
            if stale.state.is_live() {
                let before = *stale;
                stale.state = RecordState::Released;
                self.live -= 1;
                Some(before)
            } else {
                None
            }
        });

        let idx = self.records.len();
        self.records.push(AllocationRecord {
            address,
            size,
            state: RecordState::Live,
        });
        self.by_address.insert(address, idx);
        self.live += 1;

        Inserted {
            handle: RecordHandle(idx),
            superseded,
        }
    }

    /// Most recent record for `address`, live or released.
    #[must_use]
    pub fn find(&self, address: usize) -> Option<AllocationRecord> {
        self.by_address
            .get(&address)
            .map(|&idx| self.records[idx])
    }

    /// Record behind a handle returned by [`insert`](Self::insert).
    #[must_use]
    pub fn get(&self, handle: RecordHandle) -> Option<AllocationRecord> {
        self.records.get(handle.0).copied()
    }

    /// Mark the record for `address` as released.
    pub fn release(&mut self, address: usize) -> ReleaseResult {
        let Some(&idx) = self.by_address.get(&address) else {
            return ReleaseResult::NotFound;
        };
        let record = &mut self.records[idx];
        if !record.state.is_live() {
            return ReleaseResult::AlreadyReleased(*record);
        }
        let before = *record;
        record.state = RecordState::Released;
        self.live -= 1;
        ReleaseResult::Released(before)
    }

    /// Live records in insertion order. Each call starts a fresh traversal.
    pub fn for_each_live(&self) -> impl Iterator<Item = &AllocationRecord> + '_ {
        self.records.iter().filter(|r| r.state.is_live())
    }

    /// Number of live records.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Sum of sizes over live records.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.for_each_live().map(|r| r.size as u64).sum()
    }

    /// Number of records ever created (live and released).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing was ever tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Release all store storage.
    pub fn destroy(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_find() {
        let mut store = RecordStore::new();
        let ins = store.insert(0x1000, 64);
        assert!(ins.superseded.is_none());

        let rec = store.find(0x1000).expect("record should exist");
        assert_eq!(rec.size, 64);
        assert_eq!(rec.state, RecordState::Live);
        assert_eq!(store.get(ins.handle), Some(rec));
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn find_unknown_is_none() {
        let store = RecordStore::new();
        assert!(store.find(0xdead).is_none());
    }

    #[test]
    fn release_keeps_tombstone() {
        let mut store = RecordStore::new();
        store.insert(0x2000, 32);

        assert!(matches!(store.release(0x2000), ReleaseResult::Released(r) if r.size == 32));
        let rec = store.find(0x2000).expect("released record is retained");
        assert_eq!(rec.state, RecordState::Released);
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn second_release_is_reported() {
        let mut store = RecordStore::new();
        store.insert(0x3000, 8);
        store.release(0x3000);
        assert!(matches!(
            store.release(0x3000),
            ReleaseResult::AlreadyReleased(_)
        ));
        assert_eq!(store.release(0x4000), ReleaseResult::NotFound);
    }

    #[test]
    fn reused_address_gets_fresh_record() {
        let mut store = RecordStore::new();
        store.insert(0x5000, 16);
        store.release(0x5000);
        let ins = store.insert(0x5000, 48);
        assert!(ins.superseded.is_none());

        let rec = store.find(0x5000).unwrap();
        assert_eq!(rec.size, 48);
        assert!(rec.state.is_live());
        assert_eq!(store.len(), 2);
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn insert_over_live_record_retires_it() {
        let mut store = RecordStore::new();
        store.insert(0x6000, 16);
        let ins = store.insert(0x6000, 24);

        let stale = ins.superseded.expect("stale live record");
        assert_eq!(stale.size, 16);
        assert_eq!(store.live_count(), 1);
        assert_eq!(store.for_each_live().count(), 1);
        assert_eq!(store.find(0x6000).unwrap().size, 24);
    }

    #[test]
    fn live_traversal_keeps_insertion_order() {
        let mut store = RecordStore::new();
        store.insert(0x30, 3);
        store.insert(0x10, 1);
        store.insert(0x20, 2);
        store.release(0x10);

        let first: Vec<usize> = store.for_each_live().map(|r| r.address).collect();
        assert_eq!(first, vec![0x30, 0x20]);
        let second: Vec<usize> = store.for_each_live().map(|r| r.address).collect();
        assert_eq!(first, second);
        assert_eq!(store.live_bytes(), 5);
    }

    #[test]
    fn ref_count_follows_state() {
        assert_eq!(RecordState::Live.ref_count(), 1);
        assert_eq!(RecordState::Released.ref_count(), 0);
    }
}
