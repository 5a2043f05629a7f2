//! Interception logic for `malloc`, `calloc`, `realloc` and `free`.
//!
//! [`Tracer`] owns the record store, the running statistics and the event
//! sink. Each entry point forwards to the real allocator and keeps the store
//! consistent with what the traced program owns:
//!
//! ```text
//! traced call -> Tracer -> RealAllocator -> RecordStore -> Statistics -> EventSink
//! ```
//!
//! Pointers are plain addresses (`usize`, 0 for null). The ABI layer converts
//! to and from `*mut c_void`.

use crate::config::{ReallocAccounting, TraceConfig, ZeroSizePolicy};
use crate::error::TraceError;
use crate::event::{EventSink, TraceEvent};
use crate::record::{AllocationRecord, RecordStore, ReleaseResult};
use crate::stats::{Statistics, StatisticsSummary};

/// The allocator every traced call is forwarded to.
///
/// Addresses are passed as `usize`; 0 is the null pointer.
pub trait RealAllocator {
    fn malloc(&self, size: usize) -> usize;
    fn calloc(&self, count: usize, elem_size: usize) -> usize;
    fn realloc(&self, ptr: usize, size: usize) -> usize;
    fn free(&self, ptr: usize);
}

impl<A: RealAllocator + ?Sized> RealAllocator for &A {
    fn malloc(&self, size: usize) -> usize {
        (**self).malloc(size)
    }

    fn calloc(&self, count: usize, elem_size: usize) -> usize {
        (**self).calloc(count, elem_size)
    }

    fn realloc(&self, ptr: usize, size: usize) -> usize {
        (**self).realloc(ptr, size)
    }

    fn free(&self, ptr: usize) {
        (**self).free(ptr);
    }
}

/// What [`Tracer::free`] did with a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// Live allocation released and forwarded.
    Freed { size: usize },
    /// Pointer was never issued through the tracer; not forwarded.
    IllegalFree,
    /// Pointer was already released; not forwarded.
    DoubleFree,
    /// `free(NULL)`: nothing to do.
    Null,
}

impl FreeOutcome {
    /// True if the call reached the real allocator.
    #[must_use]
    pub const fn forwarded(self) -> bool {
        matches!(self, Self::Freed { .. })
    }
}

/// Tracer behavior knobs taken from [`TraceConfig`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TracerOptions {
    pub realloc_accounting: ReallocAccounting,
    pub zero_size: ZeroSizePolicy,
}

impl From<&TraceConfig> for TracerOptions {
    fn from(cfg: &TraceConfig) -> Self {
        Self {
            realloc_accounting: cfg.realloc_accounting,
            zero_size: cfg.zero_size,
        }
    }
}

/// End-of-session report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalReport {
    pub statistics: StatisticsSummary,
    /// Allocations still live at teardown, oldest first.
    pub leaks: Vec<AllocationRecord>,
}

impl FinalReport {
    /// Sum of leaked bytes.
    #[must_use]
    pub fn leaked_bytes(&self) -> u64 {
        self.leaks.iter().map(|r| r.size as u64).sum()
    }
}

/// Allocation tracer: the single owner of all bookkeeping state.
#[derive(Debug)]
pub struct Tracer<A, S> {
    real: A,
    sink: S,
    records: RecordStore,
    stats: Statistics,
    options: TracerOptions,
}

impl<A: RealAllocator, S: EventSink> Tracer<A, S> {
    /// Start a session: empty store, zeroed counters, `SessionStart` emitted.
    pub fn start(real: A, mut sink: S, options: TracerOptions) -> Self {
        sink.emit(&TraceEvent::SessionStart);
        Self {
            real,
            sink,
            records: RecordStore::new(),
            stats: Statistics::new(),
            options,
        }
    }

    /// Traced `malloc`.
    ///
    /// Fails only for `malloc(0)` under [`ZeroSizePolicy::Abort`], before
    /// anything is forwarded.
    pub fn malloc(&mut self, size: usize) -> Result<usize, TraceError> {
        if size == 0 && self.options.zero_size == ZeroSizePolicy::Abort {
            return Err(TraceError::ZeroSizeRequest);
        }

        let ptr = self.real.malloc(size);
        let allocated = (ptr != 0).then_some(size);
        if ptr != 0 {
            self.track(ptr, size);
        }
        self.stats.record_malloc(allocated);
        self.sink.emit(&TraceEvent::Allocated { size, ptr });
        Ok(ptr)
    }

    /// Traced `calloc`. The tracked size is `count * elem_size`; overflow is
    /// the real allocator's business, bookkeeping wraps.
    pub fn calloc(&mut self, count: usize, elem_size: usize) -> usize {
        let total = count.wrapping_mul(elem_size);
        let ptr = self.real.calloc(count, elem_size);
        let allocated = (ptr != 0).then_some(total);
        if ptr != 0 {
            self.track(ptr, total);
        }
        self.stats.record_calloc(allocated);
        self.sink.emit(&TraceEvent::ZeroedAllocated {
            count,
            elem_size,
            ptr,
        });
        ptr
    }

    /// Traced `realloc`.
    ///
    /// The old record is released and its size credited as freed either
    /// before forwarding ([`ReallocAccounting::Eager`]) or only once the real
    /// allocator reports that the old block is gone
    /// ([`ReallocAccounting::Confirmed`]). Untracked or already released old
    /// pointers are forwarded without any credit.
    pub fn realloc(&mut self, ptr: usize, size: usize) -> usize {
        let old = self.records.find(ptr).filter(|r| r.state.is_live());

        if self.options.realloc_accounting == ReallocAccounting::Eager
            && let Some(rec) = old
        {
            self.release_credit(rec.address);
        }

        let new_ptr = self.real.realloc(ptr, size);

        // realloc(p, 0) returning null has freed p.
        let old_block_gone = new_ptr != 0 || size == 0;
        if self.options.realloc_accounting == ReallocAccounting::Confirmed
            && old_block_gone
            && let Some(rec) = old
        {
            self.release_credit(rec.address);
        }

        let allocated = (new_ptr != 0).then_some(size);
        if new_ptr != 0 {
            self.track(new_ptr, size);
        }
        self.stats.record_realloc(allocated);
        self.sink.emit(&TraceEvent::Reallocated {
            old_ptr: ptr,
            size,
            new_ptr,
        });
        new_ptr
    }

    /// Traced `free`.
    ///
    /// `FreeRequested` is always reported first. Only a live tracked pointer
    /// is forwarded; illegal and double frees are reported and dropped.
    pub fn free(&mut self, ptr: usize) -> FreeOutcome {
        self.sink.emit(&TraceEvent::FreeRequested { ptr });
        if ptr == 0 {
            return FreeOutcome::Null;
        }

        match self.records.release(ptr) {
            ReleaseResult::NotFound => {
                self.stats.record_illegal_free();
                self.sink.emit(&TraceEvent::IllegalFree { ptr });
                FreeOutcome::IllegalFree
            }
            ReleaseResult::AlreadyReleased(_) => {
                self.stats.record_double_free();
                self.sink.emit(&TraceEvent::DoubleFree { ptr });
                FreeOutcome::DoubleFree
            }
            ReleaseResult::Released(rec) => {
                self.stats.record_free(rec.size);
                self.real.free(ptr);
                FreeOutcome::Freed { size: rec.size }
            }
        }
    }

    /// Read access to the record store.
    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Current counters.
    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// The real allocator this tracer forwards to.
    #[must_use]
    pub fn real(&self) -> &A {
        &self.real
    }

    /// Mutable access to the sink, e.g. to flush it.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// End the session: report statistics, report every live record as a
    /// leak under a single header, emit `SessionEnd` and destroy the store.
    pub fn finish(mut self) -> FinalReport {
        let statistics = self.stats.summary();
        self.sink.emit(&TraceEvent::FinalStatistics(statistics));

        let leaks: Vec<AllocationRecord> = self.records.for_each_live().copied().collect();
        if !leaks.is_empty() {
            self.sink.emit(&TraceEvent::LeakSummaryStart);
            for rec in &leaks {
                self.sink.emit(&TraceEvent::LeakBlock {
                    ptr: rec.address,
                    size: rec.size,
                    ref_count: rec.state.ref_count(),
                });
            }
        }

        self.sink.emit(&TraceEvent::SessionEnd);
        self.sink.flush();
        self.records.destroy();

        FinalReport { statistics, leaks }
    }

    fn track(&mut self, ptr: usize, size: usize) {
        let inserted = self.records.insert(ptr, size);
        if let Some(stale) = inserted.superseded {
            self.sink.emit(&TraceEvent::StaleRecordRetired {
                ptr: stale.address,
                size: stale.size,
            });
        }
    }

    fn release_credit(&mut self, ptr: usize) {
        if let ReleaseResult::Released(rec) = self.records.release(ptr) {
            self.stats.record_free(rec.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::sink::MemorySink;

    /// Bump allocator that never reuses addresses.
    #[derive(Debug, Default)]
    struct Bump {
        next: Cell<usize>,
        frees: RefCell<Vec<usize>>,
        fail: Cell<bool>,
    }

    impl Bump {
        fn issue(&self) -> usize {
            if self.fail.get() {
                return 0;
            }
            let next = self.next.get() + 0x100;
            self.next.set(next);
            next
        }
    }

    impl RealAllocator for Bump {
        fn malloc(&self, _size: usize) -> usize {
            self.issue()
        }

        fn calloc(&self, _count: usize, _elem_size: usize) -> usize {
            self.issue()
        }

        fn realloc(&self, _ptr: usize, _size: usize) -> usize {
            self.issue()
        }

        fn free(&self, ptr: usize) {
            self.frees.borrow_mut().push(ptr);
        }
    }

    fn tracer(real: &Bump) -> Tracer<&Bump, MemorySink> {
        Tracer::start(real, MemorySink::new(), TracerOptions::default())
    }

    #[test]
    fn malloc_tracks_and_reports() {
        let real = Bump::default();
        let mut t = tracer(&real);
        let p = t.malloc(16).unwrap();

        assert_eq!(p, 0x100);
        assert_eq!(t.records().find(p).unwrap().size, 16);
        assert_eq!(t.statistics().n_malloc, 1);
        assert_eq!(t.statistics().allocated_bytes, 16);
        assert_eq!(
            t.sink_mut().events.last(),
            Some(&TraceEvent::Allocated { size: 16, ptr: p })
        );
    }

    #[test]
    fn null_malloc_is_not_tracked() {
        let real = Bump::default();
        real.fail.set(true);
        let mut t = tracer(&real);
        assert_eq!(t.malloc(32).unwrap(), 0);
        assert!(t.records().is_empty());
        assert_eq!(t.statistics().n_malloc, 1);
        assert_eq!(t.statistics().allocated_bytes, 0);
    }

    #[test]
    fn zero_size_abort_policy_refuses() {
        let real = Bump::default();
        let options = TracerOptions {
            zero_size: ZeroSizePolicy::Abort,
            ..TracerOptions::default()
        };
        let mut t = Tracer::start(&real, MemorySink::new(), options);
        assert_eq!(t.malloc(0), Err(TraceError::ZeroSizeRequest));
        assert_eq!(real.next.get(), 0);
    }

    #[test]
    fn zero_size_is_tracked_by_default() {
        let real = Bump::default();
        let mut t = tracer(&real);
        let p = t.malloc(0).unwrap();
        assert_eq!(t.records().find(p).unwrap().size, 0);
        assert!(t.free(p).forwarded());
    }

    #[test]
    fn calloc_tracks_product() {
        let real = Bump::default();
        let mut t = tracer(&real);
        let p = t.calloc(4, 8);
        assert_eq!(t.records().find(p).unwrap().size, 32);
        assert_eq!(t.statistics().n_calloc, 1);
        assert_eq!(t.statistics().allocated_bytes, 32);
    }

    #[test]
    fn free_forwards_live_pointer_once() {
        let real = Bump::default();
        let mut t = tracer(&real);
        let p = t.malloc(24).unwrap();

        assert_eq!(t.free(p), FreeOutcome::Freed { size: 24 });
        assert_eq!(t.free(p), FreeOutcome::DoubleFree);
        assert_eq!(*real.frees.borrow(), vec![p]);
        assert_eq!(t.statistics().freed_bytes, 24);
        assert_eq!(t.statistics().n_double_free, 1);
    }

    #[test]
    fn free_reports_request_before_verdict() {
        let real = Bump::default();
        let mut t = tracer(&real);
        t.free(0x42);
        let events = &t.sink_mut().events;
        let n = events.len();
        assert_eq!(events[n - 2], TraceEvent::FreeRequested { ptr: 0x42 });
        assert_eq!(events[n - 1], TraceEvent::IllegalFree { ptr: 0x42 });
        assert!(real.frees.borrow().is_empty());
    }

    #[test]
    fn free_null_is_noop() {
        let real = Bump::default();
        let mut t = tracer(&real);
        assert_eq!(t.free(0), FreeOutcome::Null);
        assert_eq!(t.sink_mut().count("illegal_free"), 0);
        assert_eq!(t.sink_mut().count("free_requested"), 1);
        assert!(real.frees.borrow().is_empty());
    }

    #[test]
    fn realloc_rekeys_record() {
        let real = Bump::default();
        let mut t = tracer(&real);
        let p1 = t.malloc(16).unwrap();
        let p2 = t.realloc(p1, 32);

        assert_ne!(p1, p2);
        assert!(!t.records().find(p1).unwrap().state.is_live());
        assert_eq!(t.records().find(p2).unwrap().size, 32);
        assert_eq!(t.statistics().freed_bytes, 16);
        assert_eq!(t.statistics().allocated_bytes, 48);
        assert_eq!(t.free(p1), FreeOutcome::DoubleFree);
        assert_eq!(t.free(p2), FreeOutcome::Freed { size: 32 });
    }

    #[test]
    fn failed_realloc_keeps_old_block_when_confirmed() {
        let real = Bump::default();
        let mut t = tracer(&real);
        let p = t.malloc(16).unwrap();
        real.fail.set(true);

        assert_eq!(t.realloc(p, 1 << 20), 0);
        assert!(t.records().find(p).unwrap().state.is_live());
        assert_eq!(t.statistics().freed_bytes, 0);
        assert_eq!(t.statistics().n_realloc, 1);
    }

    #[test]
    fn failed_realloc_credits_old_block_when_eager() {
        let real = Bump::default();
        let options = TracerOptions {
            realloc_accounting: ReallocAccounting::Eager,
            ..TracerOptions::default()
        };
        let mut t = Tracer::start(&real, MemorySink::new(), options);
        let p = t.malloc(16).unwrap();
        real.fail.set(true);

        assert_eq!(t.realloc(p, 1 << 20), 0);
        assert!(!t.records().find(p).unwrap().state.is_live());
        assert_eq!(t.statistics().freed_bytes, 16);
    }

    #[test]
    fn realloc_to_zero_returning_null_releases() {
        let real = Bump::default();
        let mut t = tracer(&real);
        let p = t.malloc(16).unwrap();
        real.fail.set(true);

        assert_eq!(t.realloc(p, 0), 0);
        assert!(!t.records().find(p).unwrap().state.is_live());
        assert_eq!(t.statistics().freed_bytes, 16);
    }

    #[test]
    fn realloc_of_untracked_pointer_forwards() {
        let real = Bump::default();
        let mut t = tracer(&real);
        let p = t.realloc(0x7000, 8);
        assert_ne!(p, 0);
        assert_eq!(t.statistics().freed_bytes, 0);
        assert_eq!(t.records().live_count(), 1);
    }

    #[test]
    fn finish_reports_leaks_once() {
        let real = Bump::default();
        let mut sink = MemorySink::new();
        let mut t = Tracer::start(&real, &mut sink, TracerOptions::default());
        let a = t.malloc(8).unwrap();
        let b = t.malloc(16).unwrap();
        let c = t.malloc(4).unwrap();
        t.free(b);
        let report = t.finish();

        assert_eq!(report.leaks.len(), 2);
        assert_eq!(report.leaks[0].address, a);
        assert_eq!(report.leaks[1].address, c);
        assert_eq!(report.leaked_bytes(), 12);
        assert_eq!(sink.count("leak_summary_start"), 1);
        assert_eq!(sink.count("leak_block"), 2);
        assert_eq!(sink.events.last(), Some(&TraceEvent::SessionEnd));
    }

    #[test]
    fn finish_without_leaks_has_no_header() {
        let real = Bump::default();
        let mut sink = MemorySink::new();
        let t = Tracer::start(&real, &mut sink, TracerOptions::default());
        let report = t.finish();

        assert!(report.leaks.is_empty());
        assert_eq!(report.statistics.average_allocated, None);
        assert_eq!(sink.count("leak_summary_start"), 0);
        assert_eq!(sink.count("final_statistics"), 1);
    }
}
