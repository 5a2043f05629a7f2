#![no_main]
use std::cell::RefCell;
use std::collections::HashSet;

use libfuzzer_sys::fuzz_target;
use memtrace_membrane::{
    FreeOutcome, MemorySink, ReallocAccounting, RealAllocator, Tracer, TracerOptions,
};

/// Fake heap that reuses freed addresses. Frees of addresses it does not
/// consider live are ignored, like a hardened allocator would.
#[derive(Default)]
struct RecyclingHeap {
    next: RefCell<usize>,
    free_list: RefCell<Vec<usize>>,
    live: RefCell<HashSet<usize>>,
}

impl RecyclingHeap {
    fn issue(&self, size: usize) -> usize {
        if size > 1 << 20 {
            return 0;
        }
        let addr = self.free_list.borrow_mut().pop().unwrap_or_else(|| {
            let mut next = self.next.borrow_mut();
            *next += 0x40;
            *next
        });
        self.live.borrow_mut().insert(addr);
        addr
    }

    fn release(&self, ptr: usize) {
        if self.live.borrow_mut().remove(&ptr) {
            self.free_list.borrow_mut().push(ptr);
        }
    }
}

impl RealAllocator for RecyclingHeap {
    fn malloc(&self, size: usize) -> usize {
        self.issue(size)
    }
    fn calloc(&self, count: usize, elem_size: usize) -> usize {
        self.issue(count.saturating_mul(elem_size))
    }
    fn realloc(&self, ptr: usize, size: usize) -> usize {
        let new_ptr = self.issue(size);
        if new_ptr != 0 {
            self.release(ptr);
        }
        new_ptr
    }
    fn free(&self, ptr: usize) {
        self.release(ptr);
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&mode, ops)) = data.split_first() else {
        return;
    };
    let options = TracerOptions {
        realloc_accounting: if mode & 1 == 0 {
            ReallocAccounting::Confirmed
        } else {
            ReallocAccounting::Eager
        },
        ..TracerOptions::default()
    };
    let mut tracer = Tracer::start(RecyclingHeap::default(), MemorySink::new(), options);
    let mut issued: Vec<usize> = Vec::new();

    for chunk in ops.chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize * 32;
        let pick = |issued: &[usize]| issued.get(chunk[3] as usize % issued.len().max(1)).copied();
        match chunk[0] % 5 {
            0 => {
                if let Ok(p) = tracer.malloc(size) {
                    issued.push(p);
                }
            }
            1 => issued.push(tracer.calloc(chunk[3] as usize, size)),
            2 => {
                let old = pick(&issued).unwrap_or(0);
                issued.push(tracer.realloc(old, size));
            }
            3 => {
                let p = pick(&issued).unwrap_or(0);
                let live_before = tracer.records().find(p).is_some_and(|r| r.state.is_live());
                let outcome = tracer.free(p);
                assert_eq!(outcome.forwarded(), live_before && p != 0);
                if p == 0 {
                    assert_eq!(outcome, FreeOutcome::Null);
                }
            }
            _ => {
                // Pointer the heap never issued.
                let outcome = tracer.free(usize::MAX - chunk[3] as usize);
                assert_eq!(outcome, FreeOutcome::IllegalFree);
            }
        }

        let stats = tracer.statistics();
        assert_eq!(
            stats.allocated_bytes - stats.freed_bytes,
            tracer.records().live_bytes()
        );
    }

    let report = tracer.finish();
    assert_eq!(
        report.statistics.total_allocated - report.statistics.total_freed,
        report.leaked_bytes()
    );
});
