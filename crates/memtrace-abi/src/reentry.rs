//! Per-thread guard that keeps the tracer from tracing itself.
//!
//! The tracer's own bookkeeping allocates through the process allocator, which
//! is this crate. Any allocator call made while a guard is held on the same
//! thread bypasses tracking and goes straight to the real allocator.

use std::cell::Cell;

thread_local! {
    static ALLOCATOR_REENTRY_DEPTH: Cell<u32> = const { Cell::new(0) };
}

pub(crate) struct AllocatorReentryGuard;

impl Drop for AllocatorReentryGuard {
    fn drop(&mut self) {
        ALLOCATOR_REENTRY_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_sub(1));
        });
    }
}

/// `None` if this thread is already inside the tracer.
#[inline]
pub(crate) fn enter_allocator_reentry_guard() -> Option<AllocatorReentryGuard> {
    ALLOCATOR_REENTRY_DEPTH.with(|depth| {
        let current = depth.get();
        if current > 0 {
            None
        } else {
            depth.set(current + 1);
            Some(AllocatorReentryGuard)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_entry_is_refused() {
        let outer = enter_allocator_reentry_guard();
        assert!(outer.is_some());
        assert!(enter_allocator_reentry_guard().is_none());
        drop(outer);
        assert!(enter_allocator_reentry_guard().is_some());
    }

    #[test]
    fn guard_is_per_thread() {
        let _outer = enter_allocator_reentry_guard();
        let other = std::thread::spawn(|| enter_allocator_reentry_guard().is_some())
            .join()
            .unwrap();
        assert!(other);
    }
}
