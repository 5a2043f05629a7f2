//! Running counters for the tracing session.
//!
//! The tracer is single-threaded by contract and every counter is updated
//! under the process-wide tracer lock, so plain integers are enough.

use serde::{Deserialize, Serialize};

/// Per-operation call counts and byte totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    /// Intercepted `malloc` calls.
    pub n_malloc: u64,
    /// Intercepted `calloc` calls.
    pub n_calloc: u64,
    /// Intercepted `realloc` calls.
    pub n_realloc: u64,
    /// Bytes requested by all counted allocations.
    pub allocated_bytes: u64,
    /// Bytes credited back by frees and by the release half of `realloc`.
    pub freed_bytes: u64,
    /// `free` calls on pointers the tracer never issued.
    pub n_illegal_free: u64,
    /// `free` calls on pointers already released.
    pub n_double_free: u64,
}

impl Statistics {
    /// Create zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            n_malloc: 0,
            n_calloc: 0,
            n_realloc: 0,
            allocated_bytes: 0,
            freed_bytes: 0,
            n_illegal_free: 0,
            n_double_free: 0,
        }
    }

    // The `allocated` argument of the three `record_*` calls below is `None`
    // when the real allocator failed and no block exists: the call counts,
    // the bytes do not.

    pub fn record_malloc(&mut self, allocated: Option<usize>) {
        self.n_malloc += 1;
        self.add_allocated(allocated);
    }

    pub fn record_calloc(&mut self, allocated: Option<usize>) {
        self.n_calloc += 1;
        self.add_allocated(allocated);
    }

    pub fn record_realloc(&mut self, allocated: Option<usize>) {
        self.n_realloc += 1;
        self.add_allocated(allocated);
    }

    fn add_allocated(&mut self, allocated: Option<usize>) {
        if let Some(size) = allocated {
            self.allocated_bytes = self.allocated_bytes.wrapping_add(size as u64);
        }
    }

    pub fn record_free(&mut self, size: usize) {
        self.freed_bytes = self.freed_bytes.wrapping_add(size as u64);
    }

    pub fn record_illegal_free(&mut self) {
        self.n_illegal_free += 1;
    }

    pub fn record_double_free(&mut self) {
        self.n_double_free += 1;
    }

    /// Number of counted allocation calls.
    #[must_use]
    pub const fn allocation_calls(&self) -> u64 {
        self.n_malloc + self.n_calloc + self.n_realloc
    }

    /// Average bytes per counted allocation call.
    ///
    /// `None` when no allocation call was made.
    #[must_use]
    pub const fn average_allocated(&self) -> Option<u64> {
        match self.allocation_calls() {
            0 => None,
            calls => Some(self.allocated_bytes / calls),
        }
    }

    /// Bytes allocated but not yet credited back.
    #[must_use]
    pub const fn outstanding_bytes(&self) -> u64 {
        self.allocated_bytes.wrapping_sub(self.freed_bytes)
    }

    /// Freeze the counters into the end-of-session summary.
    #[must_use]
    pub const fn summary(&self) -> StatisticsSummary {
        StatisticsSummary {
            n_malloc: self.n_malloc,
            n_calloc: self.n_calloc,
            n_realloc: self.n_realloc,
            total_allocated: self.allocated_bytes,
            average_allocated: self.average_allocated(),
            total_freed: self.freed_bytes,
            illegal_frees: self.n_illegal_free,
            double_frees: self.n_double_free,
        }
    }
}

/// Final statistics reported at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub n_malloc: u64,
    pub n_calloc: u64,
    pub n_realloc: u64,
    pub total_allocated: u64,
    /// `None` if the session made no counted allocation.
    pub average_allocated: Option<u64>,
    pub total_freed: u64,
    #[serde(default)]
    pub illegal_frees: u64,
    #[serde(default)]
    pub double_frees: u64,
}
