//! Per-session summary built from a tracer log.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use memtrace_membrane::sink::format_ptr;
use memtrace_membrane::{StatisticsSummary, TraceEvent, TraceRecord};

/// One leaked block as reported at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakedBlock {
    pub ptr: usize,
    pub size: usize,
}

/// Totals for one traced session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub malloc_calls: u64,
    pub calloc_calls: u64,
    pub realloc_calls: u64,
    pub free_calls: u64,
    pub illegal_frees: u64,
    pub double_frees: u64,
    pub stale_records: u64,
    /// Bytes of retired stale records; dropped from tracking, never freed.
    #[serde(default)]
    pub stale_bytes: u64,
    pub leaks: Vec<LeakedBlock>,
    /// Final counters, if the session got that far.
    pub statistics: Option<StatisticsSummary>,
    /// True if the log ends with `session_end`.
    pub complete: bool,
}

impl SessionSummary {
    #[must_use]
    pub fn from_records(records: &[TraceRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            match record.event {
                TraceEvent::Allocated { .. } => summary.malloc_calls += 1,
                TraceEvent::ZeroedAllocated { .. } => summary.calloc_calls += 1,
                TraceEvent::Reallocated { .. } => summary.realloc_calls += 1,
                TraceEvent::FreeRequested { .. } => summary.free_calls += 1,
                TraceEvent::IllegalFree { .. } => summary.illegal_frees += 1,
                TraceEvent::DoubleFree { .. } => summary.double_frees += 1,
                TraceEvent::StaleRecordRetired { size, .. } => {
                    summary.stale_records += 1;
                    summary.stale_bytes += size as u64;
                }
                TraceEvent::LeakBlock { ptr, size, .. } => {
                    summary.leaks.push(LeakedBlock { ptr, size });
                }
                TraceEvent::FinalStatistics(stats) => summary.statistics = Some(stats),
                TraceEvent::SessionEnd => summary.complete = true,
                TraceEvent::SessionStart | TraceEvent::LeakSummaryStart => {}
            }
        }
        summary
    }

    #[must_use]
    pub fn leaked_bytes(&self) -> u64 {
        self.leaks.iter().map(|b| b.size as u64).sum()
    }

    /// Rule violations for `memtrace check`.
    ///
    /// Illegal and double frees always fail. Leaks fail unless allowed. The
    /// final counters must agree with the call events and with the leak
    /// table: allocated minus freed equals leaked bytes plus the bytes of
    /// retired stale records.
    #[must_use]
    pub fn violations(&self, allow_leaks: bool) -> Vec<String> {
        let mut out = Vec::new();
        if !self.complete {
            out.push("log is incomplete: no 'session_end'".to_string());
        }
        if self.illegal_frees > 0 {
            out.push(format!("{} illegal free(s)", self.illegal_frees));
        }
        if self.double_frees > 0 {
            out.push(format!("{} double free(s)", self.double_frees));
        }
        if !allow_leaks && !self.leaks.is_empty() {
            out.push(format!(
                "{} block(s) not deallocated ({} bytes)",
                self.leaks.len(),
                self.leaked_bytes()
            ));
        }

        match &self.statistics {
            None => out.push("missing 'final_statistics'".to_string()),
            Some(stats) => {
                let calls = (stats.n_malloc, stats.n_calloc, stats.n_realloc);
                let seen = (self.malloc_calls, self.calloc_calls, self.realloc_calls);
                if calls != seen {
                    out.push(format!(
                        "call counters {calls:?} disagree with logged calls {seen:?}"
                    ));
                }
                let outstanding = stats.total_allocated.wrapping_sub(stats.total_freed);
                let accounted = self.leaked_bytes() + self.stale_bytes;
                if outstanding != accounted {
                    out.push(format!(
                        "allocated - freed = {outstanding} but {} bytes reported leaked and {} retired stale",
                        self.leaked_bytes(),
                        self.stale_bytes
                    ));
                }
            }
        }
        out
    }

    /// Human-readable report.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "calls");
        let _ = writeln!(out, "  malloc   {}", self.malloc_calls);
        let _ = writeln!(out, "  calloc   {}", self.calloc_calls);
        let _ = writeln!(out, "  realloc  {}", self.realloc_calls);
        let _ = writeln!(out, "  free     {}", self.free_calls);
        let _ = writeln!(out, "errors");
        let _ = writeln!(out, "  illegal free   {}", self.illegal_frees);
        let _ = writeln!(out, "  double free    {}", self.double_frees);
        let _ = writeln!(
            out,
            "  stale record   {} ({} bytes)",
            self.stale_records, self.stale_bytes
        );
        if let Some(stats) = &self.statistics {
            let _ = writeln!(out, "bytes");
            let _ = writeln!(out, "  allocated  {}", stats.total_allocated);
            match stats.average_allocated {
                Some(avg) => {
                    let _ = writeln!(out, "  average    {avg}");
                }
                None => {
                    let _ = writeln!(out, "  average    n/a");
                }
            }
            let _ = writeln!(out, "  freed      {}", stats.total_freed);
        }
        let _ = writeln!(
            out,
            "leaks: {} block(s), {} bytes",
            self.leaks.len(),
            self.leaked_bytes()
        );
        for block in &self.leaks {
            let _ = writeln!(out, "  {:<18} {}", format_ptr(block.ptr), block.size);
        }
        if !self.complete {
            let _ = writeln!(out, "(incomplete log)");
        }
        out
    }
}
