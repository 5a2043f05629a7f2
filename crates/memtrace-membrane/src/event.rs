//! Events the tracer reports to its logging sink.
//!
//! Every field is a primitive (sizes, counts, pointer values as `usize`), so
//! a sink never has to reach back into tracer state.

use serde::{Deserialize, Serialize};

use crate::stats::StatisticsSummary;

/// One reportable tracer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// The tracer became active.
    SessionStart,
    /// The tracer finished its report.
    SessionEnd,
    /// `malloc(size) = ptr`.
    Allocated { size: usize, ptr: usize },
    /// `calloc(count, elem_size) = ptr`.
    ZeroedAllocated {
        count: usize,
        elem_size: usize,
        ptr: usize,
    },
    /// `realloc(old_ptr, size) = new_ptr`.
    Reallocated {
        old_ptr: usize,
        size: usize,
        new_ptr: usize,
    },
    /// `free(ptr)` was called; emitted before any validation.
    FreeRequested { ptr: usize },
    /// `free` of a pointer the tracer never issued.
    IllegalFree { ptr: usize },
    /// `free` of a pointer that was already released.
    DoubleFree { ptr: usize },
    /// A live record was found at an address the real allocator just handed
    /// out again; it was retired without byte credit.
    StaleRecordRetired { ptr: usize, size: usize },
    /// Header of the unreleased-blocks table. Emitted at most once.
    LeakSummaryStart,
    /// One allocation still live at teardown.
    LeakBlock {
        ptr: usize,
        size: usize,
        ref_count: u32,
    },
    /// End-of-session counters.
    FinalStatistics(StatisticsSummary),
}

impl TraceEvent {
    /// Stable snake_case name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Allocated { .. } => "allocated",
            Self::ZeroedAllocated { .. } => "zeroed_allocated",
            Self::Reallocated { .. } => "reallocated",
            Self::FreeRequested { .. } => "free_requested",
            Self::IllegalFree { .. } => "illegal_free",
            Self::DoubleFree { .. } => "double_free",
            Self::StaleRecordRetired { .. } => "stale_record_retired",
            Self::LeakSummaryStart => "leak_summary_start",
            Self::LeakBlock { .. } => "leak_block",
            Self::FinalStatistics(_) => "final_statistics",
        }
    }

    /// Severity used by structured sinks.
    #[must_use]
    pub const fn level(&self) -> Level {
        match self {
            Self::IllegalFree { .. } | Self::DoubleFree { .. } => Level::Error,
            Self::StaleRecordRetired { .. } | Self::LeakSummaryStart | Self::LeakBlock { .. } => {
                Level::Warn
            }
            _ => Level::Info,
        }
    }

    /// True for events that correspond to an intercepted call.
    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(
            self,
            Self::Allocated { .. }
                | Self::ZeroedAllocated { .. }
                | Self::Reallocated { .. }
                | Self::FreeRequested { .. }
        )
    }
}

/// Severity of a [`TraceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// One JSONL line: sequence number, severity and the flattened event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub seq: u64,
    pub level: Level,
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Append-only, ordered, synchronous consumer of tracer events.
///
/// Implementations must not fail the caller: write errors are theirs to
/// swallow.
pub trait EventSink {
    fn emit(&mut self, event: &TraceEvent);

    fn flush(&mut self) {}
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: &TraceEvent) {
        (**self).emit(event);
    }

    fn flush(&mut self) {
        (**self).flush();
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn emit(&mut self, event: &TraceEvent) {
        (**self).emit(event);
    }

    fn flush(&mut self) {
        (**self).flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misuse_is_error_level() {
        assert_eq!(TraceEvent::IllegalFree { ptr: 1 }.level(), Level::Error);
        assert_eq!(TraceEvent::DoubleFree { ptr: 1 }.level(), Level::Error);
        assert_eq!(
            TraceEvent::Allocated { size: 1, ptr: 1 }.level(),
            Level::Info
        );
    }

    #[test]
    fn record_serializes_flat() {
        let rec = TraceRecord {
            seq: 7,
            level: Level::Info,
            event: TraceEvent::Allocated {
                size: 16,
                ptr: 0x1000,
            },
        };
        let json = serde_json::to_value(rec).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["level"], "info");
        assert_eq!(json["event"], "allocated");
        assert_eq!(json["size"], 16);
        assert_eq!(json["ptr"], 0x1000);
    }

    #[test]
    fn statistics_event_parses_back() {
        let line = r#"{"seq":3,"level":"info","event":"final_statistics","n_malloc":1,"n_calloc":0,"n_realloc":0,"total_allocated":8,"average_allocated":null,"total_freed":0}"#;
        let rec: TraceRecord = serde_json::from_str(line).unwrap();
        match rec.event {
            TraceEvent::FinalStatistics(s) => {
                assert_eq!(s.total_allocated, 8);
                assert_eq!(s.average_allocated, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn kind_matches_serde_tag() {
        let ev = TraceEvent::LeakBlock {
            ptr: 1,
            size: 2,
            ref_count: 1,
        };
        let json = serde_json::to_value(ev).unwrap();
        assert_eq!(json["event"], ev.kind());
    }
}
