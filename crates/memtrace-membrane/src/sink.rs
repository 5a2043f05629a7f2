//! Event sinks: human-readable text, JSONL, and an in-memory collector.
//!
//! Sinks never surface I/O errors to the tracer. A broken log must not change
//! what the traced program observes.

use std::io::Write;

use crate::config::LogFormat;
use crate::event::{EventSink, TraceEvent, TraceRecord};

/// Collects events in memory. Used by tests and the harness.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub events: Vec<TraceEvent>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of collected events of the given kind.
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: &TraceEvent) {
        self.events.push(*event);
    }
}

/// Render a pointer value the way C's `%p` does on glibc.
#[must_use]
pub fn format_ptr(ptr: usize) -> String {
    if ptr == 0 {
        "(nil)".to_string()
    } else {
        format!("{ptr:#x}")
    }
}

/// Line-oriented text log. Every line carries its own number.
#[derive(Debug)]
pub struct TextSink<W: Write> {
    writer: W,
    seq: u64,
}

impl<W: Write> TextSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, seq: 0 }
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn line(&mut self, body: std::fmt::Arguments<'_>) {
        self.seq += 1;
        let _ = writeln!(self.writer, "[{:04}] {body}", self.seq);
    }
}

impl<W: Write> EventSink for TextSink<W> {
    fn emit(&mut self, event: &TraceEvent) {
        match *event {
            TraceEvent::SessionStart => self.line(format_args!("Memory tracer started.")),
            TraceEvent::SessionEnd => {
                self.line(format_args!(""));
                self.line(format_args!("Memory tracer stopped."));
            }
            TraceEvent::Allocated { size, ptr } => {
                self.line(format_args!(
                    "        malloc( {size} ) = {}",
                    format_ptr(ptr)
                ));
            }
            TraceEvent::ZeroedAllocated {
                count,
                elem_size,
                ptr,
            } => {
                self.line(format_args!(
                    "        calloc( {count} , {elem_size} ) = {}",
                    format_ptr(ptr)
                ));
            }
            TraceEvent::Reallocated {
                old_ptr,
                size,
                new_ptr,
            } => {
                self.line(format_args!(
                    "        realloc( {} , {size} ) = {}",
                    format_ptr(old_ptr),
                    format_ptr(new_ptr)
                ));
            }
            TraceEvent::FreeRequested { ptr } => {
                self.line(format_args!("        free( {} )", format_ptr(ptr)));
            }
            TraceEvent::IllegalFree { ptr } => {
                self.line(format_args!(
                    "    *** ILLEGAL FREE *** {} was never allocated",
                    format_ptr(ptr)
                ));
            }
            TraceEvent::DoubleFree { ptr } => {
                self.line(format_args!(
                    "    *** DOUBLE FREE  *** {} was already released",
                    format_ptr(ptr)
                ));
            }
            TraceEvent::StaleRecordRetired { ptr, size } => {
                self.line(format_args!(
                    "    *** STALE RECORD *** {} ({size} bytes) reissued while tracked",
                    format_ptr(ptr)
                ));
            }
            TraceEvent::LeakSummaryStart => {
                self.line(format_args!(""));
                self.line(format_args!("Non-deallocated memory blocks"));
                self.line(format_args!(
                    "  {:<18} {:<10} {:<8}",
                    "block", "size", "ref cnt"
                ));
            }
            TraceEvent::LeakBlock {
                ptr,
                size,
                ref_count,
            } => {
                self.line(format_args!(
                    "  {:<18} {size:<10} {ref_count:<8}",
                    format_ptr(ptr)
                ));
            }
            TraceEvent::FinalStatistics(stats) => {
                self.line(format_args!(""));
                self.line(format_args!("Statistics"));
                self.line(format_args!(
                    "  allocated_total      {}",
                    stats.total_allocated
                ));
                match stats.average_allocated {
                    Some(avg) => self.line(format_args!("  allocated_avg        {avg}")),
                    None => self.line(format_args!("  allocated_avg        n/a")),
                }
                self.line(format_args!("  freed_total          {}", stats.total_freed));
            }
        }
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

/// One JSON object per line, see [`TraceRecord`].
#[derive(Debug)]
pub struct JsonlSink<W: Write> {
    writer: W,
    seq: u64,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, seq: 0 }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonlSink<W> {
    fn emit(&mut self, event: &TraceEvent) {
        self.seq += 1;
        let record = TraceRecord {
            seq: self.seq,
            level: event.level(),
            event: *event,
        };
        if serde_json::to_writer(&mut self.writer, &record).is_ok() {
            let _ = self.writer.write_all(b"\n");
        }
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Build a boxed sink for `format` over `writer`.
pub fn sink_for<W: Write + Send + 'static>(
    format: LogFormat,
    writer: W,
) -> Box<dyn EventSink + Send> {
    match format {
        LogFormat::Text => Box::new(TextSink::new(writer)),
        LogFormat::Jsonl => Box::new(JsonlSink::new(writer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticsSummary;

    fn render_text(events: &[TraceEvent]) -> String {
        let mut sink = TextSink::new(Vec::new());
        for e in events {
            sink.emit(e);
        }
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn null_pointer_renders_as_nil() {
        assert_eq!(format_ptr(0), "(nil)");
        assert_eq!(format_ptr(0x10), "0x10");
    }

    #[test]
    fn text_numbers_calls() {
        let out = render_text(&[
            TraceEvent::SessionStart,
            TraceEvent::Allocated {
                size: 16,
                ptr: 0x1000,
            },
            TraceEvent::FreeRequested { ptr: 0x1000 },
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "[0001] Memory tracer started.");
        assert!(lines[1].starts_with("[0002]"));
        assert!(lines[1].contains("malloc( 16 ) = 0x1000"));
        assert!(lines[2].contains("free( 0x1000 )"));
    }

    #[test]
    fn text_report_lines_keep_counting() {
        let out = render_text(&[
            TraceEvent::SessionStart,
            TraceEvent::Allocated {
                size: 8,
                ptr: 0x40,
            },
            TraceEvent::FreeRequested { ptr: 0x80 },
            TraceEvent::IllegalFree { ptr: 0x80 },
            TraceEvent::FinalStatistics(StatisticsSummary {
                n_malloc: 1,
                n_calloc: 0,
                n_realloc: 0,
                total_allocated: 8,
                average_allocated: Some(8),
                total_freed: 0,
                illegal_frees: 1,
                double_frees: 0,
            }),
            TraceEvent::LeakSummaryStart,
            TraceEvent::LeakBlock {
                ptr: 0x40,
                size: 8,
                ref_count: 1,
            },
            TraceEvent::SessionEnd,
        ]);
        let numbers: Vec<u64> = out
            .lines()
            .map(|l| l[1..5].parse().unwrap())
            .collect();
        let expected: Vec<u64> = (1..=numbers.len() as u64).collect();
        assert_eq!(numbers, expected);
        assert!(out.contains("[0004]     *** ILLEGAL FREE *** 0x80"));
    }

    #[test]
    fn text_statistics_without_calls() {
        let out = render_text(&[TraceEvent::FinalStatistics(StatisticsSummary {
            n_malloc: 0,
            n_calloc: 0,
            n_realloc: 0,
            total_allocated: 0,
            average_allocated: None,
            total_freed: 0,
            illegal_frees: 0,
            double_frees: 0,
        })]);
        assert!(out.contains("allocated_avg        n/a"));
    }

    #[test]
    fn jsonl_lines_are_sequenced() {
        let mut sink = JsonlSink::new(Vec::new());
        sink.emit(&TraceEvent::SessionStart);
        sink.emit(&TraceEvent::DoubleFree { ptr: 0x20 });
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let recs: Vec<TraceRecord> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].seq, 1);
        assert_eq!(recs[1].seq, 2);
        assert_eq!(recs[1].event, TraceEvent::DoubleFree { ptr: 0x20 });
    }

    #[test]
    fn memory_sink_counts_kinds() {
        let mut sink = MemorySink::new();
        sink.emit(&TraceEvent::IllegalFree { ptr: 1 });
        sink.emit(&TraceEvent::IllegalFree { ptr: 2 });
        assert_eq!(sink.count("illegal_free"), 2);
        assert_eq!(sink.count("double_free"), 0);
    }
}
