//! Allocation-tracking core for memtrace.
//!
//! This crate holds everything about the tracer that does not need `unsafe`:
//! the bookkeeping, the interception logic and the reporting. The
//! `memtrace-abi` crate wraps it in `extern "C"` entry points and binds it to
//! the host's real allocator.
//!
//! # Architecture
//!
//! - **Record store** (`record`): address-keyed allocation records with
//!   live/released tombstones for double-free detection
//! - **Statistics** (`stats`): call counters and byte totals
//! - **Tracer** (`tracer`): `malloc`/`calloc`/`realloc`/`free` logic over a
//!   [`RealAllocator`]
//! - **Lifecycle** (`lifecycle`): `Uninitialized -> Active -> Terminated`
//! - **Events and sinks** (`event`, `sink`): text and JSONL logs
//! - **Configuration** (`config`): `MEMTRACE_*` environment variables

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod record;
pub mod sink;
pub mod stats;
pub mod tracer;

pub use config::{LogFormat, LogTarget, ReallocAccounting, TraceConfig, ZeroSizePolicy};
pub use error::TraceError;
pub use event::{EventSink, Level, TraceEvent, TraceRecord};
pub use lifecycle::{Binding, Lifecycle, Phase, SharedLifecycle};
pub use record::{AllocationRecord, RecordHandle, RecordState, RecordStore};
pub use sink::{JsonlSink, MemorySink, TextSink};
pub use stats::{Statistics, StatisticsSummary};
pub use tracer::{FinalReport, FreeOutcome, RealAllocator, Tracer, TracerOptions};
