//! Tooling around the memtrace preload library.
//!
//! This crate provides:
//! - Runner: launch a program with the tracer injected via `LD_PRELOAD`
//! - Structured log: read and validate JSONL event logs
//! - Summary: per-session totals, leak list and pass/fail checks

#![forbid(unsafe_code)]

pub mod error;
pub mod runner;
pub mod structured_log;
pub mod summary;

pub use error::HarnessError;
pub use runner::TraceRunner;
pub use summary::SessionSummary;
