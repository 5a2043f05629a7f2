// extern "C" entry points take raw pointers from C callers and forward them
// unchanged; their contracts are the C standard's.
#![allow(clippy::missing_safety_doc)]
//! # memtrace-abi
//!
//! `extern "C"` boundary of the allocation tracer. Built as a `cdylib` and
//! injected with `LD_PRELOAD`, it replaces `malloc`, `calloc`, `realloc` and
//! `free` for the whole host process:
//!
//! ```text
//! C caller -> ABI entry (this crate) -> Tracer (memtrace-membrane) -> next malloc in link order
//! ```
//!
//! Symbols are only exported in release builds. Debug and test builds keep the
//! entry points as ordinary Rust functions so the test binary's own allocator
//! is left alone.

pub mod bootstrap;
pub mod lifecycle_abi;
pub mod malloc_abi;
pub mod real_alloc;
mod reentry;
pub mod tracer_state;
