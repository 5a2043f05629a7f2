//! Load and unload hooks.
//!
//! The dynamic loader runs `.init_array` entries when the library is mapped
//! and `.fini_array` entries at process exit. Both are registered only in
//! release builds, alongside the exported allocator symbols.

use crate::reentry::enter_allocator_reentry_guard;
use crate::tracer_state;

/// Activate the tracer. A binding failure ends the process.
pub extern "C" fn memtrace_load() {
    // Held for the whole activation: dlsym and the config reader allocate.
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        return;
    };
    if let Err(err) = tracer_state::activate_from_env()
        && err.is_fatal()
    {
        tracer_state::fail(&err);
    }
}

/// Write the final report and drop all records.
pub extern "C" fn memtrace_unload() {
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        return;
    };
    // NotActive here means activation never ran; nothing to report.
    let _ = tracer_state::terminate();
}

#[cfg(not(debug_assertions))]
#[used]
#[unsafe(link_section = ".init_array")]
static MEMTRACE_LOAD: extern "C" fn() = memtrace_load;

#[cfg(not(debug_assertions))]
#[used]
#[unsafe(link_section = ".fini_array")]
static MEMTRACE_UNLOAD: extern "C" fn() = memtrace_unload;
