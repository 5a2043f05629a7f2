//! ABI layer for the traced allocation functions (`malloc`, `calloc`,
//! `realloc`, `free`).
//!
//! Every call takes one of three routes:
//!
//! - **bootstrap**: the real allocator is being bound right now (`dlsym`
//!   allocates); serve from the static arena (see [`crate::bootstrap`])
//! - **pass-through**: reentrant call from the tracer itself, or a call
//!   outside the active phase; forward untracked, binding the real allocator
//!   on first use
//! - **traced**: hand the call to the process tracer
//!
//! Symbols are exported only in release builds; see the crate docs.

use std::ffi::c_void;

use crate::bootstrap;
use crate::real_alloc::LibcAllocator;
use crate::reentry::enter_allocator_reentry_guard;
use crate::tracer_state;

#[inline]
fn passthrough_malloc(size: usize) -> *mut c_void {
    match LibcAllocator::bound_or_bind() {
        Some(real) => real.malloc_raw(size),
        None => bootstrap::alloc(size),
    }
}

#[inline]
fn passthrough_calloc(count: usize, elem_size: usize) -> *mut c_void {
    match LibcAllocator::bound_or_bind() {
        Some(real) => real.calloc_raw(count, elem_size),
        None => bootstrap::alloc_zeroed(count, elem_size),
    }
}

#[inline]
unsafe fn passthrough_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    match LibcAllocator::bound_or_bind() {
        // SAFETY: non-arena pointer owned by the host allocator, or null.
        Some(real) => unsafe { real.realloc_raw(ptr, size) },
        // Nothing but the arena can have issued `ptr` before binding.
        None if ptr.is_null() => bootstrap::alloc(size),
        None => std::ptr::null_mut(),
    }
}

#[inline]
unsafe fn passthrough_free(ptr: *mut c_void) {
    if let Some(real) = LibcAllocator::bound_or_bind() {
        // SAFETY: non-arena pointer owned by the host allocator, or null.
        unsafe { real.free_raw(ptr) };
    }
}

// ---------------------------------------------------------------------------
// malloc
// ---------------------------------------------------------------------------

/// C `malloc`, traced.
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        return passthrough_malloc(size);
    };

    match tracer_state::with_tracer(|tracer| tracer.malloc(size)) {
        Some(Ok(ptr)) => ptr as *mut c_void,
        Some(Err(err)) => tracer_state::fail(&err),
        None => passthrough_malloc(size),
    }
}

// ---------------------------------------------------------------------------
// calloc
// ---------------------------------------------------------------------------

/// C `calloc`, traced. The tracked size is `count * elem_size`.
///
/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(count: usize, elem_size: usize) -> *mut c_void {
    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        return passthrough_calloc(count, elem_size);
    };

    match tracer_state::with_tracer(|tracer| tracer.calloc(count, elem_size)) {
        Some(ptr) => ptr as *mut c_void,
        None => passthrough_calloc(count, elem_size),
    }
}

// ---------------------------------------------------------------------------
// realloc
// ---------------------------------------------------------------------------

/// C `realloc`, traced.
///
/// Arena blocks are moved to the real heap through [`malloc`]; the arena copy
/// is abandoned.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by this allocator and not yet
/// freed.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if bootstrap::contains(ptr) {
        // SAFETY: `ptr` is an arena block.
        return unsafe { move_out_of_arena(ptr, size) };
    }

    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        // SAFETY: caller contract.
        return unsafe { passthrough_realloc(ptr, size) };
    };

    match tracer_state::with_tracer(|tracer| tracer.realloc(ptr as usize, size)) {
        Some(new_ptr) => new_ptr as *mut c_void,
        // SAFETY: caller contract.
        None => unsafe { passthrough_realloc(ptr, size) },
    }
}

unsafe fn move_out_of_arena(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: entry point contract; `malloc` is our own traced entry.
    let new_ptr = unsafe { malloc(size) };
    if !new_ptr.is_null() {
        // SAFETY: `ptr` is an arena block.
        let old_size = unsafe { bootstrap::block_size(ptr) };
        // SAFETY: both regions are at least `min(old_size, size)` bytes and distinct.
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.cast::<u8>(),
                new_ptr.cast::<u8>(),
                old_size.min(size),
            );
        }
    }
    new_ptr
}

// ---------------------------------------------------------------------------
// free
// ---------------------------------------------------------------------------

/// C `free`, traced.
///
/// Illegal and double frees are reported and not forwarded. Arena pointers
/// are ignored.
///
/// # Safety
///
/// `ptr` must be null or a pointer returned by this allocator.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if bootstrap::contains(ptr) {
        return;
    }

    let Some(_reentry_guard) = enter_allocator_reentry_guard() else {
        // SAFETY: caller contract.
        unsafe { passthrough_free(ptr) };
        return;
    };

    if tracer_state::with_tracer(|tracer| tracer.free(ptr as usize)).is_none() {
        // SAFETY: caller contract.
        unsafe { passthrough_free(ptr) };
    }
}
