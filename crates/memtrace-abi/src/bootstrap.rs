//! Static bump arena for allocations made before the real allocator is bound.
//!
//! `dlsym` may itself call `calloc` while the tracer is resolving the real
//! entry points. Those requests are served from this arena. Arena blocks are
//! never reused and `free` of an arena pointer is a no-op.
//!
//! Each block is preceded by a 16-byte header holding its requested size so
//! that `realloc` can move it to the real heap.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Arena capacity in bytes.
pub const ARENA_SIZE: usize = 64 * 1024;

const ALIGN: usize = 16;
const HEADER: usize = ALIGN;

#[repr(C, align(16))]
struct Arena(UnsafeCell<[u8; ARENA_SIZE]>);

// SAFETY: every byte range is handed out once, by an atomic bump of `NEXT`.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; ARENA_SIZE]));
static NEXT: AtomicUsize = AtomicUsize::new(0);

#[inline]
fn base() -> usize {
    ARENA.0.get() as usize
}

/// True if `ptr` points into the arena.
#[inline]
#[must_use]
pub fn contains(ptr: *const c_void) -> bool {
    let addr = ptr as usize;
    addr >= base() && addr < base() + ARENA_SIZE
}

/// Bytes handed out so far, headers included.
#[must_use]
pub fn used() -> usize {
    NEXT.load(Ordering::Relaxed)
}

/// Carve `size` bytes out of the arena. Null when exhausted.
///
/// The memory is zeroed: the arena starts zeroed and is never reused.
#[must_use]
pub fn alloc(size: usize) -> *mut c_void {
    let Some(span) = size
        .checked_add(HEADER + ALIGN - 1)
        .map(|n| n & !(ALIGN - 1))
    else {
        return std::ptr::null_mut();
    };

    let mut offset = NEXT.load(Ordering::Relaxed);
    loop {
        let Some(end) = offset.checked_add(span).filter(|&end| end <= ARENA_SIZE) else {
            return std::ptr::null_mut();
        };
        match NEXT.compare_exchange_weak(offset, end, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break,
            Err(current) => offset = current,
        }
    }

    let header = (base() + offset) as *mut usize;
    // SAFETY: [offset, offset + span) is exclusively ours and 16-byte aligned.
    unsafe { header.write(size) };
    (base() + offset + HEADER) as *mut c_void
}

/// `calloc` on the arena. Null on overflow or exhaustion.
#[must_use]
pub fn alloc_zeroed(count: usize, elem_size: usize) -> *mut c_void {
    match count.checked_mul(elem_size) {
        Some(total) => alloc(total),
        None => std::ptr::null_mut(),
    }
}

/// Requested size of an arena block.
///
/// # Safety
///
/// `ptr` must have been returned by [`alloc`].
#[must_use]
pub unsafe fn block_size(ptr: *const c_void) -> usize {
    let header = (ptr as usize - HEADER) as *const usize;
    // SAFETY: caller guarantees `ptr` came from `alloc`, which wrote the header.
    unsafe { header.read() }
}
