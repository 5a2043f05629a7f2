//! The allocator that sits behind the tracer in symbol resolution order.
//!
//! Entry points are resolved with `dlsym(RTLD_NEXT, ..)` once and published
//! through atomics so the reentrant and pass-through paths can reach them
//! without taking the tracer lock. Resolution happens at load time, or earlier
//! on the first allocation from a library constructor that runs before ours.

use std::ffi::{CStr, c_void};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use memtrace_membrane::{RealAllocator, TraceError};

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);

const STATE_UNBOUND: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_BINDING: u8 = 2;

static BIND_STATE: AtomicU8 = AtomicU8::new(STATE_UNBOUND);
static NEXT_MALLOC: AtomicUsize = AtomicUsize::new(0);
static NEXT_CALLOC: AtomicUsize = AtomicUsize::new(0);
static NEXT_REALLOC: AtomicUsize = AtomicUsize::new(0);
static NEXT_FREE: AtomicUsize = AtomicUsize::new(0);

/// Function pointers to the next allocator in link order.
#[derive(Debug, Clone, Copy)]
pub struct LibcAllocator {
    malloc: MallocFn,
    calloc: CallocFn,
    realloc: ReallocFn,
    free: FreeFn,
}

impl LibcAllocator {
    /// Resolve all four entry points and publish them for [`Self::bound`].
    ///
    /// Any unresolved symbol is a [`TraceError::Binding`]; nothing is
    /// published in that case.
    pub fn bind_next() -> Result<Self, TraceError> {
        if let Some(real) = Self::bound() {
            return Ok(real);
        }
        let claimed = claim_binding();
        let result = Self::resolve_and_publish();
        if result.is_err() && claimed {
            release_binding();
        }
        result
    }

    /// The published allocator, binding it first if nobody has yet.
    ///
    /// `None` while a binding is in flight (`dlsym` allocating on its own
    /// behalf) or when resolution fails; such requests go to the bootstrap
    /// arena. A failed attempt is retried on the next call and reported as
    /// fatal by activation.
    #[must_use]
    pub fn bound_or_bind() -> Option<Self> {
        if let Some(real) = Self::bound() {
            return Some(real);
        }
        if !claim_binding() {
            return Self::bound();
        }
        let result = Self::resolve_and_publish();
        if result.is_err() {
            release_binding();
        }
        result.ok()
    }

    fn resolve_and_publish() -> Result<Self, TraceError> {
        let malloc = resolve_next(c"malloc", "malloc")?;
        let calloc = resolve_next(c"calloc", "calloc")?;
        let realloc = resolve_next(c"realloc", "realloc")?;
        let free = resolve_next(c"free", "free")?;

        NEXT_MALLOC.store(malloc, Ordering::Relaxed);
        NEXT_CALLOC.store(calloc, Ordering::Relaxed);
        NEXT_REALLOC.store(realloc, Ordering::Relaxed);
        NEXT_FREE.store(free, Ordering::Relaxed);
        BIND_STATE.store(STATE_READY, Ordering::Release);

        // SAFETY: all four addresses were just published as non-null symbols of
        // the matching C signatures.
        Ok(unsafe { Self::from_published() })
    }

    /// The published allocator, or `None` before [`Self::bind_next`] succeeded.
    #[inline]
    #[must_use]
    pub fn bound() -> Option<Self> {
        if BIND_STATE.load(Ordering::Acquire) != STATE_READY {
            return None;
        }
        // SAFETY: READY is stored only after every address is published.
        Some(unsafe { Self::from_published() })
    }

    unsafe fn from_published() -> Self {
        let malloc = NEXT_MALLOC.load(Ordering::Relaxed);
        let calloc = NEXT_CALLOC.load(Ordering::Relaxed);
        let realloc = NEXT_REALLOC.load(Ordering::Relaxed);
        let free = NEXT_FREE.load(Ordering::Relaxed);
        // SAFETY: caller guarantees the addresses are resolved allocator symbols.
        unsafe {
            Self {
                malloc: std::mem::transmute::<usize, MallocFn>(malloc),
                calloc: std::mem::transmute::<usize, CallocFn>(calloc),
                realloc: std::mem::transmute::<usize, ReallocFn>(realloc),
                free: std::mem::transmute::<usize, FreeFn>(free),
            }
        }
    }

    #[inline]
    pub(crate) fn malloc_raw(self, size: usize) -> *mut c_void {
        // SAFETY: forwards to the host allocator with the caller's arguments.
        unsafe { (self.malloc)(size) }
    }

    #[inline]
    pub(crate) fn calloc_raw(self, count: usize, elem_size: usize) -> *mut c_void {
        // SAFETY: forwards to the host allocator with the caller's arguments.
        unsafe { (self.calloc)(count, elem_size) }
    }

    #[inline]
    pub(crate) unsafe fn realloc_raw(self, ptr: *mut c_void, size: usize) -> *mut c_void {
        // SAFETY: caller passes a pointer owned by the host allocator, or null.
        unsafe { (self.realloc)(ptr, size) }
    }

    #[inline]
    pub(crate) unsafe fn free_raw(self, ptr: *mut c_void) {
        // SAFETY: caller passes a pointer owned by the host allocator, or null.
        unsafe { (self.free)(ptr) }
    }
}

impl RealAllocator for LibcAllocator {
    fn malloc(&self, size: usize) -> usize {
        self.malloc_raw(size) as usize
    }

    fn calloc(&self, count: usize, elem_size: usize) -> usize {
        self.calloc_raw(count, elem_size) as usize
    }

    fn realloc(&self, ptr: usize, size: usize) -> usize {
        // SAFETY: the tracer only forwards pointers the traced program passed in.
        unsafe { self.realloc_raw(ptr as *mut c_void, size) as usize }
    }

    fn free(&self, ptr: usize) {
        // SAFETY: the tracer only forwards frees of live tracked blocks.
        unsafe { self.free_raw(ptr as *mut c_void) }
    }
}

fn claim_binding() -> bool {
    BIND_STATE
        .compare_exchange(
            STATE_UNBOUND,
            STATE_BINDING,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
}

fn release_binding() {
    let _ = BIND_STATE.compare_exchange(
        STATE_BINDING,
        STATE_UNBOUND,
        Ordering::AcqRel,
        Ordering::Relaxed,
    );
}

fn resolve_next(name: &CStr, symbol: &'static str) -> Result<usize, TraceError> {
    // SAFETY: clears any stale error; dlerror has no preconditions.
    unsafe { libc::dlerror() };
    // SAFETY: `name` is NUL-terminated and outlives the call.
    let addr = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
    if !addr.is_null() {
        return Ok(addr as usize);
    }

    // SAFETY: dlerror returns null or a NUL-terminated thread-local message.
    let err = unsafe { libc::dlerror() };
    let reason = if err.is_null() {
        "symbol not found".to_string()
    } else {
        // SAFETY: non-null dlerror result is a valid C string until the next dl* call.
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    };
    Err(TraceError::Binding { symbol, reason })
}
