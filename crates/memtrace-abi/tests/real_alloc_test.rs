//! Binding against the host allocator.

use memtrace_abi::real_alloc::LibcAllocator;
use memtrace_membrane::RealAllocator;

#[test]
fn binds_next_allocator_and_publishes_it() {
    let real = LibcAllocator::bind_next().expect("host libc exports malloc");
    assert!(LibcAllocator::bound().is_some());

    let p = real.malloc(64);
    assert_ne!(p, 0);
    // SAFETY: 64 bytes were just allocated at `p`.
    unsafe { std::ptr::write_bytes(p as *mut u8, 0xAB, 64) };

    let q = real.realloc(p, 128);
    assert_ne!(q, 0);
    // SAFETY: realloc preserves the first 64 bytes.
    assert_eq!(unsafe { *(q as *const u8).add(63) }, 0xAB);
    real.free(q);

    let z = real.calloc(8, 8);
    assert_ne!(z, 0);
    // SAFETY: calloc returned 64 zeroed bytes.
    let bytes = unsafe { std::slice::from_raw_parts(z as *const u8, 64) };
    assert!(bytes.iter().all(|&b| b == 0));
    real.free(z);
}

#[test]
fn bound_allocator_is_copyable_across_threads() {
    let real = LibcAllocator::bind_next().unwrap();
    let handle = std::thread::spawn(move || {
        let p = real.malloc(16);
        real.free(p);
        p != 0
    });
    assert!(handle.join().unwrap());
}
