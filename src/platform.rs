//! Virtual-memory syscall wrappers - one backend per target OS
//!
//! Design: the arena only ever needs two primitives, reserve+commit and
//! release. POSIX maps private anonymous pages; Windows reserves and
//! commits in one call. The POSIX halve-and-retry fallback lives here,
//! not in arena code.

use std::ptr::NonNull;

use crate::logging::{trace, warn};

/// The two syscall pairs the arena depends on.
pub(crate) trait VirtualMemory {
    /// Reserves and commits `size` bytes of anonymous read+write memory.
    /// Returns `None` when the OS refuses.
    fn reserve_commit(&self, size: usize) -> Option<NonNull<u8>>;

    /// Returns a span previously obtained from [`reserve_commit`] to the OS.
    ///
    /// # Safety
    ///
    /// `addr` and `size` must denote exactly one span returned by
    /// [`reserve_commit`] on this backend, not yet released.
    ///
    /// [`reserve_commit`]: VirtualMemory::reserve_commit
    unsafe fn release(&self, addr: NonNull<u8>, size: usize);
}

/// The host operating system's virtual-memory backend.
pub(crate) struct OsMemory;

#[cfg(unix)]
impl VirtualMemory for OsMemory {
    fn reserve_commit(&self, size: usize) -> Option<NonNull<u8>> {
        let min = match size / 16 {
            0 => size,
            m => m,
        };

        let mut attempt = size;
        while attempt >= min {
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    attempt,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if ptr != libc::MAP_FAILED && !ptr.is_null() {
                trace!(
                    target: "platform",
                    size = attempt,
                    addr = ?ptr,
                    "mapped anonymous region"
                );
                return NonNull::new(ptr.cast::<u8>());
            }

            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            if errno != libc::ENOMEM && errno != libc::EOVERFLOW && errno != libc::EAGAIN {
                warn!(target: "platform", size = attempt, errno, "mmap failed");
                return None;
            }

            // Retriable: try half the size.
            warn!(target: "platform", size = attempt, errno, "mmap refused, retrying smaller");
            attempt /= 2;
        }

        None
    }

    unsafe fn release(&self, addr: NonNull<u8>, size: usize) {
        trace!(target: "platform", addr = ?addr.as_ptr(), size, "unmapping region");
        libc::munmap(addr.as_ptr().cast(), size);
    }
}

#[cfg(windows)]
impl VirtualMemory for OsMemory {
    fn reserve_commit(&self, size: usize) -> Option<NonNull<u8>> {
        use windows_sys::Win32::System::Memory::{
            VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE,
        };

        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if ptr.is_null() {
            warn!(target: "platform", size, "VirtualAlloc failed");
        } else {
            trace!(target: "platform", size, addr = ?ptr, "committed region");
        }
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn release(&self, addr: NonNull<u8>, size: usize) {
        use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

        trace!(target: "platform", addr = ?addr.as_ptr(), size, "releasing region");
        // Size must be zero when releasing on Windows.
        VirtualFree(addr.as_ptr().cast(), 0, MEM_RELEASE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_commit_returns_writable_span() {
        let vm = OsMemory;
        let size = 4096;
        let addr = vm.reserve_commit(size).expect("reserve");

        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0xAB, size);
            assert_eq!(*addr.as_ptr(), 0xAB);
            assert_eq!(*addr.as_ptr().add(size - 1), 0xAB);
            vm.release(addr, size);
        }
    }

    #[test]
    fn spans_are_distinct() {
        let vm = OsMemory;
        let a = vm.reserve_commit(4096).expect("first");
        let b = vm.reserve_commit(4096).expect("second");
        assert_ne!(a, b);
        unsafe {
            vm.release(a, 4096);
            vm.release(b, 4096);
        }
    }
}
