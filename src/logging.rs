//! Logging utilities for the memory resources
//!
//! Lightweight structured logging of allocation, deallocation and region
//! traffic. Uses `tracing` so that disabled levels cost nothing on the
//! allocation fast path.

use once_cell::sync::OnceCell;

// Re-export tracing macros for use throughout the crate
pub use tracing::{debug, error, info, trace, warn, Level};

/// Set once the subscriber has been installed.
static LOGGING_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Initialize logging with sensible defaults.
///
/// Call early, before the first arena is constructed. Honors `RUST_LOG`;
/// without it, debug builds log at DEBUG and release builds at INFO.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    LOGGING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            #[cfg(debug_assertions)]
            {
                EnvFilter::new("vmarena=debug")
            }
            #[cfg(not(debug_assertions))]
            {
                EnvFilter::new("vmarena=info")
            }
        });

        fmt()
            .with_env_filter(filter)
            .compact()
            .try_init()
            .ok(); // Ignore error if a subscriber is already installed
    });
}

/// Log an allocation event
#[inline]
pub fn log_allocation(size: usize, ptr: *const u8) {
    trace!(
        target: "arena",
        size,
        ptr = ?ptr,
        "allocated memory"
    );
}

/// Log a deallocation event
#[inline]
pub fn log_deallocation(size: usize, ptr: *const u8) {
    trace!(
        target: "arena",
        size,
        ptr = ?ptr,
        "deallocated memory"
    );
}

/// Log a region joining the arena's chain
#[inline]
pub fn log_region_acquire(addr: usize, size: usize) {
    debug!(
        target: "arena",
        addr = %format_args!("{addr:#x}"),
        size,
        "region acquired"
    );
}

/// Log a region being handed back to the OS
#[inline]
pub fn log_region_release(addr: usize, size: usize) {
    debug!(
        target: "arena",
        addr = %format_args!("{addr:#x}"),
        size,
        "region released"
    );
}
