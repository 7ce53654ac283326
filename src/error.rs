//! Allocation error types.

use std::error::Error;
use std::fmt;

/// Errors surfaced by the memory resources in this crate.
///
/// Allocation either returns a pointer or fails with one of these; no
/// partial mutation of resource state survives a failed call. Misuse of
/// `deallocate` (wrong pointer, mismatched size or alignment) is a
/// programming error checked only by debug assertions, not represented
/// here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The resource could not provide the requested span: the OS refused a
    /// region acquisition, or no free block satisfies the request and
    /// growth also failed.
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
        /// Alignment of the failed request.
        alignment: usize,
    },
    /// The request itself was malformed: zero bytes, or an alignment that
    /// is zero or not a power of two.
    InvalidArgument {
        /// Number of bytes requested.
        bytes: usize,
        /// Alignment of the rejected request.
        alignment: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                alignment,
            } => {
                write!(
                    f,
                    "out of memory: requested {requested} bytes aligned to {alignment}"
                )
            }
            Self::InvalidArgument { bytes, alignment } => {
                write!(
                    f,
                    "invalid allocation request: {bytes} bytes aligned to {alignment}"
                )
            }
        }
    }
}

impl Error for AllocError {}
