//! Scratch buffer resource - a linear buffer with upstream fallback
//!
//! Behaves exactly like a linear buffer until the local span runs out;
//! then it pulls a fresh slab from an optional upstream resource, rebinds
//! to it, and keeps bumping.

use std::any::Any;
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::linear::LinearBufferResource;
use crate::logging::debug;
use crate::resource::MemoryResource;

/// Push-pointer scratch pad over caller-supplied memory, with an optional
/// upstream resource consulted on exhaustion.
pub struct ScratchBufferResource {
    linear: LinearBufferResource,
    upstream: Option<NonNull<dyn MemoryResource>>,
}

impl ScratchBufferResource {
    /// Creates a scratch resource with no upstream; allocation fails once
    /// the local span is exhausted.
    ///
    /// # Safety
    ///
    /// Same contract as [`LinearBufferResource::new`]: the span must be
    /// valid and exclusive for the lifetime of the resource.
    pub unsafe fn new(buffer: *mut u8, length: usize) -> Self {
        Self {
            linear: LinearBufferResource::new(buffer, length),
            upstream: None,
        }
    }

    /// Creates a scratch resource that falls back to `upstream` when the
    /// local span is exhausted.
    ///
    /// # Safety
    ///
    /// The buffer contract of [`new`] applies, and `upstream` must outlive
    /// this resource and must not be used through another path while a
    /// call on this resource is in progress.
    ///
    /// [`new`]: ScratchBufferResource::new
    pub unsafe fn with_upstream(
        buffer: *mut u8,
        length: usize,
        upstream: &mut dyn MemoryResource,
    ) -> Self {
        Self {
            linear: LinearBufferResource::new(buffer, length),
            upstream: Some(NonNull::from(upstream)),
        }
    }

    /// Bytes consumed from the active span.
    #[inline]
    pub fn used(&self) -> usize {
        self.linear.used()
    }

    /// Makes the active span's full capacity available again.
    #[inline]
    pub fn reset(&mut self) {
        self.linear.reset();
    }

    /// Zeroes the active span, then resets.
    #[inline]
    pub fn clear(&mut self) {
        self.linear.clear();
    }

    fn upstream_addr(&self) -> *mut () {
        match &self.upstream {
            Some(upstream) => upstream.as_ptr().cast::<()>(),
            None => std::ptr::null_mut(),
        }
    }
}

impl MemoryResource for ScratchBufferResource {
    /// Tries the local span first; on exhaustion requests a fresh slab of
    /// `bytes` from the upstream, rebinds to it, and retries.
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>, AllocError> {
        let local_failure = match self.linear.allocate(bytes, alignment) {
            Ok(ptr) => return Ok(ptr),
            // A malformed request stays malformed upstream.
            Err(err @ AllocError::InvalidArgument { .. }) => return Err(err),
            Err(err) => err,
        };

        let Some(mut upstream) = self.upstream else {
            return Err(local_failure);
        };

        // The local span stays owned by the caller; the slab becomes the
        // active buffer and the consumed count starts over on it.
        let slab = unsafe { upstream.as_mut() }.allocate(bytes, alignment)?;
        debug!(
            target: "scratch",
            bytes,
            alignment,
            "local span exhausted, rebound to upstream slab"
        );
        self.linear.reset();
        unsafe { self.linear.change_buffer(slab.as_ptr(), bytes) };
        self.linear.allocate(bytes, alignment)
    }

    fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
        self.linear.deallocate(ptr, bytes, alignment);
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|other| {
            self.upstream_addr() == other.upstream_addr() && self.linear == other.linear
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
