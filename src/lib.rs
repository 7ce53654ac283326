//! vmarena - composable memory resources over OS virtual memory
//!
//! Design: Three layered resources that plug into the same protocol:
//! 1. Linear buffer (bump pointer over a caller-supplied span, no per-object free)
//! 2. Scratch buffer (linear buffer with upstream fallback)
//! 3. Arena (chain of OS-acquired regions, best-fit coalescing free list)
//!
//! The arena bootstraps its own free-list storage from a linear buffer
//! embedded at the head of its first region, so it carries no heap
//! dependency of its own.

pub mod arena;
pub mod error;
pub mod linear;
pub mod logging;
mod platform;
pub mod resource;
pub mod scratch;

// Re-export core types
pub use arena::{
    with_default_arena, ArenaMemoryResource, DEFAULT_CAPACITY_MIB, FREE_LIST_CAP, MAX_ALLOC_SIZE,
};
pub use error::AllocError;
pub use linear::LinearBufferResource;
pub use resource::MemoryResource;
pub use scratch::ScratchBufferResource;

// Re-export logging for convenience
pub use logging::{init_logging, log_allocation, log_deallocation};
