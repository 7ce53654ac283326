//! Arena memory resource - OS-backed regions with a best-fit free list
//!
//! Design: the arena owns a singly-linked chain of large virtual-memory
//! regions. Allocation carves spans out of a size-ordered free list;
//! deallocation reinserts spans and coalesces address neighbors. The free
//! list's own storage is carved from the head of the first region through
//! an embedded linear buffer, so the arena needs no second heap.

mod free_list;


use std::any::Any;
use std::fmt;
use std::mem;
use std::ptr::NonNull;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::error::AllocError;
use crate::linear::LinearBufferResource;
use crate::logging::{
    debug, log_allocation, log_deallocation, log_region_acquire, log_region_release,
};
use crate::platform::{OsMemory, VirtualMemory};
use crate::resource::{fwd_adjust, MemoryResource};

use self::free_list::{FreeList, Freed};

/// Largest single allocation a region can hold; also the usable size of
/// every region.
pub const MAX_ALLOC_SIZE: usize = 0x003F_FFF8;

/// Regions acquired by a default-constructed arena, in MiB.
pub const DEFAULT_CAPACITY_MIB: usize = 4;

/// Free-list entries preallocated inside the first region. Raising this
/// trades arena space for headroom under heavy fragmentation.
pub const FREE_LIST_CAP: usize = 32;

const _: () = assert!(MAX_ALLOC_SIZE >= 0x1000, "region size must be at least one page");
const _: () = assert!(DEFAULT_CAPACITY_MIB >= 1, "default capacity must be at least 1 MiB");
const _: () = assert!(
    FREE_LIST_CAP >= 8 && FREE_LIST_CAP <= 256,
    "free list capacity out of bounds"
);

const MIB: usize = 1 << 20;
const REGION_HEADER_SIZE: usize = mem::size_of::<Region>();
const REGION_SIZE: usize = MAX_ALLOC_SIZE + REGION_HEADER_SIZE;
const FREE_LIST_BYTES: usize = FREE_LIST_CAP * mem::size_of::<Freed>();

/// Header written at the base of every OS-acquired span. The region's
/// usable bytes follow immediately after.
#[repr(C)]
struct Region {
    next: *mut Region,
}

/// Memory resource over a chain of OS-acquired virtual-memory regions.
///
/// Construction acquires enough regions for the requested capacity and
/// bootstraps the free list; growth adds regions one at a time when no
/// free block fits. Regions are only returned to the OS when the arena is
/// dropped, and no destructor runs for objects stored in them.
///
/// Single-threaded: the type is neither `Send` nor `Sync`, callers
/// serialize access by construction.
pub struct ArenaMemoryResource {
    /// Embedded bump allocator over the free-list storage span in region 0.
    linear: LinearBufferResource,
    free_list: FreeList,
    first: *mut Region,
    total_used: usize,
    total_size: usize,
    total_regions: usize,
    allocations: usize,
    vm: OsMemory,
}

impl ArenaMemoryResource {
    /// Creates an arena with the default capacity.
    pub fn new() -> Result<Self, AllocError> {
        Self::with_capacity(DEFAULT_CAPACITY_MIB)
    }

    /// Creates an arena that starts with at least `capacity_mib` MiB of
    /// regions. A zero capacity is clamped to one region.
    ///
    /// On failure every region acquired so far is released before the
    /// error is returned.
    pub fn with_capacity(capacity_mib: usize) -> Result<Self, AllocError> {
        let vm = OsMemory;
        let bytes = capacity_mib.saturating_mul(MIB);
        let blocks = bytes.div_ceil(REGION_SIZE).max(1);

        let mut first: *mut Region = std::ptr::null_mut();
        let mut link: *mut *mut Region = &mut first;
        for _ in 0..blocks {
            match Self::acquire_region(&vm) {
                Ok(region) => unsafe {
                    *link = region.as_ptr();
                    link = &mut (*region.as_ptr()).next;
                },
                Err(err) => {
                    if let Some(first) = NonNull::new(first) {
                        unsafe { release_chain(&vm, first) };
                    }
                    return Err(err);
                }
            }
        }

        // Bootstrap: an embedded linear buffer over the span just past
        // region 0's header backs the free list's storage, so the list
        // lives inside the memory it manages.
        let base = first as usize;
        let mut linear = unsafe {
            LinearBufferResource::new((base + REGION_HEADER_SIZE) as *mut u8, FREE_LIST_BYTES)
        };
        let storage = match linear.allocate(FREE_LIST_BYTES, mem::align_of::<Freed>()) {
            Ok(ptr) => ptr.cast::<Freed>(),
            Err(err) => {
                if let Some(first) = NonNull::new(first) {
                    unsafe { release_chain(&vm, first) };
                }
                return Err(err);
            }
        };
        let mut free_list = unsafe { FreeList::new(storage, FREE_LIST_CAP) };

        // Region 0 donates its head to the free list; the remainder is
        // the first free block. Every later region is free in full.
        free_list.push(Freed {
            size: MAX_ALLOC_SIZE - FREE_LIST_BYTES,
            addr: base + REGION_HEADER_SIZE + FREE_LIST_BYTES,
        });
        let mut next = unsafe { (*first).next };
        while !next.is_null() {
            free_list.push(Freed {
                size: MAX_ALLOC_SIZE,
                addr: next as usize + REGION_HEADER_SIZE,
            });
            next = unsafe { (*next).next };
        }

        debug!(
            target: "arena",
            capacity_mib,
            regions = blocks,
            "arena initialized"
        );

        Ok(Self {
            linear,
            free_list,
            first,
            total_used: blocks * REGION_HEADER_SIZE + FREE_LIST_BYTES,
            total_size: blocks * REGION_SIZE,
            total_regions: blocks,
            // The free list's own backing storage counts as one live
            // allocation for the arena's whole lifetime.
            allocations: 1,
            vm,
        })
    }

    /// Bytes consumed from the acquired regions, headers and free-list
    /// storage included.
    #[inline]
    pub fn total_used(&self) -> usize {
        self.total_used
    }

    /// Combined size of every acquired region.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Number of regions in the chain.
    #[inline]
    pub fn total_regions(&self) -> usize {
        self.total_regions
    }

    /// Live allocations, the free list's backing storage included.
    #[inline]
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    fn acquire_region(vm: &OsMemory) -> Result<NonNull<Region>, AllocError> {
        let span = vm
            .reserve_commit(REGION_SIZE)
            .ok_or(AllocError::OutOfMemory {
                requested: REGION_SIZE,
                alignment: REGION_HEADER_SIZE,
            })?;
        let region = span.cast::<Region>();
        unsafe {
            region.as_ptr().write(Region {
                next: std::ptr::null_mut(),
            });
        }
        log_region_acquire(region.as_ptr() as usize, REGION_SIZE);
        Ok(region)
    }

    /// Best-fit scan. The list is size-ascending, so the first block the
    /// request fits in (adjustment included) is the smallest sufficient
    /// one; an exact fit is simply the smallest case of that.
    fn find_free_block(&mut self, bytes: usize, alignment: usize) -> Option<NonNull<u8>> {
        let mut selected = None;
        for (index, entry) in self.free_list.as_slice().iter().enumerate() {
            let adjustment = fwd_adjust(entry.addr, alignment);
            let Some(needed) = bytes.checked_add(adjustment) else {
                continue;
            };
            if needed <= entry.size {
                selected = Some((index, adjustment, needed));
                break;
            }
        }
        let (index, adjustment, needed) = selected?;

        let entry = self.free_list.as_slice()[index];
        let result = entry.addr + adjustment;
        if entry.size > needed {
            // Shrink the block in place and restore size order.
            let remainder = &mut self.free_list.as_mut_slice()[index];
            remainder.size -= needed;
            remainder.addr += needed;
            self.free_list.sort_by_size();
        } else {
            self.free_list.remove(index);
        }

        self.total_used += needed;
        self.allocations += 1;
        log_allocation(needed, result as *const u8);
        NonNull::new(result as *mut u8)
    }

    /// Acquires one more region, links it at the tail and frees its whole
    /// usable span.
    fn grow(&mut self) -> Result<(), AllocError> {
        let region = Self::acquire_region(&self.vm)?;
        unsafe {
            let mut tail = self.first;
            while !(*tail).next.is_null() {
                tail = (*tail).next;
            }
            (*tail).next = region.as_ptr();
        }

        self.total_regions += 1;
        self.total_used += REGION_HEADER_SIZE;
        self.total_size += REGION_SIZE;
        // Largest possible block: appending keeps the size order.
        self.free_list.push(Freed {
            size: MAX_ALLOC_SIZE,
            addr: region.as_ptr() as usize + REGION_HEADER_SIZE,
        });
        Ok(())
    }

    /// True when `[start, end)` lies inside some region's usable span.
    fn owns_span(&self, start: usize, end: usize) -> bool {
        let mut region = self.first;
        while !region.is_null() {
            let usable = region as usize + REGION_HEADER_SIZE;
            if start >= usable && end <= region as usize + REGION_SIZE {
                return true;
            }
            region = unsafe { (*region).next };
        }
        false
    }
}

impl MemoryResource for ArenaMemoryResource {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>, AllocError> {
        if bytes == 0 || !alignment.is_power_of_two() {
            return Err(AllocError::InvalidArgument { bytes, alignment });
        }
        // A single region can never hold more; growth would not help.
        if bytes > MAX_ALLOC_SIZE {
            return Err(AllocError::OutOfMemory {
                requested: bytes,
                alignment,
            });
        }

        if let Some(ptr) = self.find_free_block(bytes, alignment) {
            return Ok(ptr);
        }

        debug!(target: "arena", bytes, alignment, "no free block fits, growing");
        self.grow()?;
        self.find_free_block(bytes, alignment)
            .ok_or(AllocError::OutOfMemory {
                requested: bytes,
                alignment,
            })
    }

    fn deallocate(&mut self, ptr: NonNull<u8>, bytes: usize, alignment: usize) {
        let pointer = ptr.as_ptr() as usize;
        let adjustment = fwd_adjust(pointer, alignment);
        let bytes = bytes + adjustment;
        let block_start = pointer - adjustment;
        let block_end = block_start + bytes;

        debug_assert!(
            self.owns_span(block_start, block_end),
            "pointer does not belong to this arena"
        );
        debug_assert!(
            self.allocations > 1,
            "deallocate without a matching live allocation"
        );

        // Address-neighbor scan over the size-ordered list: the entry
        // ending at our start and the entry starting at our end, if any.
        let mut left = None;
        let mut right = None;
        for (index, entry) in self.free_list.as_slice().iter().enumerate() {
            if entry.addr + entry.size == block_start {
                left = Some(index);
            } else if entry.addr == block_end {
                right = Some(index);
            }
        }

        match (left, right) {
            (Some(left), Some(right)) => {
                // Freed span bridges two blocks: fold both into one.
                let bridged = self.free_list.remove(right);
                let left = if right < left { left - 1 } else { left };
                self.free_list.as_mut_slice()[left].size += bytes + bridged.size;
            }
            (Some(left), None) => {
                self.free_list.as_mut_slice()[left].size += bytes;
            }
            (None, Some(right)) => {
                let entry = &mut self.free_list.as_mut_slice()[right];
                entry.addr = block_start;
                entry.size += bytes;
            }
            (None, None) => {
                self.free_list.push(Freed {
                    size: bytes,
                    addr: block_start,
                });
            }
        }
        self.free_list.sort_by_size();

        self.allocations -= 1;
        self.total_used -= bytes;
        log_deallocation(bytes, ptr.as_ptr());
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PartialEq for ArenaMemoryResource {
    /// Arenas compare by first region only: separately-created arenas can
    /// never share one, and copies that do may still diverge in counters
    /// and later regions.
    fn eq(&self, other: &Self) -> bool {
        self.first == other.first
    }
}

impl Eq for ArenaMemoryResource {}

impl fmt::Debug for ArenaMemoryResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaMemoryResource")
            .field("total_used", &self.total_used)
            .field("total_size", &self.total_size)
            .field("total_regions", &self.total_regions)
            .field("allocations", &self.allocations)
            .field("free_blocks", &self.free_list.len())
            .field("free_list_storage", &self.linear.len())
            .finish()
    }
}

impl Drop for ArenaMemoryResource {
    fn drop(&mut self) {
        if let Some(first) = NonNull::new(self.first) {
            unsafe { release_chain(&self.vm, first) };
        }
        self.first = std::ptr::null_mut();
        self.total_used = 0;
        self.total_size = 0;
        self.total_regions = 0;
        self.allocations = 0;
    }
}

/// Releases `region` and everything linked after it, tail first.
///
/// # Safety
///
/// `region` must head a chain of regions acquired from `vm` that no live
/// allocation or free-list entry will touch again.
unsafe fn release_chain(vm: &OsMemory, region: NonNull<Region>) {
    if let Some(next) = NonNull::new((*region.as_ptr()).next) {
        release_chain(vm, next);
    }
    log_region_release(region.as_ptr() as usize, REGION_SIZE);
    vm.release(region.cast::<u8>(), REGION_SIZE);
}

/// Owner of the process-wide default arena.
struct DefaultArena(ArenaMemoryResource);

// The arena's raw pointers reach only memory the arena itself owns, so
// handing the instance from thread to thread is sound once all access is
// serialized, which the mutex below provides.
unsafe impl Send for DefaultArena {}

/// Process-wide default arena, constructed on first access.
static DEFAULT_ARENA: OnceCell<Mutex<DefaultArena>> = OnceCell::new();

/// Runs `f` with the process-wide default arena, constructing it with
/// [`DEFAULT_CAPACITY_MIB`] on first use.
///
/// Every thread shares the one instance; a mutex serializes access, so
/// `f` must not call back into this function. The instance lives until
/// process teardown: statics run no destructor, its regions return to
/// the OS when the process exits. Only construction can fail; the
/// closure's result is returned unchanged.
pub fn with_default_arena<F, R>(f: F) -> Result<R, AllocError>
where
    F: FnOnce(&mut ArenaMemoryResource) -> R,
{
    let shared = DEFAULT_ARENA
        .get_or_try_init(|| Ok(Mutex::new(DefaultArena(ArenaMemoryResource::new()?))))?;
    let mut guard = shared.lock();
    Ok(f(&mut guard.0))
}

#[cfg(test)]
impl ArenaMemoryResource {
    fn free_blocks(&self) -> &[Freed] {
        self.free_list.as_slice()
    }

    fn first_region_addr(&self) -> usize {
        self.first as usize
    }

    fn region_bases(&self) -> Vec<usize> {
        let mut bases = Vec::new();
        let mut region = self.first;
        while !region.is_null() {
            bases.push(region as usize);
            region = unsafe { (*region).next };
        }
        bases
    }
}
