//! Memory-management boundary.
//!
//! Virtual memory is an external collaborator of the process core: address
//! spaces are created for the first process, duplicated on fork, resized by
//! sbrk and freed at reap, and every operation reports success or failure.
//! The [`MemoryPool`] models the bounded physical-frame budget behind those
//! operations, so exhaustion is a reachable failure rather than a stub.

use crate::config::{KERNEL_STACK_SIZE, PAGE_SIZE};

/// Pages backing one kernel stack.
const KERNEL_STACK_PAGES: usize = KERNEL_STACK_SIZE / PAGE_SIZE;

/// Frame-pool allocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

/// Bounded physical-frame budget backing address spaces and kernel stacks.
pub struct MemoryPool {
    free_pages: usize,
}

impl MemoryPool {
    /// Create a pool with `total_pages` free frames.
    pub const fn new(total_pages: usize) -> Self {
        MemoryPool {
            free_pages: total_pages,
        }
    }

    /// Number of frames currently available.
    pub fn free_pages(&self) -> usize {
        self.free_pages
    }

    fn alloc(&mut self, pages: usize) -> Result<(), AllocError> {
        if pages > self.free_pages {
            return Err(AllocError);
        }
        self.free_pages -= pages;
        Ok(())
    }

    fn free(&mut self, pages: usize) {
        self.free_pages += pages;
    }
}

/// Round a byte extent up to whole pages.
fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// Opaque handle to a process address space.
///
/// The page-table contents belong to the platform; the core only tracks the
/// frame footprint so duplication and growth can fail honestly.
#[derive(Debug)]
pub struct AddressSpace {
    pages: usize,
}

impl AddressSpace {
    /// Allocate a fresh address space covering `bytes`.
    pub fn new(pool: &mut MemoryPool, bytes: usize) -> Result<Self, AllocError> {
        let pages = pages_for(bytes);
        pool.alloc(pages)?;
        Ok(AddressSpace { pages })
    }

    /// Duplicate this address space (fork path).
    pub fn duplicate(&self, pool: &mut MemoryPool) -> Result<Self, AllocError> {
        pool.alloc(self.pages)?;
        Ok(AddressSpace { pages: self.pages })
    }

    /// Grow or shrink to cover `new_bytes`. On failure the address space is
    /// unchanged.
    pub fn resize(&mut self, pool: &mut MemoryPool, new_bytes: usize) -> Result<(), AllocError> {
        let new_pages = pages_for(new_bytes);
        if new_pages > self.pages {
            pool.alloc(new_pages - self.pages)?;
        } else {
            pool.free(self.pages - new_pages);
        }
        self.pages = new_pages;
        Ok(())
    }

    /// Release the address space back to the pool (reap path).
    pub fn free(self, pool: &mut MemoryPool) {
        pool.free(self.pages);
    }

    /// Current frame footprint.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Activate this address space on the executing CPU.
    ///
    /// Page-table switching is the platform's job; this is the hook the
    /// scheduler calls before entering the process.
    pub fn activate(&self) {
        log::trace!("[MM] activate address space ({} pages)", self.pages);
    }
}

/// Activate the kernel address space on the executing CPU.
///
/// Called by the scheduler when control returns from a process.
pub fn activate_kernel() {
    log::trace!("[MM] activate kernel address space");
}

/// A process kernel stack drawn from the frame pool.
#[derive(Debug)]
pub struct KernelStack {
    pages: usize,
}

impl KernelStack {
    /// Allocate a kernel stack.
    pub fn new(pool: &mut MemoryPool) -> Result<Self, AllocError> {
        pool.alloc(KERNEL_STACK_PAGES)?;
        Ok(KernelStack {
            pages: KERNEL_STACK_PAGES,
        })
    }

    /// Release the stack back to the pool.
    pub fn free(self, pool: &mut MemoryPool) {
        pool.free(self.pages);
    }
}
