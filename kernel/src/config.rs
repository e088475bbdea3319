//! Kernel configuration constants.
//!
//! This module contains compile-time configuration for the process core.
//! Values here affect table sizes, limits, and timing.

/// Maximum number of CPUs supported.
pub const MAX_CPUS: usize = 64;

/// Number of process table slots.
pub const NPROC: usize = 64;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Kernel stack size per process (16 KB).
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Page size (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Physical pages available to the default memory pool (16 MB).
pub const DEFAULT_MEMORY_PAGES: usize = 4096;

/// Bounded depth of the process history ring.
pub const NHISTORY: usize = 256;

/// Bytes reserved for a process name in an exported history record.
pub const NAME_MAX: usize = 16;

/// Timer interrupt frequency in Hz.
pub const TIMER_FREQUENCY: u32 = 100;
