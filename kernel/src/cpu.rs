//! Per-CPU interrupt bookkeeping.
//!
//! Masking interrupts and identifying the executing CPU are platform
//! primitives; callers pass their CPU index in. What the core tracks is the
//! nesting discipline the process table depends on: interrupts stay off on
//! the local CPU for as long as the table lock's underlying primitive is
//! held, and a context switch may only happen at nesting depth one.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::MAX_CPUS;

/// Per-CPU interrupt state.
pub struct Cpu {
    /// `push_off` nesting depth.
    depth: AtomicU32,
    /// Whether interrupts were enabled before the outermost `push_off`.
    intena: AtomicBool,
    /// Current interrupt-enable flag for this CPU.
    enabled: AtomicBool,
}

impl Cpu {
    const fn new() -> Self {
        Cpu {
            depth: AtomicU32::new(0),
            intena: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
        }
    }
}

const CPU_INIT: Cpu = Cpu::new();
static CPUS: [Cpu; MAX_CPUS] = [CPU_INIT; MAX_CPUS];

/// Enable interrupts on `cpu` (the scheduler loop's idle point).
pub fn intr_on(cpu: usize) {
    CPUS[cpu].enabled.store(true, Ordering::SeqCst);
}

/// Disable interrupts on `cpu`.
pub fn intr_off(cpu: usize) {
    CPUS[cpu].enabled.store(false, Ordering::SeqCst);
}

/// Whether interrupts are currently enabled on `cpu`.
pub fn interrupts_enabled(cpu: usize) -> bool {
    CPUS[cpu].enabled.load(Ordering::SeqCst)
}

/// Current `push_off` nesting depth for `cpu`.
pub fn cli_depth(cpu: usize) -> u32 {
    CPUS[cpu].depth.load(Ordering::SeqCst)
}

/// Disable interrupts and bump the nesting depth.
///
/// The matching `pop_off` restores the interrupt flag only when the
/// outermost level is released.
pub fn push_off(cpu: usize) {
    let c = &CPUS[cpu];
    let was_enabled = c.enabled.swap(false, Ordering::SeqCst);
    if c.depth.fetch_add(1, Ordering::SeqCst) == 0 {
        c.intena.store(was_enabled, Ordering::SeqCst);
    }
}

/// Drop one nesting level, restoring the interrupt flag at the outermost
/// release.
pub fn pop_off(cpu: usize) {
    let c = &CPUS[cpu];
    assert!(
        !c.enabled.load(Ordering::SeqCst),
        "pop_off - interruptible"
    );
    let prev = c.depth.load(Ordering::SeqCst);
    assert!(prev >= 1, "pop_off");
    c.depth.store(prev - 1, Ordering::SeqCst);
    if prev == 1 && c.intena.load(Ordering::SeqCst) {
        c.enabled.store(true, Ordering::SeqCst);
    }
}
