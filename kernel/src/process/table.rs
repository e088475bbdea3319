//! Process Table
//!
//! Maintains the global table of all processes in the system: a
//! fixed-capacity arena of process control blocks guarded by one coarse
//! lock. Every cross-thread-visible state transition happens while the lock
//! is held, and enumeration (scheduling, wakeup, reparenting, kill) always
//! walks the full array; the table is small and bounded, and the
//! no-missed-wakeup guarantee depends on a total, lock-protected scan.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use spin::Mutex;

use crate::config::{DEFAULT_MEMORY_PAGES, MAX_CPUS, NOFILE, NPROC};
use crate::cpu;
use crate::fs::{DirRef, FileRef};
use crate::mm::MemoryPool;
use crate::mm::{AddressSpace, KernelStack};
use crate::process::history::HistoryRing;
use crate::process::sleep::Channel;
use crate::scheduler::context::{noop_switch, SwitchContext, SwitchFn};
use crate::syscall::gate::SyscallGate;

/// Process identifier.
///
/// Assigned monotonically at allocation; `Pid::NONE` marks an empty table
/// slot after reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(pub u32);

impl Pid {
    /// Sentinel for a slot that holds no process.
    pub const NONE: Pid = Pid(0);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Slot is free.
    Unused,
    /// Slot reserved, kernel stack allocated, not yet runnable.
    Embryo,
    /// Eligible for scheduling.
    Runnable,
    /// Executing on some CPU.
    Running,
    /// Blocked on a wait channel.
    Sleeping,
    /// Terminated, awaiting reap by the parent.
    Zombie,
}

bitflags! {
    /// Per-process flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcFlags: u32 {
        /// Kill requested; sticky until the slot is reaped.
        const KILLED = 1 << 0;
        /// Created by `custom_fork` with deferred start; cleared by
        /// `scheduler_start`.
        const START_LATER = 1 << 1;
        /// Response time has been stamped (first dispatch happened).
        const FIRST_SCHEDULED = 1 << 2;
    }
}

/// Saved user-visible register state at trap entry.
///
/// The full layout belongs to the platform trap path; the core copies it on
/// fork and forces the child's return value to zero.
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct TrapFrame {
    /// Program counter at trap time.
    pub pc: u64,
    /// User stack pointer.
    pub sp: u64,
    /// Syscall return-value register.
    pub retval: u64,
    /// Saved processor flags.
    pub flags: u64,
}

/// A process control block (one table slot).
pub struct Process {
    /// Current life-cycle state.
    pub state: ProcState,
    /// Process ID (`Pid::NONE` while the slot is unused).
    pub pid: Pid,
    /// Parent slot index; `None` only for the root process.
    pub parent: Option<usize>,
    /// Process name.
    pub name: String,
    /// Address-space extent in bytes.
    pub size: usize,
    /// Opaque virtual-memory handle, exclusively owned.
    pub address_space: Option<AddressSpace>,
    /// Kernel stack, allocated at creation and freed at reap.
    pub kernel_stack: Option<KernelStack>,
    /// Trap frame, allocated at creation and freed at reap.
    pub trap_frame: Option<Box<TrapFrame>>,
    /// Saved kernel context for the scheduler switch.
    pub context: SwitchContext,
    /// Open-file references, released on exit.
    pub open_files: [Option<FileRef>; NOFILE],
    /// Working-directory reference, released on exit.
    pub cwd: Option<DirRef>,
    /// Flag word (killed, deferred start, first-scheduled).
    pub flags: ProcFlags,
    /// Wait channel; meaningful only while `state == Sleeping`.
    pub chan: Option<Channel>,
    /// Tick of allocation.
    pub creation_time: u64,
    /// Tick of termination.
    pub end_time: u64,
    /// Accumulated run time, credited on timer ticks.
    pub cpu_ticks: u64,
    /// Time spent neither running nor terminated; recomputed every
    /// scheduling pass, never accumulated.
    pub wait_time: u64,
    /// Dynamic priority, recomputed every scheduling pass.
    pub priority: i64,
    /// Ticks between creation and first dispatch.
    pub response_time: u64,
    /// Ticks between creation and termination.
    pub turnaround_time: u64,
    /// Number of times this process was dispatched.
    pub context_switches: u64,
    /// CPU-tick budget recorded by deferred-start fork; `-1` is unlimited.
    pub exec_time: i64,
    /// Per-process syscall gate.
    pub gate: SyscallGate,
}

impl Process {
    /// An empty, unused table slot.
    pub fn new() -> Self {
        const NO_FILE: Option<FileRef> = None;
        Process {
            state: ProcState::Unused,
            pid: Pid::NONE,
            parent: None,
            name: String::new(),
            size: 0,
            address_space: None,
            kernel_stack: None,
            trap_frame: None,
            context: SwitchContext::default(),
            open_files: [NO_FILE; NOFILE],
            cwd: None,
            flags: ProcFlags::empty(),
            chan: None,
            creation_time: 0,
            end_time: 0,
            cpu_ticks: 0,
            wait_time: 0,
            priority: 0,
            response_time: 0,
            turnaround_time: 0,
            context_switches: 0,
            exec_time: -1,
            gate: SyscallGate::new(),
        }
    }

    /// Whether a kill has been requested.
    pub fn killed(&self) -> bool {
        self.flags.contains(ProcFlags::KILLED)
    }

    /// Return the slot to the unused state.
    ///
    /// The kernel stack and address space must already have been released;
    /// this only clears identity, so the pid sentinel and killed flag are
    /// gone before the slot can be re-allocated.
    pub fn reset_unused(&mut self) {
        debug_assert!(self.kernel_stack.is_none());
        debug_assert!(self.address_space.is_none());
        self.pid = Pid::NONE;
        self.parent = None;
        self.name.clear();
        self.size = 0;
        self.trap_frame = None;
        self.context = SwitchContext::default();
        self.flags = ProcFlags::empty();
        self.chan = None;
        self.state = ProcState::Unused;
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight read-only view of a process (listings, wait scans).
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    /// Process ID.
    pub pid: Pid,
    /// Parent pid, if any.
    pub parent: Option<Pid>,
    /// Current state.
    pub state: ProcState,
    /// Process name.
    pub name: String,
}

/// The process table: slots, pid counter, per-CPU dispatch state, the
/// history ring and the memory pool behind address-space operations.
pub struct ProcessTable {
    pub(crate) slots: [Process; NPROC],
    pub(crate) next_pid: u32,
    pub(crate) init_slot: Option<usize>,
    pub(crate) current: [Option<usize>; MAX_CPUS],
    pub(crate) sched_ctx: [SwitchContext; MAX_CPUS],
    pub(crate) mem: MemoryPool,
    pub(crate) history: HistoryRing,
    pub(crate) switch_impl: SwitchFn,
}

impl ProcessTable {
    /// A table backed by the default memory budget.
    pub fn new() -> Self {
        Self::with_memory(DEFAULT_MEMORY_PAGES)
    }

    /// A table backed by a pool of `pages` physical frames.
    pub fn with_memory(pages: usize) -> Self {
        ProcessTable {
            slots: core::array::from_fn(|_| Process::new()),
            next_pid: 1,
            init_slot: None,
            current: [None; MAX_CPUS],
            sched_ctx: [SwitchContext::default(); MAX_CPUS],
            mem: MemoryPool::new(pages),
            history: HistoryRing::new(),
            switch_impl: noop_switch,
        }
    }

    /// Install the platform context-switch implementation.
    pub fn set_switch_impl(&mut self, f: SwitchFn) {
        self.switch_impl = f;
    }

    /// Shared access to a slot.
    pub fn slot(&self, index: usize) -> &Process {
        &self.slots[index]
    }

    /// Exclusive access to a slot.
    pub fn slot_mut(&mut self, index: usize) -> &mut Process {
        &mut self.slots[index]
    }

    /// The slot currently executing on `cpu`, if any.
    pub fn current(&self, cpu: usize) -> Option<usize> {
        self.current[cpu]
    }

    /// Point `cpu` at `slot` (trap-layer and test hook).
    pub fn set_current(&mut self, cpu: usize, slot: Option<usize>) {
        self.current[cpu] = slot;
    }

    /// Slot of the root process, once created.
    pub fn init_slot(&self) -> Option<usize> {
        self.init_slot
    }

    /// The history ring.
    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Find the slot holding `pid`.
    pub fn find_pid(&self, pid: Pid) -> Option<usize> {
        (0..NPROC).find(|&i| self.slots[i].pid == pid && self.slots[i].state != ProcState::Unused)
    }

    /// Snapshot every occupied slot.
    pub fn snapshot(&self) -> Vec<ProcessSnapshot> {
        self.slots
            .iter()
            .filter(|p| p.state != ProcState::Unused)
            .map(|p| ProcessSnapshot {
                pid: p.pid,
                parent: p.parent.map(|i| self.slots[i].pid),
                state: p.state,
                name: p.name.clone(),
            })
            .collect()
    }

    /// Log a one-line listing of every occupied slot.
    pub fn dump(&self) {
        for p in self.slots.iter().filter(|p| p.state != ProcState::Unused) {
            log::info!(
                "[PROC] {} {:?} {} prio={} cpu={} wait={} cs={}",
                p.pid,
                p.state,
                p.name,
                p.priority,
                p.cpu_ticks,
                p.wait_time,
                p.context_switches
            );
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrow two distinct slots mutably.
pub(crate) fn pair_mut(
    slots: &mut [Process; NPROC],
    a: usize,
    b: usize,
) -> (&mut Process, &mut Process) {
    assert!(a != b, "pair_mut: identical slots");
    if a < b {
        let (lo, hi) = slots.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = slots.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

/// Global process table instance.
static PROCESS_TABLE: Mutex<Option<ProcessTable>> = Mutex::new(None);

/// Run `f` with exclusive, lock-scoped access to the global table.
///
/// Interrupts are pushed off on the calling CPU for the duration of the
/// critical section, so a timer signal cannot try to retake the lock on the
/// CPU that already holds it.
pub fn with_table<R>(cpu: usize, f: impl FnOnce(&mut ProcessTable) -> R) -> R {
    cpu::push_off(cpu);
    let result = {
        let mut guard = PROCESS_TABLE.lock();
        let table = guard.get_or_insert_with(ProcessTable::new);
        f(table)
    };
    cpu::pop_off(cpu);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KERNEL_STACK_SIZE, PAGE_SIZE};

    const KSTACK_PAGES: usize = KERNEL_STACK_SIZE / PAGE_SIZE;

    #[test]
    fn test_alloc_assigns_monotonic_pids() {
        let mut t = ProcessTable::new();
        let a = t.alloc_slot(0).unwrap();
        let b = t.alloc_slot(0).unwrap();
        assert_eq!(t.slot(a).state, ProcState::Embryo);
        assert_eq!(t.slot(b).pid.0, t.slot(a).pid.0 + 1);
        assert!(t.slot(a).kernel_stack.is_some());
        assert!(t.slot(a).trap_frame.is_some());
    }

    #[test]
    fn test_alloc_exhausts_slots() {
        let mut t = ProcessTable::with_memory(NPROC * KSTACK_PAGES + 8);
        for _ in 0..NPROC {
            t.alloc_slot(0).unwrap();
        }
        assert!(t.alloc_slot(0).is_err());
    }

    #[test]
    fn test_alloc_rolls_back_on_stack_failure() {
        // Not enough frames for even one kernel stack.
        let mut t = ProcessTable::with_memory(KSTACK_PAGES - 1);
        assert!(t.alloc_slot(0).is_err());
        assert_eq!(t.slot(0).state, ProcState::Unused);
        assert_eq!(t.slot(0).pid, Pid::NONE);
        assert_eq!(t.mem.free_pages(), KSTACK_PAGES - 1);
    }

    #[test]
    fn test_reset_unused_clears_identity() {
        let mut t = ProcessTable::new();
        let i = t.alloc_slot(3).unwrap();
        {
            let ProcessTable { slots, mem, .. } = &mut t;
            let p = &mut slots[i];
            p.name.push_str("doomed");
            p.flags.insert(ProcFlags::KILLED);
            if let Some(ks) = p.kernel_stack.take() {
                ks.free(mem);
            }
            p.reset_unused();
        }
        let p = t.slot(i);
        assert_eq!(p.state, ProcState::Unused);
        assert_eq!(p.pid, Pid::NONE);
        assert!(p.name.is_empty());
        assert!(!p.killed());
        assert!(p.trap_frame.is_none());
    }

    #[test]
    fn test_snapshot_skips_unused() {
        let mut t = ProcessTable::new();
        let i = t.alloc_slot(0).unwrap();
        t.slot_mut(i).name.push_str("only");
        let snap = t.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].name, "only");
    }

    #[test]
    fn test_find_pid_ignores_unused() {
        let mut t = ProcessTable::new();
        assert_eq!(t.find_pid(Pid::NONE), None);
        let i = t.alloc_slot(0).unwrap();
        let pid = t.slot(i).pid;
        assert_eq!(t.find_pid(pid), Some(i));
    }
}
