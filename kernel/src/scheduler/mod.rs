//! Kernel scheduler module.
//!
//! One scheduler loop per logical CPU. Each pass acquires the table lock,
//! recomputes the dynamic priority of every runnable process, dispatches the
//! single winner through the context-switch primitive, then releases the
//! lock and rescans: one dispatch per full scan, so the priorities a
//! decision is based on are never stale by more than one dispatch.

pub mod context;
pub mod priority;

use core::sync::atomic::{AtomicU64, Ordering};

pub use context::{SwitchContext, SwitchFn};

use crate::config::NPROC;
use crate::cpu;
use crate::mm;
use crate::process::sleep::Channel;
use crate::process::table::{with_table, Pid, ProcFlags, ProcState, ProcessTable};
use priority::dynamic_priority;

/// Boot tick counter (incremented every timer tick on CPU 0).
static BOOT_TICKS: AtomicU64 = AtomicU64::new(0);

/// Total dispatches across all CPUs.
static CONTEXT_SWITCHES: AtomicU64 = AtomicU64::new(0);

/// Ticks since boot.
pub fn ticks() -> u64 {
    BOOT_TICKS.load(Ordering::Relaxed)
}

/// Advance the tick counter without the table-side bookkeeping.
pub(crate) fn advance_ticks(n: u64) {
    BOOT_TICKS.fetch_add(n, Ordering::Relaxed);
}

/// Total dispatches since boot.
pub fn context_switch_count() -> u64 {
    CONTEXT_SWITCHES.load(Ordering::Relaxed)
}

/// Install the platform context-switch implementation on the global table.
pub fn install_switch(cpu: usize, f: SwitchFn) {
    with_table(cpu, |t| t.set_switch_impl(f));
}

impl ProcessTable {
    /// Select the runnable process to dispatch next.
    ///
    /// Recomputes `wait_time` and `priority` for every runnable slot from
    /// the absolute counters: waiting time is elapsed time minus time spent
    /// running, never an accumulated figure, so a missed scan cannot skew
    /// it. The strictly highest priority wins; an exact tie goes to the
    /// lower pid.
    pub fn pick_next(&mut self, now: u64) -> Option<usize> {
        let mut best: Option<usize> = None;
        for i in 0..NPROC {
            if self.slots[i].state != ProcState::Runnable {
                continue;
            }
            {
                let p = &mut self.slots[i];
                p.wait_time = now.saturating_sub(p.creation_time).saturating_sub(p.cpu_ticks);
                p.priority = dynamic_priority(p.cpu_ticks, p.wait_time);
            }
            best = match best {
                None => Some(i),
                Some(b) => {
                    let candidate = &self.slots[i];
                    let incumbent = &self.slots[b];
                    if candidate.priority > incumbent.priority
                        || (candidate.priority == incumbent.priority
                            && candidate.pid < incumbent.pid)
                    {
                        Some(i)
                    } else {
                        Some(b)
                    }
                }
            };
        }
        best
    }

    /// Dispatch `slot` on `cpu`: stamp first-dispatch response time, count
    /// the context switch, mark it running and switch into it.
    ///
    /// When the switch returns, control is back in the scheduler context:
    /// the process changed its own state before coming back, the kernel
    /// address space is reactivated and the CPU's current pointer cleared.
    pub fn dispatch(&mut self, cpu: usize, slot: usize, now: u64) {
        {
            let p = &mut self.slots[slot];
            assert_eq!(p.state, ProcState::Runnable, "dispatch: not runnable");
            if !p.flags.contains(ProcFlags::FIRST_SCHEDULED) {
                p.response_time = now.saturating_sub(p.creation_time);
                p.flags.insert(ProcFlags::FIRST_SCHEDULED);
            }
            p.context_switches += 1;
            p.wait_time = 0;
            p.state = ProcState::Running;
            if let Some(asp) = p.address_space.as_ref() {
                asp.activate();
            }
        }
        self.current[cpu] = Some(slot);
        CONTEXT_SWITCHES.fetch_add(1, Ordering::Relaxed);

        let switch = self.switch_impl;
        let prev: *mut SwitchContext = &mut self.sched_ctx[cpu];
        let next: *const SwitchContext = &self.slots[slot].context;
        // SAFETY: both pointers target live table storage and the table
        // lock is held for the whole dispatch.
        unsafe { switch(prev, next) };

        // Process is done running for now.
        mm::activate_kernel();
        self.current[cpu] = None;
    }

    /// Enter the scheduler context from a process context.
    ///
    /// Contract assertions, all fatal: the table lock must be the only
    /// push_off level on this CPU, interrupts must be off, and the caller
    /// must already have moved its state away from Running.
    pub fn sched(&mut self, cpu: usize, slot: usize) {
        if cpu::cli_depth(cpu) != 1 {
            panic!("sched locks");
        }
        if self.slots[slot].state == ProcState::Running {
            panic!("sched running");
        }
        if cpu::interrupts_enabled(cpu) {
            panic!("sched interruptible");
        }
        let switch = self.switch_impl;
        let prev: *mut SwitchContext = &mut self.slots[slot].context;
        let next: *const SwitchContext = &self.sched_ctx[cpu];
        // SAFETY: both pointers target live table storage and the table
        // lock is held across the switch per the contract.
        unsafe { switch(prev, next) };
    }

    /// Give up the CPU for one scheduling round.
    pub fn yield_now(&mut self, cpu: usize) {
        let slot = self.current[cpu].expect("yield: no current process");
        self.slots[slot].state = ProcState::Runnable;
        self.sched(cpu, slot);
    }
}

/// Run one scheduling pass over the global table; returns the dispatched
/// pid, if any.
pub fn schedule_once(cpu: usize) -> Option<Pid> {
    with_table(cpu, |t| {
        let now = ticks();
        let slot = t.pick_next(now)?;
        let pid = t.slot(slot).pid;
        t.dispatch(cpu, slot, now);
        Some(pid)
    })
}

/// Per-CPU scheduler loop. Never returns.
pub fn run(cpu: usize) -> ! {
    log::info!("[SCHED] scheduler loop starting on cpu {}", cpu);
    loop {
        // Window for pending interrupts between scans.
        cpu::intr_on(cpu);
        schedule_once(cpu);
    }
}

/// Give up the CPU for one scheduling round.
pub fn yield_now(cpu: usize) {
    with_table(cpu, |t| t.yield_now(cpu));
}

/// Timer interrupt handler.
///
/// CPU 0 advances the global clock and wakes tick-channel sleepers; every
/// CPU credits one tick of run time to whatever its current process is.
/// Returns whether a process was running and should now yield.
pub fn timer_tick(cpu: usize) -> bool {
    if cpu == 0 {
        advance_ticks(1);
    }
    with_table(cpu, |t| {
        let running = t.current(cpu);
        if let Some(slot) = running {
            t.slot_mut(slot).cpu_ticks += 1;
        }
        if cpu == 0 {
            t.wakeup_locked(Channel::TICKS);
        }
        running.is_some()
    })
}
