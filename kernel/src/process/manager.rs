//! Process Manager
//!
//! High-level process lifecycle: allocation, the first process, fork and its
//! deferred-start variant, exit, wait, kill and address-space growth. All
//! operations run under the table lock; the free functions at the bottom are
//! the lock-scoped entry points over the global table.

use alloc::boxed::Box;

use crate::config::{NPROC, PAGE_SIZE};
use crate::fs;
use crate::mm::{AddressSpace, KernelStack};
use crate::process::history::HistoryRecord;
use crate::process::sleep::Channel;
use crate::process::table::{
    pair_mut, with_table, Pid, ProcFlags, ProcState, ProcessTable, TrapFrame,
};
use crate::scheduler;

/// Process lifecycle error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// No free table slot.
    ProcessLimitReached,
    /// Kernel stack or address-space allocation failed.
    OutOfMemory,
    /// The caller has no children to wait for.
    NoChildren,
    /// No process carries the requested pid.
    NoSuchProcess,
    /// The caller was killed while blocked.
    Killed,
    /// Invalid argument.
    InvalidArgument(&'static str),
}

impl ProcessTable {
    /// Reserve an unused slot: mark it embryo, assign the next pid, and give
    /// it a fresh kernel stack and zeroed trap frame.
    ///
    /// On kernel-stack exhaustion the slot is rolled back to unused and the
    /// caller sees `OutOfMemory`.
    pub fn alloc_slot(&mut self, now: u64) -> Result<usize, ProcessError> {
        let slot = match (0..NPROC).find(|&i| self.slots[i].state == ProcState::Unused) {
            Some(i) => i,
            None => return Err(ProcessError::ProcessLimitReached),
        };
        let pid = Pid(self.next_pid);
        self.next_pid += 1;

        let ProcessTable { slots, mem, .. } = self;
        let p = &mut slots[slot];
        p.state = ProcState::Embryo;
        p.pid = pid;
        let stack = match KernelStack::new(mem) {
            Ok(stack) => stack,
            Err(_) => {
                p.reset_unused();
                return Err(ProcessError::OutOfMemory);
            }
        };
        p.kernel_stack = Some(stack);
        p.trap_frame = Some(Box::new(TrapFrame::default()));
        p.context = Default::default();
        p.flags = ProcFlags::empty();
        p.chan = None;
        p.creation_time = now;
        p.end_time = 0;
        p.cpu_ticks = 0;
        p.wait_time = 0;
        p.priority = scheduler::priority::dynamic_priority(0, 0);
        p.response_time = 0;
        p.turnaround_time = 0;
        p.context_switches = 0;
        p.exec_time = -1;
        p.gate.reset();
        Ok(slot)
    }

    /// Set up the first user process.
    ///
    /// Panics on failure: without the root process there is nothing to
    /// reparent orphans to and the system cannot run.
    pub fn userinit(&mut self, now: u64) -> usize {
        let slot = match self.alloc_slot(now) {
            Ok(slot) => slot,
            Err(_) => panic!("userinit: no process slot"),
        };
        {
            let ProcessTable { slots, mem, .. } = self;
            let p = &mut slots[slot];
            let asp = match AddressSpace::new(mem, PAGE_SIZE) {
                Ok(asp) => asp,
                Err(_) => panic!("userinit: out of memory"),
            };
            p.address_space = Some(asp);
            p.size = PAGE_SIZE;
            if let Some(tf) = p.trap_frame.as_mut() {
                // Beginning of the init image.
                tf.pc = 0;
                tf.sp = PAGE_SIZE as u64;
                tf.retval = 0;
            }
            p.name.push_str("init");
            p.cwd = Some(fs::root_dir());
            p.state = ProcState::Runnable;
        }
        let pid = self.slots[slot].pid;
        self.history.record(pid, "init", PAGE_SIZE);
        self.init_slot = Some(slot);
        log::info!("[PROC] init process created (pid {})", pid);
        slot
    }

    /// Create a new process copying the one current on `cpu`.
    pub fn fork(&mut self, cpu: usize, now: u64) -> Result<Pid, ProcessError> {
        self.fork_common(cpu, now, false, -1)
    }

    /// `fork` variant that records a CPU-tick budget and can hold the child
    /// sleeping until `scheduler_start` releases it.
    pub fn custom_fork(
        &mut self,
        cpu: usize,
        now: u64,
        start_later: bool,
        exec_time: i64,
    ) -> Result<Pid, ProcessError> {
        self.fork_common(cpu, now, start_later, exec_time)
    }

    fn fork_common(
        &mut self,
        cpu: usize,
        now: u64,
        start_later: bool,
        exec_time: i64,
    ) -> Result<Pid, ProcessError> {
        let parent_slot = self.current[cpu].expect("fork: no current process");
        let child_slot = self.alloc_slot(now)?;

        let ProcessTable {
            slots,
            mem,
            history,
            ..
        } = self;
        let (parent, child) = pair_mut(slots, parent_slot, child_slot);

        // Duplicate the parent's address space; on failure undo the whole
        // allocation.
        match parent
            .address_space
            .as_ref()
            .map(|asp| asp.duplicate(mem))
            .transpose()
        {
            Ok(dup) => child.address_space = dup,
            Err(_) => {
                if let Some(stack) = child.kernel_stack.take() {
                    stack.free(mem);
                }
                child.reset_unused();
                return Err(ProcessError::OutOfMemory);
            }
        }
        child.size = parent.size;
        child.parent = Some(parent_slot);

        // The child resumes at the same program counter with the call's
        // return value forced to zero.
        if let (Some(ptf), Some(ctf)) = (parent.trap_frame.as_ref(), child.trap_frame.as_mut()) {
            **ctf = (**ptf).clone();
            ctf.retval = 0;
        }

        for (c, p) in child.open_files.iter_mut().zip(parent.open_files.iter()) {
            *c = p.as_ref().map(fs::file_dup);
        }
        child.cwd = parent.cwd.as_ref().map(fs::dir_dup);
        child.name = parent.name.clone();

        child.exec_time = exec_time;
        if start_later {
            // Held back until scheduler_start releases the batch.
            child.flags.insert(ProcFlags::START_LATER);
            child.state = ProcState::Sleeping;
        } else {
            child.state = ProcState::Runnable;
        }

        let pid = child.pid;
        history.record(pid, &child.name, child.size);
        log::debug!("[PROC] fork: pid {} -> pid {}", parent.pid, pid);
        Ok(pid)
    }

    /// Terminate `slot`: release file-layer references, record the final
    /// accounting, hand children to init and become a zombie.
    ///
    /// The caller is expected to follow with `sched`; the slot itself is
    /// reclaimed later by the parent's `wait`.
    pub fn exit_slot(&mut self, slot: usize, now: u64) {
        if self.init_slot == Some(slot) {
            panic!("init exiting");
        }
        {
            let p = &mut self.slots[slot];
            p.end_time = now;
            p.turnaround_time = now.saturating_sub(p.creation_time);
            p.wait_time = p.turnaround_time.saturating_sub(p.cpu_ticks);
            log::info!(
                "[PROC] pid {} exit: tat={} wt={} rt={} cs={}",
                p.pid,
                p.turnaround_time,
                p.wait_time,
                p.response_time,
                p.context_switches
            );

            // Close all open files.
            for file in p.open_files.iter_mut() {
                if let Some(file) = file.take() {
                    fs::file_close(file);
                }
            }
            if let Some(cwd) = p.cwd.take() {
                fs::begin_op();
                fs::dir_put(cwd);
                fs::end_op();
            }
        }
        let pid = self.slots[slot].pid;
        let final_size = self.slots[slot].size;
        self.history.update_size(pid, final_size);

        // Parent might be sleeping in wait().
        if let Some(parent) = self.slots[slot].parent {
            self.wakeup_locked(Channel::of_proc(parent));
        }

        // Pass abandoned children to init.
        let init_slot = self.init_slot.expect("exit: no init process");
        let mut orphaned_zombie = false;
        for i in 0..NPROC {
            if self.slots[i].parent == Some(slot) {
                self.slots[i].parent = Some(init_slot);
                if self.slots[i].state == ProcState::Zombie {
                    orphaned_zombie = true;
                }
            }
        }
        if orphaned_zombie {
            self.wakeup_locked(Channel::of_proc(init_slot));
        }

        self.slots[slot].state = ProcState::Zombie;
    }

    /// Wait for a child of the process current on `cpu` to exit; reap it and
    /// return its pid.
    ///
    /// Blocking, retrying loop: each pass rescans the whole table, fails
    /// fast when no children exist or the caller is killed, and otherwise
    /// sleeps on the caller's own channel until `exit_slot` wakes it.
    pub fn wait(&mut self, cpu: usize) -> Result<Pid, ProcessError> {
        let slot = self.current[cpu].expect("wait: no current process");
        loop {
            // Scan for exited children.
            let mut have_kids = false;
            let mut zombie = None;
            for i in 0..NPROC {
                if self.slots[i].parent != Some(slot) || self.slots[i].state == ProcState::Unused {
                    continue;
                }
                have_kids = true;
                if self.slots[i].state == ProcState::Zombie {
                    zombie = Some(i);
                    break;
                }
            }

            if let Some(i) = zombie {
                // Found one.
                let ProcessTable { slots, mem, .. } = self;
                let p = &mut slots[i];
                let pid = p.pid;
                if let Some(stack) = p.kernel_stack.take() {
                    stack.free(mem);
                }
                if let Some(asp) = p.address_space.take() {
                    asp.free(mem);
                }
                p.reset_unused();
                return Ok(pid);
            }

            // No point waiting if we don't have any children.
            if !have_kids || self.slots[slot].killed() {
                return Err(ProcessError::NoChildren);
            }

            // Wait for children to exit.
            self.sleep_locked(cpu, slot, Channel::of_proc(slot));
        }
    }

    /// Request termination of the process carrying `pid`.
    ///
    /// The flag is sticky; a sleeping target is made runnable so it can
    /// observe it. Deferred-start sleepers stay parked: they may not run
    /// before `scheduler_start`, and they will see the flag when released.
    pub fn kill(&mut self, pid: Pid) -> Result<(), ProcessError> {
        for p in self.slots.iter_mut() {
            if p.pid == pid && p.state != ProcState::Unused {
                p.flags.insert(ProcFlags::KILLED);
                if p.state == ProcState::Sleeping && !p.flags.contains(ProcFlags::START_LATER) {
                    p.state = ProcState::Runnable;
                }
                return Ok(());
            }
        }
        Err(ProcessError::NoSuchProcess)
    }

    /// Grow (or shrink) the current process's address space by `delta`
    /// bytes; returns the old size.
    pub fn grow(&mut self, cpu: usize, delta: isize) -> Result<usize, ProcessError> {
        let slot = self.current[cpu].expect("sbrk: no current process");
        let ProcessTable {
            slots,
            mem,
            history,
            ..
        } = self;
        let p = &mut slots[slot];
        let old = p.size;
        let new = match old.checked_add_signed(delta) {
            Some(new) => new,
            None => return Err(ProcessError::InvalidArgument("sbrk below zero")),
        };
        let asp = p
            .address_space
            .as_mut()
            .expect("sbrk: no address space");
        asp.resize(mem, new)
            .map_err(|_| ProcessError::OutOfMemory)?;
        asp.activate();
        p.size = new;
        history.update_size(p.pid, new);
        Ok(old)
    }

    /// Barrier release for deferred-start processes: every sleeper with the
    /// START_LATER flag becomes runnable and the flag is cleared.
    pub fn scheduler_start(&mut self) {
        for p in self.slots.iter_mut() {
            if p.state == ProcState::Sleeping && p.flags.contains(ProcFlags::START_LATER) {
                p.state = ProcState::Runnable;
                p.flags.remove(ProcFlags::START_LATER);
            }
        }
    }

    /// Sleep for `n` ticks; fails if killed while waiting.
    ///
    /// There is no timeout inside sleep/wakeup itself: the loop parks on the
    /// tick channel and re-checks elapsed time after every resume.
    pub fn sleep_ticks(&mut self, cpu: usize, n: u64) -> Result<(), ProcessError> {
        let slot = self.current[cpu].expect("sleep: no current process");
        let start = scheduler::ticks();
        while scheduler::ticks().wrapping_sub(start) < n {
            if self.slots[slot].killed() {
                return Err(ProcessError::Killed);
            }
            self.sleep_locked(cpu, slot, Channel::TICKS);
        }
        Ok(())
    }
}

// Lock-scoped entry points over the global table.

/// Initialize the process subsystem: create the init process.
pub fn init(cpu: usize) {
    with_table(cpu, |t| {
        t.userinit(scheduler::ticks());
    });
}

/// Create a new process copying the caller; returns the child's pid.
pub fn fork(cpu: usize) -> Result<Pid, ProcessError> {
    with_table(cpu, |t| t.fork(cpu, scheduler::ticks()))
}

/// `fork` with a recorded CPU budget and optional deferred start.
pub fn custom_fork(cpu: usize, start_later: bool, exec_time: i64) -> Result<Pid, ProcessError> {
    with_table(cpu, |t| {
        t.custom_fork(cpu, scheduler::ticks(), start_later, exec_time)
    })
}

/// Terminate the calling process. Never returns.
pub fn exit(cpu: usize) -> ! {
    with_table(cpu, |t| {
        let slot = t.current(cpu).expect("exit: no current process");
        t.exit_slot(slot, scheduler::ticks());
        // Jump into the scheduler, never to return.
        t.sched(cpu, slot);
    });
    panic!("zombie exit");
}

/// Reap a zombie child of the calling process.
pub fn wait(cpu: usize) -> Result<Pid, ProcessError> {
    with_table(cpu, |t| t.wait(cpu))
}

/// Request termination of `pid`.
pub fn kill(cpu: usize, pid: Pid) -> Result<(), ProcessError> {
    with_table(cpu, |t| t.kill(pid))
}

/// The calling process's pid.
pub fn getpid(cpu: usize) -> Pid {
    with_table(cpu, |t| {
        let slot = t.current(cpu).expect("getpid: no current process");
        t.slot(slot).pid
    })
}

/// Grow the calling process's address space; returns the old size.
pub fn grow(cpu: usize, delta: isize) -> Result<usize, ProcessError> {
    with_table(cpu, |t| t.grow(cpu, delta))
}

/// Release every deferred-start process at once.
pub fn scheduler_start(cpu: usize) {
    with_table(cpu, |t| t.scheduler_start());
}

/// Sleep the calling process for `n` ticks.
pub fn sleep_ticks(cpu: usize, n: u64) -> Result<(), ProcessError> {
    with_table(cpu, |t| t.sleep_ticks(cpu, n))
}

/// Copy the process history into `buf`; returns the count written.
pub fn gethistory(cpu: usize, buf: &mut [HistoryRecord]) -> usize {
    with_table(cpu, |t| t.history().copy_into(buf))
}

/// Log a listing of every occupied slot.
pub fn dump(cpu: usize) {
    with_table(cpu, |t| t.dump());
}
