//! Sleep and wakeup.
//!
//! The single blocking idiom of the kernel: a process suspends tagged with a
//! wait channel, and any other process resumes every sleeper whose tag
//! matches. Channels are opaque rendezvous values with no ownership
//! semantics. Wakeup is always wake-all, so waiters re-check their condition
//! after resuming.

use spin::{Mutex, MutexGuard};

use crate::process::table::{with_table, ProcState, ProcessTable};

/// An opaque wait-channel tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(usize);

impl Channel {
    /// The global tick counter; `sleep(n)` waiters park here.
    pub const TICKS: Channel = Channel(0);

    /// The channel a process sleeps on while waiting for its children.
    pub fn of_proc(slot: usize) -> Channel {
        Channel(1 + slot)
    }

    /// Raw tag value.
    pub fn raw(self) -> usize {
        self.0
    }
}

impl ProcessTable {
    /// Promote every sleeper tagged with `chan` to runnable.
    ///
    /// The table lock must be held; exit and wakeup both rely on this scan
    /// being total so no matching sleeper can be missed.
    pub fn wakeup_locked(&mut self, chan: Channel) {
        for p in self.slots.iter_mut() {
            if p.state == ProcState::Sleeping && p.chan == Some(chan) {
                p.state = ProcState::Runnable;
            }
        }
    }

    /// Suspend `slot` on `chan` with the table lock already held.
    ///
    /// This is the caller-holds-the-table-lock case of the sleep protocol:
    /// there is no other lock to release, so marking the process sleeping
    /// cannot race with a concurrent wakeup. The channel tag is cleared on
    /// resume.
    pub fn sleep_locked(&mut self, cpu: usize, slot: usize, chan: Channel) {
        {
            let p = &mut self.slots[slot];
            p.chan = Some(chan);
            p.state = ProcState::Sleeping;
        }
        self.sched(cpu, slot);
        // Tidy up.
        self.slots[slot].chan = None;
    }
}

/// Atomically release `guard` and suspend the calling process on `chan`;
/// reacquire the same lock before returning.
///
/// The table lock is taken before the caller's lock is dropped: once we hold
/// it, a concurrent `wakeup` cannot run until we are marked sleeping, so the
/// wakeup cannot be lost.
pub fn sleep<'a, T>(
    cpu: usize,
    chan: Channel,
    lock: &'a Mutex<T>,
    guard: MutexGuard<'a, T>,
) -> MutexGuard<'a, T> {
    with_table(cpu, move |t| {
        let slot = t.current(cpu).expect("sleep: no current process");
        drop(guard);
        t.sleep_locked(cpu, slot, chan);
    });
    // Reacquire original lock.
    lock.lock()
}

/// Wake every process sleeping on `chan`.
pub fn wakeup(cpu: usize, chan: Channel) {
    with_table(cpu, |t| t.wakeup_locked(chan));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu;

    fn sleeping(t: &mut ProcessTable, chan: Channel) -> usize {
        let slot = t.alloc_slot(0).unwrap();
        t.slot_mut(slot).state = ProcState::Sleeping;
        t.slot_mut(slot).chan = Some(chan);
        slot
    }

    #[test]
    fn test_wakeup_matches_channel() {
        let mut t = ProcessTable::new();
        let a = sleeping(&mut t, Channel::of_proc(40));
        let b = sleeping(&mut t, Channel::of_proc(41));
        t.wakeup_locked(Channel::of_proc(40));
        assert_eq!(t.slot(a).state, ProcState::Runnable);
        assert_eq!(t.slot(b).state, ProcState::Sleeping);
    }

    #[test]
    fn test_wakeup_wakes_all_matching() {
        let mut t = ProcessTable::new();
        let chan = Channel::of_proc(42);
        let a = sleeping(&mut t, chan);
        let b = sleeping(&mut t, chan);
        t.wakeup_locked(chan);
        assert_eq!(t.slot(a).state, ProcState::Runnable);
        assert_eq!(t.slot(b).state, ProcState::Runnable);
    }

    #[test]
    fn test_wakeup_ignores_non_sleepers() {
        let mut t = ProcessTable::new();
        let chan = Channel::of_proc(43);
        let a = t.alloc_slot(0).unwrap();
        t.slot_mut(a).state = ProcState::Zombie;
        t.slot_mut(a).chan = Some(chan);
        t.wakeup_locked(chan);
        assert_eq!(t.slot(a).state, ProcState::Zombie);
    }

    #[test]
    fn test_sleep_locked_clears_channel_on_resume() {
        let cpu = 40;
        let mut t = ProcessTable::new();
        let slot = t.alloc_slot(0).unwrap();
        t.slot_mut(slot).state = ProcState::Runnable;
        cpu::push_off(cpu);
        t.sleep_locked(cpu, slot, Channel::TICKS);
        cpu::pop_off(cpu);
        // The default switch returns immediately (spurious resume): the tag
        // is tidied up but the process has not been redispatched.
        assert_eq!(t.slot(slot).chan, None);
        assert_eq!(t.slot(slot).state, ProcState::Sleeping);
    }

    #[test]
    fn test_sleep_releases_and_reacquires_caller_lock() {
        let cpu = 41;
        let chan = Channel::of_proc(44);
        let slot = with_table(cpu, |t| {
            let slot = t.alloc_slot(0).unwrap();
            t.slot_mut(slot).state = ProcState::Runnable;
            t.set_current(cpu, Some(slot));
            slot
        });

        let lock = Mutex::new(0u32);
        let guard = lock.lock();
        let mut guard = sleep(cpu, chan, &lock, guard);
        *guard += 1;
        assert_eq!(*guard, 1);
        drop(guard);

        with_table(cpu, |t| {
            assert_eq!(t.slot(slot).chan, None);
            assert_eq!(t.slot(slot).state, ProcState::Sleeping);
            t.set_current(cpu, None);
        });
    }
}
