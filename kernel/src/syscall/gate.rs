//! Per-process syscall gate.
//!
//! Each process carries two masks over the syscall-number space: a pending
//! mask recording requested blocks, and an active mask actually consulted to
//! deny a call. Block requests are staged in the pending mask and only take
//! effect when [`SyscallGate::commit_pending`] runs at a trusted transition
//! point (syscall dispatch entry); unblock requests clear both masks
//! immediately.

use super::{SyscallError, NSYSCALLS};

/// Staged-commit pair of syscall block masks.
#[derive(Debug, Clone)]
pub struct SyscallGate {
    /// Requested blocks, not yet enforced.
    pending: [bool; NSYSCALLS],
    /// Enforced blocks, consulted on dispatch.
    active: [bool; NSYSCALLS],
}

impl SyscallGate {
    /// A gate with nothing blocked.
    pub const fn new() -> Self {
        SyscallGate {
            pending: [false; NSYSCALLS],
            active: [false; NSYSCALLS],
        }
    }

    /// Stage a block for syscall `id`. Takes effect at the next commit.
    pub fn block(&mut self, id: usize) -> Result<(), SyscallError> {
        if id >= NSYSCALLS {
            return Err(SyscallError::InvalidArgument);
        }
        self.pending[id] = true;
        Ok(())
    }

    /// Unblock syscall `id`, clearing both masks immediately.
    ///
    /// Unblocking an already-unblocked id is a no-op that still succeeds.
    pub fn unblock(&mut self, id: usize) -> Result<(), SyscallError> {
        if id >= NSYSCALLS {
            return Err(SyscallError::InvalidArgument);
        }
        self.pending[id] = false;
        self.active[id] = false;
        Ok(())
    }

    /// Copy every pending bit into the enforced mask.
    pub fn commit_pending(&mut self) {
        self.active = self.pending;
    }

    /// Whether syscall `id` is currently denied.
    pub fn is_blocked(&self, id: usize) -> bool {
        id < NSYSCALLS && self.active[id]
    }

    /// Whether a block for syscall `id` is staged.
    pub fn is_pending(&self, id: usize) -> bool {
        id < NSYSCALLS && self.pending[id]
    }

    /// Clear both masks (slot reuse).
    pub fn reset(&mut self) {
        *self = SyscallGate::new();
    }
}

impl Default for SyscallGate {
    fn default() -> Self {
        Self::new()
    }
}
