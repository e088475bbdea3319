//! Context-switch contract.
//!
//! The register-level swap between the per-CPU scheduler context and a
//! process context is a platform primitive. The core stores the opaque
//! register block and calls through an installed implementation.
//!
//! The contract is the classic one: the switch is invoked only while the
//! process table lock is held, and the suspended side resumes immediately
//! after its call to the switch with the lock still in hand; it is the
//! resumed side's job to release it and reacquire it before switching back.
//! An implementation that returns immediately behaves as a spurious resume;
//! every sleeper re-checks its wait condition, so correctness is preserved.

/// Callee-saved register block for kernel context switches.
///
/// The fields are a neutral superset; the platform switch decides which are
/// live on a given architecture.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SwitchContext {
    /// Resume address.
    pub pc: u64,
    /// Stack pointer.
    pub sp: u64,
    /// Frame pointer.
    pub fp: u64,
    /// Remaining callee-saved registers.
    pub saved: [u64; 8],
}

/// Installed context-switch implementation.
///
/// # Safety
///
/// Implementations may only be called with pointers into live process-table
/// storage, under the table lock.
pub type SwitchFn = unsafe fn(prev: *mut SwitchContext, next: *const SwitchContext);

/// Default implementation: an immediate return.
///
/// Stands in until the platform installs its register swap; callers observe
/// it as a spurious resume.
pub unsafe fn noop_switch(_prev: *mut SwitchContext, _next: *const SwitchContext) {}
