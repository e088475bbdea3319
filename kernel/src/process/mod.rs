//! Process Management
//!
//! This module provides the process table, the life-cycle state machine
//! (fork, exit, wait, kill and the deferred-start fork variant), the
//! sleep/wakeup primitive and the process history.

pub mod history;
pub mod manager;
pub mod sleep;
pub mod table;

pub use history::{HistoryRecord, HistoryRing};
pub use manager::{
    custom_fork, dump, exit, fork, gethistory, getpid, grow, init, kill, scheduler_start,
    sleep_ticks, wait, ProcessError,
};
pub use sleep::{sleep, wakeup, Channel};
pub use table::{
    with_table, Pid, ProcFlags, ProcState, Process, ProcessSnapshot, ProcessTable, TrapFrame,
};
