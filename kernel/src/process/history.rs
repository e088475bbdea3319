//! Process history.
//!
//! A bounded ring of `{pid, name, total memory}` records covering both live
//! and terminated-and-reaped processes. Entries are recorded at creation,
//! their memory figure refreshed when the address space changes and at exit,
//! and the oldest entries are evicted once the ring is full.

use alloc::collections::VecDeque;
use alloc::string::String;

use crate::config::{NAME_MAX, NHISTORY};
use crate::process::table::Pid;

/// One remembered process.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Process ID.
    pub pid: Pid,
    /// Process name at creation.
    pub name: String,
    /// Last known address-space extent in bytes.
    pub total_memory: usize,
}

/// Exported record layout for a caller-supplied history buffer.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct HistoryRecord {
    /// Process ID.
    pub pid: u32,
    /// NUL-padded process name.
    pub name: [u8; NAME_MAX],
    /// Last known address-space extent in bytes.
    pub total_memory: u64,
}

impl Default for HistoryRecord {
    fn default() -> Self {
        HistoryRecord {
            pid: 0,
            name: [0; NAME_MAX],
            total_memory: 0,
        }
    }
}

/// Bounded history ring.
pub struct HistoryRing {
    entries: VecDeque<HistoryEntry>,
}

impl HistoryRing {
    /// An empty ring.
    pub fn new() -> Self {
        HistoryRing {
            entries: VecDeque::new(),
        }
    }

    /// Remember a newly created process, evicting the oldest entry when the
    /// ring is at capacity.
    pub fn record(&mut self, pid: Pid, name: &str, total_memory: usize) {
        if self.entries.len() == NHISTORY {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            pid,
            name: String::from(name),
            total_memory,
        });
    }

    /// Refresh the memory figure of the most recent entry for `pid`.
    pub fn update_size(&mut self, pid: Pid, total_memory: usize) {
        if let Some(entry) = self.entries.iter_mut().rev().find(|e| e.pid == pid) {
            entry.total_memory = total_memory;
        }
    }

    /// Number of remembered processes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy entries, oldest first, into a caller-supplied buffer; returns
    /// the number written.
    pub fn copy_into(&self, buf: &mut [HistoryRecord]) -> usize {
        let count = self.entries.len().min(buf.len());
        for (out, entry) in buf.iter_mut().zip(self.entries.iter()) {
            let mut name = [0u8; NAME_MAX];
            let bytes = entry.name.as_bytes();
            let n = bytes.len().min(NAME_MAX - 1);
            name[..n].copy_from_slice(&bytes[..n]);
            *out = HistoryRecord {
                pid: entry.pid.0,
                name,
                total_memory: entry.total_memory as u64,
            };
        }
        count
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new()
    }
}
