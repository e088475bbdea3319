//! Scheduling policy.
//!
//! The dynamic priority is recomputed for every runnable process on every
//! scheduling pass: accumulated CPU time is penalized and time spent waiting
//! is boosted, so CPU-bound processes age downward and starved processes age
//! upward. Higher values win; exact ties go to the lower pid so scheduling
//! order is reproducible.

/// Priority assigned before any runtime history exists.
pub const BASE_PRIORITY: i64 = 100;

/// Penalty weight per accumulated CPU tick.
pub const ALPHA: i64 = 2;

/// Boost weight per tick spent waiting.
pub const BETA: i64 = 1;

/// Score a runnable process from its accumulated CPU time and its current
/// waiting time.
pub fn dynamic_priority(cpu_ticks: u64, waiting_time: u64) -> i64 {
    BASE_PRIORITY - ALPHA * cpu_ticks as i64 + BETA * waiting_time as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_process_scores_base() {
        assert_eq!(dynamic_priority(0, 0), BASE_PRIORITY);
    }

    #[test]
    fn test_cpu_time_penalizes() {
        assert!(dynamic_priority(10, 0) < dynamic_priority(0, 0));
    }

    #[test]
    fn test_waiting_boosts() {
        assert!(dynamic_priority(0, 10) > dynamic_priority(0, 0));
    }

    #[test]
    fn test_aging_is_monotonic() {
        // A process that only waits can never lose priority.
        let mut last = dynamic_priority(5, 0);
        for wait in 1..100 {
            let next = dynamic_priority(5, wait);
            assert!(next >= last);
            last = next;
        }
    }
}
