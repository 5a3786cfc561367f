//! Splitting a total message count into per-worker quotas.

use std::num::NonZeroU64;

/// Messages assigned to each concurrent worker unless overridden.
pub const DEFAULT_PER_WORKER_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkUnit {
    /// 1-based, matches the `[worker NN]` progress lines.
    pub worker_id: u32,
    pub quota: u64,
}

/// Partition `total_count` into `ceil(total_count / interval)` units of
/// `interval` messages each; the last unit takes the remainder.
///
/// A total of zero yields no units.
pub fn plan(total_count: u64, per_worker_interval: NonZeroU64) -> Vec<WorkUnit> {
    let interval = per_worker_interval.get();
    let workers = total_count.div_ceil(interval);
    (0..workers)
        .map(|i| WorkUnit {
            worker_id: (i + 1) as u32,
            quota: interval.min(total_count - i * interval),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(v: u64) -> NonZeroU64 {
        NonZeroU64::new(v).unwrap()
    }

    #[test]
    fn remainder_goes_to_last_unit() {
        let units = plan(2500, nz(1000));
        let quotas: Vec<u64> = units.iter().map(|u| u.quota).collect();
        assert_eq!(quotas, vec![1000, 1000, 500]);
        let ids: Vec<u32> = units.iter().map(|u| u.worker_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn single_unit_when_total_fits() {
        assert_eq!(plan(1000, nz(1000)), vec![WorkUnit { worker_id: 1, quota: 1000 }]);
        assert_eq!(plan(7, nz(1000)), vec![WorkUnit { worker_id: 1, quota: 7 }]);
    }

    #[test]
    fn zero_total_schedules_nothing() {
        assert!(plan(0, nz(1000)).is_empty());
    }

    #[test]
    fn quotas_sum_and_count() {
        for total in [1u64, 9, 10, 11, 999, 1000, 1001, 4321, 10_000] {
            for interval in [1u64, 3, 10, 250, 1000, 5000] {
                let units = plan(total, nz(interval));
                assert_eq!(units.iter().map(|u| u.quota).sum::<u64>(), total);
                assert_eq!(units.len() as u64, total.div_ceil(interval));
                assert!(units.iter().all(|u| u.quota > 0 && u.quota <= interval));
            }
        }
    }

    #[test]
    fn planning_is_deterministic() {
        assert_eq!(plan(12_345, nz(1000)), plan(12_345, nz(1000)));
    }
}
