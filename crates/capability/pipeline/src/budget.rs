//! 全局记录上限（跨 worker 共享的原子预留计数）。

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RecordBudget {
    limit: Option<u64>,
    reserved: AtomicU64,
}

impl RecordBudget {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            reserved: AtomicU64::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// 第 `step` 步（共 `total_steps` 步，每步 `per_step` 条）应预留的条数。
    ///
    /// 终点已按上限收紧时，只有最后一步会少于 `per_step`，
    /// 各步需求之和恰好等于上限，任何 worker 都不会在中途被截断。
    pub fn step_quota(&self, step: u64, total_steps: u64, per_step: u64) -> u64 {
        match self.limit {
            Some(limit) if step + 1 == total_steps => limit
                .saturating_sub(step.saturating_mul(per_step))
                .min(per_step),
            _ => per_step,
        }
    }

    /// 预留最多 `wanted` 条，返回实际获得的数量（额度耗尽时为 0）。
    pub fn try_reserve(&self, wanted: u64) -> u64 {
        let Some(limit) = self.limit else {
            self.reserved.fetch_add(wanted, Ordering::Relaxed);
            return wanted;
        };
        let mut current = self.reserved.load(Ordering::Relaxed);
        loop {
            let granted = wanted.min(limit.saturating_sub(current));
            if granted == 0 {
                return 0;
            }
            match self.reserved.compare_exchange_weak(
                current,
                current + granted,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return granted,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn reserved(&self) -> u64 {
        self.reserved.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> Option<u64> {
        self.limit
            .map(|limit| limit.saturating_sub(self.reserved()))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn grants_partial_reservation_at_the_limit() {
        let budget = RecordBudget::new(Some(10));
        assert_eq!(budget.try_reserve(4), 4);
        assert_eq!(budget.try_reserve(4), 4);
        assert_eq!(budget.try_reserve(4), 2);
        assert_eq!(budget.try_reserve(4), 0);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn only_the_final_step_is_shortened() {
        let budget = RecordBudget::new(Some(100));
        assert_eq!(budget.step_quota(0, 34, 3), 3);
        assert_eq!(budget.step_quota(32, 34, 3), 3);
        assert_eq!(budget.step_quota(33, 34, 3), 1);
        let demand: u64 = (0..34).map(|step| budget.step_quota(step, 34, 3)).sum();
        assert_eq!(demand, 100);
        assert_eq!(RecordBudget::unlimited().step_quota(33, 34, 3), 3);
    }

    #[test]
    fn unlimited_budget_never_runs_out() {
        let budget = RecordBudget::unlimited();
        assert_eq!(budget.try_reserve(u32::MAX as u64), u32::MAX as u64);
        assert!(!budget.is_exhausted());
        assert_eq!(budget.remaining(), None);
    }

    #[test]
    fn concurrent_reservations_never_exceed_limit() {
        let budget = Arc::new(RecordBudget::new(Some(1000)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = budget.clone();
                std::thread::spawn(move || {
                    let mut total = 0;
                    loop {
                        let granted = budget.try_reserve(3);
                        if granted == 0 {
                            break total;
                        }
                        total += granted;
                    }
                })
            })
            .collect();
        let granted: u64 = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .sum();
        assert_eq!(granted, 1000);
    }
}
