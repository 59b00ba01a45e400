//! Primary/secondary split bookkeeping.

use super::Split;

/// Soft allocation for one split. `quota == 0` means the split is not enforced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SplitQuota {
    pub quota: u64,
    pub used: u64,
}

impl SplitQuota {
    /// True if `n` more tokens fit (always true when unenforced).
    pub fn admits(&self, n: u64) -> bool {
        self.quota == 0 || self.used.saturating_add(n) <= self.quota
    }

    /// Fraction of the quota spent, or `None` when unenforced.
    pub fn utilization(&self) -> Option<f64> {
        (self.quota > 0).then(|| self.used as f64 / self.quota as f64)
    }
}

/// Quotas for both splits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SplitQuotas {
    pub primary: SplitQuota,
    pub secondary: SplitQuota,
}

impl SplitQuotas {
    /// Reseed from `total` available tokens: primary gets `floor(total * ratio)`,
    /// secondary the rest. Usage on both splits restarts at zero.
    pub fn rebalance(&mut self, total: u64, ratio: f64) {
        let primary = ((total as f64) * ratio).floor() as u64;
        let primary = primary.min(total);
        self.primary = SplitQuota {
            quota: primary,
            used: 0,
        };
        self.secondary = SplitQuota {
            quota: total - primary,
            used: 0,
        };
    }

    pub fn get(&self, split: Split) -> SplitQuota {
        match split {
            Split::Primary => self.primary,
            Split::Secondary => self.secondary,
        }
    }

    fn get_mut(&mut self, split: Split) -> &mut SplitQuota {
        match split {
            Split::Primary => &mut self.primary,
            Split::Secondary => &mut self.secondary,
        }
    }

    pub fn admits(&self, split: Split, n: u64) -> bool {
        self.get(split).admits(n)
    }

    pub fn commit(&mut self, split: Split, n: u64) {
        let q = self.get_mut(split);
        q.used = q.used.saturating_add(n);
    }

    /// Give back `n` tokens of usage, never going below zero.
    pub fn release(&mut self, split: Split, n: u64) {
        let q = self.get_mut(split);
        q.used = q.used.saturating_sub(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebalance_floors_primary_and_preserves_total() {
        let mut q = SplitQuotas::default();
        for (total, ratio, primary) in [(30, 0.7, 21), (10, 0.35, 3), (7, 0.5, 3), (0, 0.7, 0)] {
            q.rebalance(total, ratio);
            assert_eq!(q.primary.quota, primary, "total={total} ratio={ratio}");
            assert_eq!(q.secondary.quota, total - primary);
            assert_eq!(q.primary.quota + q.secondary.quota, total);
        }
    }

    #[test]
    fn rebalance_resets_usage() {
        let mut q = SplitQuotas::default();
        q.rebalance(100, 0.5);
        q.commit(Split::Primary, 20);
        q.commit(Split::Secondary, 5);
        q.rebalance(100, 0.5);
        assert_eq!(q.primary.used, 0);
        assert_eq!(q.secondary.used, 0);
    }

    #[test]
    fn zero_quota_is_unenforced() {
        let q = SplitQuota { quota: 0, used: 500 };
        assert!(q.admits(u64::MAX));
        assert!(q.utilization().is_none());
    }

    #[test]
    fn admits_up_to_quota() {
        let mut q = SplitQuotas::default();
        q.rebalance(10, 0.7);
        assert!(q.admits(Split::Primary, 7));
        assert!(!q.admits(Split::Primary, 8));
        q.commit(Split::Primary, 5);
        assert!(q.admits(Split::Primary, 2));
        assert!(!q.admits(Split::Primary, 3));
        assert_eq!(q.primary.utilization(), Some(5.0 / 7.0));
    }

    #[test]
    fn release_floors_at_zero() {
        let mut q = SplitQuotas::default();
        q.rebalance(10, 0.5);
        q.commit(Split::Secondary, 2);
        q.release(Split::Secondary, 5);
        assert_eq!(q.secondary.used, 0);
    }
}
