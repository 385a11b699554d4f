//! Train/test partitioning of window keys

use crate::config::{SplitConfig, SplitPolicy};
use crate::types::WindowKey;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Train,
    Test,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Train => write!(f, "train"),
            Partition::Test => write!(f, "test"),
        }
    }
}

/// Keys in output row order for each partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitPlan {
    pub train: Vec<WindowKey>,
    pub test: Vec<WindowKey>,
}

impl SplitPlan {
    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interleave period for a test fraction: every k-th window is test
pub fn interleave_period(test_fraction: f64) -> Option<usize> {
    if test_fraction <= 0.0 {
        return None;
    }
    Some(((1.0 / test_fraction).round() as usize).max(1))
}

/// Assign every key to exactly one partition.
///
/// Keys are sorted first, so the plan depends only on the key set and the
/// configuration, never on enumeration order.
pub fn split_keys(keys: &[WindowKey], config: &SplitConfig) -> SplitPlan {
    let mut keys = keys.to_vec();
    keys.sort_unstable();

    match config.policy {
        SplitPolicy::Shuffle => {
            let mut rng = StdRng::seed_from_u64(config.seed);
            keys.shuffle(&mut rng);
            let n_test = (keys.len() as f64 * config.test_fraction).floor() as usize;
            let train = keys.split_off(n_test.min(keys.len()));
            SplitPlan { train, test: keys }
        }
        SplitPolicy::Interleave => {
            let mut plan = SplitPlan::default();
            let period = interleave_period(config.test_fraction);
            for (position, key) in keys.into_iter().enumerate() {
                match period {
                    Some(k) if position % k == 0 => plan.test.push(key),
                    _ => plan.train.push(key),
                }
            }
            plan
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn keys(n: u64) -> Vec<WindowKey> {
        (0..n).map(|i| WindowKey::new(i / 3, (i % 3) as u32)).collect()
    }

    fn config(policy: SplitPolicy, test_fraction: f64, seed: u64) -> SplitConfig {
        SplitConfig {
            policy,
            test_fraction,
            seed,
        }
    }

    #[test]
    fn test_shuffle_sizes_and_disjointness() {
        let all = keys(100);
        let plan = split_keys(&all, &config(SplitPolicy::Shuffle, 0.1, 0));
        assert_eq!(plan.test.len(), 10);
        assert_eq!(plan.train.len(), 90);

        let mut seen: HashSet<WindowKey> = HashSet::new();
        for key in plan.train.iter().chain(&plan.test) {
            assert!(seen.insert(*key));
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_shuffle_is_reproducible() {
        let all = keys(50);
        let mut reversed = all.clone();
        reversed.reverse();

        let a = split_keys(&all, &config(SplitPolicy::Shuffle, 0.2, 7));
        let b = split_keys(&reversed, &config(SplitPolicy::Shuffle, 0.2, 7));
        assert_eq!(a, b);

        let c = split_keys(&all, &config(SplitPolicy::Shuffle, 0.2, 8));
        assert_ne!(a, c);
    }

    #[test]
    fn test_interleave_every_kth() {
        let all = keys(10);
        let plan = split_keys(&all, &config(SplitPolicy::Interleave, 0.25, 0));
        assert_eq!(interleave_period(0.25), Some(4));
        assert_eq!(plan.test, vec![all[0], all[4], all[8]]);
        assert_eq!(plan.train.len(), 7);
        // Train keeps key order
        assert!(plan.train.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_zero_fraction_is_all_train() {
        let all = keys(9);
        for policy in [SplitPolicy::Shuffle, SplitPolicy::Interleave] {
            let plan = split_keys(&all, &config(policy, 0.0, 0));
            assert!(plan.test.is_empty());
            assert_eq!(plan.train.len(), 9);
        }
    }

    #[test]
    fn test_empty_input() {
        let plan = split_keys(&[], &SplitConfig::default());
        assert!(plan.is_empty());
    }
}
