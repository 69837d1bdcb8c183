// src/scheduling/sampler.rs
//! Random neighborhood sampling
//!
//! Around a target index, pick a bounded random subset of indices on each
//! side instead of a fixed window:
//!
//! ```text
//!   0 ... [left picks] ... index ... [right picks] ... len-1
//!         |max/2..=max|              |max/2..=max|
//! ```
//!
//! Each side is capped by the indices that actually exist there.

use crate::utils::random::RandomSource;

/// Indices picked on both sides of a target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Neighborhood {
    /// Picks strictly before the target, ascending
    pub left: Vec<usize>,

    /// Picks strictly after the target, ascending
    pub right: Vec<usize>,
}

impl Neighborhood {
    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }

    pub fn len(&self) -> usize {
        self.left.len() + self.right.len()
    }
}

/// Sample a neighborhood of `index` in a sequence of `len` items
pub fn sample_neighborhood(
    len: usize,
    index: usize,
    max: usize,
    rng: &mut RandomSource,
) -> Neighborhood {
    if index >= len || max == 0 {
        return Neighborhood::default();
    }

    let right_count = rng.int_in((max / 2) as i64, max as i64) as usize;
    let left_count = rng.int_in((max / 2) as i64, max as i64) as usize;

    let mut right = rng.distinct_in(index + 1, len, right_count);
    let mut left = rng.distinct_in(0, index, left_count);
    right.sort_unstable();
    left.sort_unstable();

    Neighborhood { left, right }
}

/// Slice form: references to the sampled items, left side first
pub fn pick_near<'a, T>(
    items: &'a [T],
    index: usize,
    max: usize,
    rng: &mut RandomSource,
) -> (Vec<&'a T>, Vec<&'a T>) {
    let hood = sample_neighborhood(items.len(), index, max, rng);
    let left = hood.left.iter().map(|&i| &items[i]).collect();
    let right = hood.right.iter().map(|&i| &items[i]).collect();
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_twenty_items_middle() {
        let mut rng = RandomSource::seeded(42);
        for _ in 0..200 {
            let hood = sample_neighborhood(20, 10, 6, &mut rng);
            assert!((3..=6).contains(&hood.left.len()));
            assert!((3..=6).contains(&hood.right.len()));
            assert!(hood.left.iter().all(|&i| i < 10));
            assert!(hood.right.iter().all(|&i| i > 10 && i < 20));
        }
    }

    #[test]
    fn test_boundary_returns_available() {
        let mut rng = RandomSource::seeded(1);
        let hood = sample_neighborhood(5, 1, 10, &mut rng);
        assert_eq!(hood.left, vec![0]);
        assert_eq!(hood.right, vec![2, 3, 4]);

        let hood = sample_neighborhood(5, 0, 10, &mut rng);
        assert!(hood.left.is_empty());

        let hood = sample_neighborhood(5, 4, 10, &mut rng);
        assert!(hood.right.is_empty());
        assert_eq!(hood.left.len(), 4);
    }

    #[test]
    fn test_out_of_range_index() {
        let mut rng = RandomSource::seeded(1);
        assert!(sample_neighborhood(3, 3, 4, &mut rng).is_empty());
        assert!(sample_neighborhood(0, 0, 4, &mut rng).is_empty());
    }

    #[test]
    fn test_pick_near_items() {
        let items: Vec<String> = (0..10).map(|i| format!("post_{}", i)).collect();
        let mut rng = RandomSource::seeded(8);
        let (left, right) = pick_near(&items, 5, 2, &mut rng);
        assert!(!left.is_empty() && left.len() <= 2);
        assert!(!right.is_empty() && right.len() <= 2);
        assert!(!left.contains(&&items[5]));
        assert!(!right.contains(&&items[5]));
    }

    proptest! {
        #[test]
        fn prop_sides_disjoint_and_in_range(
            len in 1usize..60,
            index_seed in any::<usize>(),
            max in 0usize..20,
            seed in any::<u64>(),
        ) {
            let index = index_seed % len;
            let mut rng = RandomSource::seeded(seed);
            let hood = sample_neighborhood(len, index, max, &mut rng);

            let left: HashSet<usize> = hood.left.iter().copied().collect();
            let right: HashSet<usize> = hood.right.iter().copied().collect();
            prop_assert_eq!(left.len(), hood.left.len());
            prop_assert_eq!(right.len(), hood.right.len());
            prop_assert!(left.is_disjoint(&right));
            prop_assert!(!left.contains(&index) && !right.contains(&index));
            prop_assert!(hood.left.iter().all(|&i| i < index));
            prop_assert!(hood.right.iter().all(|&i| i > index && i < len));

            let available_right = len - index - 1;
            let expected_min_right = (max / 2).min(available_right);
            prop_assert!(hood.right.len() >= expected_min_right);
            prop_assert!(hood.right.len() <= max.min(available_right));
            prop_assert!(hood.left.len() >= (max / 2).min(index));
            prop_assert!(hood.left.len() <= max.min(index));
        }
    }
}
