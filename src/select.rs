//! Seedable selection of features and other candidates.

use rand::{Rng, SeedableRng, rngs::StdRng};

/// Picks one of `len` candidates.
pub trait Selector: Send + Sync + std::fmt::Debug {
    /// Index in `0..len`, or `None` when `len` is zero.
    fn pick_index(&mut self, len: usize) -> Option<usize>;
}

/// Pick one element of `items`.
pub fn pick<'a, T>(selector: &mut dyn Selector, items: &'a [T]) -> Option<&'a T> {
    selector.pick_index(items.len()).and_then(|idx| items.get(idx))
}

/// Selector driven by a seeded `StdRng`.
#[derive(Debug, Clone)]
pub struct SeededSelector {
    rng: StdRng,
}

impl SeededSelector {
    /// Create a selector from a seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Selector for SeededSelector {
    fn pick_index(&mut self, len: usize) -> Option<usize> {
        (len > 0).then(|| self.rng.gen_range(0..len))
    }
}

/// Always picks the first candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstSelector;

impl Selector for FirstSelector {
    fn pick_index(&mut self, len: usize) -> Option<usize> { (len > 0).then_some(0) }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn same_seed_same_picks() {
        let items: Vec<u32> = (0..50).collect();
        let mut a = SeededSelector::new(42);
        let mut b = SeededSelector::new(42);
        let left: Vec<_> = (0..10).map(|_| pick(&mut a, &items).copied()).collect();
        let right: Vec<_> = (0..10).map(|_| pick(&mut b, &items).copied()).collect();
        assert_eq!(left, right);
    }

    #[rstest]
    fn empty_candidates_yield_none() {
        let empty: [u8; 0] = [];
        assert!(pick(&mut SeededSelector::new(1), &empty).is_none());
        assert!(pick(&mut FirstSelector, &empty).is_none());
        assert_eq!(pick(&mut FirstSelector, &[7, 8]), Some(&7));
    }
}
