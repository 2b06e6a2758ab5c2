//! Candidate selection: pick up to `max_count` distinct reviewers at random.
//!
//! The randomness source is injected so production code can draw from the
//! thread-local RNG while tests pin a seed.

use std::collections::HashSet;
use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Source of uniform permutations.
pub trait RandomSource: Send + Sync {
    /// Shuffle `ids` in place with a uniform random permutation.
    fn shuffle(&self, ids: &mut [String]);
}

/// Thread-local RNG, reseeded by the OS. Used by the running service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn shuffle(&self, ids: &mut [String]) {
        ids.shuffle(&mut rand::rng());
    }
}

/// Deterministic RNG for reproducible tests.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn shuffle(&self, ids: &mut [String]) {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.shuffle(&mut *rng);
    }
}

/// Choose up to `max_count` distinct ids from `candidates`, never returning
/// anything in `excluded`.
///
/// Duplicates in `candidates` are collapsed. An empty result is not an error
/// here; callers decide whether zero picks is a failure.
pub fn select_reviewers<R>(
    random: &R,
    candidates: &[String],
    max_count: usize,
    excluded: &[String],
) -> Vec<String>
where
    R: RandomSource + ?Sized,
{
    if candidates.is_empty() || max_count == 0 {
        return Vec::new();
    }

    let excluded: HashSet<&str> = excluded.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(candidates.len());
    let mut eligible = Vec::with_capacity(candidates.len());
    for id in candidates {
        if excluded.contains(id.as_str()) || !seen.insert(id.as_str()) {
            continue;
        }
        eligible.push(id.clone());
    }

    if eligible.is_empty() {
        return eligible;
    }

    random.shuffle(&mut eligible);
    eligible.truncate(max_count);
    eligible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_pool_yields_nothing() {
        let picked = select_reviewers(&SeededRandom::new(1), &[], 2, &[]);
        assert!(picked.is_empty());
    }

    #[test]
    fn zero_max_count_yields_nothing() {
        let pool = ids(&["a", "b", "c"]);
        let picked = select_reviewers(&SeededRandom::new(1), &pool, 0, &[]);
        assert!(picked.is_empty());
    }

    #[test]
    fn fully_excluded_pool_yields_nothing() {
        let pool = ids(&["a", "b"]);
        let picked = select_reviewers(&SeededRandom::new(1), &pool, 2, &ids(&["a", "b", "z"]));
        assert!(picked.is_empty());
    }

    #[test]
    fn result_length_is_min_of_k_and_eligible() {
        let pool = ids(&["author", "a", "b", "c", "d"]);
        let excluded = ids(&["author"]);
        let random = SeededRandom::new(7);

        for k in 0..7 {
            let picked = select_reviewers(&random, &pool, k, &excluded);
            assert_eq!(picked.len(), k.min(4), "k = {}", k);

            let unique: HashSet<_> = picked.iter().collect();
            assert_eq!(unique.len(), picked.len(), "duplicates in {:?}", picked);
            assert!(picked.iter().all(|id| pool.contains(id)));
            assert!(!picked.contains(&"author".to_string()));
        }
    }

    #[test]
    fn duplicate_candidates_are_collapsed() {
        let pool = ids(&["a", "a", "b", "b", "a"]);
        let mut picked = select_reviewers(&SeededRandom::new(3), &pool, 5, &[]);
        picked.sort();
        assert_eq!(picked, ids(&["a", "b"]));
    }

    #[test]
    fn same_seed_gives_same_pick() {
        let pool = ids(&["a", "b", "c", "d", "e", "f"]);
        let first = select_reviewers(&SeededRandom::new(99), &pool, 2, &[]);
        let second = select_reviewers(&SeededRandom::new(99), &pool, 2, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn repeated_picks_vary() {
        let pool = ids(&["a", "b", "c", "d", "e"]);
        let random = ThreadRandom;
        let mut chosen = HashSet::new();
        for _ in 0..200 {
            let picked = select_reviewers(&random, &pool, 1, &[]);
            chosen.insert(picked[0].clone());
        }
        // 200 uniform draws over 5 ids missing one entirely is astronomically unlikely.
        assert_eq!(chosen.len(), 5);
    }
}
