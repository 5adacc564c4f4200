//! Random Balancing Strategy

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::BalancingStrategy;
use crate::error::RoutingError;

/// Uniform choice among the candidates
#[derive(Debug, Default)]
pub struct RandomStrategy {
    seeded: Option<Mutex<StdRng>>,
}

impl RandomStrategy {
    pub fn new() -> Self {
        Self { seeded: None }
    }

    /// Reproducible sequence of choices
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seeded: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl BalancingStrategy for RandomStrategy {
    fn pick_outbound(&self, candidates: &[String]) -> Result<String, RoutingError> {
        let choice = match &self.seeded {
            Some(rng) => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                candidates.choose(&mut *rng)
            }
            None => candidates.choose(&mut rand::thread_rng()),
        };
        choice.cloned().ok_or(RoutingError::EmptyCandidateSet)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn test_empty_set_fails() {
        let strategy = RandomStrategy::new();
        assert_eq!(strategy.pick_outbound(&[]), Err(RoutingError::EmptyCandidateSet));
    }

    #[test]
    fn test_picks_come_from_candidates() {
        let strategy = RandomStrategy::new();
        let candidates = candidates();
        for _ in 0..100 {
            let pick = strategy.pick_outbound(&candidates).unwrap();
            assert!(candidates.contains(&pick));
        }
    }

    #[test]
    fn test_seeded_sequence_is_reproducible() {
        let first = RandomStrategy::with_seed(7);
        let second = RandomStrategy::with_seed(7);
        let candidates = candidates();
        for _ in 0..20 {
            assert_eq!(
                first.pick_outbound(&candidates).unwrap(),
                second.pick_outbound(&candidates).unwrap()
            );
        }
    }
}
