use serde::{Deserialize, Serialize};

/// Loop counters and best validation score of a training run.
///
/// Restored as a whole from a single checkpoint record, never field by field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainingState {
    pub epoch: u64,
    pub iteration_in_epoch: u64,
    pub total_iterations: u64,
    pub best_score: f64,
}

impl TrainingState {
    /// Counts one processed batch.
    pub fn tick(&mut self) {
        self.iteration_in_epoch += 1;
        self.total_iterations += 1;
    }

    /// Moves to the start of the next epoch.
    pub fn finish_epoch(&mut self) {
        self.epoch += 1;
        self.iteration_in_epoch = 0;
    }

    /// State as it will be once the current tick completes. Checkpoints store
    /// this so a resumed run starts with the next unprocessed batch.
    pub fn after_tick(&self) -> TrainingState {
        let mut next = *self;
        next.tick();
        next
    }

    /// Records `score` if it beats every score seen so far.
    pub fn observe_score(&mut self, score: f64) -> bool {
        if score > self.best_score {
            self.best_score = score;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_and_epochs_move_both_counters() {
        let mut s = TrainingState::default();
        s.tick();
        s.tick();
        s.finish_epoch();
        s.tick();
        assert_eq!((s.epoch, s.iteration_in_epoch, s.total_iterations), (1, 1, 3));
    }

    #[test]
    fn after_tick_leaves_the_original_alone() {
        let s = TrainingState { epoch: 3, iteration_in_epoch: 39, total_iterations: 339, best_score: 0.1 };
        let next = s.after_tick();
        assert_eq!((next.iteration_in_epoch, next.total_iterations), (40, 340));
        assert_eq!(s.total_iterations, 339);
    }

    #[test]
    fn only_strict_improvements_count() {
        let mut s = TrainingState::default();
        assert!(!s.observe_score(0.0));
        assert!(s.observe_score(0.3));
        assert!(!s.observe_score(0.3));
        assert!(!s.observe_score(f64::NAN));
        assert_eq!(s.best_score, 0.3);
    }
}
