use crate::search::history::{Incumbent, RunHistory};
use crate::search::space::ConfigSpace;
use crate::weights::WeightVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Chooses the next configuration to evaluate. The loop clamps whatever is
/// returned onto the space before evaluating it.
pub trait Optimizer {
    fn propose(
        &mut self,
        space: &ConfigSpace,
        history: &RunHistory,
        incumbent: Option<&Incumbent>,
    ) -> WeightVector;

    fn resume(&mut self, _history: &RunHistory) {}
}

#[derive(Debug, Clone)]
pub struct RandomSearch {
    seed: u64,
    rng: StdRng,
    local_probability: f64,
    step: f64,
}

impl RandomSearch {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
            local_probability: 0.5,
            step: 0.1,
        }
    }

    // Keyed on history rows, so ALL mode reseeds by trials rather than evaluations.
    fn reseed(&mut self, restored_trials: u64) {
        let mixed = self
            .seed
            .wrapping_add(restored_trials.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        self.rng = StdRng::seed_from_u64(mixed);
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    fn perturb(&mut self, space: &ConfigSpace, around: &WeightVector) -> WeightVector {
        let mut out = WeightVector::new();
        for p in space.params() {
            let centre = around.get(p.coefficient).unwrap_or(p.default);
            // Triangular noise in [-1, 1].
            let noise = self.rng.random::<f64>() + self.rng.random::<f64>() - 1.0;
            out.set(p.coefficient, p.clamp(centre + noise * self.step * p.span()));
        }
        out
    }
}

impl Optimizer for RandomSearch {
    fn propose(
        &mut self,
        space: &ConfigSpace,
        history: &RunHistory,
        incumbent: Option<&Incumbent>,
    ) -> WeightVector {
        if history.is_empty() {
            return space.default_configuration();
        }
        match incumbent {
            Some(best) if self.rng.random_bool(self.local_probability) => {
                self.perturb(space, &best.configuration)
            }
            _ => space.sample_uniform(&mut self.rng),
        }
    }

    fn resume(&mut self, history: &RunHistory) {
        self.reseed(history.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProblemKind, Width};
    use crate::executor::Status;

    fn space() -> ConfigSpace {
        ConfigSpace::build(
            ProblemKind::Knapsack,
            Width::default(),
            &WeightVector::minimum_weight(),
        )
        .expect("space")
    }

    #[test]
    fn first_proposal_is_the_default() {
        let space = space();
        let mut opt = RandomSearch::new(777);
        assert_eq!(
            opt.propose(&space, &RunHistory::new(), None),
            space.default_configuration()
        );
    }

    #[test]
    fn proposals_are_seeded_and_in_range() {
        let space = space();
        let mut history = RunHistory::new();
        history.append(
            &space.default_configuration(),
            "kp_7_3_60_0",
            1,
            5.0,
            Status::Success,
            5.0,
        );
        let best = Incumbent {
            configuration: space.default_configuration(),
            cost: 5.0,
        };
        let mut a = RandomSearch::new(3);
        let mut b = RandomSearch::new(3);
        for _ in 0..20 {
            let x = a.propose(&space, &history, Some(&best));
            assert_eq!(x, b.propose(&space, &history, Some(&best)));
            space.validate(&x).expect("in range");
        }
    }

    #[test]
    fn resumed_stream_differs_from_fresh() {
        let space = space();
        let mut history = RunHistory::new();
        history.append(&space.default_configuration(), "i", 1, 1.0, Status::Success, 1.0);
        let mut fresh = RandomSearch::new(9);
        let mut resumed = RandomSearch::new(9);
        resumed.resume(&history);
        let xs: Vec<_> = (0..5).map(|_| fresh.propose(&space, &history, None)).collect();
        let ys: Vec<_> = (0..5).map(|_| resumed.propose(&space, &history, None)).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn resume_depends_only_on_history_length() {
        let space = space();
        let config = space.default_configuration();
        // One evaluation over a batch of three leaves three rows.
        let mut batch = RunHistory::new();
        for id in ["a", "b", "c"] {
            batch.append(&config, id, 1, 1.0, Status::Success, 1.0);
        }
        let mut single = RunHistory::new();
        for _ in 0..3 {
            single.append(&config, "a", 1, 1.0, Status::Success, 1.0);
        }
        let mut x = RandomSearch::new(4);
        let mut y = RandomSearch::new(4);
        x.resume(&batch);
        y.resume(&single);
        for _ in 0..5 {
            assert_eq!(x.propose(&space, &batch, None), y.propose(&space, &single, None));
        }
    }
}
