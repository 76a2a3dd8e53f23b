use crate::config::{ProblemKind, RunMode, SearchConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const BASE_SECONDS: f64 = 300.0;
pub const ALL_MODE_SECONDS: f64 = 12.0 * 3600.0;
pub const DEFAULT_CUTOFF_SECONDS: f64 = 60.0;
pub const DEFAULT_WALLCLOCK_SECONDS: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub cutoff_time: f64,
    pub wallclock_limit: f64,
    #[serde(default)]
    pub max_evaluations: Option<u64>,
}

impl Budget {
    pub fn new(cutoff_time: f64, wallclock_limit: f64) -> Self {
        Self {
            cutoff_time,
            wallclock_limit,
            max_evaluations: None,
        }
    }

    pub fn with_max_evaluations(mut self, max: Option<u64>) -> Self {
        self.max_evaluations = max;
        self
    }

    /// Size-dependent presets. Small one-instance presets use
    /// `cutoff == wallclock` so a single slow trial is never cut short.
    pub fn preset(problem: ProblemKind, size: &str, mode: RunMode) -> Self {
        if mode == RunMode::All {
            return Self::new(ALL_MODE_SECONDS, ALL_MODE_SECONDS);
        }
        let (cutoff, wallclock) = match (problem, size) {
            (ProblemKind::Knapsack, "5_40" | "4_50" | "3_60") => (1.0, 1.0),
            (ProblemKind::Knapsack, "6_40" | "7_40" | "3_70" | "3_80") => (4.0, 4.0),
            (ProblemKind::SetPacking, "150_3") => (1.0, 1.0),
            (ProblemKind::SetPacking, "150_4") => (2.0, 2.0),
            (ProblemKind::SetPacking, "150_5") => (4.0, 4.0),
            (ProblemKind::SetCovering, "100_3" | "100_4" | "100_6" | "100_7") => (1.0, 1.0),
            (ProblemKind::SetCovering, "100_5") => (1.0, 2.0),
            (ProblemKind::SetCovering, "150_3") => (2.0, 2.0),
            (ProblemKind::SetCovering, "150_4") => (4.0, 4.0),
            _ => return Self::new(DEFAULT_CUTOFF_SECONDS, DEFAULT_WALLCLOCK_SECONDS),
        };
        Self::new(cutoff * BASE_SECONDS, wallclock * BASE_SECONDS)
    }

    /// Explicit settings win over the preset; a restore swaps in the
    /// extended restore budgets.
    pub fn resolve(config: &SearchConfig) -> Self {
        let preset = Self::preset(config.problem.name, &config.size_key(), config.mode);
        let budget = if config.restore.restore_run {
            Self::new(
                config.restore.new_cutoff_time,
                config.restore.new_wallclock_limit,
            )
        } else {
            Self::new(
                config.cutoff_time.unwrap_or(preset.cutoff_time),
                config.wallclock_limit.unwrap_or(preset.wallclock_limit),
            )
        };
        budget.with_max_evaluations(config.max_evaluations)
    }

    pub fn cutoff(&self) -> Duration {
        Duration::from_secs_f64(self.cutoff_time)
    }
}
