// On-disk state of a search run.
//
// ```text
// <output_dir>/<instance_stem>/run_<seed>[-r<k>]/
//     scenario.json     what was run (budgets, instances, space + digest)
//     runhistory.json   every trial, in order
//     stats.json        counters
//     trajectory.json   incumbent improvements (JSON array)
//     traj.json         the same improvements, one JSON document per line
//     run_control.json  running / completed / aborted / failed
// ```

use crate::config::RunMode;
use crate::error::{Result, RunnerError};
use crate::fsutil::{atomic_write_json_pretty, ensure_dir};
use crate::search::budget::Budget;
use crate::search::history::{RunHistory, Stats, TrajectoryEntry, Trajectory, TrialRecord};
use crate::search::space::ConfigSpace;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const SCENARIO_FILE: &str = "scenario.json";
pub const RUNHISTORY_FILE: &str = "runhistory.json";
pub const STATS_FILE: &str = "stats.json";
pub const TRAJECTORY_FILE: &str = "trajectory.json";
pub const TRAJ_LINES_FILE: &str = "traj.json";
pub const RUN_CONTROL_FILE: &str = "run_control.json";

/// Names a run directory: `run_<seed>` for the first attempt and
/// `run_<seed>-r<k>` for the k-th resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId {
    pub seed: u64,
    pub attempt: u32,
}

impl RunId {
    pub fn fresh(seed: u64) -> Self {
        Self { seed, attempt: 0 }
    }

    pub fn dir_name(&self) -> String {
        if self.attempt == 0 {
            format!("run_{}", self.seed)
        } else {
            format!("run_{}-r{}", self.seed, self.attempt)
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("run_")?;
        match rest.split_once("-r") {
            Some((seed, attempt)) => {
                let attempt: u32 = attempt.parse().ok()?;
                if attempt == 0 {
                    return None;
                }
                Some(Self {
                    seed: seed.parse().ok()?,
                    attempt,
                })
            }
            None => Some(Self::fresh(rest.parse().ok()?)),
        }
    }

    pub fn latest(parent: &Path, seed: u64) -> Option<Self> {
        Self::list(parent)
            .into_iter()
            .filter(|id| id.seed == seed)
            .max()
    }

    pub fn next_attempt(parent: &Path, seed: u64) -> Self {
        let taken = Self::list(parent);
        let mut attempt = 1;
        while taken.contains(&Self { seed, attempt }) {
            attempt += 1;
        }
        Self { seed, attempt }
    }

    pub fn resumes(parent: &Path, seed: u64) -> Vec<Self> {
        let mut out: Vec<Self> = Self::list(parent)
            .into_iter()
            .filter(|id| id.seed == seed && id.attempt > 0)
            .collect();
        out.sort();
        out
    }

    fn list(parent: &Path) -> Vec<Self> {
        let Ok(entries) = fs::read_dir(parent) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().and_then(Self::parse))
            .collect()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub schema_version: String,
    pub run_id: String,
    pub deterministic: bool,
    pub run_obj: String,
    pub run_mode: RunMode,
    pub cutoff_time: f64,
    pub wallclock_limit: f64,
    #[serde(default)]
    pub max_evaluations: Option<u64>,
    pub par_factor: f64,
    pub seed: u64,
    pub instances: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub config_space: ConfigSpace,
    pub config_space_digest: String,
    #[serde(default)]
    pub restored_from: Option<String>,
    pub created_at: String,
}

impl Scenario {
    pub fn budget(&self) -> Budget {
        Budget::new(self.cutoff_time, self.wallclock_limit).with_max_evaluations(self.max_evaluations)
    }

    pub fn save(&self, run_dir: &Path) -> Result<()> {
        atomic_write_json_pretty(&run_dir.join(SCENARIO_FILE), self)
    }

    pub fn load(run_dir: &Path) -> Result<Self> {
        read_json(&run_dir.join(SCENARIO_FILE))
    }

    pub fn check_space(&self, space: &ConfigSpace) -> Result<()> {
        let current = space.digest()?;
        if current != self.config_space_digest {
            return Err(RunnerError::Checkpoint(format!(
                "configuration space changed since {} (checkpoint {}, now {})",
                self.run_id, self.config_space_digest, current
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunCheckpoint {
    pub history: RunHistory,
    pub stats: Stats,
    pub trajectory: Trajectory,
}

impl RunCheckpoint {
    pub fn save(&self, run_dir: &Path) -> Result<()> {
        ensure_dir(run_dir)?;
        atomic_write_json_pretty(&run_dir.join(RUNHISTORY_FILE), self.history.records())?;
        atomic_write_json_pretty(&run_dir.join(STATS_FILE), &self.stats)?;
        atomic_write_json_pretty(&run_dir.join(TRAJECTORY_FILE), &self.trajectory)?;
        Ok(())
    }

    pub fn load(run_dir: &Path) -> Result<Self> {
        let records: Vec<TrialRecord> = read_json(&run_dir.join(RUNHISTORY_FILE))?;
        let stats: Stats = read_json(&run_dir.join(STATS_FILE))?;
        let entries: Vec<TrajectoryEntry> = read_json(&run_dir.join(TRAJECTORY_FILE))?;
        let checkpoint = Self {
            history: RunHistory::from_records(records)?,
            stats,
            trajectory: Trajectory::from_entries(entries)?,
        };
        if let Some(last) = checkpoint.trajectory.last() {
            if last.evaluations > checkpoint.stats.n_evaluations {
                return Err(RunnerError::Checkpoint(format!(
                    "trajectory mentions evaluation {} but stats count only {}",
                    last.evaluations, checkpoint.stats.n_evaluations
                )));
            }
        }
        Ok(checkpoint)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| {
        RunnerError::Checkpoint(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RunnerError::Checkpoint(format!("malformed {}: {}", path.display(), e)))
}
