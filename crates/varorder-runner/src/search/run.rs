use crate::adapter::TargetAlgorithm;
use crate::config::RunMode;
use crate::error::{Result, RunnerError};
use crate::executor::Status;
use crate::fsutil::{append_json_line, atomic_write_json_pretty, ensure_dir};
use crate::search::budget::Budget;
use crate::search::checkpoint::{
    RunCheckpoint, RunId, Scenario, RUNHISTORY_FILE, RUN_CONTROL_FILE, SCENARIO_FILE, STATS_FILE,
    TRAJECTORY_FILE, TRAJ_LINES_FILE,
};
use crate::search::history::{Incumbent, RunHistory, Stats, Trajectory, TrajectoryEntry, CRASH_COST};
use crate::search::optimizer::Optimizer;
use crate::search::space::ConfigSpace;
use crate::weights::WeightVector;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Restore,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    WallclockLimit,
    MaxEvaluations,
    SolverAbort,
}

impl StopReason {
    fn run_status(self) -> &'static str {
        match self {
            StopReason::WallclockLimit | StopReason::MaxEvaluations => "completed",
            StopReason::SolverAbort => "aborted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchSetup {
    pub space: ConfigSpace,
    pub budget: Budget,
    pub mode: RunMode,
    pub instances: Vec<PathBuf>,
    pub seed: u64,
    pub par_factor: f64,
    pub output_dir: PathBuf,
}

impl SearchSetup {
    fn validate(&self) -> Result<()> {
        if self.instances.is_empty() {
            return Err(RunnerError::configuration("search has no instances"));
        }
        if self.mode == RunMode::One && self.instances.len() != 1 {
            return Err(RunnerError::configuration(format!(
                "mode 'one' searches a single instance, got {}",
                self.instances.len()
            )));
        }
        let b = &self.budget;
        if !(b.cutoff_time > 0.0 && b.wallclock_limit > 0.0) {
            return Err(RunnerError::configuration(format!(
                "budgets must be positive (cutoff {}, wallclock {})",
                b.cutoff_time, b.wallclock_limit
            )));
        }
        Ok(())
    }

    pub fn instance_dir(&self) -> Result<PathBuf> {
        let first = self
            .instances
            .first()
            .ok_or_else(|| RunnerError::configuration("search has no instances"))?;
        Ok(self.output_dir.join(instance_id(first)))
    }
}

pub fn instance_id(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub stop_reason: StopReason,
    pub incumbent: WeightVector,
    pub incumbent_cost: f64,
    pub stats: Stats,
}

fn write_run_control(
    run_dir: &Path,
    run_id: &str,
    status: &str,
    stop_reason: Option<StopReason>,
) -> Result<()> {
    let payload = json!({
        "schema_version": "run_control_v1",
        "run_id": run_id,
        "status": status,
        "stop_reason": stop_reason,
        "updated_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(&run_dir.join(RUN_CONTROL_FILE), &payload)
}

struct RunControlGuard {
    run_dir: PathBuf,
    run_id: String,
    done: bool,
}

impl RunControlGuard {
    fn new(run_dir: &Path, run_id: &str) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            run_id: run_id.to_string(),
            done: false,
        }
    }

    fn complete(&mut self, stop_reason: StopReason) -> Result<()> {
        write_run_control(
            &self.run_dir,
            &self.run_id,
            stop_reason.run_status(),
            Some(stop_reason),
        )?;
        self.done = true;
        Ok(())
    }
}

impl Drop for RunControlGuard {
    fn drop(&mut self) {
        if !self.done {
            let _ = write_run_control(&self.run_dir, &self.run_id, "failed", None);
        }
    }
}

pub struct SearchLoop {
    setup: SearchSetup,
    run_id: RunId,
    run_dir: PathBuf,
    checkpoint: RunCheckpoint,
    optimizer: Box<dyn Optimizer>,
    state: RunState,
}

impl SearchLoop {
    /// Starts at `run_<seed>`. State files left there by an earlier attempt
    /// with the same seed are replaced, and its `-r<k>` resumes are removed.
    pub fn fresh(setup: SearchSetup, optimizer: Box<dyn Optimizer>) -> Result<Self> {
        setup.validate()?;
        let run_id = RunId::fresh(setup.seed);
        let instance_dir = setup.instance_dir()?;
        let run_dir = instance_dir.join(run_id.dir_name());
        clear_state_files(&run_dir)?;
        remove_resumes(&instance_dir, setup.seed)?;
        ensure_dir(&run_dir)?;

        let checkpoint = RunCheckpoint {
            history: RunHistory::new(),
            stats: Stats::default(),
            trajectory: Trajectory::starting_at(&setup.space.default_configuration()),
        };
        let search = Self {
            setup,
            run_id,
            run_dir,
            checkpoint,
            optimizer,
            state: RunState::Init,
        };
        search.persist_start(None)?;
        info!(run = %search.run_dir.display(), "search initialised");
        Ok(search)
    }

    /// Loads the latest attempt for the seed and continues it in a new
    /// `run_<seed>-r<k>` directory with the budgets in `setup`. The source
    /// attempt is only read.
    pub fn restore(setup: SearchSetup, mut optimizer: Box<dyn Optimizer>) -> Result<Self> {
        setup.validate()?;
        let instance_dir = setup.instance_dir()?;
        let source = RunId::latest(&instance_dir, setup.seed).ok_or_else(|| {
            RunnerError::Checkpoint(format!(
                "no run with seed {} under {}",
                setup.seed,
                instance_dir.display()
            ))
        })?;
        let source_dir = instance_dir.join(source.dir_name());
        let previous = Scenario::load(&source_dir)?;
        previous.check_space(&setup.space)?;
        if previous.instances != setup.instances {
            warn!(source = %source, "restoring with a different instance list");
        }
        let checkpoint = RunCheckpoint::load(&source_dir)?;
        optimizer.resume(&checkpoint.history);

        let run_id = RunId::next_attempt(&instance_dir, setup.seed);
        let run_dir = instance_dir.join(run_id.dir_name());
        ensure_dir(&run_dir)?;
        let search = Self {
            setup,
            run_id,
            run_dir,
            checkpoint,
            optimizer,
            state: RunState::Restore,
        };
        search.persist_start(Some(source))?;
        info!(
            from = %source,
            to = %search.run_id,
            evaluations = search.checkpoint.stats.n_evaluations,
            incumbent_cost = ?search.incumbent().map(|i| i.cost),
            "search restored"
        );
        Ok(search)
    }

    fn persist_start(&self, restored_from: Option<RunId>) -> Result<()> {
        let scenario = Scenario {
            schema_version: "scenario_v1".to_string(),
            run_id: self.run_id.dir_name(),
            deterministic: true,
            run_obj: "runtime".to_string(),
            run_mode: self.setup.mode,
            cutoff_time: self.setup.budget.cutoff_time,
            wallclock_limit: self.setup.budget.wallclock_limit,
            max_evaluations: self.setup.budget.max_evaluations,
            par_factor: self.setup.par_factor,
            seed: self.setup.seed,
            instances: self.setup.instances.clone(),
            output_dir: self.run_dir.clone(),
            config_space: self.setup.space.clone(),
            config_space_digest: self.setup.space.digest()?,
            restored_from: restored_from.map(|r| r.dir_name()),
            created_at: Utc::now().to_rfc3339(),
        };
        scenario.save(&self.run_dir)?;
        self.checkpoint.save(&self.run_dir)?;
        for entry in self.checkpoint.trajectory.entries() {
            append_json_line(&self.run_dir.join(TRAJ_LINES_FILE), entry)?;
        }
        Ok(())
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn history(&self) -> &RunHistory {
        &self.checkpoint.history
    }

    pub fn stats(&self) -> &Stats {
        &self.checkpoint.stats
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.checkpoint.trajectory
    }

    pub fn incumbent(&self) -> Option<Incumbent> {
        self.checkpoint.trajectory.incumbent()
    }

    pub fn run<T: TargetAlgorithm + ?Sized>(&mut self, target: &mut T) -> Result<SearchOutcome> {
        if self.state == RunState::Completed {
            return Err(RunnerError::configuration(format!(
                "{} has already completed",
                self.run_id
            )));
        }
        let run_name = self.run_id.dir_name();
        let mut guard = RunControlGuard::new(&self.run_dir, &run_name);
        write_run_control(&self.run_dir, &run_name, "running", None)?;
        self.state = RunState::Running;

        let budget = self.setup.budget;
        let restored_wallclock = self.checkpoint.stats.wallclock_time_used;
        let session = Instant::now();
        let elapsed = || restored_wallclock + session.elapsed().as_secs_f64();

        let stop_reason = loop {
            if elapsed() >= budget.wallclock_limit {
                break StopReason::WallclockLimit;
            }
            if let Some(max) = budget.max_evaluations {
                if self.checkpoint.stats.n_evaluations >= max {
                    break StopReason::MaxEvaluations;
                }
            }

            let incumbent = self.checkpoint.trajectory.incumbent();
            let proposal = self.optimizer.propose(
                &self.setup.space,
                &self.checkpoint.history,
                incumbent.as_ref(),
            );
            let configuration = self.setup.space.clamp(&proposal);
            let (cost, aborted) = self.evaluate_configuration(target, &configuration)?;

            let stats = &mut self.checkpoint.stats;
            stats.n_evaluations += 1;
            stats.wallclock_time_used = elapsed();
            let entry = TrajectoryEntry {
                cost,
                incumbent: configuration,
                evaluations: stats.n_evaluations,
                cpu_time: stats.ta_time_used,
                wallclock_time: stats.wallclock_time_used,
            };
            let improved = match self.checkpoint.trajectory.offer(entry) {
                Some(accepted) => {
                    append_json_line(&self.run_dir.join(TRAJ_LINES_FILE), accepted)?;
                    true
                }
                None => false,
            };
            if improved {
                self.checkpoint.stats.incumbent_changed += 1;
                info!(
                    run = %self.run_id,
                    evaluations = self.checkpoint.stats.n_evaluations,
                    cost,
                    "new incumbent"
                );
            }
            self.checkpoint.save(&self.run_dir)?;

            if aborted {
                break StopReason::SolverAbort;
            }
        };

        self.state = RunState::Completed;
        guard.complete(stop_reason)?;
        let best = self.incumbent();
        let outcome = SearchOutcome {
            run_id: run_name,
            run_dir: self.run_dir.clone(),
            stop_reason,
            incumbent: best
                .as_ref()
                .map(|b| b.configuration.clone())
                .unwrap_or_default(),
            incumbent_cost: best.map(|b| b.cost).unwrap_or(CRASH_COST),
            stats: self.checkpoint.stats.clone(),
        };
        info!(
            run = %outcome.run_id,
            reason = ?outcome.stop_reason,
            evaluations = outcome.stats.n_evaluations,
            cost = outcome.incumbent_cost,
            "search finished"
        );
        Ok(outcome)
    }

    /// Returns the configuration's cost and whether the builder aborted.
    /// In ALL mode the cost is the sum over the batch.
    fn evaluate_configuration<T: TargetAlgorithm + ?Sized>(
        &mut self,
        target: &mut T,
        configuration: &WeightVector,
    ) -> Result<(f64, bool)> {
        let cutoff_time = self.setup.budget.cutoff_time;
        let cutoff = self.setup.budget.cutoff();
        let mut total = 0.0;
        for instance in &self.setup.instances {
            let evaluation = target.evaluate(instance, cutoff, configuration, self.setup.seed)?;
            let (cost, charged) = match evaluation.status {
                Status::Success => (evaluation.runtime.max(0.0), evaluation.runtime.max(0.0)),
                Status::Timeout => (self.setup.par_factor * cutoff_time, cutoff_time),
                Status::Abort => (CRASH_COST, 0.0),
            };
            self.checkpoint.stats.ta_time_used += charged;
            let record = self.checkpoint.history.append(
                configuration,
                &instance_id(instance),
                self.setup.seed,
                cost,
                evaluation.status,
                evaluation.runtime,
            );
            debug!(
                sequence = record.sequence,
                instance = %record.instance_id,
                status = %record.status,
                cost,
                "trial recorded"
            );
            if evaluation.status == Status::Abort {
                warn!(instance = %instance.display(), "solver aborted, stopping run");
                return Ok((CRASH_COST, true));
            }
            total += cost;
        }
        Ok((total, false))
    }
}

fn clear_state_files(run_dir: &Path) -> Result<()> {
    for name in [
        SCENARIO_FILE,
        RUNHISTORY_FILE,
        STATS_FILE,
        TRAJECTORY_FILE,
        TRAJ_LINES_FILE,
        RUN_CONTROL_FILE,
    ] {
        let path = run_dir.join(name);
        if path.exists() {
            warn!(path = %path.display(), "replacing state from an earlier run");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

// A resume outranks the base directory when labels are read, so a fresh start
// must not leave older resumes behind.
fn remove_resumes(instance_dir: &Path, seed: u64) -> Result<()> {
    for stale in RunId::resumes(instance_dir, seed) {
        let path = instance_dir.join(stale.dir_name());
        warn!(path = %path.display(), "removing resume attempt of an earlier run");
        fs::remove_dir_all(&path)?;
    }
    Ok(())
}
