pub mod budget;
pub mod checkpoint;
pub mod defaults;
pub mod history;
pub mod optimizer;
pub mod run;
pub mod space;

pub use budget::Budget;
pub use checkpoint::{RunCheckpoint, RunId, Scenario};
pub use defaults::{resolve_incumbent, static_incumbent, OptimizedTable};
pub use history::{Incumbent, RunHistory, Stats, Trajectory, TrajectoryEntry, TrialRecord, CRASH_COST};
pub use optimizer::{Optimizer, RandomSearch};
pub use run::{RunState, SearchLoop, SearchOutcome, SearchSetup, StopReason};
pub use space::{ConfigSpace, Hyperparameter};

use crate::adapter::TargetAlgorithm;
use crate::config::{RunMode, SearchConfig};
use crate::error::{Result, RunnerError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SearchPlan {
    pub problem: String,
    pub size: String,
    pub mode: RunMode,
    pub seed: u64,
    pub restore: bool,
    pub init_incumbent: String,
    pub budget: Budget,
    pub par_factor: f64,
    pub space: ConfigSpace,
    pub space_digest: String,
    pub output_dir: PathBuf,
    pub batches: Vec<Vec<PathBuf>>,
}

impl SearchPlan {
    pub fn setup(&self, batch: &[PathBuf]) -> SearchSetup {
        SearchSetup {
            space: self.space.clone(),
            budget: self.budget,
            mode: self.mode,
            instances: batch.to_vec(),
            seed: self.seed,
            par_factor: self.par_factor,
            output_dir: self.output_dir.clone(),
        }
    }
}

pub fn plan_search(config: &SearchConfig) -> Result<SearchPlan> {
    let size = config.size_key();
    let table = OptimizedTable::with_overrides(config.incumbent_table.as_deref())?;
    let defaults = resolve_incumbent(
        &config.init_incumbent,
        config.problem.name,
        &size,
        Some(&table),
    )?;
    let space = ConfigSpace::build(config.problem.name, config.width, &defaults)?;
    let instances = resolve_instances(config)?;
    let batches = match config.mode {
        RunMode::One => instances.into_iter().map(|i| vec![i]).collect(),
        RunMode::All => vec![instances],
    };
    Ok(SearchPlan {
        problem: config.problem.name.to_string(),
        size,
        mode: config.mode,
        seed: config.seed,
        restore: config.restore.restore_run,
        init_incumbent: config.init_incumbent.clone(),
        budget: Budget::resolve(config),
        par_factor: config.par_factor,
        space_digest: space.digest()?,
        space,
        output_dir: config.output_dir(),
        batches,
    })
}

pub fn run_search<T: TargetAlgorithm + ?Sized>(
    plan: &SearchPlan,
    target: &mut T,
) -> Result<Vec<SearchOutcome>> {
    let mut outcomes = Vec::with_capacity(plan.batches.len());
    for batch in &plan.batches {
        let setup = plan.setup(batch);
        let optimizer = Box::new(RandomSearch::new(plan.seed));
        let mut search = if plan.restore {
            SearchLoop::restore(setup, optimizer)?
        } else {
            SearchLoop::fresh(setup, optimizer)?
        };
        let outcome = search.run(target)?;
        if outcome.stop_reason == StopReason::SolverAbort {
            warn!(run = %outcome.run_dir.display(), "run ended by a solver abort");
        }
        outcomes.push(outcome);
    }
    info!(runs = outcomes.len(), "all searches finished");
    Ok(outcomes)
}

pub fn resolve_instances(config: &SearchConfig) -> Result<Vec<PathBuf>> {
    let dir = config.split_dir();
    if !dir.is_dir() {
        return Err(RunnerError::configuration(format!(
            "instance directory not found: {}",
            dir.display()
        )));
    }
    let prefix = match &config.instances.prefix {
        Some(prefix) => prefix.clone(),
        None => derive_prefix(&dir)?,
    };
    let sel = &config.instances;
    let mut out = Vec::with_capacity(sel.num_instances as usize);
    for pid in sel.from_pid..sel.from_pid + sel.num_instances {
        let path = dir.join(format!("{}_{}.dat", prefix, pid));
        if !path.is_file() {
            return Err(RunnerError::configuration(format!(
                "instance not found: {}",
                path.display()
            )));
        }
        out.push(path);
    }
    Ok(out)
}

fn derive_prefix(dir: &Path) -> Result<String> {
    let mut stems: Vec<String> = fs::read_dir(dir)
        .map_err(|e| RunnerError::file(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("dat"))
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
        .collect();
    stems.sort();
    let first = stems.first().ok_or_else(|| {
        RunnerError::configuration(format!("no .dat instances in {}", dir.display()))
    })?;
    let prefix = first
        .rsplit_once('_')
        .map(|(head, _)| head.to_string())
        .ok_or_else(|| {
            RunnerError::configuration(format!("instance stem '{}' has no _<pid> suffix", first))
        })?;
    Ok(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config_in(root: &Path, extra: &str) -> SearchConfig {
        let raw = format!(
            r#"
problem: {{name: knapsack, n_objs: 3, n_vars: 60}}
solver: {{bin_path: /opt/bdd, bin_name: multiobj, prob_id: 1}}
instances: {{root: {root}, split: train, from_pid: 1, num_instances: 2}}
output_root: {root}/runs
{extra}
"#,
            root = root.display(),
            extra = extra
        );
        SearchConfig::from_yaml_str(&raw).expect("config")
    }

    fn instance_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "varorder_plan_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let split = root.join("3_60").join("train");
        fs::create_dir_all(&split).expect("mkdir");
        for pid in 0..3 {
            fs::write(split.join(format!("kp_7_3_60_{}.dat", pid)), "1\n1\n1\n1\n1\n")
                .expect("write");
        }
        root
    }

    #[test]
    fn plan_resolves_instances_budgets_and_space() {
        let root = instance_root("one");
        let plan = plan_search(&config_in(&root, "")).expect("plan");
        assert_eq!(plan.batches.len(), 2);
        assert!(plan.batches[0][0].ends_with("3_60/train/kp_7_3_60_1.dat"));
        assert_eq!(plan.budget.cutoff_time, 300.0);
        assert_eq!(plan.space.len(), 7);
        assert_eq!(plan.output_dir, root.join("runs").join("3_60").join("train"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn all_mode_plans_a_single_batch() {
        let root = instance_root("all");
        let plan = plan_search(&config_in(&root, "mode: all")).expect("plan");
        assert_eq!(plan.batches.len(), 1);
        assert_eq!(plan.batches[0].len(), 2);
        assert_eq!(plan.budget.wallclock_limit, 43200.0);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_instance_is_a_configuration_error() {
        let root = instance_root("missing");
        let cfg = config_in(&root, "");
        let mut cfg = cfg;
        cfg.instances.num_instances = 5;
        let err = plan_search(&cfg).expect_err("pid 5 does not exist");
        assert!(err.is_configuration(), "{}", err);
        let _ = fs::remove_dir_all(root);
    }
}
