use crate::config::{LabelConfig, SplitSizes};
use crate::error::{Result, RunnerError};
use crate::fsutil::{atomic_write_bytes, ensure_dir};
use crate::instance::pid_from_stem;
use crate::search::checkpoint::{RunId, TRAJ_LINES_FILE};
use crate::search::history::TrajectoryEntry;
use crate::weights::WeightVector;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One-line trajectories above this cost are scaled down by `PAR_DIVISOR`.
pub const SINGLE_LINE_COST_CEILING: f64 = 10000.0;
pub const PAR_DIVISOR: f64 = 10.0;

pub const NO_TRAJ_FILE: &str = "no_traj.txt";
pub const NO_TRAJ_LINES_FILE: &str = "no_traj_lines.txt";
pub const RERUN_TABLE_FILE: &str = "table.dat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFlag {
    NoTraj,
    NoTrajLines,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLocation {
    pub pid: u64,
    pub run_id: RunId,
    pub split: String,
    pub run_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedResult {
    pub pid: u64,
    pub seed: u64,
    pub split: String,
    pub cost: f64,
    pub incumbent: WeightVector,
    pub flag: Option<RunFlag>,
    pub run_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelSummary {
    pub runs: usize,
    pub labels: usize,
    pub no_traj: usize,
    pub no_traj_lines: usize,
    pub rerun_cases: u64,
    pub written: Vec<PathBuf>,
}

/// Best `(cost, incumbent)` of one run directory, plus a flag when the run
/// needs to be queued again.
pub fn classify_trajectory(
    run_dir: &Path,
    wallclock_limit: f64,
) -> Result<(f64, WeightVector, Option<RunFlag>)> {
    let path = run_dir.join(TRAJ_LINES_FILE);
    if !path.is_file() {
        return Ok((
            wallclock_limit,
            WeightVector::minimum_weight(),
            Some(RunFlag::NoTraj),
        ));
    }
    let raw = fs::read_to_string(&path).map_err(|e| RunnerError::file(&path, e))?;
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let Some(last) = lines.last() else {
        return Ok((
            wallclock_limit,
            WeightVector::minimum_weight(),
            Some(RunFlag::NoTraj),
        ));
    };
    let entry: TrajectoryEntry = serde_json::from_str(last).map_err(|e| {
        RunnerError::Checkpoint(format!("malformed line in {}: {}", path.display(), e))
    })?;
    if lines.len() == 1 {
        let cost = if entry.cost <= SINGLE_LINE_COST_CEILING {
            entry.cost
        } else {
            entry.cost / PAR_DIVISOR
        };
        return Ok((cost, entry.incumbent, Some(RunFlag::NoTrajLines)));
    }
    Ok((entry.cost, entry.incumbent, None))
}

pub fn scan_runs(root: &Path, seeds: &[u64]) -> Result<Vec<RunLocation>> {
    let mut latest: BTreeMap<(u64, u64), RunLocation> = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(3).max_depth(3).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            RunnerError::file(&path, e.into())
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(run_id) = entry.file_name().to_str().and_then(RunId::parse) else {
            continue;
        };
        if !seeds.contains(&run_id.seed) {
            debug!(run = %entry.path().display(), "seed not configured, skipped");
            continue;
        }
        let run_dir = entry.path().to_path_buf();
        let stem_dir = run_dir.parent();
        let pid = stem_dir
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .and_then(pid_from_stem);
        let split = stem_dir
            .and_then(|p| p.parent())
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str());
        let (Some(pid), Some(split)) = (pid, split) else {
            warn!(run = %run_dir.display(), "cannot read pid from run path, skipped");
            continue;
        };
        let found = RunLocation {
            pid,
            run_id,
            split: split.to_string(),
            run_dir,
        };
        match latest.get(&(pid, run_id.seed)) {
            Some(seen) if seen.run_id.attempt >= run_id.attempt => {}
            _ => {
                latest.insert((pid, run_id.seed), found);
            }
        }
    }
    Ok(latest.into_values().collect())
}

/// Minimum cost per pid; equal costs go to the seed listed first in `seeds`.
pub fn select_labels(results: &[SeedResult], seeds: &[u64]) -> BTreeMap<u64, SeedResult> {
    let rank = |seed: u64| seeds.iter().position(|s| *s == seed).unwrap_or(usize::MAX);
    let mut best: BTreeMap<u64, SeedResult> = BTreeMap::new();
    for r in results {
        let replace = match best.get(&r.pid) {
            None => true,
            Some(cur) => {
                r.cost < cur.cost || (r.cost == cur.cost && rank(r.seed) < rank(cur.seed))
            }
        };
        if replace {
            best.insert(r.pid, r.clone());
        }
    }
    best
}

pub fn label_csv<'a, I>(rows: I) -> String
where
    I: IntoIterator<Item = &'a SeedResult>,
{
    let mut out = String::from("pid,seed,cost,incb\n");
    for r in rows {
        out.push_str(&format!(
            "{},{},{},{}\n",
            r.pid,
            r.seed,
            r.cost,
            csv_quote(&r.incumbent.to_json_string())
        ));
    }
    out
}

fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

pub fn split_ranges(sizes: SplitSizes) -> [(&'static str, u64, u64); 3] {
    let val_start = sizes.n_train;
    let test_start = val_start + sizes.n_val;
    [
        ("train", 0, val_start),
        ("val", val_start, test_start),
        ("test", test_start, test_start + sizes.n_test),
    ]
}

/// One `varorder search` line per flagged run, numbered from `start_case`.
/// Returns the table and the next free case number.
pub fn build_rerun_table(
    config: &LabelConfig,
    flagged: &[&SeedResult],
    start_case: u64,
) -> Result<(String, u64)> {
    let (n_objs, n_vars) = config.problem.parse_size(&config.size)?;
    let rerun = &config.rerun;
    let mut case = start_case;
    let mut table = String::new();
    for r in flagged {
        let mut line = format!(
            "{case} varorder search --config {cfg} --seed {seed} --split {split} \
             --from-pid {pid} --num-instances 1 --n-objs {n_objs} --n-vars {n_vars} \
             --cutoff {cutoff} --wallclock {wallclock} --init-incumbent {init} --mode one",
            case = case,
            cfg = rerun.search_config.display(),
            seed = r.seed,
            split = r.split,
            pid = r.pid,
            n_objs = n_objs,
            n_vars = n_vars,
            cutoff = config.cutoff_time,
            wallclock = config.wallclock_limit,
            init = rerun.init_incumbent,
        );
        if rerun.restore && r.flag == Some(RunFlag::NoTrajLines) {
            line.push_str(&format!(
                " --restore --new-cutoff {} --new-wallclock {}",
                rerun.new_cutoff_time.unwrap_or(config.cutoff_time),
                rerun.new_wallclock_limit.unwrap_or(config.wallclock_limit)
            ));
        }
        table.push_str(&line);
        table.push('\n');
        case += 1;
    }
    Ok((table, case))
}

pub fn aggregate(config: &LabelConfig) -> Result<LabelSummary> {
    let root = config.smac_run_path.join(&config.size);
    if !root.is_dir() {
        return Err(RunnerError::configuration(format!(
            "run directory not found: {}",
            root.display()
        )));
    }
    let runs = scan_runs(&root, &config.seeds)?;
    let mut results = Vec::with_capacity(runs.len());
    for run in &runs {
        let (cost, incumbent, flag) = classify_trajectory(&run.run_dir, config.wallclock_limit)?;
        results.push(SeedResult {
            pid: run.pid,
            seed: run.run_id.seed,
            split: run.split.clone(),
            cost,
            incumbent,
            flag,
            run_dir: run.run_dir.clone(),
        });
    }

    let no_traj: Vec<&SeedResult> = results
        .iter()
        .filter(|r| r.flag == Some(RunFlag::NoTraj))
        .collect();
    let no_traj_lines: Vec<&SeedResult> = results
        .iter()
        .filter(|r| r.flag == Some(RunFlag::NoTrajLines))
        .collect();
    let (mut table, next_case) = build_rerun_table(config, &no_traj, 1)?;
    let (more, next_case) = build_rerun_table(config, &no_traj_lines, next_case)?;
    table.push_str(&more);

    let out = &config.label_path;
    ensure_dir(out)?;
    let mut written = Vec::new();
    let mut write = |name: String, body: String| -> Result<()> {
        let path = out.join(name);
        atomic_write_bytes(&path, body.as_bytes())?;
        written.push(path);
        Ok(())
    };
    write(NO_TRAJ_FILE.to_string(), run_list(&no_traj))?;
    write(NO_TRAJ_LINES_FILE.to_string(), run_list(&no_traj_lines))?;
    write(RERUN_TABLE_FILE.to_string(), table)?;

    let labels = select_labels(&results, &config.seeds);
    if !labels.is_empty() {
        write(
            format!("label_{}.csv", config.size),
            label_csv(labels.values()),
        )?;
    }
    for (split, start, end) in split_ranges(config.splits) {
        let rows: Vec<&SeedResult> = labels.range(start..end).map(|(_, r)| r).collect();
        if rows.is_empty() {
            continue;
        }
        write(
            format!("label_{}_{}.csv", config.size, split),
            label_csv(rows),
        )?;
    }

    let summary = LabelSummary {
        runs: runs.len(),
        labels: labels.len(),
        no_traj: no_traj.len(),
        no_traj_lines: no_traj_lines.len(),
        rerun_cases: next_case - 1,
        written,
    };
    info!(
        runs = summary.runs,
        labels = summary.labels,
        no_traj = summary.no_traj,
        no_traj_lines = summary.no_traj_lines,
        "labels written to {}",
        out.display()
    );
    Ok(summary)
}

fn run_list(flagged: &[&SeedResult]) -> String {
    flagged
        .iter()
        .map(|r| format!("{}\n", r.run_dir.display()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::append_json_line;
    use crate::search::CRASH_COST;
    use crate::weights::Coefficient;
    use chrono::Utc;

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "varorder_labels_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    fn entry(cost: f64, weight: f64) -> TrajectoryEntry {
        TrajectoryEntry {
            cost,
            incumbent: WeightVector::new().with(Coefficient::Weight, weight),
            evaluations: 0,
            cpu_time: 0.0,
            wallclock_time: 0.0,
        }
    }

    fn result(pid: u64, seed: u64, cost: f64) -> SeedResult {
        SeedResult {
            pid,
            seed,
            split: "train".to_string(),
            cost,
            incumbent: WeightVector::minimum_weight(),
            flag: None,
            run_dir: PathBuf::from(format!("/runs/kp_7_3_60_{}/run_{}", pid, seed)),
        }
    }

    fn label_config(root: &Path) -> LabelConfig {
        LabelConfig::from_yaml_str(&format!(
            r#"
smac_run_path: {root}/runs
label_path: {root}/labels
problem: knapsack
size: "3_60"
seeds: [777, 13]
wallclock_limit: 300
cutoff_time: 300
splits: {{n_train: 2, n_val: 1, n_test: 1}}
rerun: {{search_config: search.yaml, restore: true, new_cutoff_time: 600}}
"#,
            root = root.display()
        ))
        .expect("label config")
    }

    #[test]
    fn missing_trajectory_costs_the_wallclock_limit() {
        let root = temp_root("missing");
        fs::create_dir_all(&root).expect("mkdir");
        let (cost, incb, flag) = classify_trajectory(&root, 300.0).expect("classify");
        assert_eq!(cost, 300.0);
        assert_eq!(incb, WeightVector::minimum_weight());
        assert_eq!(flag, Some(RunFlag::NoTraj));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn single_line_trajectories_are_flagged_and_scaled() {
        let root = temp_root("single");
        let cheap = root.join("cheap");
        append_json_line(&cheap.join(TRAJ_LINES_FILE), &entry(42.0, -1.0)).expect("write");
        let (cost, _, flag) = classify_trajectory(&cheap, 300.0).expect("classify");
        assert_eq!(cost, 42.0);
        assert_eq!(flag, Some(RunFlag::NoTrajLines));

        let crashed = root.join("crashed");
        append_json_line(&crashed.join(TRAJ_LINES_FILE), &entry(CRASH_COST, 0.0)).expect("write");
        let (cost, _, _) = classify_trajectory(&crashed, 300.0).expect("classify");
        assert_eq!(cost, CRASH_COST / 10.0);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn multi_line_trajectories_use_the_last_line() {
        let root = temp_root("multi");
        let path = root.join(TRAJ_LINES_FILE);
        append_json_line(&path, &entry(CRASH_COST, 0.0)).expect("write");
        append_json_line(&path, &entry(9.0, 0.5)).expect("write");
        append_json_line(&path, &entry(4.0, 0.25)).expect("write");
        let (cost, incb, flag) = classify_trajectory(&root, 300.0).expect("classify");
        assert_eq!(cost, 4.0);
        assert_eq!(incb.get(Coefficient::Weight), Some(0.25));
        assert_eq!(flag, None);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn ties_go_to_the_earlier_configured_seed() {
        let results = vec![
            result(0, 13, 5.0),
            result(0, 777, 5.0),
            result(1, 777, 9.0),
            result(1, 13, 3.0),
        ];
        let labels = select_labels(&results, &[777, 13]);
        assert_eq!(labels[&0].seed, 777);
        assert_eq!(labels[&1].seed, 13);
        assert_eq!(labels[&1].cost, 3.0);
    }

    #[test]
    fn csv_quotes_the_incumbent_json() {
        let csv = label_csv([&result(3, 777, 4.5)]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("pid,seed,cost,incb"));
        let row = lines.next().expect("row");
        assert!(row.starts_with("3,777,4.5,\"{\"\"avg_value\"\":0.0,"), "{}", row);
        assert!(row.ends_with("\"\"weight\"\":-1.0}\""), "{}", row);
    }

    #[test]
    fn rerun_table_threads_the_case_counter() {
        let root = temp_root("table");
        let cfg = label_config(&root);
        let mut a = result(4, 13, 300.0);
        a.flag = Some(RunFlag::NoTraj);
        let mut b = result(5, 777, 42.0);
        b.flag = Some(RunFlag::NoTrajLines);
        let (first, next) = build_rerun_table(&cfg, &[&a], 7).expect("table");
        assert_eq!(next, 8);
        assert_eq!(
            first,
            "7 varorder search --config search.yaml --seed 13 --split train --from-pid 4 \
             --num-instances 1 --n-objs 3 --n-vars 60 --cutoff 300 --wallclock 300 \
             --init-incumbent min_weight --mode one\n"
        );
        let (second, next) = build_rerun_table(&cfg, &[&b], next).expect("table");
        assert_eq!(next, 9);
        assert!(second.starts_with("8 varorder search"));
        assert!(second.trim_end().ends_with("--restore --new-cutoff 600 --new-wallclock 300"));
    }

    #[test]
    fn split_ranges_are_back_to_back() {
        let ranges = split_ranges(SplitSizes::default());
        assert_eq!(ranges[0], ("train", 0, 1000));
        assert_eq!(ranges[1], ("val", 1000, 1100));
        assert_eq!(ranges[2], ("test", 1100, 1200));
    }
}
