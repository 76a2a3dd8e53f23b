use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use varorder_runner::{
    aggregate, plan_search, run_search, Coefficient, Evaluation, LabelConfig, SearchConfig,
    Status, TargetAlgorithm, WeightVector,
};

/// Seed 13 is always twice as fast, so it should win every label.
struct SeedBiased;

impl TargetAlgorithm for SeedBiased {
    fn evaluate(
        &mut self,
        _instance: &Path,
        _cutoff: Duration,
        weights: &WeightVector,
        seed: u64,
    ) -> varorder_runner::Result<Evaluation> {
        let base = 3.0 + weights.get(Coefficient::Weight).unwrap_or(0.0);
        let runtime = if seed == 13 { base / 2.0 } else { base };
        Ok(Evaluation {
            status: Status::Success,
            runtime,
            seed,
        })
    }
}

fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!(
        "varorder_labels_it_{}_{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    ))
}

fn search(root: &Path, split: &str, pid: u64, seed: u64) {
    let dir = root.join("instances").join("3_60").join(split);
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(
        dir.join(format!("kp_7_3_60_{}.dat", pid)),
        "3\n1\n5 8 1\n10 20 5\n17\n",
    )
    .expect("instance");
    let cfg = SearchConfig::from_yaml_str(&format!(
        r#"
problem: {{name: knapsack, n_objs: 3, n_vars: 60}}
solver: {{bin_path: /opt/bdd, bin_name: multiobj, prob_id: 1}}
instances: {{root: {root}/instances, split: {split}, from_pid: {pid}, num_instances: 1}}
output_root: {root}/runs
seed: {seed}
cutoff_time: 5
wallclock_limit: 3600
max_evaluations: 5
"#,
        root = root.display(),
        split = split,
        pid = pid,
        seed = seed
    ))
    .expect("config");
    let plan = plan_search(&cfg).expect("plan");
    run_search(&plan, &mut SeedBiased).expect("search");
}

#[test]
fn aggregates_search_output_into_split_tables() {
    let root = temp_root();
    for seed in [777, 13] {
        search(&root, "train", 0, seed);
        search(&root, "train", 1, seed);
        search(&root, "val", 2, seed);
    }
    // Seed 99 is not configured and must be ignored.
    search(&root, "train", 0, 99);
    // A run that died before writing anything.
    fs::create_dir_all(root.join("runs/3_60/test/kp_7_3_60_3/run_777")).expect("mkdir");

    let cfg = LabelConfig::from_yaml_str(&format!(
        r#"
smac_run_path: {root}/runs
label_path: {root}/labels
problem: knapsack
size: "3_60"
seeds: [777, 13]
wallclock_limit: 300
cutoff_time: 5
splits: {{n_train: 2, n_val: 1, n_test: 1}}
"#,
        root = root.display()
    ))
    .expect("label config");

    let summary = aggregate(&cfg).expect("aggregate");
    assert_eq!(summary.runs, 7);
    assert_eq!(summary.labels, 4);
    assert_eq!(summary.no_traj, 1);
    assert_eq!(summary.no_traj_lines, 0);
    assert_eq!(summary.rerun_cases, 1);

    let labels = root.join("labels");
    let all = fs::read_to_string(labels.join("label_3_60.csv")).expect("all labels");
    let rows: Vec<&str> = all.lines().collect();
    assert_eq!(rows[0], "pid,seed,cost,incb");
    assert_eq!(rows.len(), 5);
    for row in &rows[1..4] {
        assert!(row.split(',').nth(1) == Some("13"), "{}", row);
    }
    assert!(rows[4].starts_with("3,777,300,"), "{}", rows[4]);

    let train = fs::read_to_string(labels.join("label_3_60_train.csv")).expect("train");
    assert_eq!(train.lines().count(), 3);
    let val = fs::read_to_string(labels.join("label_3_60_val.csv")).expect("val");
    assert!(val.lines().nth(1).expect("row").starts_with("2,13,"));
    let test = fs::read_to_string(labels.join("label_3_60_test.csv")).expect("test");
    assert!(test.lines().nth(1).expect("row").starts_with("3,777,300,"));

    let no_traj = fs::read_to_string(labels.join("no_traj.txt")).expect("no_traj");
    assert!(no_traj.trim().ends_with("kp_7_3_60_3/run_777"), "{}", no_traj);
    let table = fs::read_to_string(labels.join("table.dat")).expect("table");
    assert_eq!(
        table,
        "1 varorder search --config search.yaml --seed 777 --split test --from-pid 3 \
         --num-instances 1 --n-objs 3 --n-vars 60 --cutoff 5 --wallclock 300 \
         --init-incumbent min_weight --mode one\n"
    );

    let _ = fs::remove_dir_all(root);
}

#[test]
fn fresh_rerun_replaces_a_failed_resume() {
    let root = temp_root();
    // A resume that died before writing anything would outrank run_777.
    let stale = root.join("runs/3_60/train/kp_7_3_60_0/run_777-r1");
    fs::create_dir_all(&stale).expect("mkdir");
    search(&root, "train", 0, 777);
    assert!(!stale.exists());

    let cfg = LabelConfig::from_yaml_str(&format!(
        r#"
smac_run_path: {root}/runs
label_path: {root}/labels
problem: knapsack
size: "3_60"
seeds: [777]
wallclock_limit: 300
cutoff_time: 5
splits: {{n_train: 1, n_val: 0, n_test: 0}}
"#,
        root = root.display()
    ))
    .expect("label config");

    let summary = aggregate(&cfg).expect("aggregate");
    assert_eq!(summary.runs, 1);
    assert_eq!(summary.no_traj, 0);
    assert_eq!(summary.rerun_cases, 0);
    let train = fs::read_to_string(root.join("labels/label_3_60_train.csv")).expect("train");
    let row = train.lines().nth(1).expect("row");
    let cost: f64 = row.split(',').nth(2).expect("cost").parse().expect("number");
    assert!(row.starts_with("0,777,"), "{}", row);
    assert!(cost < 300.0, "{}", row);

    let _ = fs::remove_dir_all(root);
}
