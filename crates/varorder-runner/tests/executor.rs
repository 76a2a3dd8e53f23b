#![cfg(unix)]

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use varorder_runner::{BoundedProcessExecutor, Status};

// `/bin/sh <script> <prob_id> <preprocess> <n> <order...>`: the script sits
// where the instance path would go.
fn script(tag: &str, body: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "varorder_exec_it_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("mkdir");
    let path = dir.join("solver.sh");
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    path
}

fn shell() -> BoundedProcessExecutor {
    BoundedProcessExecutor::new("/bin/sh", 1, 0)
}

#[test]
fn solved_line_on_stdout_is_success() {
    let path = script("ok", "echo 'building'\necho 'Solved: 0.5, 1.0, 2.0, 3.0 # done'");
    let result = shell()
        .run(&path, &[1, 0, 2], Duration::from_secs(10))
        .expect("run");
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.runtime_seconds, 6.0);
    assert_eq!(result.raw_tokens, vec![0.5, 1.0, 2.0, 3.0]);
}

#[test]
fn solved_line_on_stderr_counts_too() {
    let path = script("stderr", "echo 'Solved: 1, 1, 1#' 1>&2");
    let result = shell()
        .run(&path, &[0], Duration::from_secs(10))
        .expect("run");
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.runtime_seconds, 3.0);
}

#[test]
fn order_reaches_the_solver_positionally() {
    // $3 is the order length, then the order itself.
    let path = script("argv", "echo \"Solved: $3, $4, $6#\"");
    let result = shell()
        .run(&path, &[7, 8, 9], Duration::from_secs(10))
        .expect("run");
    assert_eq!(result.raw_tokens, vec![3.0, 7.0, 9.0]);
}

#[test]
fn crash_without_marker_is_abort() {
    let path = script("crash", "echo 'std::bad_alloc' 1>&2\nexit 134");
    let result = shell()
        .run(&path, &[0, 1], Duration::from_secs(10))
        .expect("run");
    assert_eq!(result.status, Status::Abort);
    assert_eq!(result.runtime_seconds, -1.0);
    assert_eq!(result.raw_tokens.len(), 13);
}

#[test]
fn slow_solver_is_killed_at_the_deadline() {
    let path = script("slow", "sleep 30\necho 'Solved: 1, 1, 1#'");
    let started = Instant::now();
    let result = shell()
        .run(&path, &[0], Duration::from_secs(1))
        .expect("run");
    let elapsed = started.elapsed();
    assert_eq!(result.status, Status::Timeout);
    assert_eq!(result.runtime_seconds, 1.0);
    assert!(elapsed < Duration::from_secs(10), "took {:?}", elapsed);
}

#[test]
fn background_leftovers_do_not_hide_the_result() {
    // The stray sleep inherits stdout and would keep the pipe open for 30s.
    let path = script("leftover", "echo 'Solved: 1, 2, 3#'\nsleep 30 &\nexit 0");
    let started = Instant::now();
    let result = shell()
        .run(&path, &[0], Duration::from_secs(10))
        .expect("run");
    assert_eq!(result.status, Status::Success);
    assert_eq!(result.runtime_seconds, 6.0);
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
}

#[test]
fn memory_ceiling_applies_to_the_child() {
    let path = script("ulimit", "echo \"Solved: 0, 0, $(ulimit -v)#\"");
    let result = shell()
        .with_memory_limit_gb(1.0)
        .run(&path, &[0], Duration::from_secs(10))
        .expect("run");
    assert_eq!(result.status, Status::Success);
    let kib = result.raw_tokens[2];
    assert!(kib > 0.0 && kib <= 1024.0 * 1024.0, "ulimit -v reported {}", kib);
}
