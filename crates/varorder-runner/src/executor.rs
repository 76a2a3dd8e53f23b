use crate::config::SolverConfig;
use crate::error::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const SENTINEL_TOKENS: usize = 13;

const SUCCESS_MARKER: &str = "Solved";
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const KILL_GRACE: Duration = Duration::from_secs(1);
const READER_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Timeout,
    Abort,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Timeout => "TIMEOUT",
            Status::Abort => "ABORT",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: Status,
    pub runtime_seconds: f64,
    pub raw_tokens: Vec<f64>,
}

impl ExecutionResult {
    fn success(tokens: Vec<f64>) -> Self {
        let tail = tokens.len().saturating_sub(3);
        let runtime_seconds = tokens[tail..].iter().sum::<f64>();
        Self {
            status: Status::Success,
            runtime_seconds,
            raw_tokens: tokens,
        }
    }

    fn abort() -> Self {
        Self {
            status: Status::Abort,
            runtime_seconds: -1.0,
            raw_tokens: vec![-1.0; SENTINEL_TOKENS],
        }
    }

    fn timeout(limit: Duration) -> Self {
        let limit = limit.as_secs_f64();
        Self {
            status: Status::Timeout,
            runtime_seconds: limit,
            raw_tokens: vec![limit; SENTINEL_TOKENS],
        }
    }
}

/// Classifies combined solver output. `Solved` followed by `:` and a
/// comma-separated list (terminated by `#` or end of line) is a success whose
/// runtime is the sum of the last three entries.
pub fn classify_output(output: &str) -> ExecutionResult {
    match parse_solved(output) {
        Some(tokens) if tokens.len() >= 3 => ExecutionResult::success(tokens),
        _ => ExecutionResult::abort(),
    }
}

pub fn parse_solved(output: &str) -> Option<Vec<f64>> {
    let start = output.find(SUCCESS_MARKER)? + SUCCESS_MARKER.len();
    let after = &output[start..];
    let list = &after[after.find(':')? + 1..];
    let end = list.find(['#', '\n']).unwrap_or(list.len());
    list[..end]
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<f64>().ok())
        .collect()
}

#[derive(Debug, Clone)]
pub struct BoundedProcessExecutor {
    binary: PathBuf,
    problem_id: u32,
    preprocess: u32,
    memory_limit_gb: Option<f64>,
}

impl BoundedProcessExecutor {
    pub fn new(binary: impl Into<PathBuf>, problem_id: u32, preprocess: u32) -> Self {
        Self {
            binary: binary.into(),
            problem_id,
            preprocess,
            memory_limit_gb: None,
        }
    }

    pub fn from_config(config: &SolverConfig) -> Self {
        let executor = Self::new(config.binary(), config.prob_id, config.preprocess);
        if config.mask_mem_limit {
            executor
        } else {
            executor.with_memory_limit_gb(config.mem_limit_gb)
        }
    }

    pub fn with_memory_limit_gb(mut self, gb: f64) -> Self {
        self.memory_limit_gb = (gb > 0.0 && gb.is_finite()).then_some(gb);
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn memory_limit_bytes(&self) -> Option<u64> {
        self.memory_limit_gb
            .map(|gb| (gb * 1024.0 * 1024.0 * 1024.0) as u64)
    }

    pub fn build_argv(&self, instance_path: &Path, order: &[usize]) -> Vec<String> {
        let mut argv = Vec::with_capacity(order.len() + 5);
        argv.push(self.binary.to_string_lossy().to_string());
        argv.push(instance_path.to_string_lossy().to_string());
        argv.push(self.problem_id.to_string());
        argv.push(self.preprocess.to_string());
        argv.push(order.len().to_string());
        argv.extend(order.iter().map(|v| v.to_string()));
        argv
    }

    pub fn run(
        &self,
        instance_path: &Path,
        order: &[usize],
        time_limit: Duration,
    ) -> Result<ExecutionResult> {
        if order.is_empty() {
            return Err(RunnerError::configuration("variable order is empty"));
        }
        if time_limit.is_zero() {
            return Err(RunnerError::configuration("time limit must be positive"));
        }
        if !self.binary.is_file() {
            return Err(RunnerError::configuration(format!(
                "solver binary not found: {}",
                self.binary.display()
            )));
        }

        let argv = self.build_argv(instance_path, order);
        debug!(
            binary = %self.binary.display(),
            instance = %instance_path.display(),
            n_vars = order.len(),
            memory_limit_bytes = ?self.memory_limit_bytes(),
            "spawning solver"
        );
        let mut cmd = Command::new(&self.binary);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.confine(&mut cmd);
        let mut child = cmd.spawn().map_err(|e| {
            RunnerError::configuration(format!(
                "failed to spawn solver {}: {}",
                self.binary.display(),
                e
            ))
        })?;

        let stdout = child.stdout.take().map(spawn_capture);
        let stderr = child.stderr.take().map(spawn_capture);
        let started = Instant::now();
        let outcome = supervise_child(&mut child, time_limit)?;
        let mut combined = collect_capture(stdout);
        combined.push('\n');
        combined.push_str(&collect_capture(stderr));

        let result = match outcome {
            Supervised::Exited(status) => {
                let result = classify_output(&combined);
                if result.status == Status::Abort {
                    warn!(
                        exit = ?status.code(),
                        instance = %instance_path.display(),
                        "solver exited without a success marker"
                    );
                }
                result
            }
            Supervised::TimedOut => ExecutionResult::timeout(time_limit),
        };
        info!(
            status = %result.status,
            runtime = result.runtime_seconds,
            elapsed = started.elapsed().as_secs_f64(),
            "solver finished"
        );
        Ok(result)
    }

    #[cfg(unix)]
    fn confine(&self, cmd: &mut Command) {
        use std::os::unix::process::CommandExt;
        let limit = self.memory_limit_bytes();
        unsafe {
            cmd.pre_exec(move || {
                // Own process group so a timeout can take down grandchildren too.
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if let Some(bytes) = limit {
                    set_soft_address_space_limit(bytes)?;
                }
                Ok(())
            });
        }
    }

    #[cfg(not(unix))]
    fn confine(&self, _cmd: &mut Command) {}
}

/// Lowers only the soft `RLIMIT_AS`; the hard limit is left as inherited.
#[cfg(unix)]
fn set_soft_address_space_limit(bytes: u64) -> std::io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut current) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let next = libc::rlimit {
        rlim_cur: (bytes as libc::rlim_t).min(current.rlim_max),
        rlim_max: current.rlim_max,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &next) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

enum Supervised {
    Exited(ExitStatus),
    TimedOut,
}

fn supervise_child(child: &mut Child, timeout: Duration) -> Result<Supervised> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            // Leftover grandchildren would hold the pipes open past the reader grace.
            kill_exited_group(child.id());
            return Ok(Supervised::Exited(status));
        }
        if start.elapsed() >= timeout {
            kill_child_group(child);
            let deadline = Instant::now() + KILL_GRACE;
            while Instant::now() < deadline {
                if child.try_wait()?.is_some() {
                    return Ok(Supervised::TimedOut);
                }
                thread::sleep(POLL_INTERVAL);
            }
            warn!(pid = child.id(), "solver did not exit after kill");
            return Ok(Supervised::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_child_group(child: &mut Child) {
    unsafe {
        let pid = child.id() as i32;
        libc::kill(-pid, libc::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_child_group(child: &mut Child) {
    let _ = child.kill();
}

// The group id stays reserved while any member is alive, so this cannot hit
// an unrelated process.
#[cfg(unix)]
fn kill_exited_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_exited_group(_pid: u32) {}

fn spawn_capture<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

fn collect_capture(rx: Option<mpsc::Receiver<Vec<u8>>>) -> String {
    rx.and_then(|rx| rx.recv_timeout(READER_GRACE).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solved_marker_sums_last_three_tokens() {
        let result = classify_output("build ok\nresult Solved: 1.0,2.0,3.0#ok\n");
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.runtime_seconds, 6.0);
        assert_eq!(result.raw_tokens, vec![1.0, 2.0, 3.0]);

        let longer = classify_output("Solved: 7, 9, 0.5, 0.25, 0.25 # trailing");
        assert_eq!(longer.status, Status::Success);
        assert_eq!(longer.runtime_seconds, 1.0);
        assert_eq!(longer.raw_tokens.len(), 5);
    }

    #[test]
    fn missing_marker_is_abort_with_sentinel() {
        let result = classify_output("std::bad_alloc\n");
        assert_eq!(result.status, Status::Abort);
        assert_eq!(result.runtime_seconds, -1.0);
        assert_eq!(result.raw_tokens, vec![-1.0; SENTINEL_TOKENS]);
    }

    #[test]
    fn malformed_or_short_token_list_is_abort() {
        assert_eq!(classify_output("Solved: 1.0,abc,3.0#").status, Status::Abort);
        assert_eq!(classify_output("Solved: 1.0,2.0#").status, Status::Abort);
        assert_eq!(classify_output("Solved without colon").status, Status::Abort);
    }

    #[test]
    fn timeout_reports_the_limit() {
        let result = ExecutionResult::timeout(Duration::from_secs(60));
        assert_eq!(result.status, Status::Timeout);
        assert_eq!(result.runtime_seconds, 60.0);
        assert_eq!(result.raw_tokens, vec![60.0; SENTINEL_TOKENS]);
    }

    #[test]
    fn argv_is_positional() {
        let exec = BoundedProcessExecutor::new("/opt/bdd/bin/multiobj", 3, 1);
        let argv = exec.build_argv(Path::new("/data/kp_7_3_60_0.dat"), &[2, 0, 1]);
        assert_eq!(
            argv,
            vec![
                "/opt/bdd/bin/multiobj",
                "/data/kp_7_3_60_0.dat",
                "3",
                "1",
                "3",
                "2",
                "0",
                "1"
            ]
        );
    }

    #[test]
    fn empty_order_and_missing_binary_fail_fast() {
        let exec = BoundedProcessExecutor::new("/definitely/not/here", 1, 0);
        let err = exec
            .run(Path::new("x.dat"), &[], Duration::from_secs(1))
            .expect_err("empty order");
        assert!(err.is_configuration());
        let err = exec
            .run(Path::new("x.dat"), &[0], Duration::from_secs(1))
            .expect_err("missing binary");
        assert!(err.is_configuration());
    }

    #[test]
    fn memory_limit_is_optional() {
        let exec = BoundedProcessExecutor::new("bin", 1, 0);
        assert_eq!(exec.memory_limit_bytes(), None);
        let exec = exec.with_memory_limit_gb(2.0);
        assert_eq!(exec.memory_limit_bytes(), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(exec.with_memory_limit_gb(0.0).memory_limit_bytes(), None);
    }
}
