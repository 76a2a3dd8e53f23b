use crate::error::{Result, RunnerError};
use crate::executor::{BoundedProcessExecutor, ExecutionResult, Status};
use crate::instance::Instance;
use crate::scorer::VariableOrderScorer;
use crate::weights::WeightVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const WIRE_PREFIX: &str = "Result for SMAC:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub status: Status,
    pub runtime: f64,
    pub seed: u64,
}

impl Evaluation {
    pub fn from_execution(result: &ExecutionResult, seed: u64) -> Self {
        Self {
            status: result.status,
            runtime: result.runtime_seconds,
            seed,
        }
    }

    pub fn wire_line(&self) -> String {
        format!(
            "{} {}, {:?}, 0, 0, {}",
            WIRE_PREFIX, self.status, self.runtime, self.seed
        )
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_line())
    }
}

pub trait TargetAlgorithm {
    fn evaluate(
        &mut self,
        instance: &Path,
        cutoff: Duration,
        weights: &WeightVector,
        seed: u64,
    ) -> Result<Evaluation>;
}

#[derive(Debug, Clone)]
pub struct TargetAlgorithmAdapter {
    executor: BoundedProcessExecutor,
    scorer: VariableOrderScorer,
}

impl TargetAlgorithmAdapter {
    pub fn new(executor: BoundedProcessExecutor) -> Self {
        Self {
            executor,
            scorer: VariableOrderScorer::raw_linear(),
        }
    }

    pub fn executor(&self) -> &BoundedProcessExecutor {
        &self.executor
    }
}

impl TargetAlgorithm for TargetAlgorithmAdapter {
    fn evaluate(
        &mut self,
        instance_path: &Path,
        cutoff: Duration,
        weights: &WeightVector,
        seed: u64,
    ) -> Result<Evaluation> {
        let instance = Instance::from_path(instance_path)?;
        let order = self.scorer.order(&instance, weights);
        debug!(
            instance = instance.name(),
            n_vars = order.len(),
            weights = %weights,
            "evaluating configuration"
        );
        let result = self.executor.run(instance_path, &order, cutoff)?;
        Ok(Evaluation::from_execution(&result, seed))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireInvocation {
    pub instance: PathBuf,
    pub specifics: String,
    /// Whole seconds: the raw cutoff plus one, rounded down.
    pub cutoff: Duration,
    pub runlength: i64,
    pub seed: u64,
    pub weights: WeightVector,
}

pub fn parse_wire_args<S: AsRef<str>>(args: &[S]) -> Result<WireInvocation> {
    if args.len() < 5 {
        return Err(RunnerError::configuration(format!(
            "expected 'instance specifics cutoff runlength seed [-name value]...', got {} argument(s)",
            args.len()
        )));
    }
    let arg = |i: usize| args[i].as_ref();

    let raw_cutoff: f64 = arg(2).parse().map_err(|_| {
        RunnerError::configuration(format!("cutoff '{}' is not a number", arg(2)))
    })?;
    if !(raw_cutoff.is_finite() && raw_cutoff >= 0.0) {
        return Err(RunnerError::configuration(format!(
            "cutoff must be a non-negative number, got {}",
            raw_cutoff
        )));
    }
    let runlength: i64 = arg(3).parse().map_err(|_| {
        RunnerError::configuration(format!("runlength '{}' is not an integer", arg(3)))
    })?;
    let seed: u64 = arg(4).parse().map_err(|_| {
        RunnerError::configuration(format!("seed '{}' is not a non-negative integer", arg(4)))
    })?;

    let rest = &args[5..];
    if rest.len() % 2 != 0 {
        return Err(RunnerError::configuration(
            "coefficient arguments must come in '-name value' pairs",
        ));
    }
    let mut pairs = Vec::with_capacity(rest.len() / 2);
    for pair in rest.chunks(2) {
        let flag = pair[0].as_ref();
        let name = flag.strip_prefix('-').ok_or_else(|| {
            RunnerError::configuration(format!("expected '-<name>', got '{}'", flag))
        })?;
        let value: f64 = pair[1].as_ref().parse().map_err(|_| {
            RunnerError::configuration(format!(
                "value '{}' for '{}' is not a number",
                pair[1].as_ref(),
                name
            ))
        })?;
        pairs.push((name.trim_start_matches('-').to_string(), value));
    }

    Ok(WireInvocation {
        instance: PathBuf::from(arg(0)),
        specifics: arg(1).to_string(),
        cutoff: Duration::from_secs_f64((raw_cutoff + 1.0).floor()),
        runlength,
        seed,
        weights: WeightVector::from_pairs(pairs)?,
    })
}

pub fn evaluate_wire<T: TargetAlgorithm + ?Sized>(
    invocation: &WireInvocation,
    target: &mut T,
) -> Result<Evaluation> {
    target.evaluate(
        &invocation.instance,
        invocation.cutoff,
        &invocation.weights,
        invocation.seed,
    )
}
