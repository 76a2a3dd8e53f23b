pub mod adapter;
pub mod config;
pub mod error;
pub mod executor;
pub mod fsutil;
pub mod instance;
pub mod labels;
pub mod scorer;
pub mod search;
pub mod weights;

pub use adapter::{
    evaluate_wire, parse_wire_args, Evaluation, TargetAlgorithm, TargetAlgorithmAdapter,
    WireInvocation,
};
pub use config::{LabelConfig, ProblemKind, RunMode, SearchConfig, SolverConfig};
pub use error::{Result, RunnerError};
pub use executor::{BoundedProcessExecutor, ExecutionResult, Status};
pub use instance::{Instance, InstanceFormat};
pub use labels::{aggregate, LabelSummary};
pub use scorer::{NormalizationPolicy, VariableOrderScorer};
pub use search::{plan_search, run_search, SearchOutcome, SearchPlan};
pub use weights::{Coefficient, WeightVector};
