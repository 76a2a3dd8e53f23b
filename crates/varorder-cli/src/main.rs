use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use varorder_runner::search::{static_incumbent, SearchPlan};
use varorder_runner::{
    BoundedProcessExecutor, Instance, LabelConfig, NormalizationPolicy, RunMode, SearchConfig,
    SearchOutcome, SolverConfig, TargetAlgorithmAdapter, VariableOrderScorer, WeightVector,
};

#[derive(Parser)]
#[command(
    name = "varorder",
    version = "0.3.0",
    about = "Variable-ordering search for multi-objective BDD construction"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    #[value(name = "raw_linear")]
    RawLinear,
    #[value(name = "unit_mass")]
    UnitMass,
}

impl From<PolicyArg> for NormalizationPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::RawLinear => NormalizationPolicy::RawLinear,
            PolicyArg::UnitMass => NormalizationPolicy::UnitMass,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    #[value(name = "one")]
    One,
    #[value(name = "all")]
    All,
}

impl From<ModeArg> for RunMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::One => RunMode::One,
            ModeArg::All => RunMode::All,
        }
    }
}

#[derive(clap::Args, Debug, Default)]
struct SearchOverrides {
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    split: Option<String>,
    #[arg(long)]
    from_pid: Option<u64>,
    #[arg(long)]
    num_instances: Option<u64>,
    #[arg(long)]
    n_objs: Option<u32>,
    #[arg(long)]
    n_vars: Option<u32>,
    #[arg(long)]
    cutoff: Option<f64>,
    #[arg(long)]
    wallclock: Option<f64>,
    #[arg(long)]
    max_evaluations: Option<u64>,
    #[arg(long)]
    init_incumbent: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    #[arg(long)]
    restore: bool,
    #[arg(long)]
    new_cutoff: Option<f64>,
    #[arg(long)]
    new_wallclock: Option<f64>,
}

impl SearchOverrides {
    fn apply(self, config: &mut SearchConfig) -> Result<()> {
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.split {
            config.instances.split = v;
        }
        if let Some(v) = self.from_pid {
            config.instances.from_pid = v;
        }
        if let Some(v) = self.num_instances {
            config.instances.num_instances = v;
        }
        if let Some(v) = self.n_objs {
            config.problem.n_objs = v;
        }
        if let Some(v) = self.n_vars {
            config.problem.n_vars = v;
        }
        if self.cutoff.is_some() {
            config.cutoff_time = self.cutoff;
        }
        if self.wallclock.is_some() {
            config.wallclock_limit = self.wallclock;
        }
        if self.max_evaluations.is_some() {
            config.max_evaluations = self.max_evaluations;
        }
        if let Some(v) = self.init_incumbent {
            config.init_incumbent = v;
        }
        if let Some(v) = self.mode {
            config.mode = v.into();
        }
        if self.restore {
            config.restore.restore_run = true;
        }
        if let Some(v) = self.new_cutoff {
            config.restore.new_cutoff_time = v;
        }
        if let Some(v) = self.new_wallclock {
            config.restore.new_wallclock_limit = v;
        }
        config.validate()?;
        Ok(())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// `instance specifics cutoff runlength seed [-name value]...`; prints one result line.
    Evaluate {
        #[arg(
            required = true,
            num_args = 5..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        args: Vec<String>,
    },
    Order {
        instance: PathBuf,
        /// JSON object of coefficient values.
        #[arg(long, conflicts_with = "incumbent")]
        weights: Option<String>,
        /// One of the static incumbent tables.
        #[arg(long, default_value = "canonical")]
        incumbent: String,
        #[arg(long, value_enum, default_value = "raw_linear")]
        policy: PolicyArg,
        /// Print each variable's rank instead of the order.
        #[arg(long)]
        ranks: bool,
        #[arg(long, requires = "ranks")]
        normalized: bool,
        #[arg(long)]
        json: bool,
    },
    Search {
        #[arg(long)]
        config: PathBuf,
        #[command(flatten)]
        overrides: SearchOverrides,
        #[arg(long)]
        json: bool,
    },
    Describe {
        #[arg(long)]
        config: PathBuf,
        #[command(flatten)]
        overrides: SearchOverrides,
        #[arg(long)]
        json: bool,
    },
    Labels {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    enable_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn enable_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Evaluate { args } => {
            let invocation = varorder_runner::parse_wire_args(&args)?;
            let solver = SolverConfig::from_env()?;
            let mut adapter = TargetAlgorithmAdapter::new(BoundedProcessExecutor::from_config(&solver));
            let evaluation = varorder_runner::evaluate_wire(&invocation, &mut adapter)?;
            println!("{}", evaluation.wire_line());
        }
        Commands::Order {
            instance,
            weights,
            incumbent,
            policy,
            ranks,
            normalized,
            json,
        } => {
            let weights = match weights {
                Some(raw) => serde_json::from_str::<WeightVector>(&raw)
                    .context("--weights must be a JSON object of coefficient values")?,
                None => static_incumbent(&incumbent)
                    .with_context(|| format!("unknown incumbent table '{}'", incumbent))?,
            };
            let parsed = Instance::from_path(&instance)?;
            let scorer = VariableOrderScorer::new(policy.into());
            let values: Value = if ranks && normalized {
                json!(scorer.normalized_ranks(&parsed, &weights))
            } else if ranks {
                json!(scorer.ranks(&parsed, &weights))
            } else {
                json!(scorer.order(&parsed, &weights))
            };
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "order",
                    "instance": instance.display().to_string(),
                    "policy": scorer.policy().as_str(),
                    "weights": weights,
                    "kind": if ranks { "ranks" } else { "order" },
                    "values": values
                })));
            }
            let line = values
                .as_array()
                .map(|xs| {
                    xs.iter()
                        .map(|x| x.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();
            println!("{}", line);
        }
        Commands::Search {
            config,
            overrides,
            json,
        } => {
            let search_config = load_search_config(&config, overrides)?;
            let plan = varorder_runner::plan_search(&search_config)?;
            info!(
                config = %config.display(),
                runs = plan.batches.len(),
                mode = plan.mode.as_str(),
                "starting search"
            );
            let mut adapter =
                TargetAlgorithmAdapter::new(BoundedProcessExecutor::from_config(&search_config.solver));
            let outcomes = varorder_runner::run_search(&plan, &mut adapter)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "search",
                    "plan": plan_to_json(&plan),
                    "runs": outcomes.iter().map(outcome_to_json).collect::<Vec<_>>()
                })));
            }
            for outcome in &outcomes {
                print_outcome(outcome);
            }
        }
        Commands::Describe {
            config,
            overrides,
            json,
        } => {
            let search_config = load_search_config(&config, overrides)?;
            let plan = varorder_runner::plan_search(&search_config)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "plan": plan_to_json(&plan)
                })));
            }
            print_plan(&plan);
        }
        Commands::Labels { config, json } => {
            let label_config = LabelConfig::load(&config)?;
            let summary = varorder_runner::aggregate(&label_config)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "labels",
                    "summary": summary
                })));
            }
            println!("runs: {}", summary.runs);
            println!("labels: {}", summary.labels);
            println!("no_traj: {}", summary.no_traj);
            println!("no_traj_lines: {}", summary.no_traj_lines);
            println!("rerun_cases: {}", summary.rerun_cases);
            for path in &summary.written {
                println!("wrote: {}", path.display());
            }
        }
    }
    Ok(None)
}

fn load_search_config(path: &Path, overrides: SearchOverrides) -> Result<SearchConfig> {
    let mut config = SearchConfig::load(path)
        .with_context(|| format!("failed to load search config {}", path.display()))?;
    overrides.apply(&mut config)?;
    Ok(config)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<varorder_runner::RunnerError>() {
        Some(varorder_runner::RunnerError::Configuration(_)) => "configuration_error",
        Some(varorder_runner::RunnerError::Instance { .. }) => "instance_error",
        Some(varorder_runner::RunnerError::Checkpoint(_)) => "checkpoint_error",
        Some(varorder_runner::RunnerError::File { .. }) => "io_error",
        _ => "command_failed",
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Order { json, .. }
        | Commands::Search { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Labels { json, .. } => *json,
        Commands::Evaluate { .. } => false,
    }
}

fn plan_to_json(plan: &SearchPlan) -> Value {
    json!({
        "problem": plan.problem,
        "size": plan.size,
        "mode": plan.mode.as_str(),
        "seed": plan.seed,
        "restore": plan.restore,
        "init_incumbent": plan.init_incumbent,
        "budget": plan.budget,
        "par_factor": plan.par_factor,
        "config_space": plan.space,
        "config_space_digest": plan.space_digest,
        "output_dir": plan.output_dir.display().to_string(),
        "batches": plan.batches
    })
}

fn outcome_to_json(outcome: &SearchOutcome) -> Value {
    json!({
        "run_id": outcome.run_id,
        "run_dir": outcome.run_dir.display().to_string(),
        "stop_reason": outcome.stop_reason,
        "incumbent": outcome.incumbent,
        "incumbent_cost": outcome.incumbent_cost,
        "n_evaluations": outcome.stats.n_evaluations,
        "wallclock_time_used": outcome.stats.wallclock_time_used
    })
}

fn print_plan(plan: &SearchPlan) {
    println!("problem: {}", plan.problem);
    println!("size: {}", plan.size);
    println!("mode: {}", plan.mode.as_str());
    println!("seed: {}", plan.seed);
    println!("restore: {}", plan.restore);
    println!("init_incumbent: {}", plan.init_incumbent);
    println!("cutoff_time: {}", plan.budget.cutoff_time);
    println!("wallclock_limit: {}", plan.budget.wallclock_limit);
    match plan.budget.max_evaluations {
        Some(n) => println!("max_evaluations: {}", n),
        None => println!("max_evaluations: none"),
    }
    println!("par_factor: {}", plan.par_factor);
    println!("config_space_digest: {}", plan.space_digest);
    for p in plan.space.params() {
        println!(
            "param: {} [{}, {}] default {}",
            p.coefficient, p.lower, p.upper, p.default
        );
    }
    println!("output_dir: {}", plan.output_dir.display());
    for (i, batch) in plan.batches.iter().enumerate() {
        for instance in batch {
            println!("batch {}: {}", i, instance.display());
        }
    }
}

fn print_outcome(outcome: &SearchOutcome) {
    println!("run_id: {}", outcome.run_id);
    println!("run_dir: {}", outcome.run_dir.display());
    println!("stop_reason: {:?}", outcome.stop_reason);
    println!("incumbent_cost: {}", outcome.incumbent_cost);
    println!("incumbent: {}", outcome.incumbent);
    println!("n_evaluations: {}", outcome.stats.n_evaluations);
}
