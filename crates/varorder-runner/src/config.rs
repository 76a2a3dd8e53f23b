use crate::error::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemKind {
    Knapsack,
    SetCovering,
    SetPacking,
}

impl ProblemKind {
    pub fn name(self) -> &'static str {
        match self {
            ProblemKind::Knapsack => "knapsack",
            ProblemKind::SetCovering => "setcovering",
            ProblemKind::SetPacking => "setpacking",
        }
    }

    /// Knapsack sizes are `<n_objs>_<n_vars>`, set problems `<n_vars>_<n_objs>`.
    pub fn size_key(self, n_objs: u32, n_vars: u32) -> String {
        match self {
            ProblemKind::Knapsack => format!("{}_{}", n_objs, n_vars),
            ProblemKind::SetCovering | ProblemKind::SetPacking => {
                format!("{}_{}", n_vars, n_objs)
            }
        }
    }

    pub fn parse_size(self, size: &str) -> Result<(u32, u32)> {
        let parts: Vec<&str> = size.split('_').collect();
        let parsed: Option<Vec<u32>> = parts.iter().map(|p| p.parse().ok()).collect();
        match parsed.as_deref() {
            Some([a, b]) => Ok(match self {
                ProblemKind::Knapsack => (*a, *b),
                ProblemKind::SetCovering | ProblemKind::SetPacking => (*b, *a),
            }),
            _ => Err(RunnerError::configuration(format!(
                "size '{}' is not of the form <int>_<int>",
                size
            ))),
        }
    }

    pub fn reference_size(self) -> &'static str {
        match self {
            ProblemKind::Knapsack => "3_60",
            ProblemKind::SetCovering | ProblemKind::SetPacking => "100_3",
        }
    }

    pub fn uses_label_term(self) -> bool {
        self == ProblemKind::SetCovering
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProblemKind {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "knapsack" => Ok(ProblemKind::Knapsack),
            "setcovering" => Ok(ProblemKind::SetCovering),
            "setpacking" => Ok(ProblemKind::SetPacking),
            other => Err(RunnerError::configuration(format!(
                "unknown problem '{}' (expected knapsack, setcovering or setpacking)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    One,
    All,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::One => "one",
            RunMode::All => "all",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one" => Ok(RunMode::One),
            "all" => Ok(RunMode::All),
            other => Err(RunnerError::configuration(format!(
                "unknown mode '{}' (expected one or all)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverConfig {
    pub bin_path: PathBuf,
    pub bin_name: String,
    pub prob_id: u32,
    #[serde(default)]
    pub preprocess: u32,
    #[serde(default = "default_mem_limit_gb")]
    pub mem_limit_gb: f64,
    #[serde(default)]
    pub mask_mem_limit: bool,
}

impl SolverConfig {
    pub fn binary(&self) -> PathBuf {
        self.bin_path.join(&self.bin_name)
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    RunnerError::configuration(format!("environment variable '{}' is not set", key))
                })
        };
        let bin_path = PathBuf::from(required("bin_path")?);
        let bin_name = required("bin_name")?;
        let prob_id = parse_env_number::<u32>("prob_id", &required("prob_id")?)?;
        let preprocess = match lookup("preprocess") {
            Some(raw) => parse_env_number::<u32>("preprocess", &raw)?,
            None => 0,
        };
        let mem_limit_gb = match lookup("mem_limit") {
            Some(raw) => parse_env_number::<f64>("mem_limit", &raw)?,
            None => default_mem_limit_gb(),
        };
        let mask_mem_limit = match lookup("mask_mem_limit") {
            Some(raw) => parse_env_flag("mask_mem_limit", &raw)?,
            None => false,
        };
        Ok(Self {
            bin_path,
            bin_name,
            prob_id,
            preprocess,
            mem_limit_gb,
            mask_mem_limit,
        })
    }
}

fn parse_env_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        RunnerError::configuration(format!("environment variable '{}' is not a number: '{}'", key, raw))
    })
}

fn parse_env_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(RunnerError::configuration(format!(
            "environment variable '{}' is not a flag: '{}'",
            key, raw
        ))),
    }
}

fn default_mem_limit_gb() -> f64 {
    16.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProblemConfig {
    pub name: ProblemKind,
    pub n_objs: u32,
    pub n_vars: u32,
}

impl ProblemConfig {
    pub fn size_key(&self) -> String {
        self.name.size_key(self.n_objs, self.n_vars)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSelection {
    pub root: PathBuf,
    #[serde(default = "default_split")]
    pub split: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub from_pid: u64,
    #[serde(default = "default_num_instances")]
    pub num_instances: u64,
}

fn default_split() -> String {
    "train".to_string()
}

fn default_num_instances() -> u64 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Width {
    #[serde(default = "default_width")]
    pub default: f64,
    #[serde(default = "default_width")]
    pub label: f64,
}

impl Default for Width {
    fn default() -> Self {
        Self {
            default: default_width(),
            label: default_width(),
        }
    }
}

fn default_width() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestoreConfig {
    #[serde(default)]
    pub restore_run: bool,
    #[serde(default = "default_new_cutoff")]
    pub new_cutoff_time: f64,
    #[serde(default = "default_new_wallclock")]
    pub new_wallclock_limit: f64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            restore_run: false,
            new_cutoff_time: default_new_cutoff(),
            new_wallclock_limit: default_new_wallclock(),
        }
    }
}

fn default_new_cutoff() -> f64 {
    120.0
}

fn default_new_wallclock() -> f64 {
    600.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    pub problem: ProblemConfig,
    pub solver: SolverConfig,
    pub instances: InstanceSelection,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub cutoff_time: Option<f64>,
    #[serde(default)]
    pub wallclock_limit: Option<f64>,
    #[serde(default = "default_init_incumbent")]
    pub init_incumbent: String,
    #[serde(default)]
    pub incumbent_table: Option<PathBuf>,
    #[serde(default)]
    pub width: Width,
    #[serde(default)]
    pub restore: RestoreConfig,
    pub output_root: PathBuf,
    #[serde(default = "default_par_factor")]
    pub par_factor: f64,
    #[serde(default)]
    pub max_evaluations: Option<u64>,
}

fn default_seed() -> u64 {
    777
}

fn default_init_incumbent() -> String {
    "canonical".to_string()
}

fn default_par_factor() -> f64 {
    10.0
}

impl SearchConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: SearchConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            RunnerError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cutoff_time", self.cutoff_time),
            ("wallclock_limit", self.wallclock_limit),
        ] {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    return Err(RunnerError::configuration(format!(
                        "{} must be positive, found {}",
                        name, v
                    )));
                }
            }
        }
        if !(self.restore.new_cutoff_time > 0.0 && self.restore.new_wallclock_limit > 0.0) {
            return Err(RunnerError::configuration(
                "restore budgets must be positive",
            ));
        }
        if !(self.width.default.is_finite() && self.width.default > 0.0) {
            return Err(RunnerError::configuration(format!(
                "width.default must be positive, found {}",
                self.width.default
            )));
        }
        if !(self.par_factor.is_finite() && self.par_factor >= 1.0) {
            return Err(RunnerError::configuration(format!(
                "par_factor must be at least 1, found {}",
                self.par_factor
            )));
        }
        if self.instances.num_instances == 0 {
            return Err(RunnerError::configuration("num_instances must be at least 1"));
        }
        Ok(())
    }

    pub fn size_key(&self) -> String {
        self.problem.size_key()
    }

    pub fn split_dir(&self) -> PathBuf {
        self.instances
            .root
            .join(self.size_key())
            .join(&self.instances.split)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_root
            .join(self.size_key())
            .join(&self.instances.split)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitSizes {
    pub n_train: u64,
    pub n_val: u64,
    pub n_test: u64,
}

impl Default for SplitSizes {
    fn default() -> Self {
        Self {
            n_train: 1000,
            n_val: 100,
            n_test: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RerunConfig {
    #[serde(default = "default_rerun_config")]
    pub search_config: PathBuf,
    #[serde(default = "default_rerun_incumbent")]
    pub init_incumbent: String,
    #[serde(default)]
    pub restore: bool,
    #[serde(default)]
    pub new_cutoff_time: Option<f64>,
    #[serde(default)]
    pub new_wallclock_limit: Option<f64>,
}

impl Default for RerunConfig {
    fn default() -> Self {
        Self {
            search_config: default_rerun_config(),
            init_incumbent: default_rerun_incumbent(),
            restore: false,
            new_cutoff_time: None,
            new_wallclock_limit: None,
        }
    }
}

fn default_rerun_config() -> PathBuf {
    PathBuf::from("search.yaml")
}

fn default_rerun_incumbent() -> String {
    "min_weight".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelConfig {
    pub smac_run_path: PathBuf,
    pub label_path: PathBuf,
    pub problem: ProblemKind,
    pub size: String,
    pub seeds: Vec<u64>,
    pub wallclock_limit: f64,
    pub cutoff_time: f64,
    #[serde(default)]
    pub splits: SplitSizes,
    #[serde(default)]
    pub rerun: RerunConfig,
}

impl LabelConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: LabelConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            RunnerError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.seeds.is_empty() {
            return Err(RunnerError::configuration("seeds must not be empty"));
        }
        self.problem.parse_size(&self.size)?;
        if !(self.wallclock_limit > 0.0 && self.cutoff_time > 0.0) {
            return Err(RunnerError::configuration(
                "wallclock_limit and cutoff_time must be positive",
            ));
        }
        Ok(())
    }
}
