use crate::config::ProblemKind;
use crate::error::{Result, RunnerError};
use crate::weights::{Coefficient, WeightVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

const OPTIMIZED_PREFIX: &str = "smac_optimized/";
const BUNDLED_TABLE: &str = include_str!("optimized.yaml");

pub const STATIC_TABLES: [&str; 3] = ["canonical", "min_weight", "max_weight"];

pub fn static_incumbent(name: &str) -> Option<WeightVector> {
    let weight = match name {
        "canonical" => 0.0,
        "min_weight" => -1.0,
        "max_weight" => 1.0,
        _ => return None,
    };
    let mut out = WeightVector::new();
    for c in Coefficient::CORE {
        out.set(c, 0.0);
    }
    out.set(Coefficient::Weight, weight);
    Some(out)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptimizedTable {
    entries: BTreeMap<ProblemKind, BTreeMap<String, BTreeMap<String, WeightVector>>>,
}

impl OptimizedTable {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn bundled() -> Result<Self> {
        Self::from_yaml_str(BUNDLED_TABLE)
    }

    pub fn with_overrides(path: Option<&Path>) -> Result<Self> {
        let mut table = Self::bundled()?;
        if let Some(path) = path {
            table.overlay(Self::load(path)?);
        }
        Ok(table)
    }

    pub fn overlay(&mut self, other: OptimizedTable) {
        for (problem, sizes) in other.entries {
            for (size, keys) in sizes {
                for (key, weights) in keys {
                    self.insert(problem, &size, &key, weights);
                }
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            RunnerError::configuration(format!(
                "cannot read incumbent table {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn insert(&mut self, problem: ProblemKind, size: &str, key: &str, weights: WeightVector) {
        self.entries
            .entry(problem)
            .or_default()
            .entry(size.to_string())
            .or_default()
            .insert(key.to_string(), weights);
    }

    /// Falls back to the problem's reference size when `size` has no entry.
    pub fn lookup(&self, problem: ProblemKind, size: &str, key: &str) -> Result<WeightVector> {
        let sizes = self.entries.get(&problem).ok_or_else(|| {
            RunnerError::configuration(format!("no optimized incumbents for problem '{}'", problem))
        })?;
        let by_key = match sizes.get(size) {
            Some(by_key) => by_key,
            None => {
                let fallback = problem.reference_size();
                warn!(problem = %problem, size, fallback, "size not in incumbent table, using reference size");
                sizes.get(fallback).ok_or_else(|| {
                    RunnerError::configuration(format!(
                        "no optimized incumbents for {} size {} or reference size {}",
                        problem, size, fallback
                    ))
                })?
            }
        };
        by_key.get(key).cloned().ok_or_else(|| {
            RunnerError::configuration(format!(
                "no optimized incumbent '{}' for {} size {}",
                key, problem, size
            ))
        })
    }
}

/// Resolves an `init_incumbent` setting to a weight vector. Without a table
/// the bundled one is used.
pub fn resolve_incumbent(
    setting: &str,
    problem: ProblemKind,
    size: &str,
    table: Option<&OptimizedTable>,
) -> Result<WeightVector> {
    if let Some(key) = setting.strip_prefix(OPTIMIZED_PREFIX) {
        if key.is_empty() {
            return Err(RunnerError::configuration(
                "smac_optimized incumbent needs a key (smac_optimized/<key>)",
            ));
        }
        return match table {
            Some(table) => table.lookup(problem, size, key),
            None => OptimizedTable::bundled()?.lookup(problem, size, key),
        };
    }
    static_incumbent(setting).ok_or_else(|| {
        RunnerError::configuration(format!(
            "unknown init_incumbent '{}' (expected one of {} or {}<key>)",
            setting,
            STATIC_TABLES.join(", "),
            OPTIMIZED_PREFIX
        ))
    })
}
