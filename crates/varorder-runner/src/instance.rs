// Read-only problem instances.
//
// Two text formats are understood. Knapsack files:
//
// ```text
// <n_vars>
// <n_objs>
// <value row> x n_objs
// <weight row>
// <capacity>
// ```
//
// Set-style (covering/packing) files:
//
// ```text
// <n_vars> <n_cons>
// <n_objs>
// <value row> x n_objs
// ( <count>
//   <1-based variable indices> ) x n_cons
// ```
//
// For set-style instances a variable's weight is the number of constraints
// it appears in. Variables are never dropped, so indices stay `[0, n_vars)`.

use crate::error::{Result, RunnerError};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceFormat {
    Knapsack,
    SetProblem,
}

impl InstanceFormat {
    /// Picks the format from the acronym that starts an instance stem
    /// (`kp_7_3_60_0` is knapsack, `bp_`/`sc_`/`sp_` are set-style).
    pub fn from_stem(stem: &str) -> Result<Self> {
        let acronym = stem.split('_').next().unwrap_or("");
        match acronym {
            "kp" => Ok(InstanceFormat::Knapsack),
            "bp" | "sc" | "sp" => Ok(InstanceFormat::SetProblem),
            other => Err(RunnerError::configuration(format!(
                "cannot infer instance format from stem '{}' (acronym '{}')",
                stem, other
            ))),
        }
    }
}

pub fn pid_from_stem(stem: &str) -> Option<u64> {
    stem.rsplit('_').next().and_then(|s| s.parse().ok())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    name: String,
    weights: Vec<f64>,
    values: Vec<Vec<f64>>,
    capacity: Option<f64>,
    constraints: Vec<Vec<usize>>,
}

impl Instance {
    pub fn from_parts(weights: Vec<f64>, values: Vec<Vec<f64>>) -> Result<Self> {
        let instance = Instance {
            name: "inline".to_string(),
            weights,
            values,
            capacity: None,
            constraints: Vec::new(),
        };
        instance.check_shape("inline")?;
        Ok(instance)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let stem = file_stem(path);
        let format = InstanceFormat::from_stem(&stem)?;
        Self::from_path_with_format(path, format)
    }

    pub fn from_path_with_format(path: &Path, format: InstanceFormat) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            RunnerError::instance(path.display().to_string(), format!("unreadable: {}", e))
        })?;
        Self::parse(&text, format, &file_stem(path))
    }

    pub fn parse(text: &str, format: InstanceFormat, name: &str) -> Result<Self> {
        let mut lines = LineReader::new(text, name);
        let instance = match format {
            InstanceFormat::Knapsack => parse_knapsack(&mut lines, name)?,
            InstanceFormat::SetProblem => parse_set_problem(&mut lines, name)?,
        };
        instance.check_shape(name)?;
        Ok(instance)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_vars(&self) -> usize {
        self.weights.len()
    }

    pub fn n_objs(&self) -> usize {
        self.values.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn capacity(&self) -> Option<f64> {
        self.capacity
    }

    pub fn constraints(&self) -> &[Vec<usize>] {
        &self.constraints
    }

    fn check_shape(&self, name: &str) -> Result<()> {
        if self.weights.is_empty() {
            return Err(RunnerError::instance(name, "instance has no variables"));
        }
        if self.values.is_empty() {
            return Err(RunnerError::instance(name, "instance has no objective rows"));
        }
        for (i, row) in self.values.iter().enumerate() {
            if row.len() != self.weights.len() {
                return Err(RunnerError::instance(
                    name,
                    format!(
                        "objective row {} has {} entries, expected {}",
                        i,
                        row.len(),
                        self.weights.len()
                    ),
                ));
            }
        }
        Ok(())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_knapsack(lines: &mut LineReader<'_>, name: &str) -> Result<Instance> {
    let n_vars = lines.single_usize("n_vars")?;
    let n_objs = lines.single_usize("n_objs")?;
    let mut values = Vec::with_capacity(n_objs);
    for i in 0..n_objs {
        values.push(lines.row(&format!("value row {}", i), n_vars)?);
    }
    let weights = lines.row("weight row", n_vars)?;
    let capacity = lines.numbers("capacity")?.first().copied();
    Ok(Instance {
        name: name.to_string(),
        weights,
        values,
        capacity,
        constraints: Vec::new(),
    })
}

fn parse_set_problem(lines: &mut LineReader<'_>, name: &str) -> Result<Instance> {
    let header = lines.numbers("n_vars n_cons")?;
    if header.len() < 2 {
        return Err(RunnerError::instance(
            name,
            "header must contain n_vars and n_cons",
        ));
    }
    let n_vars = as_count(header[0], name, "n_vars")?;
    let n_cons = as_count(header[1], name, "n_cons")?;
    let n_objs = lines.single_usize("n_objs")?;
    let mut values = Vec::with_capacity(n_objs);
    for i in 0..n_objs {
        values.push(lines.row(&format!("value row {}", i), n_vars)?);
    }

    let mut weights = vec![0.0; n_vars];
    let mut constraints = Vec::with_capacity(n_cons);
    for c in 0..n_cons {
        let declared = lines.single_usize(&format!("constraint {} size", c))?;
        let members = lines.numbers(&format!("constraint {} members", c))?;
        if members.len() != declared {
            return Err(RunnerError::instance(
                name,
                format!(
                    "constraint {} declares {} members but lists {}",
                    c,
                    declared,
                    members.len()
                ),
            ));
        }
        let mut vars = Vec::with_capacity(members.len());
        for m in members {
            let one_based = as_count(m, name, "constraint member")?;
            if one_based == 0 || one_based > n_vars {
                return Err(RunnerError::instance(
                    name,
                    format!("constraint {} references variable {} outside 1..={}", c, one_based, n_vars),
                ));
            }
            weights[one_based - 1] += 1.0;
            vars.push(one_based - 1);
        }
        constraints.push(vars);
    }

    Ok(Instance {
        name: name.to_string(),
        weights,
        values,
        capacity: None,
        constraints,
    })
}

fn as_count(value: f64, name: &str, what: &str) -> Result<usize> {
    if value < 0.0 || value.fract() != 0.0 {
        return Err(RunnerError::instance(
            name,
            format!("{} must be a non-negative integer, found {}", what, value),
        ));
    }
    Ok(value as usize)
}

struct LineReader<'a> {
    lines: std::iter::Filter<std::str::Lines<'a>, fn(&&str) -> bool>,
    name: &'a str,
}

impl<'a> LineReader<'a> {
    fn new(text: &'a str, name: &'a str) -> Self {
        fn non_blank(line: &&str) -> bool {
            !line.trim().is_empty()
        }
        Self {
            lines: text.lines().filter(non_blank as fn(&&str) -> bool),
            name,
        }
    }

    fn numbers(&mut self, what: &str) -> Result<Vec<f64>> {
        let line = self
            .lines
            .next()
            .ok_or_else(|| RunnerError::instance(self.name, format!("missing {}", what)))?;
        line.split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| {
                    RunnerError::instance(self.name, format!("bad number '{}' in {}", tok, what))
                })
            })
            .collect()
    }

    fn row(&mut self, what: &str, expected: usize) -> Result<Vec<f64>> {
        let row = self.numbers(what)?;
        if row.len() != expected {
            return Err(RunnerError::instance(
                self.name,
                format!("{} has {} entries, expected {}", what, row.len(), expected),
            ));
        }
        Ok(row)
    }

    fn single_usize(&mut self, what: &str) -> Result<usize> {
        let row = self.numbers(what)?;
        let first = row
            .first()
            .copied()
            .ok_or_else(|| RunnerError::instance(self.name, format!("empty {}", what)))?;
        as_count(first, self.name, what)
    }
}
