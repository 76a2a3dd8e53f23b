use crate::error::{Result, RunnerError};
use crate::instance::Instance;
use crate::weights::{Coefficient, WeightVector};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationPolicy {
    /// Properties are combined as-is. This is what the live search objective uses.
    RawLinear,
    /// Each property vector is divided by its own sum before weighting.
    UnitMass,
}

impl NormalizationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            NormalizationPolicy::RawLinear => "raw_linear",
            NormalizationPolicy::UnitMass => "unit_mass",
        }
    }
}

impl fmt::Display for NormalizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalizationPolicy {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw_linear" => Ok(NormalizationPolicy::RawLinear),
            "unit_mass" => Ok(NormalizationPolicy::UnitMass),
            other => Err(RunnerError::configuration(format!(
                "unknown normalization policy '{}' (expected raw_linear or unit_mass)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableOrderScorer {
    policy: NormalizationPolicy,
}

impl VariableOrderScorer {
    pub fn new(policy: NormalizationPolicy) -> Self {
        Self { policy }
    }

    pub fn raw_linear() -> Self {
        Self::new(NormalizationPolicy::RawLinear)
    }

    pub fn unit_mass() -> Self {
        Self::new(NormalizationPolicy::UnitMass)
    }

    pub fn policy(&self) -> NormalizationPolicy {
        self.policy
    }

    pub fn score(&self, instance: &Instance, weights: &WeightVector) -> Vec<f64> {
        let n = instance.n_vars();
        let mut scores = vec![0.0; n];
        for (coefficient, factor) in weights.iter() {
            if factor == 0.0 {
                continue;
            }
            let mut column = property(instance, coefficient);
            if self.policy == NormalizationPolicy::UnitMass && !normalize_unit_mass(&mut column) {
                continue;
            }
            for (s, p) in scores.iter_mut().zip(column) {
                *s += factor * p;
            }
        }
        scores
    }

    pub fn order(&self, instance: &Instance, weights: &WeightVector) -> Vec<usize> {
        order_from_scores(&self.score(instance, weights))
    }

    pub fn ranks(&self, instance: &Instance, weights: &WeightVector) -> Vec<usize> {
        let order = self.order(instance, weights);
        let mut ranks = vec![0; order.len()];
        for (position, var) in order.into_iter().enumerate() {
            ranks[var] = position;
        }
        ranks
    }

    pub fn normalized_ranks(&self, instance: &Instance, weights: &WeightVector) -> Vec<f64> {
        let n = instance.n_vars() as f64;
        self.ranks(instance, weights)
            .into_iter()
            .map(|r| r as f64 / n)
            .collect()
    }
}

/// Descending by score, ascending by index on ties. NaN sorts last.
pub fn order_from_scores(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| compare_desc(scores[a], scores[b]).then(a.cmp(&b)));
    order
}

fn compare_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        // +0.0 turns -0.0 into 0.0 so the two compare equal.
        (false, false) => (b + 0.0).total_cmp(&(a + 0.0)),
    }
}

fn property(instance: &Instance, coefficient: Coefficient) -> Vec<f64> {
    let n = instance.n_vars();
    let weights = instance.weights();
    let values = instance.values();
    let column = |i: usize| values.iter().map(move |row| row[i]);
    let aggregate = |i: usize, kind: Aggregate| -> f64 {
        match kind {
            Aggregate::Mean => column(i).sum::<f64>() / values.len() as f64,
            Aggregate::Max => column(i).fold(f64::NEG_INFINITY, f64::max),
            Aggregate::Min => column(i).fold(f64::INFINITY, f64::min),
        }
    };
    let by_weight = |i: usize, x: f64| -> f64 {
        if weights[i] == 0.0 {
            0.0
        } else {
            x / weights[i]
        }
    };

    (0..n)
        .map(|i| match coefficient {
            Coefficient::Weight => weights[i],
            Coefficient::AvgValue => aggregate(i, Aggregate::Mean),
            Coefficient::MaxValue => aggregate(i, Aggregate::Max),
            Coefficient::MinValue => aggregate(i, Aggregate::Min),
            Coefficient::AvgValueByWeight => by_weight(i, aggregate(i, Aggregate::Mean)),
            Coefficient::MaxValueByWeight => by_weight(i, aggregate(i, Aggregate::Max)),
            Coefficient::MinValueByWeight => by_weight(i, aggregate(i, Aggregate::Min)),
            Coefficient::Label => (n - i) as f64,
        })
        .collect()
}

#[derive(Clone, Copy)]
enum Aggregate {
    Mean,
    Max,
    Min,
}

fn normalize_unit_mass(column: &mut [f64]) -> bool {
    let total: f64 = column.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return false;
    }
    for x in column.iter_mut() {
        *x /= total;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worked_instance() -> Instance {
        Instance::from_parts(vec![10.0, 20.0, 5.0], vec![vec![5.0, 8.0, 1.0]]).expect("instance")
    }

    #[test]
    fn minimum_weight_orders_lightest_first() {
        let inst = worked_instance();
        let w = WeightVector::minimum_weight();
        let scorer = VariableOrderScorer::raw_linear();
        assert_eq!(scorer.score(&inst, &w), vec![-10.0, -20.0, -5.0]);
        assert_eq!(scorer.order(&inst, &w), vec![2, 0, 1]);
        assert_eq!(scorer.ranks(&inst, &w), vec![1, 2, 0]);
    }

    #[test]
    fn ties_keep_ascending_index() {
        assert_eq!(order_from_scores(&[1.0, 3.0, 1.0, 3.0]), vec![1, 3, 0, 2]);
        assert_eq!(order_from_scores(&[0.0, -0.0, 0.0]), vec![0, 1, 2]);
        assert_eq!(order_from_scores(&[f64::NAN, 2.0, 1.0]), vec![1, 2, 0]);
    }

    #[test]
    fn order_is_a_deterministic_permutation() {
        let weights = vec![3.0, 0.0, 7.0, 7.0, 1.0, 2.0];
        let values = vec![
            vec![4.0, 9.0, 1.0, 1.0, 6.0, 0.0],
            vec![2.0, 3.0, 8.0, 8.0, 5.0, 1.0],
        ];
        let inst = Instance::from_parts(weights, values).expect("instance");
        let w = WeightVector::new()
            .with(Coefficient::AvgValueByWeight, 0.8)
            .with(Coefficient::MaxValue, -0.3)
            .with(Coefficient::Weight, 0.1);
        let scorer = VariableOrderScorer::raw_linear();
        let first = scorer.order(&inst, &w);
        assert_eq!(first, scorer.order(&inst, &w));
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn zero_weight_ratio_is_zero() {
        let inst = Instance::from_parts(vec![0.0, 2.0], vec![vec![4.0, 4.0]]).expect("instance");
        let w = WeightVector::new().with(Coefficient::AvgValueByWeight, 1.0);
        assert_eq!(VariableOrderScorer::raw_linear().score(&inst, &w), vec![0.0, 2.0]);
    }

    #[test]
    fn unit_mass_rescales_each_property() {
        let inst = worked_instance();
        let w = WeightVector::new()
            .with(Coefficient::Weight, 1.0)
            .with(Coefficient::MaxValue, 1.0);
        let scores = VariableOrderScorer::unit_mass().score(&inst, &w);
        let expected = [10.0 / 35.0 + 5.0 / 14.0, 20.0 / 35.0 + 8.0 / 14.0, 5.0 / 35.0 + 1.0 / 14.0];
        for (got, want) in scores.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{} vs {}", got, want);
        }
        let total: f64 = scores.iter().sum();
        assert!((total - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unit_mass_skips_zero_sum_property() {
        let inst = Instance::from_parts(vec![1.0, 1.0], vec![vec![1.0, -1.0]]).expect("instance");
        let w = WeightVector::new()
            .with(Coefficient::AvgValue, 5.0)
            .with(Coefficient::Label, 1.0);
        let scores = VariableOrderScorer::unit_mass().score(&inst, &w);
        assert_eq!(order_from_scores(&scores), vec![0, 1]);
        assert!((scores[0] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn label_prefers_earlier_variables() {
        let inst = worked_instance();
        let w = WeightVector::new().with(Coefficient::Label, 1.0);
        let scorer = VariableOrderScorer::raw_linear();
        assert_eq!(scorer.score(&inst, &w), vec![3.0, 2.0, 1.0]);
        assert_eq!(scorer.normalized_ranks(&inst, &w), vec![0.0, 1.0 / 3.0, 2.0 / 3.0]);
    }

    #[test]
    fn policy_names_parse() {
        assert_eq!(
            "unit_mass".parse::<NormalizationPolicy>().expect("parse"),
            NormalizationPolicy::UnitMass
        );
        assert!("zscore".parse::<NormalizationPolicy>().is_err());
    }
}
