use crate::config::{ProblemKind, Width};
use crate::error::{Result, RunnerError};
use crate::fsutil::canonical_json_digest;
use crate::weights::{Coefficient, WeightVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameter {
    pub coefficient: Coefficient,
    pub lower: f64,
    pub upper: f64,
    pub default: f64,
}

impl Hyperparameter {
    pub fn new(coefficient: Coefficient, lower: f64, upper: f64, default: f64) -> Result<Self> {
        if !(lower.is_finite() && upper.is_finite() && lower <= upper) {
            return Err(RunnerError::configuration(format!(
                "coefficient '{}' has an empty range [{}, {}]",
                coefficient, lower, upper
            )));
        }
        if !(lower..=upper).contains(&default) {
            return Err(RunnerError::configuration(format!(
                "default {} of '{}' lies outside [{}, {}]",
                default, coefficient, lower, upper
            )));
        }
        Ok(Self {
            coefficient,
            lower,
            upper,
            default,
        })
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(self.lower, self.upper)
        }
    }

    pub fn span(&self) -> f64 {
        self.upper - self.lower
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpace {
    params: Vec<Hyperparameter>,
}

impl ConfigSpace {
    pub fn new(params: Vec<Hyperparameter>) -> Result<Self> {
        if params.is_empty() {
            return Err(RunnerError::configuration("configuration space is empty"));
        }
        for (i, p) in params.iter().enumerate() {
            if params[..i].iter().any(|q| q.coefficient == p.coefficient) {
                return Err(RunnerError::configuration(format!(
                    "coefficient '{}' appears twice in the configuration space",
                    p.coefficient
                )));
            }
        }
        Ok(Self { params })
    }

    /// Every core coefficient spans `[-width.default, width.default]`. Set
    /// covering adds `label`, whose lower bound becomes `1 - width.label`
    /// when `width.label < 1`. Defaults come from `defaults`, clamped into
    /// range, or `0` when absent.
    pub fn build(problem: ProblemKind, width: Width, defaults: &WeightVector) -> Result<Self> {
        let w = width.default;
        let mut params = Vec::with_capacity(Coefficient::ALL.len());
        for coefficient in Coefficient::ALL {
            let (lower, upper) = match coefficient {
                Coefficient::Label if !problem.uses_label_term() => continue,
                Coefficient::Label if width.label < 1.0 => (1.0 - width.label, w),
                _ => (-w, w),
            };
            let default = defaults
                .get(coefficient)
                .unwrap_or(0.0)
                .clamp(lower.min(upper), upper.max(lower));
            params.push(Hyperparameter::new(coefficient, lower, upper, default)?);
        }
        Self::new(params)
    }

    pub fn params(&self) -> &[Hyperparameter] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn coefficients(&self) -> impl Iterator<Item = Coefficient> + '_ {
        self.params.iter().map(|p| p.coefficient)
    }

    pub fn default_configuration(&self) -> WeightVector {
        let mut out = WeightVector::new();
        for p in &self.params {
            out.set(p.coefficient, p.default);
        }
        out
    }

    pub fn digest(&self) -> Result<String> {
        canonical_json_digest(self)
    }

    /// Projects onto the space: missing coefficients take their default,
    /// values are clipped, and coefficients outside the space are dropped.
    pub fn clamp(&self, weights: &WeightVector) -> WeightVector {
        let mut out = WeightVector::new();
        for p in &self.params {
            let value = weights.get(p.coefficient).unwrap_or(p.default);
            out.set(p.coefficient, p.clamp(value));
        }
        out
    }

    pub fn validate(&self, weights: &WeightVector) -> Result<()> {
        for (coefficient, _) in weights.iter() {
            if !self.params.iter().any(|p| p.coefficient == coefficient) {
                return Err(RunnerError::configuration(format!(
                    "coefficient '{}' is not part of the configuration space",
                    coefficient
                )));
            }
        }
        for p in &self.params {
            let value = weights.get(p.coefficient).ok_or_else(|| {
                RunnerError::configuration(format!("coefficient '{}' is missing", p.coefficient))
            })?;
            if !(p.lower..=p.upper).contains(&value) {
                return Err(RunnerError::configuration(format!(
                    "coefficient '{}' = {} lies outside [{}, {}]",
                    p.coefficient, value, p.lower, p.upper
                )));
            }
        }
        Ok(())
    }

    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> WeightVector {
        let mut out = WeightVector::new();
        for p in &self.params {
            let value = if p.span() > 0.0 {
                rng.random_range(p.lower..=p.upper)
            } else {
                p.lower
            };
            out.set(p.coefficient, value);
        }
        out
    }
}
