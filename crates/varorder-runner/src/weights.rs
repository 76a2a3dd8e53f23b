use crate::error::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coefficient {
    Weight,
    AvgValue,
    MaxValue,
    MinValue,
    AvgValueByWeight,
    MaxValueByWeight,
    MinValueByWeight,
    Label,
}

impl Coefficient {
    pub const CORE: [Coefficient; 7] = [
        Coefficient::Weight,
        Coefficient::AvgValue,
        Coefficient::MaxValue,
        Coefficient::MinValue,
        Coefficient::AvgValueByWeight,
        Coefficient::MaxValueByWeight,
        Coefficient::MinValueByWeight,
    ];

    pub const ALL: [Coefficient; 8] = [
        Coefficient::Weight,
        Coefficient::AvgValue,
        Coefficient::MaxValue,
        Coefficient::MinValue,
        Coefficient::AvgValueByWeight,
        Coefficient::MaxValueByWeight,
        Coefficient::MinValueByWeight,
        Coefficient::Label,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Coefficient::Weight => "weight",
            Coefficient::AvgValue => "avg_value",
            Coefficient::MaxValue => "max_value",
            Coefficient::MinValue => "min_value",
            Coefficient::AvgValueByWeight => "avg_value_by_weight",
            Coefficient::MaxValueByWeight => "max_value_by_weight",
            Coefficient::MinValueByWeight => "min_value_by_weight",
            Coefficient::Label => "label",
        }
    }

    pub fn is_ratio(self) -> bool {
        matches!(
            self,
            Coefficient::AvgValueByWeight
                | Coefficient::MaxValueByWeight
                | Coefficient::MinValueByWeight
        )
    }
}

impl fmt::Display for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Coefficient {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        Coefficient::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| {
                RunnerError::configuration(format!(
                    "unknown coefficient '{}' (expected one of: {})",
                    s,
                    Coefficient::ALL
                        .iter()
                        .map(|c| c.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

/// A point of the search space: one real value per present coefficient.
///
/// Serialized as a JSON object keyed by coefficient name, which is also the
/// shape of trajectory incumbents and of the `incb` label column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, f64>",
    into = "BTreeMap<String, f64>"
)]
pub struct WeightVector {
    values: BTreeMap<Coefficient, f64>,
}

impl WeightVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut out = WeightVector::new();
        for (name, value) in pairs {
            let coefficient: Coefficient = name.as_ref().parse()?;
            if !value.is_finite() {
                return Err(RunnerError::configuration(format!(
                    "coefficient '{}' has non-finite value {}",
                    coefficient, value
                )));
            }
            if out.values.insert(coefficient, value).is_some() {
                return Err(RunnerError::configuration(format!(
                    "coefficient '{}' given more than once",
                    coefficient
                )));
            }
        }
        Ok(out)
    }

    pub fn minimum_weight() -> Self {
        let mut out = WeightVector::new();
        for c in Coefficient::CORE {
            out.set(c, 0.0);
        }
        out.set(Coefficient::Weight, -1.0);
        out
    }

    pub fn with(mut self, coefficient: Coefficient, value: f64) -> Self {
        self.set(coefficient, value);
        self
    }

    pub fn set(&mut self, coefficient: Coefficient, value: f64) {
        self.values.insert(coefficient, value);
    }

    pub fn get(&self, coefficient: Coefficient) -> Option<f64> {
        self.values.get(&coefficient).copied()
    }

    pub fn contains(&self, coefficient: Coefficient) -> bool {
        self.values.contains_key(&coefficient)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Coefficient, f64)> + '_ {
        self.values.iter().map(|(c, v)| (*c, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json_string(&self) -> String {
        let named: BTreeMap<String, f64> = self.clone().into();
        serde_json::to_string(&named).unwrap_or_else(|_| "{}".to_string())
    }
}

impl TryFrom<BTreeMap<String, f64>> for WeightVector {
    type Error = RunnerError;

    fn try_from(value: BTreeMap<String, f64>) -> Result<Self> {
        WeightVector::from_pairs(value)
    }
}

impl From<WeightVector> for BTreeMap<String, f64> {
    fn from(value: WeightVector) -> Self {
        value
            .values
            .into_iter()
            .map(|(c, v)| (c.name().to_string(), v))
            .collect()
    }
}

impl fmt::Display for WeightVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coefficient_names_round_trip_through_from_str() {
        for c in Coefficient::ALL {
            assert_eq!(c.name().parse::<Coefficient>().expect("known name"), c);
        }
    }

    #[test]
    fn unknown_coefficient_is_a_configuration_error() {
        let err = WeightVector::from_pairs([("weight", 1.0), ("avg_profit", 0.5)])
            .expect_err("unknown name must fail");
        assert!(err.is_configuration(), "unexpected error: {}", err);
        assert!(err.to_string().contains("avg_profit"));
    }

    #[test]
    fn duplicate_and_non_finite_values_are_rejected() {
        assert!(WeightVector::from_pairs([("weight", 1.0), ("weight", 2.0)]).is_err());
        assert!(WeightVector::from_pairs([("max_value", f64::NAN)]).is_err());
    }

    #[test]
    fn serializes_as_name_keyed_object() {
        let w = WeightVector::minimum_weight();
        let json = serde_json::to_value(&w).expect("serialize");
        assert_eq!(json["weight"], -1.0);
        assert_eq!(json["min_value_by_weight"], 0.0);
        assert_eq!(json.as_object().map(|o| o.len()), Some(7));

        let back: WeightVector = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, w);
    }

    #[test]
    fn deserializing_unknown_name_fails() {
        let raw = r#"{"weight": 1.0, "bogus": 2.0}"#;
        assert!(serde_json::from_str::<WeightVector>(raw).is_err());
    }
}
