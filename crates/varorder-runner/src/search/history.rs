use crate::error::{Result, RunnerError};
use crate::executor::Status;
use crate::weights::WeightVector;
use serde::{Deserialize, Serialize};

/// Cost of a configuration whose evaluation crashed, and of the trajectory's
/// initial entry before anything has been evaluated.
pub const CRASH_COST: f64 = 2147483647.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub sequence: u64,
    pub configuration: WeightVector,
    pub instance_id: String,
    pub seed: u64,
    pub cost: f64,
    pub status: Status,
    pub runtime: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    records: Vec<TrialRecord>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<TrialRecord>) -> Result<Self> {
        let mut history = Self::new();
        for record in records {
            let expected = history.next_sequence();
            if record.sequence != expected {
                return Err(RunnerError::Checkpoint(format!(
                    "run history out of order: found sequence {} where {} was expected",
                    record.sequence, expected
                )));
            }
            history.records.push(record);
        }
        Ok(history)
    }

    /// Sequence numbers start at 1 and continue across resumes.
    pub fn next_sequence(&self) -> u64 {
        self.records.last().map(|r| r.sequence + 1).unwrap_or(1)
    }

    pub fn append(
        &mut self,
        configuration: &WeightVector,
        instance_id: &str,
        seed: u64,
        cost: f64,
        status: Status,
        runtime: f64,
    ) -> &TrialRecord {
        let record = TrialRecord {
            sequence: self.next_sequence(),
            configuration: configuration.clone(),
            instance_id: instance_id.to_string(),
            seed,
            cost,
            status,
            runtime,
        };
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub n_evaluations: u64,
    pub wallclock_time_used: f64,
    pub ta_time_used: f64,
    pub incumbent_changed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryEntry {
    pub cost: f64,
    pub incumbent: WeightVector,
    pub evaluations: u64,
    pub cpu_time: f64,
    pub wallclock_time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Incumbent {
    pub configuration: WeightVector,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trajectory {
    entries: Vec<TrajectoryEntry>,
}

impl Trajectory {
    /// Starts with the default configuration at crash cost, so a trajectory
    /// with a single entry means no evaluation ever succeeded in improving it.
    pub fn starting_at(default: &WeightVector) -> Self {
        Self {
            entries: vec![TrajectoryEntry {
                cost: CRASH_COST,
                incumbent: default.clone(),
                evaluations: 0,
                cpu_time: 0.0,
                wallclock_time: 0.0,
            }],
        }
    }

    pub fn from_entries(entries: Vec<TrajectoryEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(RunnerError::Checkpoint("trajectory is empty".to_string()));
        }
        for pair in entries.windows(2) {
            if pair[1].cost >= pair[0].cost || pair[1].evaluations < pair[0].evaluations {
                return Err(RunnerError::Checkpoint(format!(
                    "trajectory is not improving: cost {} after {}",
                    pair[1].cost, pair[0].cost
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TrajectoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TrajectoryEntry> {
        self.entries.last()
    }

    pub fn incumbent(&self) -> Option<Incumbent> {
        self.last().map(|e| Incumbent {
            configuration: e.incumbent.clone(),
            cost: e.cost,
        })
    }

    /// Records `entry` only if it is strictly cheaper than the current best.
    pub fn offer(&mut self, entry: TrajectoryEntry) -> Option<&TrajectoryEntry> {
        let improves = self.last().map(|l| entry.cost < l.cost).unwrap_or(true);
        if !improves {
            return None;
        }
        self.entries.push(entry);
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::Coefficient;

    #[test]
    fn sequences_continue_from_restored_records() {
        let mut history = RunHistory::new();
        let w = WeightVector::minimum_weight();
        for _ in 0..3 {
            history.append(&w, "kp_7_3_60_0", 777, 4.0, Status::Success, 4.0);
        }
        let restored = RunHistory::from_records(history.records().to_vec()).expect("restore");
        assert_eq!(restored.next_sequence(), 4);

        let mut shuffled = history.records().to_vec();
        shuffled.swap(0, 2);
        assert!(RunHistory::from_records(shuffled).is_err());
    }

    #[test]
    fn trajectory_only_accepts_strict_improvements() {
        let default = WeightVector::minimum_weight();
        let mut traj = Trajectory::starting_at(&default);
        let entry = |cost: f64, evaluations: u64| TrajectoryEntry {
            cost,
            incumbent: default.clone().with(Coefficient::MaxValue, cost / 100.0),
            evaluations,
            cpu_time: 0.0,
            wallclock_time: 0.0,
        };
        assert!(traj.offer(entry(12.0, 1)).is_some());
        assert!(traj.offer(entry(12.0, 2)).is_none());
        assert!(traj.offer(entry(7.5, 3)).is_some());
        assert_eq!(traj.len(), 3);
        assert_eq!(traj.incumbent().map(|i| i.cost), Some(7.5));
    }

    #[test]
    fn trajectory_entry_round_trips_cost_and_incumbent() {
        let entry = TrajectoryEntry {
            cost: 41.25,
            incumbent: WeightVector::new()
                .with(Coefficient::Weight, -0.5)
                .with(Coefficient::MinValueByWeight, 0.125),
            evaluations: 9,
            cpu_time: 80.0,
            wallclock_time: 95.5,
        };
        let line = serde_json::to_string(&entry).expect("encode");
        let back: TrajectoryEntry = serde_json::from_str(&line).expect("decode");
        assert_eq!((back.cost, &back.incumbent), (entry.cost, &entry.incumbent));
    }
}
