use serde::{Deserialize, Serialize};

use crate::error::{MaintenanceError, Result};

/// One row of the record store. Raw sub-scores feed every derived score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub university: String,
    pub anxiety_score: i32,
    pub stress_score: i32,
    pub depression_score: i32,
    pub age: Option<String>,
    pub gender: Option<String>,
    pub department: Option<String>,
    pub academic_year: Option<String>,
    pub cgpa: Option<String>,
}

impl Record {
    pub fn new(
        id: i64,
        university: impl Into<String>,
        anxiety_score: i32,
        stress_score: i32,
        depression_score: i32,
    ) -> Self {
        Self {
            id,
            university: university.into(),
            anxiety_score,
            stress_score,
            depression_score,
            age: None,
            gender: None,
            department: None,
            academic_year: None,
            cgpa: None,
        }
    }

    pub fn raw(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Anxiety => self.anxiety_score as f64,
            Dimension::Stress => self.stress_score as f64,
            Dimension::Depression => self.depression_score as f64,
        }
    }

    pub fn raw_attributes(&self) -> [f64; 3] {
        Dimension::ALL.map(|dimension| self.raw(dimension))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Anxiety,
    Stress,
    Depression,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Anxiety, Dimension::Stress, Dimension::Depression];

    pub fn index(self) -> usize {
        match self {
            Dimension::Anxiety => 0,
            Dimension::Stress => 1,
            Dimension::Depression => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Anxiety => "anxiety",
            Dimension::Stress => "stress",
            Dimension::Depression => "depression",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub anxiety: f64,
    pub stress: f64,
    pub depression: f64,
}

impl Weights {
    pub fn new(anxiety: f64, stress: f64, depression: f64) -> Self {
        Self {
            anxiety,
            stress,
            depression,
        }
    }

    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Anxiety => self.anxiety,
            Dimension::Stress => self.stress,
            Dimension::Depression => self.depression,
        }
    }

    pub fn with(mut self, dimension: Dimension, weight: f64) -> Self {
        match dimension {
            Dimension::Anxiety => self.anxiety = weight,
            Dimension::Stress => self.stress = weight,
            Dimension::Depression => self.depression = weight,
        }
        self
    }

    /// Weighted sum over a per-dimension attribute vector.
    pub fn dot(&self, attributes: &[f64; 3]) -> f64 {
        Dimension::ALL
            .iter()
            .map(|dimension| self.get(*dimension) * attributes[dimension.index()])
            .sum()
    }

    pub fn score(&self, record: &Record) -> f64 {
        self.dot(&record.raw_attributes())
    }

    /// `(dimension, new - old)` for each dimension whose weight moved.
    pub fn deltas_to(&self, next: &Weights) -> Vec<WeightDelta> {
        Dimension::ALL
            .iter()
            .filter_map(|dimension| {
                let delta = next.get(*dimension) - self.get(*dimension);
                (delta != 0.0).then_some(WeightDelta {
                    dimension: *dimension,
                    delta,
                })
            })
            .collect()
    }

    pub fn scale(&self) -> f64 {
        self.anxiety + self.stress + self.depression
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightDelta {
    pub dimension: Dimension,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub version: u64,
    pub weights: Weights,
    pub window_size: Option<u32>,
}

impl MetricDefinition {
    pub fn new(version: u64, weights: Weights) -> Self {
        Self {
            version,
            weights,
            window_size: None,
        }
    }

    pub fn with_window(mut self, window_size: u32) -> Self {
        self.window_size = Some(window_size);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for dimension in Dimension::ALL {
            let weight = self.weights.get(dimension);
            if !weight.is_finite() {
                return Err(MaintenanceError::DefinitionIncompatible(format!(
                    "definition v{} has a non-finite {} weight ({weight})",
                    self.version,
                    dimension.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Same windowing mode, so scores under one can be shifted into the other.
    pub fn is_comparable(&self, other: &MetricDefinition) -> bool {
        self.window_size == other.window_size
    }

    /// Equal shape and weights; the version is ignored.
    pub fn same_content(&self, other: &MetricDefinition) -> bool {
        self.weights == other.weights && self.window_size == other.window_size
    }

    pub fn is_windowed(&self) -> bool {
        self.window_size.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedScore {
    pub record_id: i64,
    pub university: String,
    pub score: f64,
    pub as_of: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefreshResult {
    pub elapsed_ms: f64,
    pub rows_affected: u64,
}
