use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::calc::{normalize_weights, NormalizedWeights};

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("criterion '{name}': percent must be >= 0 (got {percent})")]
    NegativePercent { name: String, percent: f64 },
    #[error("criterion '{name}': max must be a positive number (got {max})")]
    BadMax { name: String, max: f64 },
    #[error("unknown score mode: {0}")]
    UnknownMode(String),
    #[error("unknown subject type: {0}")]
    UnknownSubjectType(String),
}

/// How a criterion's cell input is interpreted.
///
/// `Raw` cells are points out of the criterion's `max`; `Scaled` cells are
/// already on a 0-100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    Raw,
    Scaled,
}

impl ScoreMode {
    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "scaled" => Ok(Self::Scaled),
            other => Err(ModelError::UnknownMode(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Scaled => "scaled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionSpec {
    pub name: String,
    pub percent: f64,
    pub mode: ScoreMode,
    pub max: Option<f64>,
}

impl CriterionSpec {
    pub fn new(
        name: impl Into<String>,
        percent: f64,
        mode: ScoreMode,
        max: Option<f64>,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let percent = if percent.is_finite() { percent } else { 0.0 };
        if percent < 0.0 {
            return Err(ModelError::NegativePercent { name, percent });
        }
        if let Some(m) = max {
            if !m.is_finite() || m <= 0.0 {
                return Err(ModelError::BadMax { name, max: m });
            }
        }
        Ok(Self {
            name,
            percent,
            mode,
            max,
        })
    }

    /// Upper bound for an entered value, or `None` when a raw-mode criterion
    /// has no max configured.
    pub fn cap(&self) -> Option<f64> {
        match self.mode {
            ScoreMode::Scaled => Some(100.0),
            ScoreMode::Raw => self.max.filter(|m| m.is_finite() && *m > 0.0),
        }
    }
}

/// Ordered criteria plus their derived weights. The derived fields are only
/// ever written by `recompute`.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaState {
    criteria: Vec<CriterionSpec>,
    normalized_weights: Vec<f64>,
    raw_total: f64,
}

impl CriteriaState {
    pub fn new(criteria: Vec<CriterionSpec>) -> Self {
        let mut state = Self {
            criteria,
            normalized_weights: Vec::new(),
            raw_total: 0.0,
        };
        state.recompute();
        state
    }

    fn recompute(&mut self) {
        let percents: Vec<f64> = self.criteria.iter().map(|c| c.percent).collect();
        let NormalizedWeights {
            normalized,
            raw_total,
        } = normalize_weights(&percents);
        self.normalized_weights = normalized;
        self.raw_total = raw_total;
    }

    pub fn set_percent(&mut self, index: usize, percent: f64) -> bool {
        let Some(c) = self.criteria.get_mut(index) else {
            return false;
        };
        c.percent = if percent.is_finite() && percent >= 0.0 {
            percent
        } else {
            0.0
        };
        self.recompute();
        true
    }

    /// Mode does not feed the weights, so nothing is recomputed.
    pub fn set_mode(&mut self, index: usize, mode: ScoreMode) -> bool {
        match self.criteria.get_mut(index) {
            Some(c) => {
                c.mode = mode;
                true
            }
            None => false,
        }
    }

    pub fn criteria(&self) -> &[CriterionSpec] {
        &self.criteria
    }

    pub fn get(&self, index: usize) -> Option<&CriterionSpec> {
        self.criteria.get(index)
    }

    pub fn normalized_weights(&self) -> &[f64] {
        &self.normalized_weights
    }

    pub fn weight(&self, index: usize) -> f64 {
        self.normalized_weights.get(index).copied().unwrap_or(0.0)
    }

    pub fn raw_total(&self) -> f64 {
        self.raw_total
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub student_id: String,
    pub grade: String,
    pub course_class: String,
    pub number: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Normal,
    Elective,
    Special,
    Skill,
    Unknown,
}

impl SubjectType {
    /// Unrecognized codes map to `Unknown` so risk tagging fails open.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Self::Normal,
            "elective" => Self::Elective,
            "special" => Self::Special,
            "skill" => Self::Skill,
            _ => Self::Unknown,
        }
    }

    pub fn parse(s: &str) -> Result<Self, ModelError> {
        match Self::parse_lenient(s) {
            Self::Unknown => Err(ModelError::UnknownSubjectType(s.to_string())),
            t => Ok(t),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Elective => "elective",
            Self::Special => "special",
            Self::Skill => "skill",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskContext {
    pub subject_type: SubjectType,
    pub adjust_point: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub course: Option<String>,
    pub subject_type: SubjectType,
    pub adjust_point: Option<f64>,
}

impl Subject {
    pub fn risk_context(&self) -> RiskContext {
        RiskContext {
            subject_type: self.subject_type,
            adjust_point: self.adjust_point,
        }
    }
}

/// Raw cell text per student, each row as wide as the criteria sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreMatrix {
    width: usize,
    rows: HashMap<String, Vec<String>>,
}

impl ScoreMatrix {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            rows: HashMap::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, student_id: &str) -> Option<&[String]> {
        self.rows.get(student_id).map(|r| r.as_slice())
    }

    pub fn row_mut(&mut self, student_id: &str) -> &mut Vec<String> {
        let width = self.width;
        let row = self
            .rows
            .entry(student_id.to_string())
            .or_insert_with(|| vec![String::new(); width]);
        if row.len() < width {
            row.resize(width, String::new());
        }
        row
    }

    pub fn get(&self, student_id: &str, col: usize) -> Option<&str> {
        self.rows
            .get(student_id)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
    }

    /// Writes outside the matrix width are dropped.
    pub fn set(&mut self, student_id: &str, col: usize, value: impl Into<String>) -> bool {
        if col >= self.width {
            return false;
        }
        self.row_mut(student_id)[col] = value.into();
        true
    }
}
