//! Data-driven eligibility criteria shared by badges and challenges.
//!
//! A criteria document is a JSON object of named thresholds, e.g.
//! `{"totalCommits": 1000, "perfectScore": true}`. Every criterion must hold (AND).
//! A numeric threshold of `-1` marks an always-eligible criterion.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Threshold value that marks a criterion as always satisfied.
pub const ALWAYS_ELIGIBLE: f64 = -1.0;

/// A single value in a metric snapshot or progress document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Flag(bool),
    Number(f64),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            Self::Number(_) => None,
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Flag(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            _ => None,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for MetricValue {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<f64> for MetricValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for MetricValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

/// Flat key -> value view of a user's counters, or of a participant's progress.
pub type MetricSnapshot = HashMap<String, MetricValue>;

#[derive(Debug, Error, PartialEq)]
pub enum CriteriaError {
    #[error("criteria must be a JSON object")]
    NotAnObject,
    #[error("criteria must define at least one threshold")]
    Empty,
    #[error("criterion '{0}' must be a number or a boolean")]
    InvalidValue(String),
    #[error("criterion '{0}' must be >= 0 (or -1 for always eligible)")]
    NegativeThreshold(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// Metric must be numeric and `>=` the threshold.
    AtLeast(f64),
    /// Metric must be a boolean equal to the expected value.
    Exactly(bool),
    /// Sentinel `-1`: always satisfied, short-circuits evaluation.
    Always,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub key: String,
    pub threshold: Threshold,
}

impl Criterion {
    fn is_met(&self, metric: Option<&MetricValue>) -> bool {
        match (self.threshold, metric) {
            (Threshold::Always, _) => true,
            (_, None) => false,
            (Threshold::AtLeast(t), Some(m)) => m.as_number().is_some_and(|v| v >= t),
            (Threshold::Exactly(b), Some(m)) => m.as_flag() == Some(b),
        }
    }

    /// `(progress, max_progress)` for this criterion, progress clamped to the threshold.
    fn progress(&self, metric: Option<&MetricValue>) -> (f64, f64) {
        match self.threshold {
            Threshold::AtLeast(t) => {
                let current = metric.and_then(MetricValue::as_number).unwrap_or(0.0);
                (current.clamp(0.0, t), t)
            }
            Threshold::Exactly(_) | Threshold::Always => {
                if self.is_met(metric) {
                    (1.0, 1.0)
                } else {
                    (0.0, 1.0)
                }
            }
        }
    }
}

/// Outcome of evaluating a criteria set against a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub eligible: bool,
    pub progress: f64,
    pub max_progress: f64,
}

/// Parsed criteria document. Keys keep their document order.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaSet {
    criteria: Vec<Criterion>,
}

impl CriteriaSet {
    pub fn from_json(value: &Value) -> Result<Self, CriteriaError> {
        let object = value.as_object().ok_or(CriteriaError::NotAnObject)?;
        if object.is_empty() {
            return Err(CriteriaError::Empty);
        }

        let mut criteria = Vec::with_capacity(object.len());
        for (key, raw) in object {
            let threshold = match raw {
                Value::Bool(b) => Threshold::Exactly(*b),
                Value::Number(n) => {
                    let n = n
                        .as_f64()
                        .ok_or_else(|| CriteriaError::InvalidValue(key.clone()))?;
                    if n == ALWAYS_ELIGIBLE {
                        Threshold::Always
                    } else if n < 0.0 {
                        return Err(CriteriaError::NegativeThreshold(key.clone()));
                    } else {
                        Threshold::AtLeast(n)
                    }
                }
                _ => return Err(CriteriaError::InvalidValue(key.clone())),
            };
            criteria.push(Criterion {
                key: key.clone(),
                threshold,
            });
        }

        Ok(Self { criteria })
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.criteria.iter().any(|c| c.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.criteria.iter().map(|c| c.key.as_str())
    }

    /// The criterion that drives user-facing progress: the highest numeric threshold,
    /// first one on ties, or the first criterion when none is numeric.
    pub fn primary(&self) -> &Criterion {
        let mut primary: Option<(&Criterion, f64)> = None;
        for criterion in &self.criteria {
            if let Threshold::AtLeast(t) = criterion.threshold
                && primary.is_none_or(|(_, best)| t > best)
            {
                primary = Some((criterion, t));
            }
        }
        primary.map(|(c, _)| c).unwrap_or(&self.criteria[0])
    }

    pub fn evaluate(&self, metrics: &MetricSnapshot) -> Evaluation {
        if self
            .criteria
            .iter()
            .any(|c| matches!(c.threshold, Threshold::Always))
        {
            return Evaluation {
                eligible: true,
                progress: 1.0,
                max_progress: 1.0,
            };
        }

        let eligible = self
            .criteria
            .iter()
            .all(|c| c.is_met(metrics.get(&c.key)));

        let primary = self.primary();
        let (progress, max_progress) = primary.progress(metrics.get(&primary.key));

        Evaluation {
            eligible,
            progress,
            max_progress,
        }
    }
}

/// Evaluate a raw criteria document against a snapshot.
pub fn evaluate(metrics: &MetricSnapshot, criteria: &Value) -> Result<Evaluation, CriteriaError> {
    Ok(CriteriaSet::from_json(criteria)?.evaluate(metrics))
}

/// Read a progress document (`{"key": number|bool}`) into a snapshot.
/// Entries that are neither numbers nor booleans are ignored.
pub fn snapshot_from_json(value: &Value) -> MetricSnapshot {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| MetricValue::from_json(v).map(|m| (k.clone(), m)))
                .collect()
        })
        .unwrap_or_default()
}

/// Merge `patch` into the progress document `base`. Every key must be one of the
/// criteria keys and every value a number or boolean.
pub fn merge_progress(
    criteria: &CriteriaSet,
    base: &Value,
    patch: &Value,
) -> Result<Value, CriteriaError> {
    let patch = patch.as_object().ok_or(CriteriaError::NotAnObject)?;
    let mut merged: Map<String, Value> = base.as_object().cloned().unwrap_or_default();

    for (key, raw) in patch {
        if !criteria.contains_key(key) {
            return Err(CriteriaError::InvalidValue(key.clone()));
        }
        if MetricValue::from_json(raw).is_none() {
            return Err(CriteriaError::InvalidValue(key.clone()));
        }
        merged.insert(key.clone(), raw.clone());
    }

    Ok(Value::Object(merged))
}
