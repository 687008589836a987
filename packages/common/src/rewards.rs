//! Rank -> badge reward tables.
//!
//! A rewards document maps either an exact rank (`"1"`) or an inclusive rank range
//! (`"2-4"`) to a badge reference. Exact keys win over ranges.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Badge referenced by a reward, either by id or by unique name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BadgeRef {
    Id(i32),
    Name(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum RewardError {
    #[error("rewards must be a JSON object")]
    NotAnObject,
    #[error("invalid reward key '{0}': expected a rank like \"1\" or a range like \"2-4\"")]
    InvalidKey(String),
    #[error("reward for '{0}' must be a badge id or badge name")]
    InvalidBadge(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewardTable {
    exact: Vec<(i32, BadgeRef)>,
    ranges: Vec<(i32, i32, BadgeRef)>,
}

impl RewardTable {
    pub fn from_json(value: &Value) -> Result<Self, RewardError> {
        let object = value.as_object().ok_or(RewardError::NotAnObject)?;
        let mut table = Self::default();

        for (key, raw) in object {
            let badge = match raw {
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|id| i32::try_from(id).ok())
                    .map(BadgeRef::Id),
                Value::String(s) if !s.trim().is_empty() => Some(BadgeRef::Name(s.trim().into())),
                _ => None,
            }
            .ok_or_else(|| RewardError::InvalidBadge(key.clone()))?;

            match parse_key(key) {
                Some((lo, hi)) if lo == hi => table.exact.push((lo, badge)),
                Some((lo, hi)) => table.ranges.push((lo, hi, badge)),
                None => return Err(RewardError::InvalidKey(key.clone())),
            }
        }

        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.ranges.is_empty()
    }

    pub fn lookup(&self, rank: i32) -> Option<&BadgeRef> {
        self.exact
            .iter()
            .find(|(r, _)| *r == rank)
            .map(|(_, b)| b)
            .or_else(|| {
                self.ranges
                    .iter()
                    .find(|(lo, hi, _)| (*lo..=*hi).contains(&rank))
                    .map(|(_, _, b)| b)
            })
    }
}

/// `"3"` -> `(3, 3)`, `"2-4"` -> `(2, 4)`. Ranks start at 1.
fn parse_key(key: &str) -> Option<(i32, i32)> {
    let key = key.trim();
    let (lo, hi) = match key.split_once('-') {
        Some((lo, hi)) => (lo.trim().parse().ok()?, hi.trim().parse().ok()?),
        None => {
            let rank = key.parse().ok()?;
            (rank, rank)
        }
    };
    (lo >= 1 && hi >= lo).then_some((lo, hi))
}
