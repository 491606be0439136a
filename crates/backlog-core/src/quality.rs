//! Quality assessment scoring and trend classification
//!
//! An assessment scores a task on five fixed dimensions. Missing
//! dimensions fall back to a baseline; the overall score is the weighted
//! mean rounded to one decimal.
//!
//! | dimension      | weight | baseline |
//! |----------------|--------|----------|
//! | completeness   | 0.30   | 7        |
//! | code_quality   | 0.25   | 7        |
//! | documentation  | 0.15   | 6        |
//! | efficiency     | 0.15   | 7        |
//! | impact         | 0.15   | 7        |

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::agent::AgentId;
use crate::task::TaskId;
use crate::{Error, Result};

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;

/// Recent and older halves must differ by more than this to count as a trend
pub const TREND_THRESHOLD: f64 = 0.5;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumString,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Completeness,
    CodeQuality,
    Documentation,
    Efficiency,
    Impact,
}

impl Dimension {
    /// Weight in whole percent; the five weights sum to 100
    #[must_use]
    pub const fn weight_percent(self) -> u32 {
        match self {
            Self::Completeness => 30,
            Self::CodeQuality => 25,
            Self::Documentation | Self::Efficiency | Self::Impact => 15,
        }
    }

    #[must_use]
    pub fn weight(self) -> f64 {
        f64::from(self.weight_percent()) / 100.0
    }

    /// Score assumed when the assessor leaves the dimension out
    #[must_use]
    pub const fn baseline(self) -> f64 {
        match self {
            Self::Documentation => 6.0,
            Self::Completeness | Self::CodeQuality | Self::Efficiency | Self::Impact => 7.0,
        }
    }
}

/// Check a single score is a finite value in `[1, 10]`
pub fn validate_score(dimension: Dimension, score: f64) -> Result<f64> {
    if score.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(score)
    } else {
        Err(Error::InvalidInput(format!(
            "{dimension} score must be between {MIN_SCORE} and {MAX_SCORE}, got {score}"
        )))
    }
}

/// Parse `name=value` pairs such as `completeness=9`
pub fn parse_scores<I, S>(pairs: I) -> Result<BTreeMap<Dimension, f64>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|pair| {
            let pair = pair.as_ref();
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                Error::InvalidInput(format!("expected dimension=score, got '{pair}'"))
            })?;
            let dimension = Dimension::from_str(name.trim()).map_err(|_| {
                Error::InvalidInput(format!(
                    "unknown quality dimension '{}' (expected one of: {})",
                    name.trim(),
                    Dimension::iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
                ))
            })?;
            let score: f64 = value.trim().parse().map_err(|_| {
                Error::InvalidInput(format!("score for {dimension} is not a number: '{value}'"))
            })?;
            Ok((dimension, validate_score(dimension, score)?))
        })
        .collect()
}

/// Fill in baselines for every dimension the caller left out
pub fn resolve_scores(given: &BTreeMap<Dimension, f64>) -> Result<BTreeMap<Dimension, f64>> {
    Dimension::iter()
        .map(|dimension| {
            let score = given
                .get(&dimension)
                .copied()
                .unwrap_or_else(|| dimension.baseline());
            Ok((dimension, validate_score(dimension, score)?))
        })
        .collect()
}

/// Weighted mean of a fully resolved score set, rounded to one decimal.
///
/// Accumulates in percent so the integer-weight products stay exact and
/// half-way values round away from zero as written.
#[must_use]
pub fn overall_score(resolved: &BTreeMap<Dimension, f64>) -> f64 {
    let weighted_percent: f64 = Dimension::iter()
        .map(|d| {
            resolved.get(&d).copied().unwrap_or_else(|| d.baseline()) * f64::from(d.weight_percent())
        })
        .sum();
    (weighted_percent / 10.0).round() / 10.0
}

/// Arithmetic mean, `None` for an empty slice
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Direction of recent quality relative to the older history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Trend plus the numbers it was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub trend: Trend,
    pub samples: usize,
    pub older_mean: Option<f64>,
    pub recent_mean: Option<f64>,
}

/// Compare the recent half of `scores` (oldest first) with the older half.
///
/// With an odd count the middle sample belongs to the recent half. Fewer
/// than two samples is always stable.
#[must_use]
pub fn summarize_trend(scores: &[f64]) -> TrendSummary {
    let mid = scores.len() / 2;
    let (older, recent) = scores.split_at(mid);
    let older_mean = mean(older);
    let recent_mean = mean(recent);

    let trend = match (older_mean, recent_mean) {
        (Some(old), Some(new)) if new > old + TREND_THRESHOLD => Trend::Improving,
        (Some(old), Some(new)) if new < old - TREND_THRESHOLD => Trend::Declining,
        _ => Trend::Stable,
    };

    TrendSummary {
        trend,
        samples: scores.len(),
        older_mean,
        recent_mean,
    }
}

#[must_use]
pub fn classify_trend(scores: &[f64]) -> Trend {
    summarize_trend(scores).trend
}

/// A stored quality assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub task_id: TaskId,
    /// Agent credited with the work, if the task was assigned
    pub agent_id: Option<AgentId>,
    /// Every dimension, baselines included
    pub scores: BTreeMap<Dimension, f64>,
    pub overall: f64,
    #[serde(default)]
    pub lessons_learned: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

impl AssessmentRecord {
    /// Score a task from the dimensions the assessor supplied
    pub fn new(
        task_id: TaskId,
        agent_id: Option<AgentId>,
        given: &BTreeMap<Dimension, f64>,
        lessons_learned: Vec<String>,
        assessed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let scores = resolve_scores(given)?;
        let overall = overall_score(&scores);
        Ok(Self {
            task_id,
            agent_id,
            scores,
            overall,
            lessons_learned,
            assessed_at,
        })
    }
}
