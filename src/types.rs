use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{macros::format_description, Date};

/// Opaque handle back to the content unit a subject was found in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitRef(pub usize);

/// How an identifier was recovered from its content unit.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveredFrom {
    Link,
    Text,
}

/// An advertiser whose ad count is being checked.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub unit: UnitRef,
    pub discovered_from: DiscoveredFrom,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("region must not be empty")]
    EmptyRegion,

    #[error("invalid date {value:?}: expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("date range start {start} is after end {end}")]
    InvertedRange { start: Date, end: Date },
}

/// Region and date range for one scan run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParameters {
    region: String,
    start: Date,
    end: Date,
}

impl SearchParameters {
    pub fn new(region: &str, start: Date, end: Date) -> Result<Self, ParamsError> {
        let region = region.trim();
        if region.is_empty() {
            return Err(ParamsError::EmptyRegion);
        }
        if start > end {
            return Err(ParamsError::InvertedRange { start, end });
        }
        Ok(Self {
            region: region.to_ascii_uppercase(),
            start,
            end,
        })
    }

    /// Build from `YYYY-MM-DD` strings.
    pub fn parse(region: &str, start: &str, end: &str) -> Result<Self, ParamsError> {
        Self::new(region, parse_date(start)?, parse_date(end)?)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn start(&self) -> Date {
        self.start
    }

    pub fn end(&self) -> Date {
        self.end
    }
}

pub fn parse_date(s: &str) -> Result<Date, ParamsError> {
    let fmt = format_description!("[year]-[month]-[day]");
    Date::parse(s.trim(), &fmt).map_err(|_| ParamsError::InvalidDate {
        value: s.to_string(),
    })
}

/// A resolved remote count for one subject.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub subject_id: String,
    pub count: u64,
    pub source_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    High,
    Low,
}

impl Tier {
    pub fn classify(count: u64, threshold: u64) -> Self {
        if count >= threshold {
            Tier::High
        } else {
            Tier::Low
        }
    }
}

/// Tagged result of one iteration step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Checked {
        index: usize,
        result: CheckResult,
        tier: Tier,
    },
    /// No subject could be extracted from the unit.
    Skipped { index: usize },
    /// The count could not be resolved; distinct from a zero count.
    Failed {
        index: usize,
        subject_id: String,
        reason: String,
    },
}

impl StepOutcome {
    pub fn index(&self) -> usize {
        match self {
            StepOutcome::Checked { index, .. }
            | StepOutcome::Skipped { index }
            | StepOutcome::Failed { index, .. } => *index,
        }
    }
}

/// Incremental status delivered to the progress reporter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub checked: u64,
    pub high_count: u64,
    pub low_count: u64,
    pub total: u64,
    pub current_index: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

/// Reply shape of `getStatus`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub running: bool,
    pub paused: bool,
    pub phase: ScanPhase,
    pub current_index: u64,
    pub total: u64,
    pub checked: u64,
    pub high_count: u64,
    pub low_count: u64,
}

impl ScanStatus {
    pub fn progress(&self) -> Progress {
        Progress {
            checked: self.checked,
            high_count: self.high_count,
            low_count: self.low_count,
            total: self.total,
            current_index: self.current_index,
        }
    }
}

/// Final status plus every step outcome, written by the CLI.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanReport {
    pub status: ScanStatus,
    pub outcomes: Vec<StepOutcome>,
}
