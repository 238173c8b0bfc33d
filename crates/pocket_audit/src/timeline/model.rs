//! Height-window selection: relative timelines, explicit block bounds, tuning params.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimelineError {
    #[error(
        "unable to interpret timeline: (start) {start}{unit} ago to (end) {end}{unit} ago is not a valid range; start must come before end"
    )]
    InvalidRange { start: i64, end: i64, unit: String },
    #[error("unrecognized unit: {0}, valid units: (minutes, hours, days, weeks, blocks, sessions)")]
    InvalidUnit(String),
    #[error("invalid block range: start {start} is after end {end}")]
    InvalidBlockRange { start: u64, end: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Minute,
    Hour,
    Day,
    Week,
    Block,
    Session,
}

impl Unit {
    /// Length of one unit in minutes; `None` for height-based units.
    pub fn minutes(self) -> Option<i64> {
        match self {
            Unit::Minute => Some(1),
            Unit::Hour => Some(60),
            Unit::Day => Some(60 * 24),
            Unit::Week => Some(60 * 24 * 7),
            Unit::Block | Unit::Session => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Unit::Minute => "minute",
            Unit::Hour => "hour",
            Unit::Day => "day",
            Unit::Week => "week",
            Unit::Block => "block",
            Unit::Session => "session",
        }
    }
}

impl FromStr for Unit {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minutes" | "minute" | "min" | "m" => Ok(Unit::Minute),
            "hours" | "hour" | "hr" | "h" => Ok(Unit::Hour),
            "days" | "day" | "d" => Ok(Unit::Day),
            "weeks" | "week" | "w" => Ok(Unit::Week),
            "blocks" | "block" | "b" => Ok(Unit::Block),
            "sessions" | "session" | "s" => Ok(Unit::Session),
            _ => Err(TimelineError::InvalidUnit(s.to_string())),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window relative to the chain tip. `start` and `end` are distances into the past,
/// stored as non-positive numbers with `start <= end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeline")]
pub struct Timeline {
    start: i64,
    end: i64,
    unit: Unit,
}

#[derive(Deserialize)]
struct RawTimeline {
    start: i64,
    end: i64,
    unit: String,
}

impl TryFrom<RawTimeline> for Timeline {
    type Error = TimelineError;

    fn try_from(raw: RawTimeline) -> Result<Self, Self::Error> {
        Timeline::new(raw.start, raw.end, &raw.unit)
    }
}

impl Timeline {
    /// Signs are ignored: `-2` and `2` both mean "two units ago".
    pub fn new(start: i64, end: i64, unit: &str) -> Result<Self, TimelineError> {
        let start = -start.saturating_abs();
        let end = -end.saturating_abs();
        if start > end {
            return Err(TimelineError::InvalidRange {
                start: -start,
                end: -end,
                unit: unit.to_string(),
            });
        }
        let unit = unit.parse()?;
        Ok(Self { start, end, unit })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }
}

/// Explicit absolute heights, bypassing time resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawByBlock")]
pub struct ByBlock {
    start: u64,
    end: u64,
}

#[derive(Deserialize)]
struct RawByBlock {
    start: u64,
    end: u64,
}

impl TryFrom<RawByBlock> for ByBlock {
    type Error = TimelineError;

    fn try_from(raw: RawByBlock) -> Result<Self, Self::Error> {
        ByBlock::new(raw.start, raw.end)
    }
}

impl ByBlock {
    pub fn new(start: u64, end: u64) -> Result<Self, TimelineError> {
        if end < start {
            return Err(TimelineError::InvalidBlockRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    #[serde(rename = "approx_block_time_in_min")]
    pub approx_block_time_minutes: i64,
    pub blocks_per_session: i64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            approx_block_time_minutes: 15,
            blocks_per_session: 4,
        }
    }
}

/// How the audited window is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    Timeline(Timeline),
    ByBlock(ByBlock),
}

impl Selection {
    /// Tag recorded in the report.
    pub fn selector(&self) -> &'static str {
        match self {
            Selection::Timeline(_) => "timeline",
            Selection::ByBlock(_) => "by_block",
        }
    }
}

/// Half-open height interval `[min_height, max_height)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightRange {
    pub min_height: u64,
    pub max_height: u64,
}

impl HeightRange {
    pub fn len(&self) -> u64 {
        self.max_height.saturating_sub(self.min_height)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn heights(&self) -> std::ops::Range<u64> {
        self.min_height..self.max_height
    }
}
