//! Rate limit rules as read from the rule store.
//!
//! Rules are flat projections of relational rows. Nothing here is validated
//! until the descriptor builder turns them into descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SyncError};
use crate::proto::RateLimitUnit;

/// Identifier of a caller row in the rule store.
pub type CallerId = i64;

/// Identifier of a rate limit row in the rule store.
pub type RuleId = i64;

/// A single rate limit row joined with its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Row id of the rule
    pub id: RuleId,
    /// The caller this rule applies to
    pub caller_id: CallerId,
    /// Display name of the caller
    #[serde(default)]
    pub caller_name: String,
    /// Request path this rule is scoped to; empty or absent means every path
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Requests allowed per interval, as stored
    pub limit_count: i64,
    /// Interval name, as stored
    pub limit_interval: String,
}

impl RateLimitRule {
    /// The endpoint this rule is scoped to, or `None` for a global rule.
    pub fn scoped_endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().filter(|e| !e.is_empty())
    }

    /// Parse the stored interval into a known unit.
    pub fn unit(&self) -> Result<LimitUnit> {
        self.limit_interval
            .parse()
            .map_err(|_| SyncError::UnsupportedInterval {
                rule_id: self.id,
                interval: self.limit_interval.clone(),
            })
    }

    /// Validate the stored count and narrow it to the wire width.
    pub fn requests_per_unit(&self) -> Result<u32> {
        match u32::try_from(self.limit_count) {
            Ok(count) if count > 0 => Ok(count),
            _ => Err(SyncError::InvalidLimit {
                rule_id: self.id,
                count: self.limit_count,
            }),
        }
    }
}

/// Time unit for rate limits (matches Envoy's configuration format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl LimitUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitUnit::Second => "second",
            LimitUnit::Minute => "minute",
            LimitUnit::Hour => "hour",
            LimitUnit::Day => "day",
        }
    }
}

/// Returned when an interval string names no known unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUnit;

impl FromStr for LimitUnit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "second" => Ok(LimitUnit::Second),
            "minute" => Ok(LimitUnit::Minute),
            "hour" => Ok(LimitUnit::Hour),
            "day" => Ok(LimitUnit::Day),
            _ => Err(UnknownUnit),
        }
    }
}

impl fmt::Display for LimitUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LimitUnit> for RateLimitUnit {
    fn from(unit: LimitUnit) -> Self {
        match unit {
            LimitUnit::Second => RateLimitUnit::Second,
            LimitUnit::Minute => RateLimitUnit::Minute,
            LimitUnit::Hour => RateLimitUnit::Hour,
            LimitUnit::Day => RateLimitUnit::Day,
        }
    }
}
