//! Filter identity, lifecycle state and revision records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::FilterError;

/// Stage of the request lifecycle a filter runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Pre,
    Route,
    Post,
    Custom,
    Error,
}

impl FilterType {
    pub const ALL: [FilterType; 5] = [
        FilterType::Pre,
        FilterType::Route,
        FilterType::Post,
        FilterType::Custom,
        FilterType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Pre => "pre",
            FilterType::Route => "route",
            FilterType::Post => "post",
            FilterType::Custom => "custom",
            FilterType::Error => "error",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterType {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pre" => Ok(FilterType::Pre),
            "route" | "routing" => Ok(FilterType::Route),
            "post" => Ok(FilterType::Post),
            "custom" => Ok(FilterType::Custom),
            "error" => Ok(FilterType::Error),
            other => Err(FilterError::Validation(format!("unknown filter type '{other}'"))),
        }
    }
}

/// Stable identity of one logical filter across all of its revisions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(String);

impl FilterId {
    /// Derive the id for a filter name and type.
    ///
    /// The same `(name, type)` pair always yields the same id, so repeated
    /// submissions of a filter extend one revision history.
    pub fn derive(name: &str, filter_type: FilterType) -> Self {
        Self(format!("{}:{}", name.trim(), filter_type))
    }

    /// Wrap an id received from outside (admin path segment, stored row).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a revision is the one serving live traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterState {
    #[default]
    Inactive,
    Active,
}

/// One immutable, numbered version of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRevision {
    pub filter_id: FilterId,
    pub revision: u64,
    pub source_code: String,
    pub filter_type: FilterType,
    pub filter_name: String,
    /// Runtime toggle that force-skips this filter when set.
    pub disable_property: String,
    /// Execution rank within its type (ascending).
    pub order: i32,
    pub state: FilterState,
    /// Shadow flag, independent of `state`.
    #[serde(default)]
    pub canary: bool,
    /// Creation time, seconds since the unix epoch.
    pub created_at: u64,
    pub author: String,
}

impl FilterRevision {
    pub fn is_active(&self) -> bool {
        self.state == FilterState::Active
    }

    pub fn is_canary(&self) -> bool {
        self.canary
    }
}

/// Input of an "add revision" call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRevision {
    pub source_code: String,
    pub filter_type: FilterType,
    pub filter_name: String,
    #[serde(default)]
    pub disable_property: Option<String>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub author: Option<String>,
}

impl NewRevision {
    pub fn new(
        source_code: impl Into<String>,
        filter_type: FilterType,
        filter_name: impl Into<String>,
        order: i32,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            filter_type,
            filter_name: filter_name.into(),
            disable_property: None,
            order,
            author: None,
        }
    }

    pub fn with_disable_property(mut self, property: impl Into<String>) -> Self {
        self.disable_property = Some(property.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn filter_id(&self) -> FilterId {
        FilterId::derive(&self.filter_name, self.filter_type)
    }

    /// Toggle name used when the submission does not name one.
    pub fn resolved_disable_property(&self) -> String {
        self.disable_property
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| default_disable_property(&self.filter_name, self.filter_type))
    }
}

/// Conventional toggle name: `"{name}.{type}.disable"`.
pub fn default_disable_property(name: &str, filter_type: FilterType) -> String {
    format!("{}.{}.disable", name.trim(), filter_type)
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
