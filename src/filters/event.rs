//! Change events published on filter lifecycle transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::FilterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Activated,
    Deactivated,
    CanaryMarked,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Added => "added",
            ChangeKind::Activated => "activated",
            ChangeKind::Deactivated => "deactivated",
            ChangeKind::CanaryMarked => "canary_marked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub filter_id: FilterId,
    pub revision: u64,
    pub message: String,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, filter_id: &FilterId, revision: u64) -> Self {
        Self {
            kind,
            filter_id: filter_id.clone(),
            revision,
            message: format!("{kind} filter id = {filter_id} revision = {revision}"),
        }
    }
}
