//! Error taxonomy for filter management.

use thiserror::Error;

use crate::filters::FilterId;

/// Errors raised by the store, the loader, the pollers and the executor.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Unknown filter id or revision.
    #[error("filter not found: {filter_id}{}", revision.map(|r| format!(" revision {r}")).unwrap_or_default())]
    NotFound {
        filter_id: FilterId,
        revision: Option<u64>,
    },

    /// Filter source did not produce an executable unit.
    #[error("compile error in {filter_id} revision {revision}: {diagnostic}")]
    Compile {
        filter_id: FilterId,
        revision: u64,
        diagnostic: String,
    },

    /// The revision store or filter source could not be reached.
    #[error("filter source unavailable: {0}")]
    StoreUnavailable(String),

    /// Request would violate a store invariant.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A filter failed while running.
    #[error("filter {filter_id} failed: {message}")]
    Execution { filter_id: FilterId, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FilterError {
    pub fn not_found(filter_id: &FilterId, revision: Option<u64>) -> Self {
        Self::NotFound {
            filter_id: filter_id.clone(),
            revision,
        }
    }

    /// Returns `true` for failures a poll cycle should retry on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Io(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FilterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterType;

    #[test]
    fn test_not_found_display() {
        let id = FilterId::derive("checkAuth", FilterType::Pre);
        let err = FilterError::not_found(&id, Some(3));
        assert_eq!(err.to_string(), "filter not found: checkAuth:pre revision 3");

        let err = FilterError::not_found(&id, None);
        assert_eq!(err.to_string(), "filter not found: checkAuth:pre");
    }

    #[test]
    fn test_compile_display() {
        let err = FilterError::Compile {
            filter_id: FilterId::derive("router", FilterType::Route),
            revision: 2,
            diagnostic: "unexpected token".into(),
        };
        let s = err.to_string();
        assert!(s.contains("router:route"));
        assert!(s.contains("unexpected token"));
    }

    #[test]
    fn test_is_transient() {
        assert!(FilterError::StoreUnavailable("db down".into()).is_transient());
        assert!(!FilterError::Validation("bad".into()).is_transient());
    }
}
