//! Runtime toggles that force-skip filters.

use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;

/// Answers whether a named disable property is currently set.
pub trait ToggleSource: Send + Sync {
    fn is_disabled(&self, property: &str) -> bool;
}

/// Set of disabled property names, replaceable at runtime (config reload).
#[derive(Debug, Default)]
pub struct RuntimeToggles {
    disabled: ArcSwap<HashSet<String>>,
}

impl RuntimeToggles {
    pub fn new<I, S>(disabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disabled: ArcSwap::from_pointee(disabled.into_iter().map(Into::into).collect()),
        }
    }

    /// Replace the whole disabled set.
    pub fn replace<I, S>(&self, disabled: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: HashSet<String> = disabled.into_iter().map(Into::into).collect();
        tracing::info!(disabled = next.len(), "Runtime filter toggles updated");
        self.disabled.store(Arc::new(next));
    }

    pub fn disabled(&self) -> Vec<String> {
        let mut names: Vec<String> = self.disabled.load().iter().cloned().collect();
        names.sort();
        names
    }
}

impl ToggleSource for RuntimeToggles {
    fn is_disabled(&self, property: &str) -> bool {
        self.disabled.load().contains(property)
    }
}
