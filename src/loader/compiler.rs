//! Compiler capability boundary.
//!
//! The gateway does not interpret filter bodies itself. A [`FilterCompiler`]
//! turns source text into an [`ExecutableFilter`]; everything past that point
//! only sees the trait object.

use std::fmt;
use std::sync::Arc;

use crate::chain::RequestContext;

/// Failure raised by a filter while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterFailure {
    pub message: String,
    /// Fatal failures stop a Pre chain instead of letting it continue.
    pub fatal: bool,
}

impl FilterFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

impl fmt::Display for FilterFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fatal {
            write!(f, "fatal: {}", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Metadata a filter source may declare about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declared {
    pub order: Option<i32>,
    pub disable_property: Option<String>,
}

/// A compiled, runnable filter.
pub trait ExecutableFilter: Send + Sync + fmt::Debug {
    /// Per-request applicability check, evaluated after the runtime toggle.
    fn should_filter(&self, _ctx: &RequestContext) -> bool {
        true
    }

    fn run(&self, ctx: &mut RequestContext) -> Result<(), FilterFailure>;

    /// Metadata embedded in the source, used for file-based filters.
    fn declared(&self) -> Declared {
        Declared::default()
    }
}

/// Turns filter source text into an executable unit.
pub trait FilterCompiler: Send + Sync {
    /// Compile `source`; the error string is the compiler's diagnostic.
    fn compile(&self, source: &str) -> Result<Arc<dyn ExecutableFilter>, String>;
}

impl<F> FilterCompiler for F
where
    F: Fn(&str) -> Result<Arc<dyn ExecutableFilter>, String> + Send + Sync,
{
    fn compile(&self, source: &str) -> Result<Arc<dyn ExecutableFilter>, String> {
        self(source)
    }
}
