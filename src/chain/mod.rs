//! Filter chain execution.
//!
//! # Data Flow
//! ```text
//! Request → RequestContext
//!     → FilterChainExecutor::execute(type)
//!         → registry snapshot (one load per chain)
//!         → for each filter in (order, id, revision) order:
//!             toggle check → should_filter → run (panic-isolated)
//!             sampled canary? → run shadow on a cloned context
//!         → Route failure / fatal Pre failure → Error group
//!     → ChainResult (invocations, shadows, abort flag)
//! ```
//!
//! # Design Decisions
//! - No lock is held while filter code runs
//! - Shadow results are recorded, never applied to the live context
//! - Sampling is decided once per request, not once per filter

pub mod canary;
pub mod context;
pub mod executor;
pub mod toggles;

pub use canary::{ShadowRecord, ShadowSampler};
pub use context::RequestContext;
pub use executor::{ChainResult, FilterChainExecutor, Invocation, Outcome, SkipReason};
pub use toggles::{RuntimeToggles, ToggleSource};
