//! Filter data model.
//!
//! # Data Flow
//! ```text
//! NewRevision (admin call / seed file)
//!     → store assigns FilterId::derive(name, type) + next revision number
//!     → FilterRevision (immutable content, mutable lifecycle flags)
//!     → ChangeEvent published on every lifecycle transition
//! ```
//!
//! # Design Decisions
//! - Identity is derived from name + type, never minted per call
//! - Canary is a flag orthogonal to Active/Inactive
//! - Revision content never changes after creation; only `state`/`canary` do

pub mod event;
pub mod types;

pub use event::{ChangeEvent, ChangeKind};
pub use types::{FilterId, FilterRevision, FilterState, FilterType, NewRevision};
