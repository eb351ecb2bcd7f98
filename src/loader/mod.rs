//! Filter loading: compiler capability + compiled unit cache.
//!
//! # Data Flow
//! ```text
//! FilterRevision / filter file
//!     → CompileRequest
//!     → FilterLoader (checksum, single-flight per key)
//!     → FilterCompiler (external capability, runs on a blocking thread)
//!     → Arc<CompiledFilter> (immutable, shared with the registry)
//! ```
//!
//! # Design Decisions
//! - Memoized by `(filter_id, revision, checksum)`
//! - A failed compile never evicts a good unit
//! - `ScriptCompiler` is the built-in capability; any `FilterCompiler` plugs in

pub mod cache;
pub mod compiler;
pub mod script;

pub use cache::{checksum, CacheKey, CompileRequest, CompiledFilter, FilterLoader};
pub use compiler::{Declared, ExecutableFilter, FilterCompiler, FilterFailure};
pub use script::ScriptCompiler;
