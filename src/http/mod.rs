//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, trace)
//!     → request.rs (buffer body, build RequestContext)
//!     → pipeline.rs (Pre → Route → upstream → Post, Error on failure)
//!     → server.rs (context → response)
//!     → Send to client
//! ```

pub mod pipeline;
pub mod request;
pub mod server;

pub use pipeline::{process, HyperUpstream, PipelineOutcome, Upstream};
pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::HttpServer;
