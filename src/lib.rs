//! Edge gateway library: dynamic filter management and execution.

pub mod admin;
pub mod chain;
pub mod config;
pub mod error;
pub mod filters;
pub mod http;
pub mod lifecycle;
pub mod loader;
pub mod observability;
pub mod poller;
pub mod registry;
pub mod store;

pub use config::GatewayConfig;
pub use error::{FilterError, Result};
pub use http::HttpServer;
pub use lifecycle::{Gateway, Shutdown};
