//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → Gateway::bootstrap wires it into every subsystem
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → main applies live settings (toggles, canary rate)
//! ```
//!
//! # Design Decisions
//! - Only toggles and the canary sample rate change without a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{GatewayConfig, LogFormat, ObservabilityConfig, SourceDirectoryConfig};
pub use validation::{validate_config, ValidationError};
pub use watcher::{restart_required, ConfigWatcher};
