//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → store → loader → registry → executor
//!     → seed store → first poll cycle → start pollers
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop listeners → stop pollers (bounded) → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Listeners start after the first poll cycle, so traffic sees loaded filters
//! - Poller shutdown has a timeout: the task is aborted after the deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{wait_for_signal, Signal};
pub use startup::Gateway;
