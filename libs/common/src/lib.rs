//! Gateway basic library
//!
//! Provides basic functions shared by all services, including:
//! - logging functions
//! - command-line bootstrap arguments
//! - startup banner and logging bootstrap
//! - graceful shutdown

pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use service_bootstrap::{init_logging, print_startup_banner, LoggingOptions, ServiceInfo};
pub use shutdown::{wait_for_shutdown, ShutdownListener, ShutdownTrigger};

// Re-export common dependencies
pub use anyhow;
pub use tokio;
