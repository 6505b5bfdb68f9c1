//! Unified service bootstrap utilities
//!
//! Startup banner and logging initialization shared by the gateway services.

use std::path::Path;

use crate::logging::{self, LogConfig};
use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "bridgesrv")
    pub name: String,
    /// Service version, usually the caller's `CARGO_PKG_VERSION`
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print unified startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ██████╗ ██████╗ ██╗██████╗  ██████╗ ███████╗
 ██╔══██╗██╔══██╗██║██╔══██╗██╔════╝ ██╔════╝
 ██████╔╝██████╔╝██║██║  ██║██║  ███╗█████╗
 ██╔══██╗██╔══██╗██║██║  ██║██║   ██║██╔══╝
 ██████╔╝██║  ██║██║██████╔╝╚██████╔╝███████╗
 ╚═════╝ ╚═╝  ╚═╝╚═╝╚═════╝  ╚═════╝ ╚══════╝
    "#;

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Logging options a service passes in from its own configuration
#[derive(Debug, Clone)]
pub struct LoggingOptions<'a> {
    pub dir: Option<&'a Path>,
    pub level: &'a str,
    pub json: bool,
    pub ansi: bool,
    pub file: bool,
}

/// Initialize logging for a service with standard configuration
///
/// Log root priority: `GATEWAY_LOG_DIR` > `options.dir` > "logs"; files land in
/// `<root>/<service>/`.
pub fn init_logging(service: &ServiceInfo, options: &LoggingOptions<'_>) -> anyhow::Result<()> {
    let log_dir = logging::resolve_log_root(options.dir).join(&service.name);

    let config = LogConfig {
        service_name: service.name.clone(),
        log_dir,
        level: options.level.to_string(),
        enable_json: options.json,
        ansi: options.ansi,
        enable_file: options.file,
        ..Default::default()
    };

    logging::init_with_config(config).map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(())
}
