//! Common command-line arguments for the gateway services
//!
//! Services embed `ServiceArgs` with `#[command(flatten)]` and add their own options.

use clap::Args;

/// Common service startup arguments
#[derive(Debug, Clone, Default, Args)]
pub struct ServiceArgs {
    /// Log filter (trace, debug, info, warn, error or a full filter spec)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Enable debug mode with verbose output
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Disable colored output (useful for log files)
    #[arg(long)]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl ServiceArgs {
    /// Effective log filter: explicit flag, then debug mode, then the configured fallback
    pub fn effective_log_level(&self, configured: &str) -> String {
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        if self.debug {
            return "debug".to_string();
        }
        configured.to_string()
    }
}
