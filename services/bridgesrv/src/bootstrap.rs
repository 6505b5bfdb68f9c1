//! Command line and logging bootstrap

use std::path::PathBuf;

use clap::Parser;
use common::{LoggingOptions, ServiceArgs, ServiceInfo};

use crate::config::{BridgeConfig, DEFAULT_CONFIG_PATH};
use crate::error::{ErrorExt, Result};

/// Command-line arguments for bridgesrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bridgesrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus RTU to MQTT bridge over a cellular AT-command modem",
    long_about = None
)]
pub struct Args {
    #[command(flatten)]
    pub common: ServiceArgs,

    /// Configuration file (YAML)
    #[arg(short = 'c', long, env = "BRIDGESRV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

pub fn service_info(config: &BridgeConfig) -> ServiceInfo {
    ServiceInfo::new(
        &config.service.name,
        env!("CARGO_PKG_VERSION"),
        &config.service.description,
    )
}

/// Console plus rolling file logging
///
/// Level priority: `--log-level`, then `--debug`, then `logging.level`.
/// `RUST_LOG` overrides all of them.
pub fn initialize_logging(args: &Args, config: &BridgeConfig) -> Result<()> {
    let level = args.common.effective_log_level(&config.logging.level);
    let options = LoggingOptions {
        dir: config.logging.dir.as_deref(),
        level: &level,
        json: config.logging.json,
        ansi: !args.common.no_color,
        file: config.logging.file,
    };
    common::init_logging(&service_info(config), &options)
        .config_error("Failed to init logging")
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "bridgesrv",
            "--config",
            "/etc/bridgesrv.yaml",
            "-l",
            "debug",
            "--validate",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/bridgesrv.yaml"));
        assert_eq!(args.common.log_level.as_deref(), Some("debug"));
        assert!(args.common.validate);
    }

    #[test]
    fn test_args_default_config_path() {
        let args = Args::try_parse_from(["bridgesrv"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.common.effective_log_level("warn"), "warn");
    }
}
