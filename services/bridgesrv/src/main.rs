//! Bridge Service (bridgesrv)
//!
//! Modbus RTU to MQTT bridge over a cellular AT-command modem.

use anyhow::Context;
use clap::Parser;
use tracing::info;

use bridgesrv::{
    bootstrap::{self, Args},
    config::BridgeConfig,
    runtime::start_bridge_service,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = BridgeConfig::load(Some(&args.config))
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    bootstrap::initialize_logging(&args, &config)?;
    let service_info = bootstrap::service_info(&config);
    if !args.common.no_color {
        common::print_startup_banner(&service_info);
    }

    // Validation mode: validate and exit
    if args.common.validate {
        info!("Configuration {} is valid", args.config.display());
        return Ok(());
    }

    info!(
        "Bridging {} (modem {}) to {}:{}",
        config.fieldbus.serial.device,
        config.modem.serial.device,
        config.broker.host,
        config.broker.port
    );
    start_bridge_service(config).await?;
    info!("Service shutdown complete");
    Ok(())
}
