//! Bridge service configuration
//!
//! Layered with figment: built-in defaults, then the YAML file, then
//! `BRIDGESRV_`-prefixed environment variables (`__` separates nesting, e.g.
//! `BRIDGESRV_BROKER__HOST`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bridge::PumpSettings;
use crate::error::{BridgeError, Result};
use crate::fieldbus::{BankLayout, RequestTimeout};
use crate::runtime::reconnect::ReconnectPolicy;
use crate::serial::SerialSettings;
use crate::session::SessionSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/bridgesrv.yaml";
pub const ENV_PREFIX: &str = "BRIDGESRV_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub service: ServiceConfig,
    pub modem: ModemConfig,
    pub broker: BrokerConfig,
    pub session: SessionConfig,
    pub fieldbus: FieldbusConfig,
    pub bridge: BridgeSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub description: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "bridgesrv".to_string(),
            description: "Modbus RTU to MQTT bridge".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    pub serial: SerialSettings,
}

/// Broker endpoint and device identity (plain configuration values)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub client_index: u8,
    pub host: String,
    pub port: u16,
    pub product_key: String,
    pub device_name: String,
    pub device_secret: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub subscribe_topic: String,
    pub publish_topic: String,
    pub qos: u8,
    pub retain: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_index: 0,
            host: String::new(),
            port: 1883,
            product_key: String::new(),
            device_name: String::new(),
            device_secret: String::new(),
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            subscribe_topic: String::new(),
            publish_topic: String::new(),
            qos: 0,
            retain: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_command_len: usize,
    pub response_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub link_open_timeout_ms: u64,
    pub ready_probe_interval_ms: u64,
    pub ready_threshold: u32,
    /// 0 = probe until ready
    pub ready_max_probes: u32,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_command_len: 256,
            response_timeout_ms: 2000,
            connect_timeout_ms: 10_000,
            link_open_timeout_ms: 10_000,
            ready_probe_interval_ms: 500,
            ready_threshold: 5,
            ready_max_probes: 0,
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// 0 = unlimited
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldbusConfig {
    pub serial: SerialSettings,
    pub banks: BankLayout,
    pub poll_period_ms: u64,
    /// Bound on one request/response exchange on the bus
    pub response_timeout_ms: u64,
}

impl Default for FieldbusConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings {
                device: "/dev/ttyS1".to_string(),
                parity: "even".to_string(),
                ..SerialSettings::default()
            },
            banks: BankLayout::default(),
            poll_period_ms: 500,
            response_timeout_ms: 1000,
        }
    }
}

/// What the runtime does when the pump aborts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Restart,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub request_timeout: RequestTimeout,
    pub max_payload_len: usize,
    pub inbox_capacity: usize,
    pub on_failure: FailurePolicy,
    pub restart_delay_ms: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            request_timeout: RequestTimeout::Forever,
            max_payload_len: 256,
            inbox_capacity: 8,
            on_failure: FailurePolicy::Restart,
            restart_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Root directory for log files; `GATEWAY_LOG_DIR` or `logs` when unset
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
            file: true,
        }
    }
}

impl BridgeConfig {
    /// Load defaults, the YAML file (if it exists) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        debug!("Loading configuration from {}", path.display());

        let config: BridgeConfig = Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(BridgeError::config("service.name cannot be empty"));
        }
        self.modem.serial.validate("modem.serial")?;
        self.fieldbus.serial.validate("fieldbus.serial")?;

        let b = &self.broker;
        for (name, value) in [
            ("broker.host", &b.host),
            ("broker.client_id", &b.client_id),
            ("broker.subscribe_topic", &b.subscribe_topic),
            ("broker.publish_topic", &b.publish_topic),
        ] {
            if value.trim().is_empty() {
                return Err(BridgeError::config(format!("{name} cannot be empty")));
            }
        }
        if b.port == 0 {
            return Err(BridgeError::config("broker.port must be > 0"));
        }
        if b.qos > 2 {
            return Err(BridgeError::config(format!("broker.qos {} not in 0..=2", b.qos)));
        }

        let s = &self.session;
        if s.max_command_len == 0 {
            return Err(BridgeError::config("session.max_command_len must be > 0"));
        }
        for (name, value) in [
            ("session.response_timeout_ms", s.response_timeout_ms),
            ("session.connect_timeout_ms", s.connect_timeout_ms),
            ("session.link_open_timeout_ms", s.link_open_timeout_ms),
            ("session.ready_probe_interval_ms", s.ready_probe_interval_ms),
            ("fieldbus.poll_period_ms", self.fieldbus.poll_period_ms),
            ("fieldbus.response_timeout_ms", self.fieldbus.response_timeout_ms),
        ] {
            if value == 0 {
                return Err(BridgeError::config(format!("{name} must be > 0")));
            }
        }
        if s.ready_threshold == 0 {
            return Err(BridgeError::config("session.ready_threshold must be > 0"));
        }
        if s.reconnect.backoff_multiplier < 1.0 {
            return Err(BridgeError::config(
                "session.reconnect.backoff_multiplier must be >= 1.0",
            ));
        }

        if self.fieldbus.banks.slaves == 0 {
            return Err(BridgeError::config("fieldbus.banks.slaves must be > 0"));
        }
        if self.bridge.max_payload_len == 0 || self.bridge.inbox_capacity == 0 {
            return Err(BridgeError::config(
                "bridge.max_payload_len and bridge.inbox_capacity must be > 0",
            ));
        }
        if self.bridge.request_timeout == RequestTimeout::Bounded(Duration::ZERO) {
            return Err(BridgeError::config("bridge.request_timeout must be > 0"));
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        let b = &self.broker;
        let s = &self.session;
        SessionSettings {
            client_index: b.client_index,
            product_key: b.product_key.clone(),
            device_name: b.device_name.clone(),
            device_secret: b.device_secret.clone(),
            host: b.host.clone(),
            port: b.port,
            client_id: b.client_id.clone(),
            username: b.username.clone(),
            password: b.password.clone(),
            subscribe_topic: b.subscribe_topic.clone(),
            publish_topic: b.publish_topic.clone(),
            qos: b.qos,
            retain: b.retain,
            max_command_len: s.max_command_len,
            response_timeout: Duration::from_millis(s.response_timeout_ms),
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            link_open_timeout: Duration::from_millis(s.link_open_timeout_ms),
            ready_probe_interval: Duration::from_millis(s.ready_probe_interval_ms),
            ready_threshold: s.ready_threshold,
            ready_max_probes: s.ready_max_probes,
        }
    }

    pub fn pump_settings(&self) -> PumpSettings {
        PumpSettings {
            request_timeout: self.bridge.request_timeout,
            max_payload_len: self.bridge.max_payload_len,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.session.reconnect;
        ReconnectPolicy::from_config(
            r.max_attempts,
            r.initial_delay_ms,
            r.max_delay_ms,
            r.backoff_multiplier,
        )
    }
}
