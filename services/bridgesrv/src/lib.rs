//! Bridge Service Library (bridgesrv)
//!
//! Bridges a Modbus RTU field bus to an MQTT broker reached through a cellular
//! modem's AT command set (`+QMT*`).
//!
//! # Architecture
//!
//! ```text
//!  broker ──+QMTRECV──► NotificationRouter ──inbox──► BridgePump ──► FieldBusMaster
//!     ▲                       │                           │               │
//!     │                  SessionFlags                     │          RegisterBanks
//!     └──AT+QMTPUBEX── Session ◄──────── publish ─────────┘          (poll_tick)
//! ```
//!
//! - **`at`**: line-oriented command channel over the modem's serial link
//! - **`urc`**: unsolicited notification bindings
//! - **`session`**: MQTT session lifecycle driven through AT commands
//! - **`bridge`**: request decoding, dispatch and result publishing
//! - **`fieldbus`** / **`modbus`**: master abstraction and the RTU reference master
//! - **`runtime`**: wiring, pump supervision and reconnection

pub mod at;
pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod error;
pub mod fieldbus;
pub mod modbus;
pub mod runtime;
pub mod serial;
pub mod session;
pub mod urc;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
