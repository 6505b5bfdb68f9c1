//! Runtime Orchestration Layer
//!
//! Service startup and shutdown, pump supervision and session re-establishment

pub mod lifecycle;
pub mod reconnect;

pub use lifecycle::{run_bridge, start_bridge_service, BridgeParts};
pub use reconnect::{LinkState, ReconnectError, ReconnectHelper, ReconnectPolicy};
