pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;

// Re-export the types most callers need
pub use bridge::{
    Action, Bridge, BridgeOptions, CorrelationId, Event, EventKind, ResponsePayload, SessionId,
    WeakBridge,
};
pub use client::{DeviceHiveClient, DeviceSpec, TokenPair, WeakDeviceHiveClient};
pub use config::BridgeSettings;
pub use error::{BridgeError, BridgeResult};
