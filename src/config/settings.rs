//! Settings model for the bridge and the `dh-coap` CLI.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::{BootstrapTimeout, RequestTimeout};
use crate::error::{BridgeError, BridgeResult};
use crate::transport::Method;

/// Option number agreed with the gateway for carrying the session id.
pub const DEFAULT_SESSION_OPTION: u16 = 111;

/// Default CoAP port.
pub const DEFAULT_PORT: u16 = 5683;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub gateway: GatewaySettings,
    pub timeouts: TimeoutSettings,
    pub device: DeviceSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    /// Resource path for both the bootstrap and correlated requests.
    pub path: String,
    /// Custom CoAP option number carrying the session id.
    pub session_option: u16,
    /// Method used for correlated requests.
    pub request_method: Method,
    /// Whether correlated requests also register an observe relationship.
    pub observe_requests: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            path: "/".to_string(),
            session_option: DEFAULT_SESSION_OPTION,
            request_method: Method::Get,
            observe_requests: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub request_ms: u64,
    pub bootstrap_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            request_ms: RequestTimeout::default().as_duration().as_millis() as u64,
            bootstrap_ms: BootstrapTimeout::default().as_duration().as_millis() as u64,
        }
    }
}

impl TimeoutSettings {
    pub fn request_timeout(&self) -> BridgeResult<RequestTimeout> {
        RequestTimeout::new(Duration::from_millis(self.request_ms))
    }

    pub fn bootstrap_timeout(&self) -> BridgeResult<BootstrapTimeout> {
        BootstrapTimeout::new(Duration::from_millis(self.bootstrap_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub access_token: Option<String>,
    /// Credentials for the `token` action when no access token is configured.
    pub login: Option<String>,
    pub password: Option<String>,
    pub device_id: String,
    pub device_name: Option<String>,
    pub network_id: Option<u64>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            access_token: None,
            login: None,
            password: None,
            device_id: "coap-test-node".to_string(),
            device_name: None,
            network_id: None,
        }
    }
}

impl BridgeSettings {
    /// Parse settings from TOML text; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> BridgeResult<Self> {
        let settings: Self = toml::from_str(text).map_err(|e| BridgeError::config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.gateway.host.trim().is_empty() {
            return Err(BridgeError::config("gateway.host must not be empty"));
        }
        if self.gateway.port == 0 {
            return Err(BridgeError::config("gateway.port must not be 0"));
        }
        if self.gateway.session_option == 0 {
            return Err(BridgeError::config("gateway.session_option must not be 0"));
        }
        if self.device.device_id.trim().is_empty() {
            return Err(BridgeError::config("device.device_id must not be empty"));
        }
        self.timeouts.request_timeout()?;
        self.timeouts.bootstrap_timeout()?;
        Ok(())
    }
}
