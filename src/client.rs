//! Typed DeviceHive operations over the correlation bridge.
//!
//! `DeviceHiveClient` turns each DeviceHive action into a method with typed
//! arguments and results. All calls go through one shared `Bridge`, so a
//! client can be cloned freely. Event handlers that issue follow-up requests
//! should hold a `WeakDeviceHiveClient` from `downgrade` instead.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::bridge::{
    Action, Bridge, BridgeOptions, Event, EventHandler, EventKind, ResponsePayload, SessionId,
    WeakBridge,
};
use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::TransportLink;
use crate::transport::coap::{self, CoapTransportHandle};

/// Access and refresh token returned by the `token` action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Device record sent with `device/save`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_id: Option<u64>,
}

impl DeviceSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            network_id: None,
        }
    }

    pub fn in_network(mut self, network_id: u64) -> Self {
        self.network_id = Some(network_id);
        self
    }
}

/// DeviceHive client bound to one gateway session.
#[derive(Debug, Clone)]
pub struct DeviceHiveClient {
    bridge: Bridge,
}

/// Non-owning client handle for event handlers.
///
/// A handler that captured a strong `DeviceHiveClient` would keep the bridge
/// running after every other clone is gone.
#[derive(Debug, Clone)]
pub struct WeakDeviceHiveClient {
    bridge: WeakBridge,
}

impl WeakDeviceHiveClient {
    pub fn upgrade(&self) -> Option<DeviceHiveClient> {
        self.bridge.upgrade().map(DeviceHiveClient::new)
    }
}

impl DeviceHiveClient {
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }

    /// Connect over an existing transport and wait for the session id.
    pub async fn connect(link: TransportLink, options: BridgeOptions) -> BridgeResult<Self> {
        Ok(Self::new(Bridge::connect(link, options).await?))
    }

    /// Open a CoAP transport to the configured gateway and connect.
    ///
    /// The transport stops when the returned handle is dropped.
    pub async fn connect_coap(
        settings: &BridgeSettings,
    ) -> BridgeResult<(Self, CoapTransportHandle)> {
        settings.validate()?;
        let options = BridgeOptions::from_settings(settings)?;
        let (link, handle) = coap::connect(&settings.gateway).await?;
        let client = Self::connect(link, options).await?;
        info!(
            target: "dh_coap::client",
            "Connected to {} with session {}",
            handle.peer_addr(),
            client.session_id().map(|id| id.to_string()).unwrap_or_default()
        );
        Ok((client, handle))
    }

    pub fn downgrade(&self) -> WeakDeviceHiveClient {
        WeakDeviceHiveClient {
            bridge: self.bridge.downgrade(),
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.bridge.session_id()
    }

    pub async fn authenticate(&self, token: &str) -> BridgeResult<ResponsePayload> {
        self.bridge
            .send(Action::Authenticate, json!({ "token": token }))
            .await
    }

    /// Exchange login and password for a token pair.
    pub async fn create_token(&self, login: &str, password: &str) -> BridgeResult<TokenPair> {
        let response = self
            .bridge
            .send(Action::Token, json!({ "login": login, "password": password }))
            .await?;
        serde_json::from_value(response.into_value())
            .map_err(|e| BridgeError::malformed(format!("token response: {}", e)))
    }

    /// Create a network and return its id.
    pub async fn insert_network(&self, name: &str, description: &str) -> BridgeResult<u64> {
        let response = self
            .bridge
            .send(
                Action::NetworkInsert,
                json!({ "network": { "name": name, "description": description } }),
            )
            .await?;
        response
            .get("network")
            .and_then(|network| network.get("id"))
            .and_then(Value::as_u64)
            .ok_or_else(|| BridgeError::malformed("network/insert response has no network.id"))
    }

    pub async fn save_device(
        &self,
        device_id: &str,
        device: &DeviceSpec,
    ) -> BridgeResult<ResponsePayload> {
        self.bridge
            .send(
                Action::DeviceSave,
                json!({ "deviceId": device_id, "device": device }),
            )
            .await
    }

    /// Subscribe to commands for a device and return the subscription id.
    ///
    /// With `return_updated` the gateway also pushes `command/update` events.
    pub async fn subscribe_commands(
        &self,
        device_id: &str,
        return_updated: bool,
    ) -> BridgeResult<String> {
        let mut params = json!({ "deviceId": device_id });
        if return_updated {
            params["returnUpdatedCommands"] = Value::Bool(true);
        }
        let response = self.bridge.send(Action::CommandSubscribe, params).await?;
        subscription_id(&response, Action::CommandSubscribe)
    }

    pub async fn subscribe_notifications(&self, device_id: &str) -> BridgeResult<String> {
        let response = self
            .bridge
            .send(Action::NotificationSubscribe, json!({ "deviceId": device_id }))
            .await?;
        subscription_id(&response, Action::NotificationSubscribe)
    }

    /// Insert a command and return the id the gateway assigned to it.
    pub async fn send_command(&self, device_id: &str, command: &str) -> BridgeResult<String> {
        let response = self
            .bridge
            .send(
                Action::CommandInsert,
                json!({ "deviceId": device_id, "command": { "command": command } }),
            )
            .await?;
        response
            .command_id()
            .ok_or_else(|| BridgeError::malformed("command/insert response has no command.id"))
    }

    pub async fn update_command(
        &self,
        device_id: &str,
        command_id: &str,
        status: &str,
    ) -> BridgeResult<ResponsePayload> {
        self.bridge
            .send(
                Action::CommandUpdate,
                json!({
                    "deviceId": device_id,
                    "commandId": command_id,
                    "command": { "status": status }
                }),
            )
            .await
    }

    pub async fn send_notification(
        &self,
        device_id: &str,
        notification: &str,
    ) -> BridgeResult<ResponsePayload> {
        self.bridge
            .send(
                Action::NotificationInsert,
                json!({
                    "deviceId": device_id,
                    "notification": { "notification": notification }
                }),
            )
            .await
    }

    /// Handle pushed `command/insert` events; `None` clears the handler.
    pub fn on_command_insert<F>(&self, handler: Option<F>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_handler(EventKind::CommandInsert, handler);
    }

    pub fn on_command_update<F>(&self, handler: Option<F>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_handler(EventKind::CommandUpdate, handler);
    }

    pub fn on_notification<F>(&self, handler: Option<F>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.set_handler(EventKind::NotificationInsert, handler);
    }

    fn set_handler<F>(&self, kind: EventKind, handler: Option<F>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handler = handler.map(|f| Arc::new(f) as EventHandler);
        self.bridge.set_event_handler(kind, handler);
    }

    /// Stop the bridge; pending requests fail.
    pub fn close(&self) {
        self.bridge.close();
    }
}

fn subscription_id(response: &ResponsePayload, action: Action) -> BridgeResult<String> {
    response
        .subscription_id()
        .ok_or_else(|| BridgeError::malformed(format!("{} response has no subscriptionId", action)))
}
