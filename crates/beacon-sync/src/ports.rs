//! # Ports
//!
//! Everything the engine needs from its host, as object-safe async traits.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         beacon-sync engine                               │
//! └───┬───────────────┬───────────────┬───────────────┬───────────────┬─────┘
//!     ▼               ▼               ▼               ▼               ▼
//! DeviceRegistry  ValueStore     ExchangeBus     HistoryStore     CloudClient
//! devices +       latest values  up: readings    append-only      remote device
//! entities        + settings     down: commands  time series      management
//! ```
//!
//! The host owns persistence, the event bus and the cloud SDK. Down
//! subscriptions are routed through [`crate::BeaconIntegration::handle_down`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use beacon_core::{Device, ExchangePayload, ThingSpec};

use crate::cloud::{AttachDevice, DevicePage, DeviceSearch, HistoryPage, HistoryQuery};
use crate::error::{CloudError, SyncResult};

/// Local device registry.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// All devices owned by `integration`.
    async fn find_all(&self, integration: &str) -> SyncResult<Vec<Device>>;

    async fn find_by_identifier(
        &self,
        integration: &str,
        identifier: &str,
    ) -> SyncResult<Option<Device>>;

    /// Inserts or replaces the device; returns it with its registry id set.
    async fn save(&self, device: Device) -> SyncResult<Device>;

    async fn delete_by_id(&self, id: &str) -> SyncResult<()>;
}

/// Keyed store of the latest entity values.
#[async_trait]
pub trait ValueStore: Send + Sync {
    async fn find_value(&self, key: &str) -> SyncResult<Option<Value>>;

    /// Every stored value whose key starts with `prefix`.
    async fn find_values_by_prefix(&self, prefix: &str) -> SyncResult<BTreeMap<String, Value>>;
}

/// Exchange bus between devices and the platform.
#[async_trait]
pub trait ExchangeBus: Send + Sync {
    /// Device -> platform: live readings and status.
    async fn publish_up(&self, payload: ExchangePayload) -> SyncResult<()>;

    /// Platform -> device: persisted values and commands.
    async fn publish_down(&self, payload: ExchangePayload) -> SyncResult<()>;
}

/// Append-only store of historical readings.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_history(&self, payload: ExchangePayload, timestamp_ms: i64) -> SyncResult<()>;
}

/// Cloud device-management API.
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn search_devices(&self, search: DeviceSearch) -> Result<DevicePage, CloudError>;

    /// `None` when the cloud has no spec for the device.
    async fn get_thing_spec(&self, device_id: &str) -> Result<Option<ThingSpec>, CloudError>;

    async fn properties_history(&self, query: HistoryQuery) -> Result<HistoryPage, CloudError>;

    async fn update_properties(
        &self,
        device_id: &str,
        properties: Map<String, Value>,
    ) -> Result<(), CloudError>;

    async fn call_service(
        &self,
        device_id: &str,
        service_id: &str,
        inputs: Value,
    ) -> Result<(), CloudError>;

    /// Registers the device; returns the remote device id when assigned.
    async fn attach_device(&self, request: AttachDevice) -> Result<Option<String>, CloudError>;

    async fn delete_device(&self, device_id: &str) -> Result<(), CloudError>;
}
