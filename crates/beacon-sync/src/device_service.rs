//! # Device Service
//!
//! Local and remote device management for one integration.
//!
//! ## Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  local                                                                  │
//! │    add_local_device     spec -> entities (+ watermark) -> registry.save │
//! │    update_local_device  same, keeps the stored name                     │
//! │    remove_local_device  no-op, reports "not removed"                    │
//! │                                                                         │
//! │  remote                                                                 │
//! │    add_remote_device    cloud attach -> spec -> add_local_device        │
//! │    delete_device        cloud delete (tolerates device_not_found)       │
//! │                         -> registry.delete_by_id                        │
//! │                                                                         │
//! │  downlink                                                               │
//! │    forward_downlink     {device}.prop...  -> one update_properties call │
//! │                         {device}.svc@...  -> one call_service per svc   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use beacon_core::keys::{self, is_internal_identifier};
use beacon_core::mapper::{sync_watermark_entity, thing_spec_to_entities};
use beacon_core::payload::group;
use beacon_core::{Device, EntityKind, ExchangePayload, ThingSpec};

use crate::cloud::AttachDevice;
use crate::error::{CloudError, SyncError, SyncResult};
use crate::ports::{CloudClient, DeviceRegistry};

/// Device name used when an add request carries none.
pub const DEFAULT_DEVICE_NAME: &str = "Device Name";

/// Local/remote device management.
pub struct DeviceService {
    integration: String,
    registry: Arc<dyn DeviceRegistry>,
    cloud: Arc<dyn CloudClient>,
}

impl DeviceService {
    pub fn new(
        integration: impl Into<String>,
        registry: Arc<dyn DeviceRegistry>,
        cloud: Arc<dyn CloudClient>,
    ) -> Self {
        DeviceService {
            integration: integration.into(),
            registry,
            cloud,
        }
    }

    pub fn integration(&self) -> &str {
        &self.integration
    }

    // =========================================================================
    // Local Devices
    // =========================================================================

    /// Fetches the thing spec of a remote device.
    pub async fn get_thing_spec(&self, device_id: &str) -> SyncResult<ThingSpec> {
        self.cloud
            .get_thing_spec(device_id)
            .await?
            .ok_or_else(|| SyncError::MissingThingSpec {
                device_id: device_id.to_string(),
            })
    }

    /// Creates the local device for a remote one.
    pub async fn add_local_device(
        &self,
        identifier: &str,
        name: &str,
        device_id: &str,
        spec: &ThingSpec,
    ) -> SyncResult<Device> {
        let mut device = Device::new(&self.integration, identifier, name);
        device.set_remote_device_id(device_id);
        device.entities = Self::entities_for(spec);

        let saved = self.registry.save(device).await?;
        info!(
            identifier,
            device_id,
            entities = saved.entities.len(),
            "Local device added"
        );
        Ok(saved)
    }

    /// Replaces the entities of an existing local device.
    pub async fn update_local_device(
        &self,
        identifier: &str,
        device_id: &str,
        spec: &ThingSpec,
    ) -> SyncResult<Device> {
        let mut device = self
            .registry
            .find_by_identifier(&self.integration, identifier)
            .await?
            .ok_or_else(|| SyncError::DeviceNotFound {
                identifier: identifier.to_string(),
            })?;

        device.set_remote_device_id(device_id);
        device.entities = Self::entities_for(spec);

        let saved = self.registry.save(device).await?;
        debug!(identifier, device_id, "Local device updated");
        Ok(saved)
    }

    /// Local removal is not supported; always reports "not removed".
    pub async fn remove_local_device(&self, identifier: &str) -> SyncResult<Option<Device>> {
        debug!(identifier, "Local device removal is not supported, keeping device");
        Ok(None)
    }

    fn entities_for(spec: &ThingSpec) -> Vec<beacon_core::Entity> {
        let mut entities = thing_spec_to_entities(spec);
        entities.push(sync_watermark_entity());
        entities
    }

    // =========================================================================
    // Remote Devices
    // =========================================================================

    /// Attaches a device to the cloud by serial number, then adds it locally.
    ///
    /// Returns `None` when the cloud did not assign a device id.
    pub async fn add_remote_device(&self, serial: &str, name: &str) -> SyncResult<Option<Device>> {
        let Some(device_id) = self
            .cloud
            .attach_device(AttachDevice::new(name, serial))
            .await?
        else {
            warn!(serial, name, "Cloud did not return a device id, device not added");
            return Ok(None);
        };
        info!(serial, name, %device_id, "Device attached to cloud");

        let spec = self.get_thing_spec(&device_id).await?;
        self.add_local_device(serial, name, &device_id, &spec)
            .await
            .map(Some)
    }

    /// Deletes the device from the cloud and from the local registry.
    pub async fn delete_device(&self, identifier: &str) -> SyncResult<()> {
        let device = self
            .registry
            .find_by_identifier(&self.integration, identifier)
            .await?
            .ok_or_else(|| SyncError::DeviceNotFound {
                identifier: identifier.to_string(),
            })?;

        match device.remote_device_id() {
            Ok(device_id) => match self.cloud.delete_device(&device_id).await {
                Ok(()) => info!(identifier, %device_id, "Device deleted from cloud"),
                Err(e) if e.has_code(CloudError::DEVICE_NOT_FOUND) => {
                    warn!(identifier, %device_id, "Device not found in cloud")
                }
                Err(e) => return Err(e.into()),
            },
            Err(_) => warn!(identifier, "Device has no remote id, deleting locally only"),
        }

        match &device.id {
            Some(id) => self.registry.delete_by_id(id).await,
            None => {
                warn!(identifier, "Device has no registry id");
                Ok(())
            }
        }
    }

    // =========================================================================
    // Downlink
    // =========================================================================

    /// Pushes property writes and service calls of one device to the cloud.
    ///
    /// A payload addressing zero or several known devices is dropped.
    pub async fn forward_downlink(&self, payload: &ExchangePayload) -> SyncResult<()> {
        let identifiers: BTreeSet<&str> = payload
            .keys()
            .filter_map(|key| keys::device_identifier_of(&self.integration, key).ok())
            .collect();

        let mut devices = Vec::with_capacity(1);
        for identifier in identifiers {
            if let Some(device) = self
                .registry
                .find_by_identifier(&self.integration, identifier)
                .await?
            {
                devices.push(device);
            }
        }
        if devices.len() != 1 {
            warn!(count = devices.len(), "Downlink must address exactly one device");
            return Ok(());
        }
        let device = &devices[0];

        let mut properties = BTreeMap::new();
        let mut services = BTreeMap::new();
        for (key, value) in payload.values() {
            match device.entity_for_key(key).map(|e| e.kind) {
                Some(EntityKind::Property) => {
                    properties.insert(key.clone(), value.clone());
                }
                Some(EntityKind::Service) => {
                    services.insert(key.clone(), value.clone());
                }
                _ => debug!(%key, "Downlink key ignored"),
            }
        }

        let device_key = device.key();
        let properties = Self::grouped_external(&device_key, &properties);
        let services = Self::grouped_external(&device_key, &services);
        if properties.is_empty() && services.is_empty() {
            return Ok(());
        }
        let device_id = device.remote_device_id()?;

        if !properties.is_empty() {
            debug!(%device_id, count = properties.len(), "Updating device properties");
            self.cloud.update_properties(&device_id, properties).await?;
        }

        for (service_id, inputs) in services {
            debug!(%device_id, %service_id, "Calling device service");
            self.cloud
                .call_service(&device_id, &service_id, inputs)
                .await?;
        }
        Ok(())
    }

    /// Groups under the device key and strips engine bookkeeping fields.
    fn grouped_external(device_key: &str, values: &BTreeMap<String, Value>) -> Map<String, Value> {
        let mut grouped = group(device_key, values);
        grouped.retain(|field, _| !is_internal_identifier(field));
        grouped
    }
}
