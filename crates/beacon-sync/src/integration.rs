//! # Beacon Integration
//!
//! Owns every engine component and routes platform "down" payloads to them.
//!
//! ## Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          BeaconIntegration                              │
//! │                                                                         │
//! │   SyncScheduler ──► CycleExecutor ──► SyncCycle                         │
//! │                                        ├─► CloudDeviceMapper ─┐         │
//! │                                        └─► HistorySyncer      │         │
//! │                                               ▲               ▼         │
//! │   WebhookIngestor ────────────────────────────┘   DeviceSyncCoordinator │
//! │          └──── unknown serial ──────────────────────────►│              │
//! │                                                          ▼              │
//! │                                                    DeviceService        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Down Routes
//! ```text
//! {id}.integration.scheduled_data_fetch.*   scheduler.apply_settings
//! {id}.integration.webhook.*                webhook.apply_settings
//! {id}.integration.openapi_status = READY   scheduler.on_connection_ready
//! {id}.integration.sync_device              scheduler.sync_all_now (awaited)
//! {id}.integration.add_device.*             devices.add_remote_device
//! {id}.integration.delete_device            devices.delete_device
//! {id}.device.*                             devices.forward_downlink
//! ```

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use beacon_core::keys::{NESTED_SEPARATOR, ROOT_SEPARATOR};
use beacon_core::payload::decode_grouped;
use beacon_core::{ExchangePayload, IntegrationStatus};

use crate::config::{fields, EngineConfig, ScheduledFetchSettings, WebhookSettings};
use crate::coordinator::DeviceSyncCoordinator;
use crate::device_mapper::CloudDeviceMapper;
use crate::device_service::{DeviceService, DEFAULT_DEVICE_NAME};
use crate::error::{SyncError, SyncResult};
use crate::executor::CycleExecutor;
use crate::history::HistorySyncer;
use crate::ports::{CloudClient, DeviceRegistry, ExchangeBus, HistoryStore, ValueStore};
use crate::scheduler::{SyncCycle, SyncScheduler};
use crate::webhook::{WebhookDelivery, WebhookIngestor, WebhookOutcome};

/// Context key carrying the name of a device to add.
pub const DEVICE_NAME_CONTEXT: &str = "device_name";

/// Context key carrying the identifier of a device to delete.
pub const DEVICE_IDENTIFIER_CONTEXT: &str = "device_identifier";

/// Body of an add-device request.
#[derive(Debug, Deserialize)]
struct AddDeviceRequest {
    #[serde(default)]
    sn: Option<String>,
}

// =============================================================================
// Integration
// =============================================================================

pub struct BeaconIntegration {
    config: EngineConfig,
    values: Arc<dyn ValueStore>,
    devices: Arc<DeviceService>,
    coordinator: DeviceSyncCoordinator,
    history: Arc<HistorySyncer>,
    scheduler: SyncScheduler,
    webhook: WebhookIngestor,
    stopped: AtomicBool,
}

impl BeaconIntegration {
    pub fn builder(config: EngineConfig) -> BeaconIntegrationBuilder {
        BeaconIntegrationBuilder::new(config)
    }

    /// Loads persisted settings and arms the scheduler.
    pub async fn start(&self) -> SyncResult<()> {
        info!(integration = %self.config.integration_id(), "Starting integration");
        self.stopped.store(false, Ordering::SeqCst);
        self.webhook.init().await?;
        self.scheduler.start().await?;
        info!("Integration started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!(integration = %self.config.integration_id(), "Shutting down integration");
        self.stopped.store(true, Ordering::SeqCst);
        self.scheduler.stop().await;
    }

    fn ensure_running(&self) -> SyncResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }
        Ok(())
    }

    /// Runs a full sync cycle and waits for it.
    pub async fn sync_all_now(&self) -> SyncResult<()> {
        self.ensure_running()?;
        self.scheduler.sync_all_now().await
    }

    pub async fn handle_webhook(&self, delivery: WebhookDelivery) -> WebhookOutcome {
        self.webhook.handle(delivery).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn devices(&self) -> &DeviceService {
        &self.devices
    }

    pub fn coordinator(&self) -> &DeviceSyncCoordinator {
        &self.coordinator
    }

    pub fn history(&self) -> &HistorySyncer {
        &self.history
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn webhook(&self) -> &WebhookIngestor {
        &self.webhook
    }

    // =========================================================================
    // Down Routing
    // =========================================================================

    /// Dispatches a down payload to every component subscribed to its keys.
    pub async fn handle_down(&self, payload: &ExchangePayload) -> SyncResult<()> {
        self.ensure_running()?;

        let fetch_key = self.config.integration_key(fields::SCHEDULED_DATA_FETCH);
        if has_key_under(payload, &fetch_key) {
            let settings: ScheduledFetchSettings =
                self.merged_settings(&fetch_key, payload).await?.unwrap_or_default();
            debug!(?settings, "Scheduled fetch settings changed");
            self.scheduler.apply_settings(&settings).await?;
        }

        let webhook_key = self.config.integration_key(fields::WEBHOOK);
        if has_key_under(payload, &webhook_key) {
            let settings: WebhookSettings =
                self.merged_settings(&webhook_key, payload).await?.unwrap_or_default();
            self.webhook.apply_settings(&settings).await?;
        }

        let status_key = self.config.integration_key(fields::OPENAPI_STATUS);
        if let Some(status) = payload.get(&status_key).and_then(|v| v.as_str()) {
            if IntegrationStatus::from_str(status).ok() == Some(IntegrationStatus::Ready) {
                info!("Cloud connection ready");
                self.scheduler.on_connection_ready();
            }
        }

        let add_key = self.config.integration_key(fields::ADD_DEVICE);
        if has_key_under(payload, &add_key) {
            self.add_device(&add_key, payload).await?;
        }

        if payload.get(&self.config.integration_key(fields::DELETE_DEVICE)).is_some() {
            match payload.context(DEVICE_IDENTIFIER_CONTEXT).and_then(|v| v.as_str()) {
                Some(identifier) => self.devices.delete_device(identifier).await?,
                None => warn!("Delete request without device identifier"),
            }
        }

        let device_prefix = format!("{}.device.", self.config.integration_id());
        let downlink = payload.filter_keys(|key| key.starts_with(&device_prefix));
        if !downlink.is_empty() {
            self.devices.forward_downlink(&downlink).await?;
        }

        if payload.get(&self.config.integration_key(fields::SYNC_DEVICE)).is_some() {
            info!("Full sync requested");
            self.scheduler.sync_all_now().await?;
        }
        Ok(())
    }

    async fn add_device(&self, add_key: &str, payload: &ExchangePayload) -> SyncResult<()> {
        let request: Option<AddDeviceRequest> = decode_grouped(add_key, payload.values())?;
        let Some(sn) = request.and_then(|r| r.sn).filter(|sn| !sn.is_empty()) else {
            warn!("Add device request without serial number");
            return Ok(());
        };
        let name = payload.context_str(DEVICE_NAME_CONTEXT, DEFAULT_DEVICE_NAME);
        self.devices.add_remote_device(&sn, name).await?;
        Ok(())
    }

    /// Stored settings under `prefix`, overlaid with the payload's changes.
    async fn merged_settings<T: DeserializeOwned>(
        &self,
        prefix: &str,
        payload: &ExchangePayload,
    ) -> SyncResult<Option<T>> {
        let mut values = self.values.find_values_by_prefix(prefix).await?;
        values.extend(
            payload
                .values()
                .iter()
                .filter(|(key, _)| is_under(prefix, key))
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Ok(decode_grouped(prefix, &values)?)
    }
}

fn is_under(prefix: &str, key: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with([ROOT_SEPARATOR, NESTED_SEPARATOR]))
}

fn has_key_under(payload: &ExchangePayload, prefix: &str) -> bool {
    payload.keys().any(|key| is_under(prefix, key))
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder wiring host ports into a [`BeaconIntegration`].
pub struct BeaconIntegrationBuilder {
    config: EngineConfig,
    registry: Option<Arc<dyn DeviceRegistry>>,
    values: Option<Arc<dyn ValueStore>>,
    bus: Option<Arc<dyn ExchangeBus>>,
    history_store: Option<Arc<dyn HistoryStore>>,
    cloud: Option<Arc<dyn CloudClient>>,
}

impl BeaconIntegrationBuilder {
    pub fn new(config: EngineConfig) -> Self {
        BeaconIntegrationBuilder {
            config,
            registry: None,
            values: None,
            bus: None,
            history_store: None,
            cloud: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_value_store(mut self, values: Arc<dyn ValueStore>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn ExchangeBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_history_store(mut self, history_store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(history_store);
        self
    }

    pub fn with_cloud(mut self, cloud: Arc<dyn CloudClient>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Validates the config and wires every component.
    pub fn build(self) -> SyncResult<BeaconIntegration> {
        let config = self.config;
        config.validate()?;

        let registry = self.registry.ok_or_else(|| missing("Device registry"))?;
        let values = self.values.ok_or_else(|| missing("Value store"))?;
        let bus = self.bus.ok_or_else(|| missing("Exchange bus"))?;
        let history_store = self.history_store.ok_or_else(|| missing("History store"))?;
        let cloud = self.cloud.ok_or_else(|| missing("Cloud client"))?;

        let integration = config.integration_id().to_string();
        let devices = Arc::new(DeviceService::new(
            integration.clone(),
            registry.clone(),
            cloud.clone(),
        ));
        let coordinator =
            DeviceSyncCoordinator::new(config.sync.device_workers, cloud.clone(), devices.clone());
        let history = Arc::new(HistorySyncer::new(
            integration.clone(),
            config.sync.history_page_size,
            config.sync.history_lookback_secs,
            registry.clone(),
            values.clone(),
            bus.clone(),
            history_store,
            cloud.clone(),
        ));
        let mapper = CloudDeviceMapper::new(
            integration.clone(),
            config.sync.device_page_size,
            registry.clone(),
            cloud,
            coordinator.clone(),
        );

        let executor = CycleExecutor::new(Arc::new(SyncCycle::new(mapper, history.clone())));
        let scheduler = SyncScheduler::new(
            config.integration_key(fields::SCHEDULED_DATA_FETCH),
            values.clone(),
            executor,
        );
        let webhook = WebhookIngestor::new(
            integration,
            config.integration_key(fields::WEBHOOK),
            config.integration_key(fields::WEBHOOK_STATUS),
            config.webhook.clone(),
            values.clone(),
            bus,
            registry,
            history.clone(),
            coordinator.clone(),
        );

        Ok(BeaconIntegration {
            config,
            values,
            devices,
            coordinator,
            history,
            scheduler,
            webhook,
            stopped: AtomicBool::new(false),
        })
    }
}

fn missing(port: &str) -> SyncError {
    SyncError::InvalidConfig(format!("{port} required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{DevicePage, HistoryPage, HistoryRecord};
    use crate::testing::{
        details, init_tracing, FakeCloud, MemoryRegistry, MemoryValueStore, RecordingBus,
        RecordingHistory,
    };
    use beacon_core::ThingSpec;
    use serde_json::json;

    struct Harness {
        registry: Arc<MemoryRegistry>,
        store: Arc<MemoryValueStore>,
        bus: Arc<RecordingBus>,
        cloud: Arc<FakeCloud>,
        integration: BeaconIntegration,
    }

    fn harness(identifiers: &[&str]) -> Harness {
        init_tracing();
        let registry = Arc::new(MemoryRegistry::with_devices("beacon", identifiers));
        let store = Arc::new(MemoryValueStore::default());
        let bus = Arc::new(RecordingBus::new(store.clone()));
        let cloud = Arc::new(FakeCloud::default());
        let integration = BeaconIntegration::builder(EngineConfig::default())
            .with_registry(registry.clone())
            .with_value_store(store.clone())
            .with_bus(bus.clone())
            .with_history_store(Arc::new(RecordingHistory::default()))
            .with_cloud(cloud.clone())
            .build()
            .unwrap();
        Harness {
            registry,
            store,
            bus,
            cloud,
            integration,
        }
    }

    fn spec() -> ThingSpec {
        serde_json::from_value(json!({
            "properties": [
                {"id": "temperature", "name": "Temperature", "accessMode": "R",
                 "dataSpec": {"dataType": "DOUBLE", "unitName": "°C"}},
                {"id": "interval", "name": "Interval", "accessMode": "RW",
                 "dataSpec": {"dataType": "INT"}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_build_requires_ports() {
        let err = BeaconIntegration::builder(EngineConfig::default())
            .build()
            .err()
            .unwrap();
        assert!(err.is_config_error());

        let mut config = EngineConfig::default();
        config.sync.device_workers = 0;
        assert!(BeaconIntegration::builder(config).build().is_err());
    }

    #[test]
    fn test_is_under_requires_separator() {
        assert!(is_under("beacon.integration.webhook", "beacon.integration.webhook.enabled"));
        assert!(!is_under("beacon.integration.webhook", "beacon.integration.webhook_status"));
        assert!(!is_under("beacon.integration.webhook", "beacon.integration.webhook"));
    }

    #[tokio::test]
    async fn test_start_with_nothing_stored() {
        let h = harness(&[]);
        h.integration.start().await.unwrap();

        assert!(!h.integration.scheduler().is_armed().await);
        assert!(!h.integration.webhook().is_enabled());
        h.integration.shutdown().await;

        let err = h.integration.sync_all_now().await.unwrap_err();
        assert!(matches!(err, SyncError::ShuttingDown));
        let payload = ExchangePayload::single("beacon.integration.sync_device", "");
        assert!(h.integration.handle_down(&payload).await.is_err());
    }

    #[tokio::test]
    async fn test_settings_routes() {
        let h = harness(&[]);
        h.integration.start().await.unwrap();
        h.store
            .set("beacon.integration.scheduled_data_fetch.enabled", json!(true));

        let mut payload = ExchangePayload::new();
        payload.insert("beacon.integration.scheduled_data_fetch.period", 300);
        payload.insert("beacon.integration.webhook.enabled", true);
        payload.insert("beacon.integration.webhook.secret_key", "s3cret");
        h.integration.handle_down(&payload).await.unwrap();

        assert!(h.integration.scheduler().is_armed().await);
        assert!(h.integration.webhook().is_enabled());

        let disable = ExchangePayload::single("beacon.integration.scheduled_data_fetch.enabled", false);
        h.integration.handle_down(&disable).await.unwrap();
        assert!(!h.integration.scheduler().is_armed().await);
        h.integration.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_device_runs_full_cycle() {
        let h = harness(&["SN1"]);
        h.registry.set_remote_id("SN1", "1");
        h.cloud.set_device_pages(vec![DevicePage {
            total: Some(2),
            content: Some(vec![details("1", "SN1"), details("2", "SN2")]),
        }]);
        h.cloud.set_spec("1", spec());
        h.cloud.set_spec("2", spec());
        h.cloud.push_history(
            "1",
            HistoryPage {
                list: Some(vec![HistoryRecord {
                    ts: Some(42_000),
                    properties: json!({"temperature": 19.5}),
                }]),
                next_page_key: None,
            },
        );

        let payload = ExchangePayload::single("beacon.integration.sync_device", "");
        h.integration.handle_down(&payload).await.unwrap();

        // Full cycle: history starts at zero.
        assert_eq!(h.cloud.history_queries()[0].start_time, 0);
        assert_eq!(
            h.bus.ups_with("beacon.device.SN1.temperature"),
            vec![json!(19.5)]
        );

        // Device tasks run detached from the cycle.
        for _ in 0..100 {
            if h.registry.get("SN2").is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let added = h.registry.get("SN2").unwrap();
        assert_eq!(added.name, "Device SN2");
        assert_eq!(added.entities.len(), 3);
    }

    #[tokio::test]
    async fn test_add_and_delete_device_routes() {
        let h = harness(&[]);
        h.cloud.set_attach_id(Some("5"));
        h.cloud.set_spec("5", spec());

        let add = ExchangePayload::single("beacon.integration.add_device.sn", "SN5")
            .with_context(DEVICE_NAME_CONTEXT, "Porch");
        h.integration.handle_down(&add).await.unwrap();

        let device = h.registry.get("SN5").unwrap();
        assert_eq!(device.name, "Porch");
        assert_eq!(h.cloud.attached()[0].name, "Porch");

        let delete = ExchangePayload::single("beacon.integration.delete_device", "")
            .with_context(DEVICE_IDENTIFIER_CONTEXT, "SN5");
        h.integration.handle_down(&delete).await.unwrap();

        assert!(h.registry.get("SN5").is_none());
        assert_eq!(h.cloud.deleted(), vec!["5".to_string()]);
    }

    #[tokio::test]
    async fn test_add_device_default_name() {
        let h = harness(&[]);
        h.cloud.set_attach_id(Some("6"));
        h.cloud.set_spec("6", spec());

        let add = ExchangePayload::single("beacon.integration.add_device.sn", "SN6");
        h.integration.handle_down(&add).await.unwrap();

        assert_eq!(h.registry.get("SN6").unwrap().name, DEFAULT_DEVICE_NAME);
    }

    #[tokio::test]
    async fn test_device_keys_forwarded_downlink() {
        let h = harness(&[]);
        h.integration
            .devices()
            .add_local_device("SN1", "Sensor", "1807", &spec())
            .await
            .unwrap();

        let mut payload = ExchangePayload::new();
        payload.insert("beacon.device.SN1.interval", 60);
        payload.insert("beacon.integration.openapi_status", "NOT_READY");
        h.integration.handle_down(&payload).await.unwrap();

        let updates = h.cloud.property_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.get("interval"), Some(&json!(60)));
    }
}
