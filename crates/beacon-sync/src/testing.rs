//! In-memory fakes of every port, for tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use uuid::Uuid;

use beacon_core::{Device, ExchangePayload, ThingSpec};

use crate::cloud::{
    AttachDevice, DeviceDetails, DevicePage, DeviceSearch, HistoryPage, HistoryQuery,
};
use crate::error::{CloudError, SyncResult};
use crate::ports::{CloudClient, DeviceRegistry, ExchangeBus, HistoryStore, ValueStore};

/// Routes engine logs to the test output; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
pub struct MemoryRegistry {
    devices: Mutex<BTreeMap<String, Device>>,
}

impl MemoryRegistry {
    /// Registry pre-filled with bare devices of `integration`.
    pub fn with_devices(integration: &str, identifiers: &[&str]) -> Self {
        let registry = Self::default();
        for identifier in identifiers {
            let mut device = Device::new(integration, *identifier, *identifier);
            device.id = Some(Uuid::new_v4().to_string());
            registry
                .devices
                .lock()
                .insert(identifier.to_string(), device);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn get(&self, identifier: &str) -> Option<Device> {
        self.devices.lock().get(identifier).cloned()
    }

    pub fn set_remote_id(&self, identifier: &str, device_id: &str) {
        if let Some(device) = self.devices.lock().get_mut(identifier) {
            device.set_remote_device_id(device_id);
        }
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn find_all(&self, integration: &str) -> SyncResult<Vec<Device>> {
        Ok(self
            .devices
            .lock()
            .values()
            .filter(|d| d.integration == integration)
            .cloned()
            .collect())
    }

    async fn find_by_identifier(
        &self,
        integration: &str,
        identifier: &str,
    ) -> SyncResult<Option<Device>> {
        Ok(self
            .devices
            .lock()
            .get(identifier)
            .filter(|d| d.integration == integration)
            .cloned())
    }

    async fn save(&self, mut device: Device) -> SyncResult<Device> {
        if device.id.is_none() {
            device.id = Some(Uuid::new_v4().to_string());
        }
        self.devices
            .lock()
            .insert(device.identifier.clone(), device.clone());
        Ok(device)
    }

    async fn delete_by_id(&self, id: &str) -> SyncResult<()> {
        self.devices
            .lock()
            .retain(|_, d| d.id.as_deref() != Some(id));
        Ok(())
    }
}

// =============================================================================
// Value Store & Bus
// =============================================================================

#[derive(Default)]
pub struct MemoryValueStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryValueStore {
    pub fn set(&self, key: &str, value: Value) {
        self.values.lock().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl ValueStore for MemoryValueStore {
    async fn find_value(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.get(key))
    }

    async fn find_values_by_prefix(&self, prefix: &str) -> SyncResult<BTreeMap<String, Value>> {
        Ok(self
            .values
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Records every publish; down payloads are also persisted to the store.
pub struct RecordingBus {
    store: Arc<MemoryValueStore>,
    ups: Mutex<Vec<ExchangePayload>>,
    downs: Mutex<Vec<ExchangePayload>>,
}

impl RecordingBus {
    pub fn new(store: Arc<MemoryValueStore>) -> Self {
        RecordingBus {
            store,
            ups: Mutex::new(Vec::new()),
            downs: Mutex::new(Vec::new()),
        }
    }

    pub fn ups(&self) -> Vec<ExchangePayload> {
        self.ups.lock().clone()
    }

    pub fn downs(&self) -> Vec<ExchangePayload> {
        self.downs.lock().clone()
    }

    /// Up payloads carrying `key`, in publish order.
    pub fn ups_with(&self, key: &str) -> Vec<Value> {
        self.ups
            .lock()
            .iter()
            .filter_map(|p| p.get(key).cloned())
            .collect()
    }
}

#[async_trait]
impl ExchangeBus for RecordingBus {
    async fn publish_up(&self, payload: ExchangePayload) -> SyncResult<()> {
        self.ups.lock().push(payload);
        Ok(())
    }

    async fn publish_down(&self, payload: ExchangePayload) -> SyncResult<()> {
        for (key, value) in payload.values() {
            self.store.set(key, value.clone());
        }
        self.downs.lock().push(payload);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHistory {
    records: Mutex<Vec<(ExchangePayload, i64)>>,
}

impl RecordingHistory {
    pub fn records(&self) -> Vec<(ExchangePayload, i64)> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl HistoryStore for RecordingHistory {
    async fn save_history(&self, payload: ExchangePayload, timestamp_ms: i64) -> SyncResult<()> {
        self.records.lock().push((payload, timestamp_ms));
        Ok(())
    }
}

// =============================================================================
// Cloud
// =============================================================================

#[derive(Default)]
struct CloudState {
    device_pages: Vec<DevicePage>,
    by_serial: HashMap<String, DeviceDetails>,
    searches: Vec<DeviceSearch>,
    specs: HashMap<String, ThingSpec>,
    spec_requests: Vec<String>,
    history: HashMap<String, VecDeque<HistoryPage>>,
    history_queries: Vec<HistoryQuery>,
    failing_history: Vec<String>,
    attach_id: Option<String>,
    attached: Vec<AttachDevice>,
    delete_error: Option<String>,
    deleted: Vec<String>,
    property_updates: Vec<(String, Map<String, Value>)>,
    service_calls: Vec<(String, String, Value)>,
}

/// Scriptable cloud; every call is recorded.
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
    spec_gate: Mutex<Option<Arc<Semaphore>>>,
}

pub fn details(device_id: &str, sn: &str) -> DeviceDetails {
    DeviceDetails {
        device_id: device_id.to_string(),
        sn: Some(sn.to_string()),
        name: Some(format!("Device {sn}")),
    }
}

impl FakeCloud {
    /// Pages returned for page numbers 1, 2, ...
    pub fn set_device_pages(&self, pages: Vec<DevicePage>) {
        self.state.lock().device_pages = pages;
    }

    pub fn add_serial(&self, details: DeviceDetails) {
        if let Some(sn) = details.sn.clone() {
            self.state.lock().by_serial.insert(sn, details);
        }
    }

    pub fn searches(&self) -> Vec<DeviceSearch> {
        self.state.lock().searches.clone()
    }

    pub fn set_spec(&self, device_id: &str, spec: ThingSpec) {
        self.state.lock().specs.insert(device_id.to_string(), spec);
    }

    pub fn spec_requests(&self) -> Vec<String> {
        self.state.lock().spec_requests.clone()
    }

    /// Holds every spec request until [`FakeCloud::open_specs`].
    pub fn hold_specs(&self) {
        *self.spec_gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn open_specs(&self) {
        if let Some(gate) = self.spec_gate.lock().take() {
            gate.add_permits(1024);
        }
    }

    pub fn push_history(&self, device_id: &str, page: HistoryPage) {
        self.state
            .lock()
            .history
            .entry(device_id.to_string())
            .or_default()
            .push_back(page);
    }

    pub fn fail_history_for(&self, device_id: &str) {
        self.state
            .lock()
            .failing_history
            .push(device_id.to_string());
    }

    pub fn history_queries(&self) -> Vec<HistoryQuery> {
        self.state.lock().history_queries.clone()
    }

    pub fn set_attach_id(&self, device_id: Option<&str>) {
        self.state.lock().attach_id = device_id.map(str::to_string);
    }

    pub fn attached(&self) -> Vec<AttachDevice> {
        self.state.lock().attached.clone()
    }

    pub fn fail_delete_with(&self, code: &str) {
        self.state.lock().delete_error = Some(code.to_string());
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn property_updates(&self) -> Vec<(String, Map<String, Value>)> {
        self.state.lock().property_updates.clone()
    }

    pub fn service_calls(&self) -> Vec<(String, String, Value)> {
        self.state.lock().service_calls.clone()
    }
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn search_devices(&self, search: DeviceSearch) -> Result<DevicePage, CloudError> {
        let mut state = self.state.lock();
        state.searches.push(search.clone());

        if let Some(sn) = &search.sn {
            return Ok(match state.by_serial.get(sn) {
                Some(details) => DevicePage {
                    total: Some(1),
                    content: Some(vec![details.clone()]),
                },
                None => DevicePage {
                    total: Some(0),
                    content: Some(Vec::new()),
                },
            });
        }

        let index = search.page_number.saturating_sub(1) as usize;
        Ok(state.device_pages.get(index).cloned().unwrap_or_default())
    }

    async fn get_thing_spec(&self, device_id: &str) -> Result<Option<ThingSpec>, CloudError> {
        let gate = self.spec_gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| CloudError::Transport(e.to_string()))?;
        }

        let mut state = self.state.lock();
        state.spec_requests.push(device_id.to_string());
        Ok(state.specs.get(device_id).cloned())
    }

    async fn properties_history(&self, query: HistoryQuery) -> Result<HistoryPage, CloudError> {
        let mut state = self.state.lock();
        state.history_queries.push(query.clone());
        if state.failing_history.contains(&query.device_id) {
            return Err(CloudError::Transport("connection reset".into()));
        }
        Ok(state
            .history
            .get_mut(&query.device_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default())
    }

    async fn update_properties(
        &self,
        device_id: &str,
        properties: Map<String, Value>,
    ) -> Result<(), CloudError> {
        self.state
            .lock()
            .property_updates
            .push((device_id.to_string(), properties));
        Ok(())
    }

    async fn call_service(
        &self,
        device_id: &str,
        service_id: &str,
        inputs: Value,
    ) -> Result<(), CloudError> {
        self.state.lock().service_calls.push((
            device_id.to_string(),
            service_id.to_string(),
            inputs,
        ));
        Ok(())
    }

    async fn attach_device(&self, request: AttachDevice) -> Result<Option<String>, CloudError> {
        let mut state = self.state.lock();
        state.attached.push(request);
        Ok(state.attach_id.clone())
    }

    async fn delete_device(&self, device_id: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock();
        if let Some(code) = state.delete_error.clone() {
            return Err(CloudError::Api {
                code,
                message: format!("cannot delete {device_id}"),
            });
        }
        state.deleted.push(device_id.to_string());
        Ok(())
    }
}
