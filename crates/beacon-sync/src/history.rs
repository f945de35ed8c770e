//! # History Syncer
//!
//! Pulls property history of every local device from the cloud.
//!
//! ## Per-Device Pull
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  start = delta ? max(watermark, now - lookback) : 0                     │
//! │  delta: publish_down {device}._last_sync_time = now (before fetching)   │
//! │                                                                         │
//! │  page 1 ─► record 0  ──► live path        (publish_up)                  │
//! │            record 1… ──► historical path  (history store)               │
//! │  page N ─► records   ──► historical path                                │
//! │                                                                         │
//! │  stop on: no next_page_key │ empty list │ missing list                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! In delta mode the watermark is advanced before any record is read, so a
//! failed pull is not retried from the old watermark on the next delta cycle.
//! Full pulls leave it untouched.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use beacon_core::keys::{watermark_key, ROOT_SEPARATOR};
use beacon_core::payload::flatten;
use beacon_core::{Device, ExchangePayload};

use crate::cloud::{HistoryQuery, HistoryRecord};
use crate::error::SyncResult;
use crate::ports::{CloudClient, DeviceRegistry, ExchangeBus, HistoryStore, ValueStore};

/// Paginated history pull with a per-device watermark.
pub struct HistorySyncer {
    integration: String,
    page_size: u32,
    lookback_secs: i64,
    registry: Arc<dyn DeviceRegistry>,
    values: Arc<dyn ValueStore>,
    bus: Arc<dyn ExchangeBus>,
    history: Arc<dyn HistoryStore>,
    cloud: Arc<dyn CloudClient>,
}

impl HistorySyncer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        integration: impl Into<String>,
        page_size: u32,
        lookback_secs: i64,
        registry: Arc<dyn DeviceRegistry>,
        values: Arc<dyn ValueStore>,
        bus: Arc<dyn ExchangeBus>,
        history: Arc<dyn HistoryStore>,
        cloud: Arc<dyn CloudClient>,
    ) -> Self {
        HistorySyncer {
            integration: integration.into(),
            page_size: page_size.max(1),
            lookback_secs,
            registry,
            values,
            bus,
            history,
            cloud,
        }
    }

    /// Pulls history for every local device of the integration.
    ///
    /// A failing device is logged and does not stop the others.
    pub async fn sync_all(&self, delta: bool) -> SyncResult<()> {
        let devices = self.registry.find_all(&self.integration).await?;
        info!(devices = devices.len(), delta, "Syncing device history");

        for device in devices {
            if let Err(e) = self.sync_device(&device, delta).await {
                error!(identifier = %device.identifier, ?e, "Error while fetching device history");
            }
        }
        Ok(())
    }

    async fn sync_device(&self, device: &Device, delta: bool) -> SyncResult<()> {
        let device_key = device.key();
        let Ok(device_id) = device.remote_device_id() else {
            warn!(identifier = %device.identifier, "Device has no remote id, skipping history");
            return Ok(());
        };

        let now = Utc::now().timestamp();
        let start = if delta {
            let last = self.watermark(&device_key).await?.unwrap_or(0);
            self.bus
                .publish_down(ExchangePayload::single(watermark_key(&device_key), now))
                .await?;
            last.max(now - self.lookback_secs)
        } else {
            0
        };

        let mut query = HistoryQuery {
            device_id,
            start_time: start * 1000,
            end_time: now * 1000,
            page_size: self.page_size,
            page_key: None,
        };
        let mut first = true;

        loop {
            let page = self.cloud.properties_history(query.clone()).await?;
            let records = match page.list {
                Some(list) if !list.is_empty() => list,
                Some(_) => break,
                None => {
                    warn!(device_id = %query.device_id, "History page without list");
                    break;
                }
            };
            debug!(device_id = %query.device_id, records = records.len(), "History page fetched");

            for record in records {
                self.save_record(&device_key, record, first).await?;
                first = false;
            }

            match page.next_page_key {
                Some(key) if !key.is_empty() => query.page_key = Some(key),
                _ => break,
            }
        }
        Ok(())
    }

    async fn watermark(&self, device_key: &str) -> SyncResult<Option<i64>> {
        Ok(self
            .values
            .find_value(&watermark_key(device_key))
            .await?
            .as_ref()
            .and_then(Value::as_i64))
    }

    async fn save_record(&self, device_key: &str, record: HistoryRecord, live: bool) -> SyncResult<()> {
        let timestamp_ms = record
            .ts
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        self.save_device_data(device_key, None, &record.properties, timestamp_ms, live)
            .await
    }

    /// Flattens `data` under the device (or one of its events) and saves it.
    ///
    /// Live data is published up; historical data goes to the history store.
    /// Data that flattens to nothing is dropped.
    pub async fn save_device_data(
        &self,
        device_key: &str,
        event_id: Option<&str>,
        data: &Value,
        timestamp_ms: i64,
        live: bool,
    ) -> SyncResult<()> {
        let flattened = match event_id {
            Some(event_id) => flatten(
                &format!("{device_key}{ROOT_SEPARATOR}{event_id}"),
                data,
                false,
            ),
            None => flatten(device_key, data, true),
        };
        let Some(payload) = flattened else {
            return Ok(());
        };
        let payload = payload.with_timestamp(timestamp_ms);

        if live {
            self.bus.publish_up(payload).await
        } else {
            self.history.save_history(payload, timestamp_ms).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::HistoryPage;
    use crate::testing::{FakeCloud, MemoryRegistry, MemoryValueStore, RecordingBus, RecordingHistory};
    use serde_json::json;

    struct Harness {
        registry: Arc<MemoryRegistry>,
        store: Arc<MemoryValueStore>,
        bus: Arc<RecordingBus>,
        history: Arc<RecordingHistory>,
        cloud: Arc<FakeCloud>,
        syncer: HistorySyncer,
    }

    fn harness(identifiers: &[&str]) -> Harness {
        let registry = Arc::new(MemoryRegistry::with_devices("beacon", identifiers));
        let store = Arc::new(MemoryValueStore::default());
        let bus = Arc::new(RecordingBus::new(store.clone()));
        let history = Arc::new(RecordingHistory::default());
        let cloud = Arc::new(FakeCloud::default());
        let syncer = HistorySyncer::new(
            "beacon",
            100,
            86_400,
            registry.clone(),
            store.clone(),
            bus.clone(),
            history.clone(),
            cloud.clone(),
        );
        Harness {
            registry,
            store,
            bus,
            history,
            cloud,
            syncer,
        }
    }

    fn record(ts: i64, temperature: f64) -> HistoryRecord {
        HistoryRecord {
            ts: Some(ts),
            properties: json!({"temperature": temperature}),
        }
    }

    #[tokio::test]
    async fn test_first_record_live_rest_historical() {
        let h = harness(&["SN1"]);
        h.registry.set_remote_id("SN1", "1807");
        h.cloud.push_history(
            "1807",
            HistoryPage {
                list: Some(vec![record(3_000, 23.0), record(2_000, 22.0)]),
                next_page_key: Some("k2".into()),
            },
        );
        h.cloud.push_history(
            "1807",
            HistoryPage {
                list: Some(vec![record(1_000, 21.0)]),
                next_page_key: None,
            },
        );

        h.syncer.sync_all(true).await.unwrap();

        let live = h.bus.ups_with("beacon.device.SN1.temperature");
        assert_eq!(live, vec![json!(23.0)]);
        assert_eq!(h.bus.ups()[0].timestamp(), Some(3_000));

        let stored: Vec<i64> = h.history.records().iter().map(|(_, ts)| *ts).collect();
        assert_eq!(stored, vec![2_000, 1_000]);

        let queries = h.cloud.history_queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].page_key, None);
        assert_eq!(queries[1].page_key.as_deref(), Some("k2"));
        assert_eq!(queries[0].page_size, 100);
    }

    #[tokio::test]
    async fn test_watermark_published_before_fetch() {
        let h = harness(&["SN1"]);
        h.registry.set_remote_id("SN1", "1807");
        let old = Utc::now().timestamp() - 600;
        h.store.set("beacon.device.SN1._last_sync_time", json!(old));

        h.syncer.sync_all(true).await.unwrap();

        let query = &h.cloud.history_queries()[0];
        assert_eq!(query.start_time, old * 1000);
        assert!(query.end_time >= query.start_time);

        let downs = h.bus.downs();
        assert_eq!(downs.len(), 1);
        let watermark = h
            .store
            .get("beacon.device.SN1._last_sync_time")
            .and_then(|v| v.as_i64())
            .unwrap();
        assert!(watermark >= old + 600);
        assert_eq!(query.end_time, watermark * 1000);
    }

    #[tokio::test]
    async fn test_delta_start_is_bounded_by_lookback() {
        let h = harness(&["SN1"]);
        h.registry.set_remote_id("SN1", "1807");

        h.syncer.sync_all(true).await.unwrap();
        let query = &h.cloud.history_queries()[0];
        assert_eq!(query.end_time - query.start_time, 86_400 * 1000);
    }

    #[tokio::test]
    async fn test_full_sync_starts_at_zero_and_keeps_watermark() {
        let h = harness(&["SN1"]);
        h.registry.set_remote_id("SN1", "1807");
        let old = Utc::now().timestamp() - 600;
        h.store.set("beacon.device.SN1._last_sync_time", json!(old));

        h.syncer.sync_all(false).await.unwrap();

        assert_eq!(h.cloud.history_queries()[0].start_time, 0);
        assert!(h.bus.downs().is_empty());
        assert_eq!(h.store.get("beacon.device.SN1._last_sync_time"), Some(json!(old)));
    }

    #[tokio::test]
    async fn test_failed_fetch_still_advances_watermark() {
        let h = harness(&["SN1"]);
        h.registry.set_remote_id("SN1", "1");
        let old = Utc::now().timestamp() - 600;
        h.store.set("beacon.device.SN1._last_sync_time", json!(old));
        h.cloud.fail_history_for("1");

        h.syncer.sync_all(true).await.unwrap();

        let query = &h.cloud.history_queries()[0];
        assert_eq!(query.start_time, old * 1000);
        let watermark = h
            .store
            .get("beacon.device.SN1._last_sync_time")
            .and_then(|v| v.as_i64())
            .unwrap();
        assert!(watermark >= old + 600);
        assert_eq!(query.end_time, watermark * 1000);
        assert!(h.history.records().is_empty());
        assert!(h.bus.ups().is_empty());
    }

    #[tokio::test]
    async fn test_device_failures_are_isolated() {
        let h = harness(&["SN1", "SN2", "SN3"]);
        h.registry.set_remote_id("SN1", "1");
        h.registry.set_remote_id("SN2", "2");
        // SN3 has no remote id.
        h.cloud.fail_history_for("1");
        h.cloud.push_history(
            "2",
            HistoryPage {
                list: Some(vec![record(5_000, 20.0)]),
                next_page_key: None,
            },
        );

        h.syncer.sync_all(true).await.unwrap();

        let queried: Vec<String> = h
            .cloud
            .history_queries()
            .into_iter()
            .map(|q| q.device_id)
            .collect();
        assert_eq!(queried, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(h.bus.ups_with("beacon.device.SN2.temperature"), vec![json!(20.0)]);
    }

    #[tokio::test]
    async fn test_missing_list_and_empty_records() {
        let h = harness(&["SN1"]);
        h.registry.set_remote_id("SN1", "1807");
        h.cloud.push_history(
            "1807",
            HistoryPage {
                list: Some(vec![HistoryRecord {
                    ts: Some(1),
                    properties: json!({}),
                }]),
                next_page_key: Some("k2".into()),
            },
        );
        h.cloud.push_history(
            "1807",
            HistoryPage {
                list: None,
                next_page_key: Some("k3".into()),
            },
        );

        h.syncer.sync_all(true).await.unwrap();

        assert_eq!(h.cloud.history_queries().len(), 2);
        assert!(h.bus.ups().is_empty());
        assert!(h.history.records().is_empty());
    }

    #[tokio::test]
    async fn test_save_device_data_event_is_nested() {
        let h = harness(&[]);

        h.syncer
            .save_device_data(
                "beacon.device.SN1",
                Some("alarm"),
                &json!({"level": 2, "zone": {"id": "A"}}),
                9_000,
                false,
            )
            .await
            .unwrap();

        let records = h.history.records();
        let (payload, ts) = &records[0];
        assert_eq!(*ts, 9_000);
        assert_eq!(payload.get("beacon.device.SN1.alarm@level"), Some(&json!(2)));
        assert_eq!(payload.get("beacon.device.SN1.alarm@zone@id"), Some(&json!("A")));
    }
}
