//! # Webhook Ingestor
//!
//! Validates pushed deliveries from the cloud and saves the device data they
//! carry through the live save path.
//!
//! ## Validation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  delivery                                                               │
//! │     │                                                                   │
//! │     ├─ disabled? ───────────────────────────────► Disabled (dropped)    │
//! │     ├─ timestamp + window < now (or unparsable) ─► Stale        ┐       │
//! │     ├─ hex(HMAC-SHA256(secret, ts ‖ nonce)) != sig ► BadSignature ├ +1  │
//! │     │                                                            ┘      │
//! │     └─ Accepted: failures = 0, health = READY, payloads processed       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Health
//! ```text
//! NOT_READY ──accepted──► READY ──(failures > max)──► ERROR
//!     ▲                     ▲                           │
//!     └──── disabled        └───────── accepted ────────┘
//! ```
//! Only changes are published, under `{integration}.integration.webhook_status`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use beacon_core::{ExchangePayload, IntegrationStatus};

use crate::config::{load_settings, WebhookSection, WebhookSettings};
use crate::coordinator::{DeviceSyncCoordinator, SyncTask};
use crate::error::{SyncError, SyncResult};
use crate::history::HistorySyncer;
use crate::ports::{DeviceRegistry, ExchangeBus, ValueStore};

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Delivery
// =============================================================================

/// One inbound webhook request: its headers plus the decoded body.
#[derive(Debug, Clone, Default)]
pub struct WebhookDelivery {
    pub signature: Option<String>,

    /// Delivery id, logged only.
    pub delivery_id: Option<String>,

    /// Epoch seconds as sent (decimal string).
    pub timestamp: String,

    pub nonce: String,

    pub payloads: Vec<WebhookPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub event_type: Option<String>,

    /// Epoch seconds.
    #[serde(default)]
    pub event_created_time: Option<i64>,

    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceData {
    #[serde(rename = "type", default)]
    kind: Option<String>,

    /// Event id for EVENT data.
    #[serde(default)]
    tsl_id: Option<String>,

    #[serde(default)]
    payload: Option<Value>,

    #[serde(default)]
    device_profile: Option<DeviceProfile>,
}

#[derive(Debug, Deserialize)]
struct DeviceProfile {
    #[serde(default)]
    sn: Option<String>,
}

/// What [`WebhookIngestor::handle`] did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Disabled,
    Stale,
    BadSignature,
    Accepted,
}

const DEVICE_DATA_EVENT: &str = "device_data";

// =============================================================================
// Ingestor
// =============================================================================

pub struct WebhookIngestor {
    integration: String,
    settings_key: String,
    status_key: String,
    limits: WebhookSection,

    enabled: AtomicBool,
    signer: RwLock<Option<HmacSha256>>,
    failures: AtomicU32,
    health: AtomicU8,
    /// Held across a health change and its publish.
    health_gate: Mutex<()>,

    values: Arc<dyn ValueStore>,
    bus: Arc<dyn ExchangeBus>,
    registry: Arc<dyn DeviceRegistry>,
    history: Arc<HistorySyncer>,
    coordinator: DeviceSyncCoordinator,
}

impl WebhookIngestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        integration: impl Into<String>,
        settings_key: impl Into<String>,
        status_key: impl Into<String>,
        limits: WebhookSection,
        values: Arc<dyn ValueStore>,
        bus: Arc<dyn ExchangeBus>,
        registry: Arc<dyn DeviceRegistry>,
        history: Arc<HistorySyncer>,
        coordinator: DeviceSyncCoordinator,
    ) -> Self {
        WebhookIngestor {
            integration: integration.into(),
            settings_key: settings_key.into(),
            status_key: status_key.into(),
            limits,
            enabled: AtomicBool::new(false),
            signer: RwLock::new(None),
            failures: AtomicU32::new(0),
            health: AtomicU8::new(encode(IntegrationStatus::NotReady)),
            health_gate: Mutex::new(()),
            values,
            bus,
            registry,
            history,
            coordinator,
        }
    }

    /// Loads persisted webhook settings.
    pub async fn init(&self) -> SyncResult<()> {
        let settings: Option<WebhookSettings> =
            load_settings(self.values.as_ref(), &self.settings_key).await?;
        let Some(settings) = settings else {
            info!("Webhook settings not found, webhook disabled");
            self.enabled.store(false, Ordering::SeqCst);
            return Ok(());
        };

        self.configure(&settings)?;
        if !settings.is_enabled() {
            // Overwrites whatever status a previous run left behind.
            let _gate = self.health_gate.lock().await;
            self.health
                .store(encode(IntegrationStatus::NotReady), Ordering::SeqCst);
            self.publish_health(IntegrationStatus::NotReady).await;
        }
        Ok(())
    }

    /// Adopts changed settings.
    pub async fn apply_settings(&self, settings: &WebhookSettings) -> SyncResult<()> {
        self.configure(settings)?;
        if !settings.is_enabled() {
            self.set_health(IntegrationStatus::NotReady).await;
        }
        Ok(())
    }

    fn configure(&self, settings: &WebhookSettings) -> SyncResult<()> {
        let signer = settings
            .secret()
            .map(|secret| {
                HmacSha256::new_from_slice(secret.as_bytes())
                    .map_err(|e| SyncError::InvalidConfig(format!("webhook secret: {e}")))
            })
            .transpose()?;

        info!(
            enabled = settings.is_enabled(),
            signed = signer.is_some(),
            "Webhook settings applied"
        );
        *self.signer.write() = signer;
        self.enabled.store(settings.is_enabled(), Ordering::SeqCst);
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Current webhook health.
    pub fn health(&self) -> IntegrationStatus {
        decode(self.health.load(Ordering::SeqCst))
    }

    /// Consecutive validation failures since the last accepted delivery.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Deliveries
    // =========================================================================

    /// Validates one delivery and processes its payloads.
    pub async fn handle(&self, delivery: WebhookDelivery) -> WebhookOutcome {
        debug!(
            delivery_id = ?delivery.delivery_id,
            payloads = delivery.payloads.len(),
            "Webhook delivery received"
        );
        if !self.is_enabled() {
            debug!("Webhook is disabled");
            return WebhookOutcome::Disabled;
        }

        if !self.is_fresh(&delivery.timestamp) {
            warn!(timestamp = %delivery.timestamp, "Webhook request outdated");
            self.record_failure().await;
            return WebhookOutcome::Stale;
        }

        if !self.is_signature_valid(&delivery) {
            warn!(signature = ?delivery.signature, "Webhook signature invalid");
            self.record_failure().await;
            return WebhookOutcome::BadSignature;
        }

        self.set_health(IntegrationStatus::Ready).await;

        for payload in delivery.payloads {
            if let Err(e) = self.handle_payload(payload).await {
                error!(?e, "Handling webhook payload failed");
            }
        }
        WebhookOutcome::Accepted
    }

    fn is_fresh(&self, timestamp: &str) -> bool {
        let now = Utc::now().timestamp();
        timestamp
            .trim()
            .parse::<i64>()
            .map(|ts| ts.saturating_add(self.limits.freshness_window_secs) >= now)
            .unwrap_or(false)
    }

    /// Always valid when no secret is configured.
    fn is_signature_valid(&self, delivery: &WebhookDelivery) -> bool {
        let Some(mut mac) = self.signer.read().clone() else {
            return true;
        };
        mac.update(delivery.timestamp.as_bytes());
        mac.update(delivery.nonce.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        delivery.signature.as_deref() == Some(expected.as_str())
    }

    async fn handle_payload(&self, payload: WebhookPayload) -> SyncResult<()> {
        let Some(event_type) = payload.event_type.as_deref() else {
            warn!("Webhook payload without event type");
            return Ok(());
        };
        if !event_type.eq_ignore_ascii_case(DEVICE_DATA_EVENT) {
            debug!(event_type, "Ignored webhook event type");
            return Ok(());
        }

        let Some(data) = payload.data.filter(|d| !d.is_null()) else {
            warn!("Webhook device data is null");
            return Ok(());
        };
        let data: DeviceData = serde_json::from_value(data)?;

        let kind = data.kind.as_deref().unwrap_or_default();
        if !kind.eq_ignore_ascii_case("PROPERTY") && !kind.eq_ignore_ascii_case("EVENT") {
            debug!(kind, "Not a property or event report");
            return Ok(());
        }

        let (Some(values), Some(sn)) = (
            data.payload.filter(|p| !p.is_null()),
            data.device_profile.and_then(|p| p.sn),
        ) else {
            warn!("Webhook device data without payload or serial number");
            return Ok(());
        };

        let Some(device) = self
            .registry
            .find_by_identifier(&self.integration, &sn)
            .await?
        else {
            warn!(%sn, "Device not added, submitting sync task");
            self.coordinator.submit(SyncTask::add(sn, None));
            return Ok(());
        };

        let created = payload
            .event_created_time
            .unwrap_or_else(|| Utc::now().timestamp());
        self.history
            .save_device_data(
                &device.key(),
                data.tsl_id.as_deref(),
                &values,
                created * 1000,
                true,
            )
            .await
    }

    // =========================================================================
    // Health
    // =========================================================================

    async fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures > self.limits.max_failures {
            self.set_health(IntegrationStatus::Error).await;
        }
    }

    async fn set_health(&self, status: IntegrationStatus) {
        if status != IntegrationStatus::Error {
            self.failures.store(0, Ordering::SeqCst);
        }
        let _gate = self.health_gate.lock().await;
        let previous = decode(self.health.swap(encode(status), Ordering::SeqCst));
        if previous != status {
            info!(from = %previous, to = %status, "Webhook health changed");
            self.publish_health(status).await;
        }
    }

    async fn publish_health(&self, status: IntegrationStatus) {
        let payload = ExchangePayload::single(self.status_key.clone(), status.as_str());
        if let Err(e) = self.bus.publish_up(payload).await {
            error!(?e, "Publishing webhook status failed");
        }
    }
}

fn encode(status: IntegrationStatus) -> u8 {
    match status {
        IntegrationStatus::NotReady => 0,
        IntegrationStatus::Ready => 1,
        IntegrationStatus::Error => 2,
    }
}

fn decode(code: u8) -> IntegrationStatus {
    match code {
        1 => IntegrationStatus::Ready,
        2 => IntegrationStatus::Error,
        _ => IntegrationStatus::NotReady,
    }
}
