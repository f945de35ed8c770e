//! # beacon-sync: Sync Engine for Beacon
//!
//! This crate keeps a local device registry consistent with a cloud device
//! registry, pulls device history on a schedule, and ingests device data
//! pushed by the cloud through webhooks.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     BeaconIntegration (orchestrator)                    │
//! │                                                                         │
//! │  start() / shutdown() / handle_down(payload) / sync_all_now()           │
//! └───────────────┬──────────────────────────────────┬──────────────────────┘
//!                 │                                  │
//!                 ▼                                  ▼
//! ┌───────────────────────────────┐  ┌──────────────────────────────────────┐
//! │ SyncScheduler                 │  │ WebhookIngestor                      │
//! │  timer ─► CycleExecutor (1+1) │  │  freshness + HMAC-SHA256 signature   │
//! │           └─► SyncCycle       │  │  NOT_READY / READY / ERROR health    │
//! └───────────┬───────────┬───────┘  └──────────────┬──────────┬───────────┘
//!             ▼           ▼                         │          │
//! ┌────────────────┐ ┌──────────────────┐           │          │
//! │CloudDeviceMapper│ │ HistorySyncer    │◄──────────┘          │
//! │ paginated diff │ │ watermark pull,  │  save_device_data     │
//! └───────┬────────┘ │ live / history   │                       │
//!         │          └──────────────────┘                       │
//!         ▼                                                     │
//! ┌──────────────────────────────────────────┐  unknown serial  │
//! │ DeviceSyncCoordinator                    │◄─────────────────┘
//! │  per-device locks, bounded worker pool   │
//! └───────────────────┬──────────────────────┘
//!                     ▼
//! ┌──────────────────────────────────────────┐
//! │ DeviceService                            │
//! │  spec -> entities, attach / delete,      │
//! │  downlink forwarding                     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`integration`] - `BeaconIntegration` orchestrator and builder
//! - [`scheduler`] - Periodic and on-demand sync cycles
//! - [`executor`] - Single-slot cycle executor
//! - [`device_mapper`] - Remote/local device diff
//! - [`coordinator`] - Per-device task dispatch
//! - [`history`] - History pull and the shared save path
//! - [`webhook`] - Push delivery validation and ingestion
//! - [`device_service`] - Device management and downlink forwarding
//! - [`ports`] - Traits the host implements
//! - [`cloud`] - Cloud API request/response shapes
//! - [`config`] - Engine configuration and persisted settings
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_sync::{BeaconIntegration, EngineConfig};
//!
//! let integration = BeaconIntegration::builder(EngineConfig::load_or_default(None))
//!     .with_registry(registry)
//!     .with_value_store(values)
//!     .with_bus(bus)
//!     .with_history_store(history)
//!     .with_cloud(cloud)
//!     .build()?;
//!
//! integration.start().await?;
//!
//! // Route every down payload of the integration here.
//! integration.handle_down(&payload).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cloud;
pub mod config;
pub mod error;
pub mod ports;

pub mod coordinator;
pub mod device_mapper;
pub mod device_service;
pub mod executor;
pub mod history;
pub mod integration;
pub mod scheduler;
pub mod webhook;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{EngineConfig, ScheduledFetchSettings, WebhookSettings};
pub use coordinator::{DeviceSyncCoordinator, SyncTask, SyncTaskKind, TaskOutcome, TaskTicket};
pub use device_mapper::{CloudDeviceMapper, DeviceDiffReport};
pub use device_service::DeviceService;
pub use error::{CloudError, SyncError, SyncResult};
pub use executor::{CycleExecutor, CycleKind, CycleRunner};
pub use history::HistorySyncer;
pub use integration::{BeaconIntegration, BeaconIntegrationBuilder};
pub use ports::{CloudClient, DeviceRegistry, ExchangeBus, HistoryStore, ValueStore};
pub use scheduler::{SyncCycle, SyncScheduler};
pub use webhook::{WebhookDelivery, WebhookIngestor, WebhookOutcome, WebhookPayload};
