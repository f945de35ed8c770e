//! # Device Sync Coordinator
//!
//! Dispatches per-device sync tasks onto a bounded worker pool, with at most
//! one Add/Update in flight per device identifier.
//!
//! ## Lock Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     identifier -> LockToken map                         │
//! │                                                                         │
//! │  submit(Add/Update "SN1")                                               │
//! │    entry vacant   ──► insert new token ──► spawn task  ──► Scheduled    │
//! │    entry occupied ──────────────────────────────────────► Skipped       │
//! │                                                                         │
//! │  submit(Remove "SN1")                                                   │
//! │    entry vacant   ──► insert new token ──► spawn task                   │
//! │    entry occupied ──► reuse that token ──► spawn task  (never skipped)  │
//! │                                                                         │
//! │  task finished / failed / panicked                                      │
//! │    LockGuard::drop ──► remove_if(token is the SAME Arc)                 │
//! │                        (a newer token from a racing caller survives)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Workers: every task is spawned immediately and waits on a semaphore with
//! `device_workers` permits, so the queue is unbounded and tasks for
//! different devices run unordered.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cloud::{DeviceDetails, DeviceSearch};
use crate::config::{MAX_DEVICE_WORKERS, MIN_DEVICE_WORKERS};
use crate::device_service::DeviceService;
use crate::error::{SyncError, SyncResult};
use crate::ports::CloudClient;

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTaskKind {
    AddDevice,
    UpdateDevice,
    RemoveDevice,
}

/// One unit of per-device work.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncTask {
    pub kind: SyncTaskKind,

    /// Device identifier (serial number).
    pub identifier: String,

    /// Remote details, when the producer already has them.
    pub details: Option<DeviceDetails>,
}

impl SyncTask {
    pub fn add(identifier: impl Into<String>, details: Option<DeviceDetails>) -> Self {
        SyncTask {
            kind: SyncTaskKind::AddDevice,
            identifier: identifier.into(),
            details,
        }
    }

    pub fn update(identifier: impl Into<String>, details: Option<DeviceDetails>) -> Self {
        SyncTask {
            kind: SyncTaskKind::UpdateDevice,
            identifier: identifier.into(),
            details,
        }
    }

    pub fn remove(identifier: impl Into<String>) -> Self {
        SyncTask {
            kind: SyncTaskKind::RemoveDevice,
            identifier: identifier.into(),
            details: None,
        }
    }
}

/// Final result of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Not executed: another task held the device.
    Skipped,
    Succeeded,
    Failed,
}

/// Returned by [`DeviceSyncCoordinator::submit`].
#[derive(Debug)]
pub enum TaskTicket {
    Skipped,
    Scheduled(JoinHandle<bool>),
}

impl TaskTicket {
    pub fn is_skipped(&self) -> bool {
        matches!(self, TaskTicket::Skipped)
    }

    /// Waits for the task to finish.
    pub async fn outcome(self) -> TaskOutcome {
        match self {
            TaskTicket::Skipped => TaskOutcome::Skipped,
            TaskTicket::Scheduled(handle) => match handle.await {
                Ok(true) => TaskOutcome::Succeeded,
                Ok(false) => TaskOutcome::Failed,
                Err(e) => {
                    error!(?e, "Device task aborted");
                    TaskOutcome::Failed
                }
            },
        }
    }
}

// =============================================================================
// Locks
// =============================================================================

/// Identity of a lock holder; compared by `Arc` pointer, never by value.
type LockToken = Arc<Uuid>;

type LockMap = DashMap<String, LockToken>;

/// Releases the lock it was created for, and only that one.
struct LockGuard {
    locks: Arc<LockMap>,
    identifier: String,
    token: LockToken,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let released = self
            .locks
            .remove_if(&self.identifier, |_, current| Arc::ptr_eq(current, &self.token));
        if released.is_none() {
            debug!(identifier = %self.identifier, token = %self.token, "Lock already released");
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Per-device task dispatcher.
#[derive(Clone)]
pub struct DeviceSyncCoordinator {
    locks: Arc<LockMap>,
    workers: Arc<Semaphore>,
    cloud: Arc<dyn CloudClient>,
    devices: Arc<DeviceService>,
}

impl DeviceSyncCoordinator {
    pub fn new(
        device_workers: usize,
        cloud: Arc<dyn CloudClient>,
        devices: Arc<DeviceService>,
    ) -> Self {
        DeviceSyncCoordinator {
            locks: Arc::new(DashMap::with_capacity(128)),
            workers: Arc::new(Semaphore::new(
                device_workers.clamp(MIN_DEVICE_WORKERS, MAX_DEVICE_WORKERS),
            )),
            cloud,
            devices,
        }
    }

    /// Returns true while a task holds the device.
    pub fn is_locked(&self, identifier: &str) -> bool {
        self.locks.contains_key(identifier)
    }

    /// Submits a task; never waits for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, task: SyncTask) -> TaskTicket {
        let force = task.kind == SyncTaskKind::RemoveDevice;
        let Some(token) = self.acquire(&task.identifier, force) else {
            info!(identifier = %task.identifier, kind = ?task.kind, "Skip execution because device task is running");
            return TaskTicket::Skipped;
        };

        let guard = LockGuard {
            locks: self.locks.clone(),
            identifier: task.identifier.clone(),
            token,
        };
        let workers = self.workers.clone();
        let cloud = self.cloud.clone();
        let devices = self.devices.clone();

        TaskTicket::Scheduled(tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = workers.acquire_owned().await else {
                warn!(identifier = %task.identifier, "Worker pool closed");
                return false;
            };

            let identifier = task.identifier.clone();
            let kind = task.kind;
            match Self::execute(cloud.as_ref(), &devices, task).await {
                Ok(done) => done,
                Err(e) => {
                    error!(%identifier, ?kind, ?e, "Error while syncing local device");
                    false
                }
            }
        }))
    }

    /// Insert-if-absent; `force` reuses an existing token instead of failing.
    fn acquire(&self, identifier: &str, force: bool) -> Option<LockToken> {
        match self.locks.entry(identifier.to_string()) {
            Entry::Occupied(existing) => force.then(|| existing.get().clone()),
            Entry::Vacant(slot) => {
                let token = Arc::new(Uuid::new_v4());
                slot.insert(token.clone());
                Some(token)
            }
        }
    }

    async fn execute(
        cloud: &dyn CloudClient,
        devices: &DeviceService,
        task: SyncTask,
    ) -> SyncResult<bool> {
        let identifier = task.identifier.as_str();
        match task.kind {
            SyncTaskKind::RemoveDevice => {
                // Removal is a no-op; "not removed" still counts as done.
                devices.remove_local_device(identifier).await?;
                Ok(true)
            }
            SyncTaskKind::AddDevice => {
                info!(identifier, "Add local device");
                let details = Self::resolve_details(cloud, identifier, task.details).await?;
                let spec = devices.get_thing_spec(&details.device_id).await?;
                let name = details.name.as_deref().unwrap_or(identifier);
                devices
                    .add_local_device(identifier, name, &details.device_id, &spec)
                    .await?;
                Ok(true)
            }
            SyncTaskKind::UpdateDevice => {
                info!(identifier, "Update local device");
                let details = Self::resolve_details(cloud, identifier, task.details).await?;
                let spec = devices.get_thing_spec(&details.device_id).await?;
                devices
                    .update_local_device(identifier, &details.device_id, &spec)
                    .await?;
                Ok(true)
            }
        }
    }

    /// Prefetched details, else a single-result search by serial number.
    async fn resolve_details(
        cloud: &dyn CloudClient,
        identifier: &str,
        prefetched: Option<DeviceDetails>,
    ) -> SyncResult<DeviceDetails> {
        if let Some(details) = prefetched {
            return Ok(details);
        }
        cloud
            .search_devices(DeviceSearch::by_serial(identifier))
            .await?
            .content
            .and_then(|content| content.into_iter().next())
            .ok_or_else(|| SyncError::RemoteDeviceNotFound {
                identifier: identifier.to_string(),
            })
    }
}
