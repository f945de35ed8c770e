//! # Cloud Device Mapper
//!
//! Diffs the remote device list against the local registry and turns the
//! difference into per-device sync tasks.
//!
//! ```text
//!  local identifiers: {A, B, C}
//!
//!  page 1: [A, D]  ──► Update(A)  Add(D)        local left: {B, C}
//!  page 2: [B]     ──► Update(B)                local left: {C}
//!  fetched == total
//!                  ──► Remove(C)
//!
//!  missing total / empty page ──► abort, no Remove tasks
//! ```
//!
//! Tasks are submitted to the coordinator as soon as a page is read; the
//! mapper never waits for them.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cloud::DeviceSearch;
use crate::coordinator::{DeviceSyncCoordinator, SyncTask};
use crate::error::SyncResult;
use crate::ports::{CloudClient, DeviceRegistry};

/// Identifiers dispatched by one diff, per task type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDiffReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,

    /// The remote listing ended early; no Remove tasks were emitted.
    pub aborted: bool,
}

impl DeviceDiffReport {
    /// Number of tasks dispatched.
    pub fn dispatched(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

pub struct CloudDeviceMapper {
    integration: String,
    page_size: u32,
    registry: Arc<dyn DeviceRegistry>,
    cloud: Arc<dyn CloudClient>,
    coordinator: DeviceSyncCoordinator,
}

impl CloudDeviceMapper {
    pub fn new(
        integration: impl Into<String>,
        page_size: u32,
        registry: Arc<dyn DeviceRegistry>,
        cloud: Arc<dyn CloudClient>,
        coordinator: DeviceSyncCoordinator,
    ) -> Self {
        CloudDeviceMapper {
            integration: integration.into(),
            page_size: page_size.max(1),
            registry,
            cloud,
            coordinator,
        }
    }

    /// Walks every remote page and dispatches Add/Update/Remove tasks.
    pub async fn diff(&self) -> SyncResult<DeviceDiffReport> {
        let mut local: BTreeSet<String> = self
            .registry
            .find_all(&self.integration)
            .await?
            .into_iter()
            .map(|device| device.identifier)
            .collect();
        debug!(local = local.len(), "Starting device diff");

        let mut report = DeviceDiffReport::default();
        let mut page_number = 1u32;
        let mut fetched = 0u64;

        loop {
            let page = self
                .cloud
                .search_devices(DeviceSearch::page(page_number, self.page_size))
                .await?;

            let Some(total) = page.total else {
                warn!(page_number, "Device page without total, aborting diff");
                report.aborted = true;
                return Ok(report);
            };
            let content = page.content.unwrap_or_default();
            if content.is_empty() {
                if fetched < total {
                    warn!(page_number, fetched, total, "Empty device page, aborting diff");
                    report.aborted = true;
                    return Ok(report);
                }
                break;
            }
            fetched += content.len() as u64;

            for details in content {
                let Some(identifier) = details.sn.clone().filter(|sn| !sn.is_empty()) else {
                    debug!(device_id = %details.device_id, "Remote device without serial number, skipping");
                    continue;
                };

                if local.remove(&identifier) {
                    self.coordinator
                        .submit(SyncTask::update(identifier.clone(), Some(details)));
                    report.updated.push(identifier);
                } else {
                    self.coordinator
                        .submit(SyncTask::add(identifier.clone(), Some(details)));
                    report.added.push(identifier);
                }
            }

            if fetched >= total {
                break;
            }
            page_number += 1;
        }

        for identifier in local {
            self.coordinator.submit(SyncTask::remove(identifier.clone()));
            report.removed.push(identifier);
        }

        info!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            "Device diff dispatched"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{DeviceDetails, DevicePage};
    use crate::device_service::DeviceService;
    use crate::testing::{details, FakeCloud, MemoryRegistry};

    fn mapper(cloud: &Arc<FakeCloud>, registry: &Arc<MemoryRegistry>) -> CloudDeviceMapper {
        let devices = Arc::new(DeviceService::new("beacon", registry.clone(), cloud.clone()));
        let coordinator = DeviceSyncCoordinator::new(4, cloud.clone(), devices);
        CloudDeviceMapper::new("beacon", 10, registry.clone(), cloud.clone(), coordinator)
    }

    fn page(total: Option<u64>, range: std::ops::Range<u32>) -> DevicePage {
        DevicePage {
            total,
            content: Some(
                range
                    .map(|i| details(&i.to_string(), &format!("SN{i}")))
                    .collect(),
            ),
        }
    }

    #[tokio::test]
    async fn test_diff_across_pages() {
        let cloud = Arc::new(FakeCloud::default());
        let registry = Arc::new(MemoryRegistry::with_devices(
            "beacon",
            &["SN10", "SN11", "SN12", "SN13", "SN14", "SN99"],
        ));
        cloud.set_device_pages(vec![page(Some(15), 0..10), page(Some(15), 10..15)]);

        let report = mapper(&cloud, &registry).diff().await.unwrap();

        assert!(!report.aborted);
        assert_eq!(report.added.len(), 10);
        assert!(report.added.iter().all(|sn| sn.len() == 3));
        assert_eq!(report.updated, vec!["SN10", "SN11", "SN12", "SN13", "SN14"]);
        assert_eq!(report.removed, vec!["SN99".to_string()]);
        assert_eq!(report.dispatched(), 16);

        let pages: Vec<u32> = cloud.searches().iter().map(|s| s.page_number).collect();
        assert_eq!(pages, vec![1, 2]);
        assert!(cloud.searches().iter().all(|s| s.page_size == 10));
    }

    #[tokio::test]
    async fn test_missing_total_aborts_without_removes() {
        let cloud = Arc::new(FakeCloud::default());
        let registry = Arc::new(MemoryRegistry::with_devices("beacon", &["SN0", "SN42"]));
        cloud.set_device_pages(vec![page(None, 0..3)]);

        let report = mapper(&cloud, &registry).diff().await.unwrap();

        assert!(report.aborted);
        assert!(report.removed.is_empty());
        assert_eq!(report.dispatched(), 0);
    }

    #[tokio::test]
    async fn test_short_listing_aborts_without_removes() {
        let cloud = Arc::new(FakeCloud::default());
        let registry = Arc::new(MemoryRegistry::with_devices("beacon", &["SN0", "SN42"]));
        // Second page never arrives.
        cloud.set_device_pages(vec![page(Some(20), 0..10)]);

        let report = mapper(&cloud, &registry).diff().await.unwrap();

        assert!(report.aborted);
        assert_eq!(report.updated, vec!["SN0".to_string()]);
        assert_eq!(report.added.len(), 9);
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn test_empty_cloud_removes_everything() {
        let cloud = Arc::new(FakeCloud::default());
        let registry = Arc::new(MemoryRegistry::with_devices("beacon", &["SN1"]));
        cloud.set_device_pages(vec![DevicePage {
            total: Some(0),
            content: Some(Vec::new()),
        }]);

        let report = mapper(&cloud, &registry).diff().await.unwrap();

        assert!(!report.aborted);
        assert_eq!(report.removed, vec!["SN1".to_string()]);
    }

    #[tokio::test]
    async fn test_records_without_serial_are_skipped() {
        let cloud = Arc::new(FakeCloud::default());
        let registry = Arc::new(MemoryRegistry::default());
        cloud.set_device_pages(vec![DevicePage {
            total: Some(2),
            content: Some(vec![
                DeviceDetails {
                    device_id: "9".into(),
                    sn: None,
                    name: None,
                },
                details("1", "SN1"),
            ]),
        }]);

        let report = mapper(&cloud, &registry).diff().await.unwrap();
        assert_eq!(report.added, vec!["SN1".to_string()]);
    }
}
