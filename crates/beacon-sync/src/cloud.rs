//! # Cloud DTOs
//!
//! Request and response shapes of the cloud device-management API, as seen
//! through [`crate::ports::CloudClient`]. Fields the cloud may leave out are
//! optional; the engine decides what a missing field means.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Device Search
// =============================================================================

/// Paginated device search; page numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSearch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sn: Option<String>,

    pub page_number: u32,

    pub page_size: u32,
}

impl DeviceSearch {
    /// One page of the full device list.
    pub fn page(page_number: u32, page_size: u32) -> Self {
        DeviceSearch {
            sn: None,
            page_number,
            page_size,
        }
    }

    /// Lookup of a single device by serial number.
    pub fn by_serial(sn: impl Into<String>) -> Self {
        DeviceSearch {
            sn: Some(sn.into()),
            page_number: 1,
            page_size: 1,
        }
    }
}

/// One page of device search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePage {
    /// Total number of devices across all pages.
    #[serde(default)]
    pub total: Option<u64>,

    #[serde(default)]
    pub content: Option<Vec<DeviceDetails>>,
}

/// Remote device as listed by the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub device_id: String,

    /// Serial number; the local device identifier.
    #[serde(default)]
    pub sn: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

// =============================================================================
// Properties History
// =============================================================================

/// One page of a device's property history between two instants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub device_id: String,

    /// Epoch milliseconds, inclusive.
    pub start_time: i64,

    /// Epoch milliseconds.
    pub end_time: i64,

    pub page_size: u32,

    /// Continuation key from the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub list: Option<Vec<HistoryRecord>>,

    #[serde(default)]
    pub next_page_key: Option<String>,
}

/// Property snapshot reported at `ts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Epoch milliseconds.
    #[serde(default)]
    pub ts: Option<i64>,

    #[serde(default)]
    pub properties: Value,
}

// =============================================================================
// Device Management
// =============================================================================

/// Registers a device with the cloud by serial number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachDevice {
    pub name: String,

    #[serde(rename = "snDevEUI")]
    pub sn: String,

    pub auto_provision: bool,
}

impl AttachDevice {
    pub fn new(name: impl Into<String>, sn: impl Into<String>) -> Self {
        AttachDevice {
            name: name.into(),
            sn: sn.into(),
            auto_provision: false,
        }
    }
}
