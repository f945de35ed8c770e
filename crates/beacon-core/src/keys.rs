//! # Key Formatting
//!
//! Every value the platform stores is addressed by a dotted key.
//!
//! ```text
//! {integration}.integration.{field}            integration settings / status
//! {integration}.device.{identifier}            device key
//! {device_key}.{entity}                        top-level entity
//! {device_key}.{entity}@{child}@{grandchild}   nested entity / flattened leaf
//! ```

use crate::error::{CoreError, CoreResult};

/// Additional-attribute name holding the remote device id.
pub const DEVICE_ID_ATTRIBUTE: &str = "device_id";

/// Identifier of the internal watermark property appended to every device.
pub const LAST_SYNC_TIME_IDENTIFIER: &str = "_last_sync_time";

/// Separator between a device key and a top-level entity.
pub const ROOT_SEPARATOR: char = '.';

/// Separator below the top-level entity.
pub const NESTED_SEPARATOR: char = '@';

/// Formats the key of a device owned by `integration`.
pub fn device_key(integration: &str, identifier: &str) -> String {
    format!("{integration}.device.{identifier}")
}

/// Formats the key of an integration-level setting or status field.
pub fn integration_key(integration: &str, field: &str) -> String {
    format!("{integration}.integration.{field}")
}

/// Key under which a device's sync watermark is persisted.
pub fn watermark_key(device_key: &str) -> String {
    format!("{device_key}{ROOT_SEPARATOR}{LAST_SYNC_TIME_IDENTIFIER}")
}

/// Internal identifiers are engine bookkeeping, never pushed to the cloud.
pub fn is_internal_identifier(identifier: &str) -> bool {
    identifier.starts_with('_')
}

/// Extracts the device identifier from any key under `{integration}.device.`.
pub fn device_identifier_of<'a>(integration: &str, key: &'a str) -> CoreResult<&'a str> {
    let prefix = format!("{integration}.device.");
    let rest = key.strip_prefix(prefix.as_str()).ok_or_else(|| CoreError::InvalidKey {
        key: key.to_string(),
        reason: format!("expected prefix '{prefix}'"),
    })?;

    let identifier = rest.split(ROOT_SEPARATOR).next().unwrap_or_default();
    if identifier.is_empty() {
        return Err(CoreError::InvalidKey {
            key: key.to_string(),
            reason: "empty device identifier".into(),
        });
    }
    Ok(identifier)
}
