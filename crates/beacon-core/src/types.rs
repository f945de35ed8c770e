//! # Domain Types
//!
//! Core domain types shared by every Beacon component.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │     Device      │   │     Entity      │   │  ExchangePayload    │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  identifier     │──►│  identifier     │   │  key -> value       │   │
//! │  │  name           │   │  kind           │   │  timestamp (ms)     │   │
//! │  │  additional     │   │  value_type     │   │  context (not       │   │
//! │  │  entities       │   │  children ──┐   │   │   persisted)        │   │
//! │  └─────────────────┘   └─────────────┼───┘   └─────────────────────┘   │
//! │                                      └──► Entity (one level)            │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │   EntityKind    │   │ EntityValueType │   │ IntegrationStatus   │   │
//! │  │  Property       │   │  String  Long   │   │  NOT_READY          │   │
//! │  │  Event          │   │  Double  Boolean│   │  READY              │   │
//! │  │  Service        │   │  Object         │   │  ERROR              │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::keys::{self, NESTED_SEPARATOR, ROOT_SEPARATOR};

// =============================================================================
// Enumerations
// =============================================================================

/// What an entity represents on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    /// Readable/writable device state.
    Property,
    /// Something the device reports.
    Event,
    /// Something the device can be asked to do.
    Service,
}

/// Value type of an entity, as stored by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityValueType {
    String,
    Long,
    Double,
    Boolean,
    Object,
}

/// Access mode of a property entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "W")]
    Write,
    #[serde(rename = "RW")]
    ReadWrite,
}

/// Health of a connection or ingestion channel.
///
/// ## State Machine (webhook)
/// ```text
///   NOT_READY ──(first accepted delivery)──► READY
///       ▲                                     │  ▲
///       │ disabled / unconfigured             │  │ next accepted delivery
///       │                        (> max consecutive failures)
///       └─────────────────────────────────    ▼  │
///                                            ERROR
/// ```
///
/// The serialized form (`NOT_READY`, `READY`, `ERROR`) is the value written
/// to the status keys and read back by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationStatus {
    #[default]
    NotReady,
    Ready,
    Error,
}

impl IntegrationStatus {
    /// Stable wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::NotReady => "NOT_READY",
            IntegrationStatus::Ready => "READY",
            IntegrationStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntegrationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_READY" => Ok(IntegrationStatus::NotReady),
            "READY" => Ok(IntegrationStatus::Ready),
            "ERROR" => Ok(IntegrationStatus::Error),
            other => Err(CoreError::InvalidKey {
                key: other.to_string(),
                reason: "unknown integration status".into(),
            }),
        }
    }
}

// =============================================================================
// Entity
// =============================================================================

/// Optional presentation/validation attributes of an entity.
///
/// Only fields present in the source schema are set; nothing is defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction_digits: Option<u32>,

    /// Enum value -> display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enums: Option<BTreeMap<String, String>>,

    /// Engine bookkeeping entity, hidden from users and never pushed upstream.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
}

impl EntityAttributes {
    /// Returns true if no attribute is set.
    pub fn is_empty(&self) -> bool {
        *self == EntityAttributes::default()
    }
}

/// A single addressable capability of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique within the owning device. Children use `@`-joined identifiers.
    pub identifier: String,

    /// Display name.
    pub name: String,

    pub kind: EntityKind,

    pub value_type: EntityValueType,

    /// Only properties carry an access mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,

    /// Identifier of the top-level entity this child belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Entity>,

    #[serde(default, skip_serializing_if = "EntityAttributes::is_empty")]
    pub attributes: EntityAttributes,
}

impl Entity {
    /// Creates an entity without parent, children or attributes.
    pub fn new(
        kind: EntityKind,
        identifier: impl Into<String>,
        name: impl Into<String>,
        value_type: EntityValueType,
    ) -> Self {
        Entity {
            identifier: identifier.into(),
            name: name.into(),
            kind,
            value_type,
            access_mode: None,
            parent: None,
            children: Vec::new(),
            attributes: EntityAttributes::default(),
        }
    }

    /// Creates a property entity.
    pub fn property(
        identifier: impl Into<String>,
        name: impl Into<String>,
        access_mode: AccessMode,
        value_type: EntityValueType,
    ) -> Self {
        let mut entity = Self::new(EntityKind::Property, identifier, name, value_type);
        entity.access_mode = Some(access_mode);
        entity
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_attributes(mut self, attributes: EntityAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Key of this entity when it is a top-level entity of `device_key`.
    pub fn key(&self, device_key: &str) -> String {
        format!("{device_key}{ROOT_SEPARATOR}{}", self.identifier)
    }
}

// =============================================================================
// Device
// =============================================================================

/// A device owned by an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Registry-assigned id; `None` until the device has been saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub integration: String,

    /// Stable external identifier (serial number).
    pub identifier: String,

    pub name: String,

    /// Opaque integration data; holds the remote device id once synced.
    #[serde(default)]
    pub additional: Map<String, Value>,

    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Device {
    /// Creates an unsaved device with no entities.
    pub fn new(
        integration: impl Into<String>,
        identifier: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Device {
            id: None,
            integration: integration.into(),
            identifier: identifier.into(),
            name: name.into(),
            additional: Map::new(),
            entities: Vec::new(),
        }
    }

    /// Device key, prefix of every entity key of this device.
    pub fn key(&self) -> String {
        keys::device_key(&self.integration, &self.identifier)
    }

    /// Remote device id stored in the additional attributes.
    ///
    /// Numeric ids are accepted and rendered as decimal strings.
    pub fn remote_device_id(&self) -> CoreResult<String> {
        match self.additional.get(keys::DEVICE_ID_ATTRIBUTE) {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(CoreError::MissingRemoteId {
                identifier: self.identifier.clone(),
            }),
        }
    }

    pub fn set_remote_device_id(&mut self, device_id: impl Into<String>) {
        self.additional.insert(
            keys::DEVICE_ID_ATTRIBUTE.to_string(),
            Value::String(device_id.into()),
        );
    }

    /// Looks up the entity addressed by `key`.
    ///
    /// Both top-level keys (`{device}.{id}`) and child keys
    /// (`{device}.{id}@{child}`) resolve; deeper flattened leaves resolve to
    /// the closest declared ancestor.
    pub fn entity_for_key(&self, key: &str) -> Option<&Entity> {
        let device_key = self.key();
        let suffix = key
            .strip_prefix(device_key.as_str())?
            .strip_prefix(ROOT_SEPARATOR)?;
        let (root, child) = match suffix.split_once(NESTED_SEPARATOR) {
            Some((root, child)) => (root, Some(child)),
            None => (suffix, None),
        };
        let parent = self.entities.iter().find(|e| e.identifier == root)?;

        let Some(mut child) = child else {
            return Some(parent);
        };
        loop {
            if let Some(found) = parent.children.iter().find(|c| c.identifier == child) {
                return Some(found);
            }
            match child.rsplit_once(NESTED_SEPARATOR) {
                Some((shorter, _)) => child = shorter,
                None => return Some(parent),
            }
        }
    }
}

// =============================================================================
// Exchange Payload
// =============================================================================

/// Ordered key -> value update flowing between devices and the platform.
///
/// Used both as a diff carrier (partial device state) and as a bus message
/// body. The context map carries request-scoped hints and is never
/// serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangePayload {
    values: BTreeMap<String, Value>,

    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,

    #[serde(skip)]
    context: HashMap<String, Value>,
}

impl ExchangePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: BTreeMap<String, Value>) -> Self {
        ExchangePayload {
            values,
            ..Default::default()
        }
    }

    /// Payload carrying a single key.
    pub fn single(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut payload = Self::new();
        payload.insert(key, value);
        payload
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp_ms: i64) {
        self.timestamp = Some(timestamp_ms);
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn context(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Context value as a string, falling back to `default`.
    pub fn context_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.context
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
    }

    /// Sub-payload of the keys accepted by `predicate`; context is kept.
    pub fn filter_keys(&self, mut predicate: impl FnMut(&str) -> bool) -> ExchangePayload {
        ExchangePayload {
            values: self
                .values
                .iter()
                .filter(|(k, _)| predicate(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timestamp: self.timestamp,
            context: self.context.clone(),
        }
    }
}
