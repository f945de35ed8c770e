//! # Thing Specification
//!
//! Capability schema of a device model, as returned by the cloud.
//!
//! These types are deserialized as-is (camelCase on the wire) and only
//! interpreted by [`crate::mapper`]. Every field the cloud may omit is
//! optional so that a partially filled schema still maps.
//!
//! ## Shape
//! ```text
//! ThingSpec
//! ├── properties: [PropertySpec]   id "battery", "battery.level", ...
//! │                └── dataSpec { parentId, dataType, validator, ... }
//! ├── events:     [EventSpec]      outputs: [ParamSpec]
//! └── services:   [ServiceSpec]    inputs:  [ParamSpec]
//! ```
//!
//! A nested spec declares its parent through `dataSpec.parentId`, a dotted
//! chain whose first segment is the top-level (root) spec id.

use serde::{Deserialize, Serialize};

use crate::types::{AccessMode, EntityValueType};

/// Complete capability schema of a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingSpec {
    #[serde(default)]
    pub properties: Vec<PropertySpec>,

    #[serde(default)]
    pub events: Vec<EventSpec>,

    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

/// A property or nested property field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySpec {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,

    #[serde(default)]
    pub data_spec: DataSpec,
}

/// An event the device can emit, with its output parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSpec {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<ParamSpec>>,
}

/// A service the device exposes, with its input parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<ParamSpec>>,
}

/// Event output / service input parameter.
///
/// Parameters that reference a shared definition carry neither id nor data
/// spec; those are not mapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_spec: Option<DataSpec>,
}

/// Type and validation rules of a single value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSpec {
    /// Dotted id of the enclosing spec; absent on top-level specs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub data_type: DataType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<Validator>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction_digits: Option<u32>,

    /// Enum value -> label pairs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Vec<KeyValuePair>>,
}

impl DataSpec {
    /// Parent id, treating an empty string as absent.
    pub fn parent(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

/// Native data type of a schema value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    String,
    Enum,
    File,
    Image,
    Int,
    Long,
    Date,
    LocalTime,
    Float,
    Double,
    Bool,
    Struct,
    Array,
    /// Anything this version does not know about.
    #[default]
    #[serde(other)]
    Unknown,
}

impl DataType {
    /// Entity value type for this data type, `None` when unsupported.
    pub fn value_type(self) -> Option<EntityValueType> {
        match self {
            DataType::String | DataType::Enum | DataType::File | DataType::Image => {
                Some(EntityValueType::String)
            }
            DataType::Int | DataType::Long | DataType::Date | DataType::LocalTime => {
                Some(EntityValueType::Long)
            }
            DataType::Float | DataType::Double => Some(EntityValueType::Double),
            DataType::Bool => Some(EntityValueType::Boolean),
            DataType::Struct => Some(EntityValueType::Object),
            DataType::Array | DataType::Unknown => None,
        }
    }
}
