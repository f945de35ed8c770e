//! # Thing Spec Mapper
//!
//! Converts a hierarchical [`ThingSpec`] into the flat, two-level entity
//! list stored for a device.
//!
//! ## Mapping Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  properties                                                             │
//! │    1. group by root id (first segment of parentId, else own id)         │
//! │    2. root spec  -> top-level entity (unsupported type: skip group)     │
//! │    3. others     -> children, in ascending id order, admitted only if   │
//! │                     own id AND parent id are still "surviving"          │
//! │                     (an unsupported child leaves the surviving set,     │
//! │                      which prunes its descendants)                      │
//! │                                                                         │
//! │  events / services                                                      │
//! │    spec       -> top-level entity (OBJECT, or BOOLEAN with no params)   │
//! │    parameters -> children, same admission rule                          │
//! │                                                                         │
//! │  child id: "root.a.b" -> "root@a@b" -> "a@b"                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mapping never fails: anything unsupported is logged and left out.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::keys::{LAST_SYNC_TIME_IDENTIFIER, NESTED_SEPARATOR, ROOT_SEPARATOR};
use crate::thing_spec::{DataSpec, DataType, ParamSpec, PropertySpec, ThingSpec};
use crate::types::{AccessMode, Entity, EntityAttributes, EntityKind, EntityValueType};

/// Maps a complete thing spec: properties, then events, then services.
pub fn thing_spec_to_entities(spec: &ThingSpec) -> Vec<Entity> {
    let mut entities = property_entities(&spec.properties);
    entities.extend(parameterized_entities(
        EntityKind::Event,
        spec.events
            .iter()
            .map(|e| (e.id.as_str(), e.name.as_str(), e.outputs.as_deref())),
    ));
    entities.extend(parameterized_entities(
        EntityKind::Service,
        spec.services
            .iter()
            .map(|s| (s.id.as_str(), s.name.as_str(), s.inputs.as_deref())),
    ));
    entities
}

/// Internal read-only property holding the device's last sync time.
pub fn sync_watermark_entity() -> Entity {
    Entity::property(
        LAST_SYNC_TIME_IDENTIFIER,
        "Last sync time",
        AccessMode::Read,
        EntityValueType::Long,
    )
    .with_attributes(EntityAttributes {
        internal: true,
        ..Default::default()
    })
}

/// Re-encodes a dotted child id relative to its root: `a.b.c` -> `b@c`.
pub fn child_identifier(raw: &str) -> String {
    let full = raw.replace(ROOT_SEPARATOR, &NESTED_SEPARATOR.to_string());
    match full.find(NESTED_SEPARATOR) {
        Some(index) => full[index + NESTED_SEPARATOR.len_utf8()..].to_string(),
        None => full,
    }
}

/// Root id of a spec: first segment of its parent chain, else itself.
fn root_id<'a>(id: &'a str, parent: Option<&'a str>) -> &'a str {
    match parent {
        Some(parent) => parent.split(ROOT_SEPARATOR).next().unwrap_or(parent),
        None => id,
    }
}

// =============================================================================
// Properties
// =============================================================================

fn property_entities(specs: &[PropertySpec]) -> Vec<Entity> {
    let mut groups: BTreeMap<&str, Vec<&PropertySpec>> = BTreeMap::new();
    for spec in specs {
        groups
            .entry(root_id(&spec.id, spec.data_spec.parent()))
            .or_default()
            .push(spec);
    }

    let mut entities = Vec::with_capacity(groups.len());
    for (root, members) in groups {
        let Some(parent_spec) = members.iter().copied().find(|s| s.id == root) else {
            warn!(root_id = %root, "Property group has no root spec, skipping");
            continue;
        };
        let Some(value_type) = supported(&parent_spec.id, parent_spec.data_spec.data_type) else {
            continue;
        };

        let mut parent = property(parent_spec, &parent_spec.id, value_type);

        let mut surviving: HashSet<&str> =
            members.iter().copied().map(|s| s.id.as_str()).collect();
        let mut children: Vec<&PropertySpec> =
            members.into_iter().filter(|s| s.id != root).collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));

        for child in children {
            let Some(declared_parent) = child.data_spec.parent() else {
                continue;
            };
            if let Some(value_type) =
                admit(&child.id, declared_parent, child.data_spec.data_type, &mut surviving)
            {
                parent.children.push(
                    property(child, &child_identifier(&child.id), value_type).with_parent(root),
                );
            }
        }
        entities.push(parent);
    }
    entities
}

fn property(spec: &PropertySpec, identifier: &str, value_type: EntityValueType) -> Entity {
    let mut entity = Entity::new(EntityKind::Property, identifier, &spec.name, value_type)
        .with_attributes(attributes_from(&spec.data_spec));
    entity.access_mode = spec.access_mode;
    entity
}

// =============================================================================
// Events & Services
// =============================================================================

fn parameterized_entities<'a>(
    kind: EntityKind,
    specs: impl Iterator<Item = (&'a str, &'a str, Option<&'a [ParamSpec]>)>,
) -> Vec<Entity> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    for (id, name, params) in specs {
        if !seen.insert(id) {
            debug!(?kind, id, "Duplicate spec id ignored");
            continue;
        }

        let params = params.filter(|p| !p.is_empty());
        let Some(params) = params else {
            // Nothing to carry: a bare trigger.
            entities.push(Entity::new(kind, id, name, EntityValueType::Boolean));
            continue;
        };

        let mut parent = Entity::new(kind, id, name, EntityValueType::Object);

        let mut mapped: Vec<(&str, &DataSpec, Option<&str>)> = params
            .iter()
            .filter_map(|p| Some((p.id.as_deref()?, p.data_spec.as_ref()?, p.name.as_deref())))
            .collect();
        mapped.sort_by(|a, b| a.0.cmp(b.0));

        let mut surviving: HashSet<&str> = mapped.iter().map(|(pid, _, _)| *pid).collect();
        surviving.insert(id);

        for (param_id, data_spec, param_name) in mapped {
            let declared_parent = data_spec.parent().unwrap_or(id);
            if let Some(value_type) =
                admit(param_id, declared_parent, data_spec.data_type, &mut surviving)
            {
                parent.children.push(
                    Entity::new(
                        kind,
                        child_identifier(param_id),
                        param_name.unwrap_or(param_id),
                        value_type,
                    )
                    .with_parent(id)
                    .with_attributes(attributes_from(data_spec)),
                );
            }
        }
        entities.push(parent);
    }
    entities
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Child admission against the surviving id set.
///
/// An unsupported child is removed from `surviving`, so its own descendants
/// (processed later in lexical order) fail the parent check.
fn admit<'a>(
    id: &'a str,
    declared_parent: &str,
    data_type: DataType,
    surviving: &mut HashSet<&'a str>,
) -> Option<EntityValueType> {
    if !surviving.contains(id) || !surviving.contains(declared_parent) {
        debug!(id, parent = declared_parent, "Parent did not survive, child dropped");
        return None;
    }
    let value_type = supported(id, data_type);
    if value_type.is_none() {
        surviving.remove(id);
    }
    value_type
}

fn supported(id: &str, data_type: DataType) -> Option<EntityValueType> {
    let value_type = data_type.value_type();
    if value_type.is_none() {
        warn!(id, ?data_type, "Unsupported data type");
    }
    value_type
}

/// Copies only the attributes present in the data spec.
fn attributes_from(data_spec: &DataSpec) -> EntityAttributes {
    let mut attributes = EntityAttributes {
        unit: data_spec.unit_name.clone(),
        fraction_digits: data_spec.fraction_digits,
        ..Default::default()
    };
    if let Some(validator) = &data_spec.validator {
        attributes.min = validator.min;
        attributes.max = validator.max;
        attributes.min_length = validator.min_size;
        attributes.max_length = validator.max_size;
    }
    if let Some(mappings) = data_spec.mappings.as_ref().filter(|m| !m.is_empty()) {
        let mut enums = BTreeMap::new();
        for pair in mappings {
            enums
                .entry(pair.key.clone())
                .or_insert_with(|| pair.value.clone());
        }
        attributes.enums = Some(enums);
    }
    attributes
}
