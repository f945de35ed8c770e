//! # beacon-core: Pure Data Model & Mapping for Beacon
//!
//! This crate holds everything about devices that can be computed without
//! touching the outside world: the device/entity model, the flat exchange
//! payload, the thing specification DTOs, and the two transforms that move
//! data between the hierarchical schema world and the flat key world.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            beacon-sync (scheduler, coordinator, webhook)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ beacon-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌────────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ thing_spec │  │  mapper   │  │  payload  │  │   │
//! │  │   │  Device   │  │ ThingSpec  │  │ spec ->   │  │ flatten / │  │   │
//! │  │   │  Entity   │  │ DataSpec   │  │ entities  │  │ group     │  │   │
//! │  │   └───────────┘  └────────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO RUNTIME • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Device, Entity, ExchangePayload, status enums
//! - [`keys`] - Device/entity/setting key formatting
//! - [`thing_spec`] - Cloud capability schema (deserialized as-is)
//! - [`mapper`] - Thing spec -> entity list
//! - [`payload`] - Nested JSON <-> flat prefixed keys
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use beacon_core::payload::{flatten, group};
//! use serde_json::json;
//!
//! let data = json!({"temperature": 21.5, "battery": {"level": 80}});
//! let payload = flatten("beacon.device.SN1", &data, true).unwrap();
//!
//! assert_eq!(payload.get("beacon.device.SN1.temperature"), Some(&json!(21.5)));
//! assert_eq!(payload.get("beacon.device.SN1.battery@level"), Some(&json!(80)));
//!
//! let tree = group("beacon.device.SN1", payload.values());
//! assert_eq!(tree["battery"]["level"], json!(80));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod keys;
pub mod mapper;
pub mod payload;
pub mod thing_spec;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use mapper::thing_spec_to_entities;
pub use thing_spec::ThingSpec;
pub use types::*;
