//! Lineage Core -- shared data contracts for templates and scene graphs.
//!
//! This crate defines the types that both the template engine
//! (`lineage-templates`) and the scene graph (`lineage-scene`) operate on:
//!
//! - [`entity`]: [`EntityId`](entity::EntityId), the [`IdGenerator`](entity::IdGenerator)
//!   and the [`Entity`](entity::Entity) record.
//! - [`component`]: the [`ComponentData`](component::ComponentData) contract.
//! - [`pose`]: [`Pose`](pose::Pose) transforms and their composition.
//!
//! # Quick Start
//!
//! ```
//! use lineage_core::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Health { id: String, value: i32 }
//!
//! impl ComponentData for Health {
//!     fn id(&self) -> &str { &self.id }
//! }
//!
//! let enemy: Entity<Health> = Entity::new()
//!     .with_pose(Pose::from_xyz(1.0, 2.0, 3.0))
//!     .with_component(Health { id: "hp".into(), value: 100 });
//!
//! assert!(enemy.is_root_template());
//! assert_eq!(enemy.component("hp").map(|h| h.value), Some(100));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod pose;

use entity::EntityId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced when validating or converting entity records.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Two components on the same entity share an id.
    #[error("entity {entity} has more than one component with id '{component}'")]
    DuplicateComponentId { entity: EntityId, component: String },

    /// A component does not serialize as an object holding its id under `"id"`.
    #[error("component '{component}' on entity {entity} is malformed: {details}")]
    MalformedComponent {
        entity: EntityId,
        component: String,
        details: String,
    },

    /// The entity could not be converted to JSON.
    #[error("failed to encode entity {entity}: {details}")]
    Encode { entity: EntityId, details: String },

    /// A JSON value did not match the entity schema.
    #[error("failed to decode entity {entity}: {details}")]
    Decode { entity: EntityId, details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{ComponentData, COMPONENT_ID_FIELD};
    pub use crate::entity::{Entity, EntityId, IdGenerator};
    pub use crate::pose::{Mat4, Pose, Quat, Vec3};
    pub use crate::CoreError;
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
