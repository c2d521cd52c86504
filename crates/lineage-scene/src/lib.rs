//! Lineage Scene -- a live scene graph over template-backed entities.
//!
//! [`SceneGraph`](graph::SceneGraph) registers entities, tracks the
//! parent/child topology spelled out by their `children_ids`, composes global
//! poses on demand, and drives the one-way alive/destroyed lifecycle.
//! Persistence and scene membership are independent: an entity can be saved
//! without being registered and registered without being saved.
//!
//! # Quick Start
//!
//! ```
//! use lineage_core::prelude::*;
//! use lineage_scene::prelude::*;
//! use lineage_templates::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Label { id: String, text: String }
//!
//! impl ComponentData for Label {
//!     fn id(&self) -> &str { &self.id }
//! }
//!
//! let mut scene: SceneGraph<Label, _> = SceneGraph::new(TemplatesIo::new(InMemoryStore::new()));
//!
//! let group = scene.add(Entity::new().with_pose(Pose::from_xyz(0.0, 5.0, 0.0))).unwrap();
//! let item = scene
//!     .add_child(&group, Entity::new().with_pose(Pose::from_xyz(1.0, 0.0, 0.0)), append_child_id)
//!     .unwrap();
//!
//! let global = scene.global_pose(&item).unwrap();
//! assert!(global.translation.abs_diff_eq(Vec3::new(1.0, 5.0, 0.0), 1e-6));
//!
//! assert!(scene.destroy(&item, remove_child_id));
//! assert!(!scene.destroy(&item, remove_child_id));
//! ```

#![deny(unsafe_code)]

pub mod graph;

use lineage_core::entity::EntityId;
use lineage_templates::TemplatesError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by scene-graph operations.
///
/// Idempotence outcomes (destroying twice, detaching a root) are reported as
/// `bool` return values, not as errors.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    /// The id is already live in this graph.
    #[error("entity {id} is already registered")]
    AlreadyRegistered { id: EntityId },

    /// The id has never been registered in this graph.
    #[error("entity {id} is not registered")]
    UnknownEntity { id: EntityId },

    /// The id was destroyed and cannot be used again.
    #[error("entity {id} has been destroyed")]
    Destroyed { id: EntityId },

    /// The requested edge would make an entity its own ancestor.
    #[error("attaching {child} under {parent} would create a cycle")]
    WouldCreateCycle { child: EntityId, parent: EntityId },

    /// Persistence through the template engine failed.
    #[error(transparent)]
    Templates(#[from] TemplatesError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::graph::{append_child_id, remove_child_id, SceneGraph};
    pub use crate::SceneError;
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
