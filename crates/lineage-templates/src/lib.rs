//! Lineage Templates -- persistence and resolution of template-variant chains.
//!
//! Entities are persisted as chains of sparse overrides. A root template is
//! stored as a full baseline; every variant stores only the fields where it
//! differs from its parent's resolved state. Loading an entity resolves the
//! chain root-first, so edits to an ancestor propagate to every descendant
//! that did not override the edited field.
//!
//! - [`path`]: [`FieldPath`](path::FieldPath) addresses inside an entity.
//! - [`diff`]: structural [`diff`](diff::diff) and [`apply`](diff::apply).
//! - [`store`]: the [`BackingStore`](store::BackingStore) contract and an
//!   in-memory implementation.
//! - [`record`]: checksummed on-store encoding of a
//!   [`TemplateRecord`](record::TemplateRecord).
//! - [`templates`]: the [`TemplatesIo`](templates::TemplatesIo) engine.

#![deny(unsafe_code)]

pub mod diff;
pub mod path;
pub mod record;
pub mod store;
pub mod templates;

use lineage_core::entity::EntityId;
use lineage_core::CoreError;

use store::StoreError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the template engine.
#[derive(Debug, thiserror::Error)]
pub enum TemplatesError {
    /// No record is stored under the id (or under one of its ancestors).
    #[error("no template record stored for {id}")]
    NotFound { id: EntityId },

    /// A variant was requested from an entity that has never been saved.
    #[error("{id} is not a persisted template -- save it first or branch from its own template")]
    NotAPersistedTemplate { id: EntityId },

    /// The `template_id` chain revisits an entity.
    #[error("template chain for {id} contains a cycle: {chain:?}")]
    CycleDetected { id: EntityId, chain: Vec<EntityId> },

    /// A stored record could not be decoded or did not resolve to a valid entity.
    #[error("template record for {id} is corrupt: {details}")]
    CorruptRecord { id: EntityId, details: String },

    /// Other stored records still inherit from this one.
    #[error("template {id} still has variants: {variants:?}")]
    HasVariants { id: EntityId, variants: Vec<EntityId> },

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The entity being saved violates a structural invariant.
    #[error(transparent)]
    InvalidEntity(#[from] CoreError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::diff::{apply, diff, ApplyReport, Diff};
    pub use crate::path::{FieldPath, Segment};
    pub use crate::record::TemplateRecord;
    pub use crate::store::{BackingStore, InMemoryStore, StoreError};
    pub use crate::templates::{variant_diff, TemplatesConfig, TemplatesIo};
    pub use crate::TemplatesError;
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
