//! Entity identifiers, id generation, and the entity record.
//!
//! An [`EntityId`] is an opaque, globally unique string handle. Ids are
//! produced by an [`IdGenerator`] (128 random bits rendered as 32 lowercase
//! hex chars) and never change once assigned.
//!
//! [`Entity`] is the addressable unit shared by the template engine and the
//! scene graph. It carries two independent edge sets: `template_id` links the
//! entity into an inheritance chain, `children_ids` links it into a scene
//! graph. The two shapes are unrelated.

use std::collections::BTreeSet;
use std::fmt;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::component::{self, ComponentData};
use crate::pose::Pose;
use crate::CoreError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A globally unique entity identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an existing identifier string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// A fresh id drawn from the thread-local RNG.
    pub fn random() -> Self {
        let bits: u128 = rand::random();
        Self(format!("{bits:032x}"))
    }

    /// The identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for EntityId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// IdGenerator
// ---------------------------------------------------------------------------

/// Produces fresh [`EntityId`]s from a PCG-64 stream.
///
/// Use [`IdGenerator::from_entropy`] in production and
/// [`IdGenerator::seeded`] when a test needs a reproducible id sequence.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    rng: Pcg64,
}

impl IdGenerator {
    /// A generator seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: Pcg64::from_entropy(),
        }
    }

    /// A deterministic generator. Two generators with the same seed yield
    /// the same id sequence.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&mut self) -> EntityId {
        let bits: u128 = self.rng.gen();
        EntityId(format!("{bits:032x}"))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// The entity record.
///
/// Entities are plain values. The scene graph and the template engine both
/// replace whole snapshots rather than mutating shared objects, so cloning an
/// entity is the normal way to derive a new state from an old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<C> {
    /// Immutable, globally unique id.
    pub id: EntityId,
    /// Immediate parent in the template chain. `None` for a root template.
    #[serde(default)]
    pub template_id: Option<EntityId>,
    /// Transform relative to the scene-graph parent. `None` means identity.
    #[serde(default)]
    pub local_pose: Option<Pose>,
    /// Attached components, unique by [`ComponentData::id`].
    #[serde(default = "Vec::new")]
    pub components: Vec<C>,
    /// Scene-graph edge list, in child order.
    #[serde(default)]
    pub children_ids: Vec<EntityId>,
    /// Free-form labels.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl<C: ComponentData> Entity<C> {
    /// An empty root entity with a random id.
    pub fn new() -> Self {
        Self::with_id(EntityId::random())
    }

    /// An empty root entity with the given id.
    pub fn with_id(id: EntityId) -> Self {
        Self {
            id,
            template_id: None,
            local_pose: None,
            components: Vec::new(),
            children_ids: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Builder: set the local pose.
    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.local_pose = Some(pose);
        self
    }

    /// Builder: attach a component, replacing any existing one with the same id.
    pub fn with_component(mut self, component: C) -> Self {
        self.upsert_component(component);
        self
    }

    /// Builder: add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Returns `true` if the entity starts a template chain.
    pub fn is_root_template(&self) -> bool {
        self.template_id.is_none()
    }

    /// The stored local pose, or [`Pose::IDENTITY`] when unset.
    pub fn local_pose_or_identity(&self) -> Pose {
        self.local_pose.unwrap_or(Pose::IDENTITY)
    }

    /// Look up a component by its id.
    pub fn component(&self, id: &str) -> Option<&C> {
        self.components.iter().find(|c| c.id() == id)
    }

    /// Mutable lookup of a component by its id.
    pub fn component_mut(&mut self, id: &str) -> Option<&mut C> {
        self.components.iter_mut().find(|c| c.id() == id)
    }

    /// Insert `component`, replacing an existing component with the same id
    /// in place. Returns the replaced component, if any.
    pub fn upsert_component(&mut self, component: C) -> Option<C> {
        match self.component_mut(component.id()) {
            Some(slot) => Some(std::mem::replace(slot, component)),
            None => {
                self.components.push(component);
                None
            }
        }
    }

    /// Remove the component with the given id.
    pub fn remove_component(&mut self, id: &str) -> Option<C> {
        let index = self.components.iter().position(|c| c.id() == id)?;
        Some(self.components.remove(index))
    }

    /// Check the record's structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateComponentId`] if two components share an
    /// id, and [`CoreError::MalformedComponent`] if a component does not
    /// serialize as an object carrying its own id.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(dup) = component::find_duplicate_id(&self.components) {
            return Err(CoreError::DuplicateComponentId {
                entity: self.id.clone(),
                component: dup.to_owned(),
            });
        }
        for c in &self.components {
            if let Some(details) = component::id_field_mismatch(c) {
                return Err(CoreError::MalformedComponent {
                    entity: self.id.clone(),
                    component: c.id().to_owned(),
                    details,
                });
            }
        }
        Ok(())
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value, CoreError> {
        serde_json::to_value(self).map_err(|e| CoreError::Encode {
            entity: self.id.clone(),
            details: e.to_string(),
        })
    }

    /// Deserialize from a JSON value. `id` is only used for error context.
    pub fn from_value(id: &EntityId, value: serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(value).map_err(|e| CoreError::Decode {
            entity: id.clone(),
            details: e.to_string(),
        })
    }
}

impl<C: ComponentData> Default for Entity<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Stat;

    #[test]
    fn random_ids_are_unique_hex() {
        let a = EntityId::random();
        let b = EntityId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn seeded_generators_are_reproducible() {
        let mut g1 = IdGenerator::seeded(7);
        let mut g2 = IdGenerator::seeded(7);
        let first: Vec<EntityId> = (0..10).map(|_| g1.next_id()).collect();
        let second: Vec<EntityId> = (0..10).map(|_| g2.next_id()).collect();
        assert_eq!(first, second);

        let mut sorted = first.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 10);
    }

    #[test]
    fn entity_id_serializes_as_plain_string() {
        let id = EntityId::new("abc");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("abc"));
        assert_eq!(format!("{id:?}"), "EntityId(abc)");
        assert_eq!(id.to_string(), "abc");
    }

    #[test]
    fn upsert_replaces_by_component_id() {
        let mut e: Entity<Stat> = Entity::new()
            .with_component(Stat::new("c1", 100, 10))
            .with_component(Stat::new("c2", 1, 1));
        let old = e.upsert_component(Stat::new("c1", 5, 5));
        assert_eq!(old, Some(Stat::new("c1", 100, 10)));
        assert_eq!(e.components.len(), 2);
        assert_eq!(e.components[0], Stat::new("c1", 5, 5));
    }

    #[test]
    fn remove_component_by_id() {
        let mut e: Entity<Stat> = Entity::new().with_component(Stat::new("c1", 1, 1));
        assert!(e.remove_component("missing").is_none());
        assert!(e.remove_component("c1").is_some());
        assert!(e.components.is_empty());
    }

    #[test]
    fn validate_rejects_duplicate_component_ids() {
        let mut e: Entity<Stat> = Entity::new();
        e.components.push(Stat::new("c1", 1, 1));
        e.components.push(Stat::new("c1", 2, 2));
        match e.validate() {
            Err(CoreError::DuplicateComponentId { component, .. }) => assert_eq!(component, "c1"),
            other => panic!("expected DuplicateComponentId, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_components_without_id_field() {
        // Externally tagged: {"Enemy": {"id": ..}} hides the id one level down.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        enum Untagged {
            Enemy { id: String, health: i32 },
        }

        impl ComponentData for Untagged {
            fn id(&self) -> &str {
                match self {
                    Untagged::Enemy { id, .. } => id,
                }
            }
        }

        let e: Entity<Untagged> = Entity::new().with_component(Untagged::Enemy {
            id: "c1".into(),
            health: 100,
        });
        match e.validate() {
            Err(CoreError::MalformedComponent { component, .. }) => assert_eq!(component, "c1"),
            other => panic!("expected MalformedComponent, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_id_that_disagrees_with_json() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Renamed {
            id: String,
        }

        impl ComponentData for Renamed {
            fn id(&self) -> &str {
                "fixed"
            }
        }

        let e: Entity<Renamed> = Entity::new().with_component(Renamed { id: "other".into() });
        assert!(matches!(
            e.validate(),
            Err(CoreError::MalformedComponent { .. })
        ));

        let ok: Entity<Stat> = Entity::new().with_component(Stat::new("c1", 1, 1));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn missing_optional_fields_decode_to_defaults() {
        let id = EntityId::new("e1");
        let e: Entity<Stat> = Entity::from_value(&id, serde_json::json!({ "id": "e1" })).unwrap();
        assert_eq!(e.id, id);
        assert!(e.template_id.is_none());
        assert!(e.local_pose.is_none());
        assert!(e.components.is_empty());
        assert_eq!(e.local_pose_or_identity(), Pose::IDENTITY);
    }

    #[test]
    fn decode_failure_reports_entity() {
        let id = EntityId::new("broken");
        let err = Entity::<Stat>::from_value(&id, serde_json::json!({ "id": 5 })).unwrap_err();
        assert!(matches!(err, CoreError::Decode { entity, .. } if entity == id));
    }
}
