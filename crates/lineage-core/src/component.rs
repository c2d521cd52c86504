//! Component data contract.
//!
//! A component is a leaf of domain data attached to an entity. Every
//! component carries a string id that is unique within its owning entity;
//! that id, not the component's position, is what matches a component across
//! a template chain.
//!
//! The template engine works on the JSON form of components, so a component
//! type must serialize to a JSON object that holds its id under
//! [`COMPONENT_ID_FIELD`], checked by
//! [`Entity::validate`](crate::entity::Entity::validate). An internally tagged
//! enum is the usual shape:
//!
//! ```
//! use lineage_core::component::ComponentData;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! #[serde(tag = "type")]
//! enum GameComponent {
//!     Stats { id: String, health: i32, mana: i32 },
//!     Loot { id: String, gold: u32 },
//! }
//!
//! impl ComponentData for GameComponent {
//!     fn id(&self) -> &str {
//!         match self {
//!             GameComponent::Stats { id, .. } | GameComponent::Loot { id, .. } => id,
//!         }
//!     }
//! }
//!
//! let json = serde_json::to_value(GameComponent::Loot { id: "l1".into(), gold: 5 }).unwrap();
//! assert_eq!(json["id"], "l1");
//! assert_eq!(json["type"], "Loot");
//! ```

use std::collections::HashSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// JSON key under which every component stores its id.
pub const COMPONENT_ID_FIELD: &str = "id";

/// Implemented by every component type stored on an [`Entity`](crate::entity::Entity).
pub trait ComponentData:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable id, unique within the owning entity.
    fn id(&self) -> &str;
}

/// Returns the first component id that appears more than once.
pub fn find_duplicate_id<C: ComponentData>(components: &[C]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(components.len());
    components
        .iter()
        .map(ComponentData::id)
        .find(|id| !seen.insert(*id))
}

/// Describes how `component`'s JSON form breaks the id contract, or `None`
/// when it is an object whose [`COMPONENT_ID_FIELD`] equals
/// [`ComponentData::id`].
pub fn id_field_mismatch<C: ComponentData>(component: &C) -> Option<String> {
    let value = match serde_json::to_value(component) {
        Ok(value) => value,
        Err(e) => return Some(e.to_string()),
    };
    let Value::Object(map) = &value else {
        return Some(format!("serializes as {value} rather than an object"));
    };
    match map.get(COMPONENT_ID_FIELD) {
        Some(Value::String(id)) if id == component.id() => None,
        Some(other) => Some(format!(
            "'{COMPONENT_ID_FIELD}' is {other} but id() returns \"{}\"",
            component.id()
        )),
        None => Some(format!("no '{COMPONENT_ID_FIELD}' field in {value}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Stat;

    #[test]
    fn no_duplicates_in_distinct_ids() {
        let comps = vec![Stat::new("a", 1, 1), Stat::new("b", 1, 1)];
        assert_eq!(find_duplicate_id(&comps), None);
    }

    #[test]
    fn first_duplicate_is_reported() {
        let comps = vec![
            Stat::new("a", 1, 1),
            Stat::new("b", 1, 1),
            Stat::new("b", 2, 2),
            Stat::new("a", 3, 3),
        ];
        assert_eq!(find_duplicate_id(&comps), Some("b"));
    }

    #[test]
    fn component_json_carries_id_field() {
        let json = serde_json::to_value(Stat::new("c1", 100, 10)).unwrap();
        assert_eq!(json[COMPONENT_ID_FIELD], "c1");
        assert_eq!(id_field_mismatch(&Stat::new("c1", 100, 10)), None);
    }
}
