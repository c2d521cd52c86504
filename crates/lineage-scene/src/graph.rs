//! The live scene graph.
//!
//! [`SceneGraph`] is the registry of live entities (`all_entities`) plus a
//! derived child-to-parent index. Topology lives in each entity's
//! `children_ids`; the graph never edits those lists itself. Attaching and
//! detaching go through caller-supplied pure functions that return a new
//! parent snapshot, and the graph swaps that snapshot in and re-derives the
//! back-references from it.
//!
//! Global poses are recomputed from the local poses up the parent chain on
//! every call. Nothing is cached, so editing any ancestor's local pose is
//! reflected immediately.
//!
//! The graph is not internally synchronized. Mutations take `&mut self`, so
//! the borrow checker already serializes writers against readers.

use std::collections::{HashMap, HashSet, VecDeque};

use lineage_core::component::ComponentData;
use lineage_core::entity::{Entity, EntityId};
use lineage_core::pose::Pose;
use lineage_templates::record::TemplateRecord;
use lineage_templates::store::BackingStore;
use lineage_templates::templates::TemplatesIo;

use crate::SceneError;

// ---------------------------------------------------------------------------
// Parent mutation helpers
// ---------------------------------------------------------------------------

/// Mutate function for attaching: appends `child` to `parent.children_ids`
/// unless it is already listed.
pub fn append_child_id<C>(mut parent: Entity<C>, child: &EntityId) -> Entity<C> {
    if !parent.children_ids.contains(child) {
        parent.children_ids.push(child.clone());
    }
    parent
}

/// Mutate function for detaching: drops every occurrence of `child` from
/// `parent.children_ids`.
pub fn remove_child_id<C>(mut parent: Entity<C>, child: &EntityId) -> Entity<C> {
    parent.children_ids.retain(|c| c != child);
    parent
}

// ---------------------------------------------------------------------------
// SceneGraph
// ---------------------------------------------------------------------------

/// Live registry and topology over entities, backed by a template engine.
pub struct SceneGraph<C, S> {
    templates: TemplatesIo<C, S>,
    all_entities: HashMap<EntityId, Entity<C>>,
    /// child -> parent, derived from the live entities' `children_ids`.
    parents: HashMap<EntityId, EntityId>,
    destroyed: HashSet<EntityId>,
}

impl<C: ComponentData, S: BackingStore> SceneGraph<C, S> {
    /// An empty graph using `templates` for persistence.
    pub fn new(templates: TemplatesIo<C, S>) -> Self {
        Self {
            templates,
            all_entities: HashMap::new(),
            parents: HashMap::new(),
            destroyed: HashSet::new(),
        }
    }

    /// The template engine.
    pub fn templates(&self) -> &TemplatesIo<C, S> {
        &self.templates
    }

    /// Mutable access to the template engine.
    pub fn templates_mut(&mut self) -> &mut TemplatesIo<C, S> {
        &mut self.templates
    }

    /// Consume the graph and return its template engine.
    pub fn into_templates(self) -> TemplatesIo<C, S> {
        self.templates
    }

    // -- registration -------------------------------------------------------

    /// Register `entity` as a new root.
    ///
    /// Live entities it already lists in `children_ids` become its children,
    /// and if a live entity already lists it, that entity becomes its parent.
    ///
    /// # Errors
    ///
    /// - [`SceneError::AlreadyRegistered`] if the id is live.
    /// - [`SceneError::Destroyed`] if the id was destroyed in this graph.
    pub fn add(&mut self, entity: Entity<C>) -> Result<EntityId, SceneError> {
        self.ensure_unregistered(&entity.id)?;
        let id = entity.id.clone();
        self.register(entity);
        tracing::debug!(id = %id, parent = ?self.parents.get(&id), "added entity");
        Ok(id)
    }

    /// Register `child` and attach it under `parent_id`.
    ///
    /// `mutate_parent(parent, child_id)` must return the parent snapshot with
    /// `child_id` appended to its `children_ids` ([`append_child_id`] does
    /// exactly that). The returned snapshot replaces the registered parent.
    ///
    /// # Errors
    ///
    /// - [`SceneError::UnknownEntity`] / [`SceneError::Destroyed`] if the
    ///   parent is not live.
    /// - [`SceneError::AlreadyRegistered`] / [`SceneError::Destroyed`] if the
    ///   child id is already in use.
    pub fn add_child<F>(
        &mut self,
        parent_id: &EntityId,
        child: Entity<C>,
        mutate_parent: F,
    ) -> Result<EntityId, SceneError>
    where
        F: FnOnce(Entity<C>, &EntityId) -> Entity<C>,
    {
        self.ensure_live(parent_id)?;
        self.ensure_unregistered(&child.id)?;

        let child_id = child.id.clone();
        self.register(child);
        self.mutate_snapshot(parent_id, &child_id, mutate_parent);

        if self.parents.get(&child_id) != Some(parent_id) {
            tracing::warn!(
                parent = %parent_id,
                child = %child_id,
                "parent snapshot does not list the child -- child stays a root"
            );
        }
        tracing::debug!(parent = %parent_id, child = %child_id, "added child");
        Ok(child_id)
    }

    /// Replace the live snapshot of `entity.id` with `entity`.
    ///
    /// Changes to `children_ids` re-derive the back-reference index. Newly
    /// listed children that already have another parent are dropped from the
    /// list.
    ///
    /// # Errors
    ///
    /// - [`SceneError::UnknownEntity`] / [`SceneError::Destroyed`] if the
    ///   entity is not live.
    /// - [`SceneError::WouldCreateCycle`] if a newly listed child is the
    ///   entity itself or one of its ancestors.
    pub fn update(&mut self, entity: Entity<C>) -> Result<(), SceneError> {
        let previous = match self.all_entities.get(&entity.id) {
            Some(current) => current.children_ids.clone(),
            None => return Err(self.not_live(&entity.id)),
        };
        for child in entity.children_ids.iter().filter(|c| !previous.contains(c)) {
            if self.is_ancestor_or_self(child, &entity.id) {
                return Err(SceneError::WouldCreateCycle {
                    child: child.clone(),
                    parent: entity.id.clone(),
                });
            }
        }
        let id = entity.id.clone();
        self.install_snapshot(&id, &previous, entity);
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    /// The live entity with this id.
    pub fn get(&self, id: &EntityId) -> Option<&Entity<C>> {
        self.all_entities.get(id)
    }

    /// Returns `true` if `id` is live.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.all_entities.contains_key(id)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.all_entities.len()
    }

    /// Returns `true` if no entity is live.
    pub fn is_empty(&self) -> bool {
        self.all_entities.is_empty()
    }

    /// Iterate all live entities. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = &Entity<C>> + '_ {
        self.all_entities.values()
    }

    /// Live entities without a parent, ordered by id.
    pub fn roots(&self) -> Vec<&Entity<C>> {
        let mut roots: Vec<&Entity<C>> = self
            .all_entities
            .values()
            .filter(|e| !self.parents.contains_key(&e.id))
            .collect();
        roots.sort_by(|a, b| a.id.cmp(&b.id));
        roots
    }

    /// The live children of `id`, in `children_ids` order.
    pub fn get_children(&self, id: &EntityId) -> Vec<&Entity<C>> {
        let Some(entity) = self.all_entities.get(id) else {
            return Vec::new();
        };
        entity
            .children_ids
            .iter()
            .filter(|child| self.parents.get(*child) == Some(id))
            .filter_map(|child| self.all_entities.get(child))
            .collect()
    }

    /// The recorded parent of `id`.
    pub fn get_parent(&self, id: &EntityId) -> Option<&Entity<C>> {
        self.parents.get(id).and_then(|p| self.all_entities.get(p))
    }

    /// The recorded parent id of `id`.
    pub fn parent_id(&self, id: &EntityId) -> Option<&EntityId> {
        self.parents.get(id)
    }

    /// Live descendants of `id` in depth-first pre-order, excluding `id`.
    pub fn descendants(&self, id: &EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([id.clone()]);
        let mut stack: Vec<&EntityId> = self
            .get_children(id)
            .into_iter()
            .rev()
            .map(|e| &e.id)
            .collect();

        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            out.push(current.clone());
            stack.extend(self.get_children(current).into_iter().rev().map(|e| &e.id));
        }
        out
    }

    // -- poses --------------------------------------------------------------

    /// The entity's own transform, identity if unset.
    pub fn local_pose(&self, id: &EntityId) -> Option<Pose> {
        self.all_entities.get(id).map(Entity::local_pose_or_identity)
    }

    /// The entity's transform in world space: every ancestor's local pose
    /// concatenated root-first with the entity's own.
    pub fn global_pose(&self, id: &EntityId) -> Option<Pose> {
        let entity = self.all_entities.get(id)?;
        let mut pose = entity.local_pose_or_identity();
        let mut current = id;

        for _ in 0..self.all_entities.len() {
            let Some(parent) = self.get_parent(current) else {
                return Some(pose);
            };
            pose = parent.local_pose_or_identity() * pose;
            current = &parent.id;
        }

        tracing::warn!(id = %id, "parent chain does not reach a root -- pose truncated");
        Some(pose)
    }

    // -- detach & lifecycle -------------------------------------------------

    /// Detach `id` from its parent. The entity stays live as a root.
    ///
    /// `mutate_parent(parent, child_id)` must return the parent snapshot
    /// without `child_id` ([`remove_child_id`]). Returns `false` if `id` had
    /// no parent.
    pub fn remove_from_parent<F>(&mut self, id: &EntityId, mutate_parent: F) -> bool
    where
        F: FnOnce(Entity<C>, &EntityId) -> Entity<C>,
    {
        let Some(parent_id) = self.parents.get(id).cloned() else {
            return false;
        };
        let Some(parent) = self.all_entities.remove(&parent_id) else {
            self.parents.remove(id);
            return false;
        };

        let previous = parent.children_ids.clone();
        let mut updated = mutate_parent(parent, id);
        if updated.children_ids.contains(id) {
            tracing::warn!(
                parent = %parent_id,
                child = %id,
                "parent snapshot still lists the detached child -- dropping it"
            );
            updated.children_ids.retain(|c| c != id);
        }
        self.install_snapshot(&parent_id, &previous, updated);

        tracing::debug!(parent = %parent_id, child = %id, "removed from parent");
        true
    }

    /// Move a live entity under `new_parent`.
    ///
    /// # Errors
    ///
    /// - [`SceneError::UnknownEntity`] / [`SceneError::Destroyed`] if either
    ///   entity is not live.
    /// - [`SceneError::WouldCreateCycle`] if `new_parent` is `child` or one of
    ///   its descendants.
    pub fn reparent<A, R>(
        &mut self,
        child: &EntityId,
        new_parent: &EntityId,
        attach: A,
        detach: R,
    ) -> Result<(), SceneError>
    where
        A: FnOnce(Entity<C>, &EntityId) -> Entity<C>,
        R: FnOnce(Entity<C>, &EntityId) -> Entity<C>,
    {
        self.ensure_live(child)?;
        self.ensure_live(new_parent)?;
        if self.is_ancestor_or_self(child, new_parent) {
            return Err(SceneError::WouldCreateCycle {
                child: child.clone(),
                parent: new_parent.clone(),
            });
        }
        if self.parents.get(child) == Some(new_parent) {
            return Ok(());
        }

        self.remove_from_parent(child, detach);
        self.mutate_snapshot(new_parent, child, attach);
        tracing::debug!(child = %child, parent = %new_parent, "reparented");
        Ok(())
    }

    /// Detach and unregister `id`. Its children become roots.
    ///
    /// Returns `false` without touching anything if `id` is already
    /// destroyed or was never registered.
    pub fn destroy<F>(&mut self, id: &EntityId, mutate_parent: F) -> bool
    where
        F: FnOnce(Entity<C>, &EntityId) -> Entity<C>,
    {
        if !self.all_entities.contains_key(id) {
            return false;
        }
        self.remove_from_parent(id, mutate_parent);
        self.unregister(id);
        tracing::debug!(id = %id, remaining = self.all_entities.len(), "destroyed entity");
        true
    }

    /// Destroy `id` and every live descendant. Returns how many entities
    /// were destroyed, 0 if `id` was not live.
    pub fn destroy_recursive<F>(&mut self, id: &EntityId, mutate_parent: F) -> usize
    where
        F: FnOnce(Entity<C>, &EntityId) -> Entity<C>,
    {
        if !self.all_entities.contains_key(id) {
            return 0;
        }
        let descendants = self.descendants(id);
        self.remove_from_parent(id, mutate_parent);
        self.unregister(id);
        for descendant in &descendants {
            self.unregister(descendant);
        }

        let count = descendants.len() + 1;
        tracing::debug!(id = %id, count, "destroyed subtree");
        count
    }

    /// Returns `true` once `id` has been destroyed in this graph.
    pub fn is_destroyed(&self, id: &EntityId) -> bool {
        self.destroyed.contains(id)
    }

    // -- persistence --------------------------------------------------------

    /// Save the live snapshot of `id` through the template engine.
    pub fn persist(&mut self, id: &EntityId) -> Result<TemplateRecord, SceneError> {
        let Some(entity) = self.all_entities.get(id) else {
            return Err(self.not_live(id));
        };
        Ok(self.templates.save_as_template(entity)?)
    }

    /// Register every stored root template and, transitively, the stored
    /// entities their resolved `children_ids` name, then rebuild the parent
    /// index. Returns the number added.
    ///
    /// Variants reached only through `template_id` are not registered. A
    /// variant inherits its template's `children_ids`, so registering it
    /// would list the same children under two owners.
    ///
    /// Ids already live are kept as they are, but their children are still
    /// followed. Destroyed ids are skipped along with anything reachable only
    /// through them.
    pub fn load_scene_graph_from_disk(&mut self) -> Result<usize, SceneError> {
        let ids: Vec<EntityId> = self.templates.all_entity_ids()?.collect();

        let mut roots = Vec::new();
        for id in ids {
            if self.templates.load_record(&id)?.template_id.is_none() {
                roots.push(id);
            }
        }
        roots.sort();
        let mut queue = VecDeque::from(roots);

        let mut visited = HashSet::new();
        let mut added = 0;
        while let Some(id) = queue.pop_front() {
            if self.destroyed.contains(&id) || !visited.insert(id.clone()) {
                continue;
            }
            let children = match self.all_entities.get(&id) {
                Some(live) => live.children_ids.clone(),
                None => {
                    if !self.templates.is_persisted(&id)? {
                        tracing::debug!(id = %id, "listed child is not stored -- skipping");
                        continue;
                    }
                    let entity = self.templates.load_template_instance(&id)?;
                    let children = entity.children_ids.clone();
                    self.all_entities.insert(id, entity);
                    added += 1;
                    children
                }
            };
            queue.extend(children);
        }
        self.rebuild_parent_index();

        tracing::info!(added, live = self.all_entities.len(), "loaded scene graph from store");
        Ok(added)
    }

    /// Re-derive the child-to-parent index from the live entities'
    /// `children_ids`. When several entities list the same child, the one
    /// with the smallest id wins.
    pub fn rebuild_parent_index(&mut self) {
        let mut owners: Vec<&Entity<C>> = self.all_entities.values().collect();
        owners.sort_by(|a, b| a.id.cmp(&b.id));

        let mut parents = HashMap::new();
        for owner in owners {
            for child in &owner.children_ids {
                if child != &owner.id && self.all_entities.contains_key(child) {
                    parents.entry(child.clone()).or_insert_with(|| owner.id.clone());
                }
            }
        }
        self.parents = parents;
    }

    // -- internals ----------------------------------------------------------

    fn not_live(&self, id: &EntityId) -> SceneError {
        if self.destroyed.contains(id) {
            SceneError::Destroyed { id: id.clone() }
        } else {
            SceneError::UnknownEntity { id: id.clone() }
        }
    }

    fn ensure_live(&self, id: &EntityId) -> Result<(), SceneError> {
        if self.all_entities.contains_key(id) {
            Ok(())
        } else {
            Err(self.not_live(id))
        }
    }

    fn ensure_unregistered(&self, id: &EntityId) -> Result<(), SceneError> {
        if self.destroyed.contains(id) {
            return Err(SceneError::Destroyed { id: id.clone() });
        }
        if self.all_entities.contains_key(id) {
            return Err(SceneError::AlreadyRegistered { id: id.clone() });
        }
        Ok(())
    }

    /// Walks up from `of`. True if `candidate` is `of` or one of its ancestors.
    fn is_ancestor_or_self(&self, candidate: &EntityId, of: &EntityId) -> bool {
        let mut current = of;
        for _ in 0..=self.all_entities.len() {
            if current == candidate {
                return true;
            }
            match self.parents.get(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    /// Insert a new live entity and derive its back-references.
    fn register(&mut self, entity: Entity<C>) {
        let id = entity.id.clone();

        let claimant = self
            .all_entities
            .values()
            .filter(|e| e.children_ids.contains(&id))
            .map(|e| e.id.clone())
            .min();
        if let Some(parent) = claimant {
            self.parents.insert(id.clone(), parent);
        }

        for child in &entity.children_ids {
            if self.all_entities.contains_key(child)
                && !self.parents.contains_key(child)
                && !self.is_ancestor_or_self(child, &id)
            {
                self.parents.insert(child.clone(), id.clone());
            }
        }
        self.all_entities.insert(id, entity);
    }

    fn unregister(&mut self, id: &EntityId) {
        if let Some(entity) = self.all_entities.remove(id) {
            for child in &entity.children_ids {
                if self.parents.get(child) == Some(id) {
                    self.parents.remove(child);
                }
            }
        }
        self.parents.remove(id);
        self.destroyed.insert(id.clone());
    }

    /// Run `mutate` on the snapshot under `key` and install the result.
    fn mutate_snapshot<F>(&mut self, key: &EntityId, child: &EntityId, mutate: F)
    where
        F: FnOnce(Entity<C>, &EntityId) -> Entity<C>,
    {
        if let Some(current) = self.all_entities.remove(key) {
            let previous = current.children_ids.clone();
            let updated = mutate(current, child);
            self.install_snapshot(key, &previous, updated);
        }
    }

    /// Store `updated` under `key` and bring the parent index in line with
    /// its `children_ids`.
    fn install_snapshot(&mut self, key: &EntityId, previous: &[EntityId], mut updated: Entity<C>) {
        if &updated.id != key {
            tracing::warn!(
                registered = %key,
                returned = %updated.id,
                "mutate function changed the entity id -- keeping the registered id"
            );
            updated.id = key.clone();
        }

        for gone in previous.iter().filter(|c| !updated.children_ids.contains(c)) {
            if self.parents.get(gone) == Some(key) {
                self.parents.remove(gone);
            }
        }

        let mut listed = Vec::with_capacity(updated.children_ids.len());
        for child in std::mem::take(&mut updated.children_ids) {
            if listed.contains(&child) {
                continue;
            }
            if self.all_entities.contains_key(&child) {
                match self.parents.get(&child) {
                    Some(owner) if owner != key => {
                        tracing::warn!(
                            parent = %key,
                            child = %child,
                            owner = %owner,
                            "child already has a parent -- dropping it from the list"
                        );
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        if self.is_ancestor_or_self(&child, key) {
                            tracing::warn!(
                                parent = %key,
                                child = %child,
                                "listing the child would create a cycle -- dropping it"
                            );
                            continue;
                        }
                        self.parents.insert(child.clone(), key.clone());
                    }
                }
            }
            listed.push(child);
        }
        updated.children_ids = listed;

        self.all_entities.insert(key.clone(), updated);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{graph, node, Marker};

    #[test]
    fn helpers_edit_children_lists() {
        let child = EntityId::new("c");
        let parent: Entity<Marker> = node("p");
        let parent = append_child_id(parent, &child);
        let parent = append_child_id(parent, &child);
        assert_eq!(parent.children_ids, vec![child.clone()]);
        assert!(remove_child_id(parent, &child).children_ids.is_empty());
    }

    #[test]
    fn add_rejects_duplicates_and_destroyed_ids() {
        let mut g = graph();
        g.add(node("a")).unwrap();
        assert!(matches!(g.add(node("a")), Err(SceneError::AlreadyRegistered { .. })));

        assert!(g.destroy(&EntityId::new("a"), remove_child_id));
        assert!(matches!(g.add(node("a")), Err(SceneError::Destroyed { .. })));
    }

    #[test]
    fn add_child_to_unknown_parent_fails() {
        let mut g = graph();
        let err = g
            .add_child(&EntityId::new("ghost"), node("c"), append_child_id)
            .unwrap_err();
        assert!(matches!(err, SceneError::UnknownEntity { .. }));
        assert!(g.is_empty());
    }

    #[test]
    fn mutate_fn_that_forgets_the_child_leaves_a_root() {
        let mut g = graph();
        let p = g.add(node("p")).unwrap();
        let c = g.add_child(&p, node("c"), |parent, _| parent).unwrap();
        assert!(g.get_parent(&c).is_none());
        assert!(g.get_children(&p).is_empty());
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn mutate_fn_cannot_change_the_parent_id() {
        let mut g = graph();
        let p = g.add(node("p")).unwrap();
        let c = g
            .add_child(&p, node("c"), |mut parent, child| {
                parent.id = EntityId::new("hijacked");
                append_child_id(parent, child)
            })
            .unwrap();
        assert_eq!(g.get(&p).unwrap().id, p);
        assert!(!g.contains(&EntityId::new("hijacked")));
        assert_eq!(g.parent_id(&c), Some(&p));
    }

    #[test]
    fn children_of_destroyed_entity_become_roots() {
        let mut g = graph();
        let p = g.add(node("p")).unwrap();
        let c = g.add_child(&p, node("c"), append_child_id).unwrap();
        assert!(g.destroy(&p, remove_child_id));
        assert!(g.get_parent(&c).is_none());
        assert_eq!(g.roots().len(), 1);
    }

    #[test]
    fn add_picks_up_existing_edges() {
        let mut g = graph();
        let mut parent = node("p");
        parent.children_ids.push(EntityId::new("late"));
        let p = g.add(parent).unwrap();
        let late = g.add(node("late")).unwrap();
        assert_eq!(g.parent_id(&late), Some(&p));

        let mut holder = node("h");
        holder.children_ids.push(p.clone());
        let h = g.add(holder).unwrap();
        assert_eq!(g.parent_id(&p), Some(&h));
        assert_eq!(g.descendants(&h), vec![p, late]);
    }

    #[test]
    fn update_rejects_cycles() {
        let mut g = graph();
        let a = g.add(node("a")).unwrap();
        let b = g.add_child(&a, node("b"), append_child_id).unwrap();

        let mut b_snapshot = g.get(&b).unwrap().clone();
        b_snapshot.children_ids.push(a.clone());
        let err = g.update(b_snapshot).unwrap_err();
        assert!(matches!(err, SceneError::WouldCreateCycle { .. }));
        assert!(g.get(&b).unwrap().children_ids.is_empty());
    }

    #[test]
    fn update_drops_children_owned_elsewhere() {
        let mut g = graph();
        let a = g.add(node("a")).unwrap();
        let b = g.add(node("b")).unwrap();
        let c = g.add_child(&a, node("c"), append_child_id).unwrap();

        let mut b_snapshot = g.get(&b).unwrap().clone();
        b_snapshot.children_ids.push(c.clone());
        g.update(b_snapshot).unwrap();
        assert!(g.get(&b).unwrap().children_ids.is_empty());
        assert_eq!(g.parent_id(&c), Some(&a));
    }
}
