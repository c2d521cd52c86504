//! The template resolution engine.
//!
//! [`TemplatesIo`] persists entities as template-diff chains and resolves
//! stored ids back into fully materialized entities.
//!
//! # Chains
//!
//! An entity without a `template_id` is saved as a root baseline. An entity
//! with a `template_id` is saved as the [`Diff`](crate::diff::Diff) between
//! its current value and its parent's *resolved* value. Resolving an id walks
//! `template_id` pointers up to the root, then applies each stored diff from
//! the root down. Because diffs are re-applied on every resolution, an edit
//! saved to any ancestor shows through in every descendant that did not
//! override the edited field.
//!
//! # Caching
//!
//! Records are cached after their first read when
//! [`TemplatesConfig::cache_reads`] is on, and
//! [`TemplatesIo::load_all_template_files_into_memory`] warms the cache for
//! every stored id. Saves and deletes write through, so resolution gives the
//! same answer with a cold, lazy or warmed cache.
//!
//! # Example
//!
//! ```
//! use lineage_core::prelude::*;
//! use lineage_templates::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Stats { id: String, health: i32, mana: i32 }
//!
//! impl ComponentData for Stats {
//!     fn id(&self) -> &str { &self.id }
//! }
//!
//! let mut templates: TemplatesIo<Stats, _> = TemplatesIo::new(InMemoryStore::new());
//!
//! let orc = Entity::new().with_component(Stats { id: "s".into(), health: 100, mana: 10 });
//! templates.save_as_template(&orc).unwrap();
//!
//! let mut chief = templates.create_variant_instance_of(&orc).unwrap();
//! chief.component_mut("s").unwrap().health = 250;
//! templates.save_as_template(&chief).unwrap();
//!
//! let loaded = templates.load_template_instance(&chief.id).unwrap();
//! assert_eq!(loaded.component("s").unwrap().health, 250);
//! assert_eq!(loaded.component("s").unwrap().mana, 10);
//! ```

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;

use lineage_core::component::ComponentData;
use lineage_core::entity::{Entity, EntityId, IdGenerator};
use lineage_core::CoreError;
use serde_json::{Map, Value};

use crate::diff::{self, Diff};
use crate::record::{self, TemplateRecord};
use crate::store::BackingStore;
use crate::TemplatesError;

/// Entity fields carried in the record header rather than in the diff.
const HEADER_FIELDS: [&str; 2] = ["id", "template_id"];

// ---------------------------------------------------------------------------
// TemplatesConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`TemplatesIo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatesConfig {
    /// Verify the BLAKE3 checksum of every record read from the store.
    pub verify_checksums: bool,
    /// Keep records in memory after their first read.
    pub cache_reads: bool,
}

impl Default for TemplatesConfig {
    /// Checksums verified, lazy read caching on.
    fn default() -> Self {
        Self {
            verify_checksums: true,
            cache_reads: true,
        }
    }
}

// ---------------------------------------------------------------------------
// TemplatesIo
// ---------------------------------------------------------------------------

/// Saves entities as template chains and resolves them back.
pub struct TemplatesIo<C, S> {
    store: S,
    config: TemplatesConfig,
    cache: HashMap<EntityId, TemplateRecord>,
    /// Set once every stored record has been loaded into `cache`.
    warmed: bool,
    ids: IdGenerator,
    _component: PhantomData<fn() -> C>,
}

impl<C: ComponentData, S: BackingStore> TemplatesIo<C, S> {
    /// Create an engine over `store` with the default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, TemplatesConfig::default())
    }

    /// Create an engine over `store` with a custom configuration.
    pub fn with_config(store: S, config: TemplatesConfig) -> Self {
        Self {
            store,
            config,
            cache: HashMap::new(),
            warmed: false,
            ids: IdGenerator::from_entropy(),
            _component: PhantomData,
        }
    }

    /// Replace the id generator used for new variants.
    pub fn with_id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &TemplatesConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the engine and return its backing store.
    pub fn into_store(self) -> S {
        self.store
    }

    // -- persistence --------------------------------------------------------

    /// Persist `entity` under its id and return the written record.
    ///
    /// A root is stored as its full field set. A variant is stored as the
    /// diff between its current value and the resolved value of its
    /// `template_id`. Any previous record for the id is overwritten; ancestor
    /// records are never touched.
    ///
    /// # Errors
    ///
    /// - [`TemplatesError::InvalidEntity`] if component ids are not unique or a
    ///   component does not serialize with its own id.
    /// - [`TemplatesError::NotFound`] / [`TemplatesError::CorruptRecord`] if the
    ///   template parent cannot be resolved.
    /// - [`TemplatesError::CycleDetected`] if the parent chain already
    ///   contains this entity.
    pub fn save_as_template(&mut self, entity: &Entity<C>) -> Result<TemplateRecord, TemplatesError> {
        entity.validate()?;
        let body = body_of(entity.to_value()?);

        let base = match &entity.template_id {
            None => Value::Object(Map::new()),
            Some(parent) if parent == &entity.id => {
                return Err(TemplatesError::CycleDetected {
                    id: entity.id.clone(),
                    chain: vec![entity.id.clone(), entity.id.clone()],
                });
            }
            Some(parent) => {
                let chain = self.resolve_records(parent)?;
                if chain.iter().any(|r| r.id == entity.id) {
                    let mut ids: Vec<EntityId> = chain.into_iter().map(|r| r.id).collect();
                    ids.push(entity.id.clone());
                    return Err(TemplatesError::CycleDetected {
                        id: entity.id.clone(),
                        chain: ids,
                    });
                }
                materialize(&chain)
            }
        };

        let record = TemplateRecord {
            id: entity.id.clone(),
            template_id: entity.template_id.clone(),
            fields: diff::diff(&base, &body),
        };
        self.write_record(record.clone())?;

        tracing::debug!(
            id = %record.id,
            template = ?record.template_id,
            fields = record.fields.len(),
            "saved template"
        );
        Ok(record)
    }

    /// Branch a new variant off the persisted template `parent`.
    ///
    /// The variant gets a fresh id, `template_id = parent.id`, and a deep copy
    /// of the parent's resolved values. It is ephemeral until saved.
    ///
    /// # Errors
    ///
    /// Returns [`TemplatesError::NotAPersistedTemplate`] if `parent.id` has
    /// never been saved. Branch from the ephemeral entity's own template
    /// instead.
    pub fn create_variant_instance_of(&mut self, parent: &Entity<C>) -> Result<Entity<C>, TemplatesError> {
        self.create_variant_of(&parent.id)
    }

    /// Like [`create_variant_instance_of`](Self::create_variant_instance_of),
    /// addressed by id.
    pub fn create_variant_of(&mut self, parent_id: &EntityId) -> Result<Entity<C>, TemplatesError> {
        if !self.is_persisted(parent_id)? {
            return Err(TemplatesError::NotAPersistedTemplate {
                id: parent_id.clone(),
            });
        }
        let mut variant = self.load_template_instance(parent_id)?;
        variant.id = self.ids.next_id();
        variant.template_id = Some(parent_id.clone());

        tracing::debug!(id = %variant.id, template = %parent_id, "created variant instance");
        Ok(variant)
    }

    /// Delete the stored record for `id`. Returns `false` if nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns [`TemplatesError::HasVariants`] if any stored record names `id`
    /// as its template; deleting it would orphan those chains.
    pub fn delete_template(&mut self, id: &EntityId) -> Result<bool, TemplatesError> {
        let mut variants = Vec::new();
        for other in self.stored_ids()? {
            if &other == id {
                continue;
            }
            if self.load_record(&other)?.template_id.as_ref() == Some(id) {
                variants.push(other);
            }
        }
        if !variants.is_empty() {
            variants.sort();
            return Err(TemplatesError::HasVariants {
                id: id.clone(),
                variants,
            });
        }

        self.cache.remove(id);
        let deleted = self.store.delete(id)?;
        tracing::debug!(id = %id, deleted, "deleted template");
        Ok(deleted)
    }

    // -- resolution ---------------------------------------------------------

    /// Resolve `id` into a fully materialized entity.
    ///
    /// # Errors
    ///
    /// - [`TemplatesError::NotFound`] if `id` or any ancestor is not stored.
    /// - [`TemplatesError::CycleDetected`] if the chain revisits an id.
    /// - [`TemplatesError::CorruptRecord`] if a record cannot be decoded or
    ///   the resolved value does not fit the entity schema.
    pub fn load_template_instance(&mut self, id: &EntityId) -> Result<Entity<C>, TemplatesError> {
        let chain = self.resolve_records(id)?;
        let mut value = materialize(&chain);

        let leaf = chain.last().ok_or_else(|| TemplatesError::NotFound { id: id.clone() })?;
        if let Value::Object(map) = &mut value {
            map.insert(HEADER_FIELDS[0].to_owned(), Value::String(leaf.id.to_string()));
            map.insert(
                HEADER_FIELDS[1].to_owned(),
                leaf.template_id
                    .as_ref()
                    .map_or(Value::Null, |t| Value::String(t.to_string())),
            );
        }

        Entity::from_value(id, value).map_err(|e| match e {
            CoreError::Decode { details, .. } => TemplatesError::CorruptRecord {
                id: id.clone(),
                details,
            },
            other => TemplatesError::InvalidEntity(other),
        })
    }

    /// The ids of the resolution chain for `id`, root first.
    pub fn resolve_chain(&mut self, id: &EntityId) -> Result<Vec<EntityId>, TemplatesError> {
        Ok(self.resolve_records(id)?.into_iter().map(|r| r.id).collect())
    }

    /// Walk `template_id` pointers from `id` to the root. Returns the records
    /// root first.
    fn resolve_records(&mut self, id: &EntityId) -> Result<Vec<TemplateRecord>, TemplatesError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(id.clone());

        while let Some(current) = next {
            if !visited.insert(current.clone()) {
                // Walk order, ending on the revisited id.
                let mut ids: Vec<EntityId> = chain.iter().map(|r: &TemplateRecord| r.id.clone()).collect();
                ids.push(current);
                return Err(TemplatesError::CycleDetected {
                    id: id.clone(),
                    chain: ids,
                });
            }
            let record = self.load_record(&current)?;
            next = record.template_id.clone();
            chain.push(record);
        }

        chain.reverse();
        tracing::trace!(id = %id, depth = chain.len(), "resolved template chain");
        Ok(chain)
    }

    /// The stored record for `id`, from cache or store.
    pub fn load_record(&mut self, id: &EntityId) -> Result<TemplateRecord, TemplatesError> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.clone());
        }
        let bytes = self
            .store
            .get(id)?
            .ok_or_else(|| TemplatesError::NotFound { id: id.clone() })?;
        let record = record::decode(id, &bytes, self.config.verify_checksums)?;
        if self.config.cache_reads {
            self.cache.insert(id.clone(), record.clone());
        }
        Ok(record)
    }

    /// Returns `true` if `id` has been saved.
    pub fn is_persisted(&self, id: &EntityId) -> Result<bool, TemplatesError> {
        if self.cache.contains_key(id) {
            return Ok(true);
        }
        Ok(self.store.contains(id)?)
    }

    // -- enumeration & cache ------------------------------------------------

    /// Lazily enumerate every stored id. Order is unspecified.
    pub fn all_entity_ids(&self) -> Result<impl Iterator<Item = EntityId> + '_, TemplatesError> {
        Ok(self.store.ids()?)
    }

    fn stored_ids(&self) -> Result<Vec<EntityId>, TemplatesError> {
        Ok(self.store.ids()?.collect())
    }

    /// Read and decode every stored record into the cache. Returns the number
    /// of records loaded.
    ///
    /// Resolution results are identical with or without this call; it only
    /// removes store reads from later resolutions.
    pub fn load_all_template_files_into_memory(&mut self) -> Result<usize, TemplatesError> {
        let ids = self.stored_ids()?;
        let mut loaded = HashMap::with_capacity(ids.len());
        for id in ids {
            let bytes = self
                .store
                .get(&id)?
                .ok_or_else(|| TemplatesError::NotFound { id: id.clone() })?;
            let record = record::decode(&id, &bytes, self.config.verify_checksums)?;
            loaded.insert(id, record);
        }

        let count = loaded.len();
        self.cache = loaded;
        self.warmed = true;
        tracing::info!(records = count, "loaded all template records into memory");
        Ok(count)
    }

    /// Drop every cached record. Later resolutions read from the store.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.warmed = false;
    }

    /// Number of records currently cached.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` after a successful
    /// [`load_all_template_files_into_memory`](Self::load_all_template_files_into_memory)
    /// that has not been cleared.
    pub fn is_warmed(&self) -> bool {
        self.warmed
    }

    fn write_record(&mut self, record: TemplateRecord) -> Result<(), TemplatesError> {
        let bytes = record::encode(&record)?;
        self.store.set(&record.id, bytes)?;
        if self.config.cache_reads || self.warmed {
            self.cache.insert(record.id.clone(), record);
        } else {
            self.cache.remove(&record.id);
        }
        Ok(())
    }
}

/// Strip the header fields from an entity's JSON form.
fn body_of(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        for field in HEADER_FIELDS {
            map.remove(field);
        }
    }
    value
}

/// Fold a root-first chain of records into a single body value.
fn materialize(chain: &[TemplateRecord]) -> Value {
    let mut value = Value::Object(Map::new());
    for record in chain {
        let report = diff::apply(&mut value, &record.fields);
        if report.skipped > 0 {
            tracing::debug!(id = %record.id, skipped = report.skipped, "stale overrides ignored");
        }
    }
    value
}

/// The diff `entity` would be saved as if its parent resolved to `parent`.
///
/// Useful for previewing which fields a variant overrides without writing.
pub fn variant_diff<C: ComponentData>(
    parent: &Entity<C>,
    entity: &Entity<C>,
) -> Result<Diff, TemplatesError> {
    let base = body_of(parent.to_value()?);
    let body = body_of(entity.to_value()?);
    Ok(diff::diff(&base, &body))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
