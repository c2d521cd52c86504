//! Stored template records and their on-store encoding.
//!
//! A [`TemplateRecord`] is what the engine writes per entity: the entity id,
//! its template parent, and the [`Diff`] against the parent's resolved value
//! (or against `{}` for a root, which makes the diff a full baseline).
//!
//! Records are stored as JSON envelopes carrying a BLAKE3 checksum of the
//! canonical record bytes:
//!
//! ```json
//! { "checksum": "<64 hex chars>", "record": { "id": "...", "template_id": null, "fields": { ... } } }
//! ```
//!
//! [`decode`] rejects undecodable bytes, checksum mismatches, and records
//! whose id differs from the key they were read under.

use lineage_core::entity::EntityId;
use serde::{Deserialize, Serialize};

use crate::diff::Diff;
use crate::TemplatesError;

// ---------------------------------------------------------------------------
// TemplateRecord
// ---------------------------------------------------------------------------

/// The persisted form of one entity in a template chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    /// The entity this record belongs to.
    pub id: EntityId,
    /// Immediate template parent. `None` marks a root baseline.
    #[serde(default)]
    pub template_id: Option<EntityId>,
    /// Overrides relative to the parent's resolved value.
    #[serde(default)]
    pub fields: Diff,
}

impl TemplateRecord {
    /// Returns `true` if this record is a root baseline.
    pub fn is_root(&self) -> bool {
        self.template_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    checksum: String,
    record: &'a TemplateRecord,
}

#[derive(Deserialize)]
struct Envelope {
    checksum: String,
    record: TemplateRecord,
}

/// BLAKE3 hex digest of the record's canonical JSON bytes.
pub fn checksum(record: &TemplateRecord) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(record)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Encode a record for the backing store.
pub fn encode(record: &TemplateRecord) -> Result<Vec<u8>, TemplatesError> {
    let corrupt = |e: serde_json::Error| TemplatesError::CorruptRecord {
        id: record.id.clone(),
        details: e.to_string(),
    };
    let envelope = EnvelopeRef {
        checksum: checksum(record).map_err(corrupt)?,
        record,
    };
    serde_json::to_vec(&envelope).map_err(corrupt)
}

/// Decode bytes read from the store under `id`.
///
/// # Errors
///
/// Returns [`TemplatesError::CorruptRecord`] if the bytes are not a valid
/// envelope, if `verify_checksum` is set and the digest does not match, or if
/// the record's id is not `id`.
pub fn decode(
    id: &EntityId,
    bytes: &[u8],
    verify_checksum: bool,
) -> Result<TemplateRecord, TemplatesError> {
    let corrupt = |details: String| TemplatesError::CorruptRecord {
        id: id.clone(),
        details,
    };

    let envelope: Envelope = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;

    if verify_checksum {
        let actual = checksum(&envelope.record).map_err(|e| corrupt(e.to_string()))?;
        if actual != envelope.checksum {
            return Err(corrupt(format!(
                "checksum mismatch: stored {}, computed {actual}",
                envelope.checksum
            )));
        }
    }

    if &envelope.record.id != id {
        return Err(corrupt(format!(
            "record is stored under {id} but names itself {}",
            envelope.record.id
        )));
    }

    Ok(envelope.record)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
