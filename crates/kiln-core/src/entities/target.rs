use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::EntityType;

/// Persisted domain object created or updated by integration.
///
/// At most one row exists per `(entity_type, external_id)` once the
/// external id is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntity {
    pub id: i64,
    pub entity_type: EntityType,
    pub external_id: Option<u64>,
    pub name: Option<String>,
    pub category_id: Option<i64>,
    pub characteristics: BTreeMap<String, Value>,
    /// Created only to satisfy a relation; no upstream data merged yet.
    pub is_stub: bool,
    pub needs_review: bool,
    /// Heuristic duplicate consolidated into `merged_into`.
    pub pending_cleanup: bool,
    pub merged_into: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
