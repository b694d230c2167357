use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::EntityType;

/// Raw payload for one upstream entity. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub entity_type: EntityType,
    pub external_id: u64,
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
}

impl SourceRecord {
    #[must_use]
    pub fn new(entity_type: EntityType, external_id: u64, payload: Value) -> Self {
        Self {
            entity_type,
            external_id,
            payload,
            fetched_at: Utc::now(),
        }
    }

    /// Look up a dotted field path in the payload (see [`resolve_path`]).
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.payload, path)
    }
}

/// Walk a dotted path such as `grades.0.level` through objects and arrays.
///
/// Numeric segments index into arrays. A `null` at the end of the path is
/// treated as absent.
#[must_use]
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() { None } else { Some(current) }
}
