use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{Decision, EntityType};

/// Triage row for an external category id unknown to the domain model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecision {
    pub entity_type: EntityType,
    pub external_category_id: i64,
    pub decision: Decision,
    pub seen_count: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}
