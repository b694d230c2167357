use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::enums::{Decision, EntityType};

/// Computed value for one characteristic key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Characteristic {
    Resolved { value: Value },
    /// No value could be computed; existing persisted data must be kept.
    Unresolved { reason: String },
}

impl Characteristic {
    #[must_use]
    pub const fn resolved(value: Value) -> Self {
        Self::Resolved { value }
    }

    #[must_use]
    pub fn unresolved(reason: impl Into<String>) -> Self {
        Self::Unresolved {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Resolved { value } => Some(value),
            Self::Unresolved { .. } => None,
        }
    }

    /// Unresolved, null, or an empty/whitespace string.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self.value() {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        }
    }
}

/// Reference from one entity to another by upstream id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationRef {
    pub kind: String,
    pub target_type: EntityType,
    pub target_external_id: u64,
    pub position: u32,
    /// Whether this relation kind must never form a cycle.
    #[serde(default)]
    pub acyclic: bool,
}

/// Triage state attached to a record whose category is still under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryReview {
    pub category_id: i64,
    pub decision: Decision,
    pub seen_count: u32,
}

/// Output of conversion for one source record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntity {
    pub entity_type: EntityType,
    pub external_id: u64,
    pub name: Option<String>,
    pub category_id: Option<i64>,
    pub characteristics: BTreeMap<String, Characteristic>,
    /// Raw fields matched by no rule and not on the pass-through list.
    pub unclassified: BTreeMap<String, Value>,
    /// Per-field errors from optional rules.
    pub field_errors: BTreeMap<String, String>,
    pub relations: Vec<RelationRef>,
    /// Set when the record's category is pending triage review.
    pub review: Option<CategoryReview>,
}

impl NormalizedEntity {
    #[must_use]
    pub const fn new(entity_type: EntityType, external_id: u64) -> Self {
        Self {
            entity_type,
            external_id,
            name: None,
            category_id: None,
            characteristics: BTreeMap::new(),
            unclassified: BTreeMap::new(),
            field_errors: BTreeMap::new(),
            relations: Vec::new(),
            review: None,
        }
    }

    #[must_use]
    pub const fn needs_review(&self) -> bool {
        self.review.is_some()
    }

    /// Resolved, non-blank characteristic values.
    pub fn resolved_values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.characteristics
            .iter()
            .filter(|(_, c)| !c.is_blank())
            .filter_map(|(k, c)| c.value().map(|v| (k.as_str(), v)))
    }
}
