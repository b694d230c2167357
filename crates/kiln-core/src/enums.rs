//! Entity types, triage decisions, match kinds, and outcome classifiers.
//!
//! All enums use `snake_case` serialization and expose `as_str()` for the
//! string form stored in SQL columns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::CoreError;

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// Kind of game entity fetched from the upstream catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Class,
    Monster,
    Spell,
    SpellLevel,
    Item,
    Panoply,
}

impl EntityType {
    pub const ALL: [Self; 6] = [
        Self::Class,
        Self::Monster,
        Self::Spell,
        Self::SpellLevel,
        Self::Item,
        Self::Panoply,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Monster => "monster",
            Self::Spell => "spell",
            Self::SpellLevel => "spell_level",
            Self::Item => "item",
            Self::Panoply => "panoply",
        }
    }

    /// Collection path segment on the upstream catalog API.
    #[must_use]
    pub const fn upstream_path(self) -> &'static str {
        match self {
            Self::Class => "breeds",
            Self::Monster => "monsters",
            Self::Spell => "spells",
            Self::SpellLevel => "spell-levels",
            Self::Item => "items",
            Self::Panoply => "item-sets",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownEntityType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Triage decision for an external category id not known to the domain model.
///
/// ```text
/// pending → allowed
///         → blocked
/// ```
///
/// Transitions out of `pending` happen only through an external review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pending,
    Allowed,
    Blocked,
}

impl Decision {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "allowed" => Ok(Self::Allowed),
            "blocked" => Ok(Self::Blocked),
            other => Err(CoreError::InvalidDecision(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// MatchKind
// ---------------------------------------------------------------------------

/// How an existing target entity was identified during integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Same `(entityType, externalId)`.
    Exact,
    /// Same `(entityType, normalized name)` on a record without an external id.
    Heuristic,
}

impl MatchKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Heuristic => "heuristic",
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Failure classification reported on `failed` outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Fetch,
    FormulaEvaluation,
    Validation,
    UnknownCategory,
    Integrity,
    Store,
    Config,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::FormulaEvaluation => "formula_evaluation",
            Self::Validation => "validation",
            Self::UnknownCategory => "unknown_category",
            Self::Integrity => "integrity",
            Self::Store => "store",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SkipReason
// ---------------------------------------------------------------------------

/// Why a record ended in the `skipped` state. Skips are never failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The upstream catalog has no record for this id.
    NotFound,
    /// The record's category has been blocked by triage.
    BlockedCategory { category_id: i64 },
    /// The run was stopped before this id was enqueued.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not_found"),
            Self::BlockedCategory { category_id } => write!(f, "blocked_category({category_id})"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("monster", EntityType::Monster)]
    #[case("spell-level", EntityType::SpellLevel)]
    #[case("SPELL_LEVEL", EntityType::SpellLevel)]
    #[case(" item ", EntityType::Item)]
    fn entity_type_parses_aliases(#[case] input: &str, #[case] expected: EntityType) {
        assert_eq!(input.parse::<EntityType>().unwrap(), expected);
    }

    #[test]
    fn entity_type_rejects_unknown() {
        let err = "dungeon".parse::<EntityType>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownEntityType(ref s) if s == "dungeon"));
    }

    #[test]
    fn entity_type_serde_matches_as_str() {
        for t in EntityType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn decision_from_str_roundtrips_as_str() {
        for d in [Decision::Pending, Decision::Allowed, Decision::Blocked] {
            assert_eq!(d.as_str().parse::<Decision>().unwrap(), d);
        }
        assert!("maybe".parse::<Decision>().is_err());
    }

    #[test]
    fn skip_reason_is_tagged() {
        let json = serde_json::to_value(SkipReason::BlockedCategory { category_id: 7 }).unwrap();
        assert_eq!(json["reason"], "blocked_category");
        assert_eq!(json["category_id"], 7);
    }
}
