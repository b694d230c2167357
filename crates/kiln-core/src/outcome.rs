//! Per-record import outcomes and the aggregated run report.

use serde::{Deserialize, Serialize};

use crate::enums::{EntityType, ErrorKind, MatchKind, SkipReason};

/// Terminal state of one record's pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ImportOutcome {
    Created {
        entity_id: i64,
        review: bool,
    },
    Updated {
        entity_id: i64,
        matched: MatchKind,
        review: bool,
    },
    Skipped {
        #[serde(flatten)]
        reason: SkipReason,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl ImportOutcome {
    #[must_use]
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }

    /// Persisted entity id for created/updated outcomes.
    #[must_use]
    pub const fn entity_id(&self) -> Option<i64> {
        match self {
            Self::Created { entity_id, .. } | Self::Updated { entity_id, .. } => Some(*entity_id),
            Self::Skipped { .. } | Self::Failed { .. } => None,
        }
    }
}

/// Outcome for one requested external id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReport {
    pub external_id: u64,
    #[serde(flatten)]
    pub outcome: ImportOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }

    const fn record(&mut self, outcome: &ImportOutcome) {
        match outcome {
            ImportOutcome::Created { .. } => self.created += 1,
            ImportOutcome::Updated { .. } => self.updated += 1,
            ImportOutcome::Skipped { .. } => self.skipped += 1,
            ImportOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Ordered outcomes plus aggregate counts for one orchestrator run.
///
/// Every requested id appears exactly once, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub entity_type: EntityType,
    pub counts: OutcomeCounts,
    pub records: Vec<RecordReport>,
}

impl ImportReport {
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            counts: OutcomeCounts::default(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, external_id: u64, outcome: ImportOutcome) {
        self.counts.record(&outcome);
        self.records.push(RecordReport {
            external_id,
            outcome,
        });
    }

    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }

    #[must_use]
    pub fn outcome_for(&self, external_id: u64) -> Option<&ImportOutcome> {
        self.records
            .iter()
            .find(|r| r.external_id == external_id)
            .map(|r| &r.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn report_counts_track_pushes() {
        let mut report = ImportReport::new(EntityType::Item);
        report.push(
            1,
            ImportOutcome::Created {
                entity_id: 10,
                review: false,
            },
        );
        report.push(2, ImportOutcome::failed(ErrorKind::Integrity, "cycle"));
        report.push(3, ImportOutcome::skipped(SkipReason::NotFound));

        assert_eq!(
            report.counts,
            OutcomeCounts {
                created: 1,
                updated: 0,
                skipped: 1,
                failed: 1,
            }
        );
        assert_eq!(report.counts.total(), 3);
        assert!(report.has_failures());
        assert_eq!(report.outcome_for(1).and_then(ImportOutcome::entity_id), Some(10));
    }

    #[test]
    fn record_report_flattens_outcome() {
        let record = RecordReport {
            external_id: 9,
            outcome: ImportOutcome::skipped(SkipReason::BlockedCategory { category_id: 4 }),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["external_id"], 9);
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "blocked_category");
        assert_eq!(json["category_id"], 4);
    }
}
