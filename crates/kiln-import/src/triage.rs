//! Category triage gates used by the converter.
//!
//! Import runs record every sighting of an unknown category. Previews only
//! read the current decision, so they never write to the store.

use std::sync::Arc;

use async_trait::async_trait;
use kiln_core::{CategoryReview, Decision, EntityType};
use kiln_db::{DatabaseError, ImportStore};

#[async_trait]
pub trait CategoryTriage: Send + Sync {
    /// Observe a category id that is not in the known set and report its
    /// current decision.
    async fn observe(
        &self,
        entity_type: EntityType,
        category_id: i64,
    ) -> Result<CategoryReview, DatabaseError>;
}

/// Creates or touches the category's decision row.
pub struct RecordingTriage {
    store: Arc<ImportStore>,
}

impl RecordingTriage {
    #[must_use]
    pub const fn new(store: Arc<ImportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CategoryTriage for RecordingTriage {
    async fn observe(
        &self,
        entity_type: EntityType,
        category_id: i64,
    ) -> Result<CategoryReview, DatabaseError> {
        let decision = self
            .store
            .record_category_sighting(entity_type, category_id)
            .await?;
        if decision.seen_count == 1 {
            tracing::info!(%entity_type, category_id, "new category queued for review");
        }
        Ok(CategoryReview {
            category_id,
            decision: decision.decision,
            seen_count: decision.seen_count,
        })
    }
}

/// Reads the decision without recording anything. An unseen category is
/// reported as pending with a zero count.
pub struct PeekTriage {
    store: Arc<ImportStore>,
}

impl PeekTriage {
    #[must_use]
    pub const fn new(store: Arc<ImportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CategoryTriage for PeekTriage {
    async fn observe(
        &self,
        _entity_type: EntityType,
        category_id: i64,
    ) -> Result<CategoryReview, DatabaseError> {
        let existing = self.store.type_decision(category_id).await?;
        Ok(existing.map_or(
            CategoryReview {
                category_id,
                decision: Decision::Pending,
                seen_count: 0,
            },
            |d| CategoryReview {
                category_id,
                decision: d.decision,
                seen_count: d.seen_count,
            },
        ))
    }
}
