//! Integrator: resolve identity, deduplicate, upsert, wire relations.
//!
//! One record is integrated under the store's write lock:
//!
//! 1. claim `(entity_type, name_key)` in staging
//! 2. open a transaction and resolve identity (exact, then heuristic)
//! 3. mark heuristic duplicates for cleanup, merge, insert or update
//! 4. re-wire relations, creating stub targets where needed
//! 5. re-read the row and check its invariants
//! 6. commit, or roll back on any error
//!
//! The staging claim is released whatever the outcome.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kiln_core::{EntityType, ImportOutcome, MatchKind, NormalizedEntity, TargetEntity};
use kiln_db::repos::{entities, relations, staging};
use kiln_db::{DatabaseError, ImportStore, NewEntity, WriteSession, name_key};
use kiln_formula::RuleStore;
use kiln_formula::evaluate::check_bounds;
use serde_json::Value;

use crate::error::{ImportError, IntegrityError};

/// Result of identity resolution for one normalized entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A row with the same `(entity_type, external_id)`.
    Exact(TargetEntity),
    /// Rows without an external id sharing the normalized name. `keep` is
    /// the lowest id, the rest are duplicates.
    Heuristic {
        keep: TargetEntity,
        duplicates: Vec<TargetEntity>,
    },
    None,
}

/// Exact match first, then the name heuristic.
///
/// # Errors
///
/// Returns `DatabaseError` if a lookup fails.
pub async fn resolve_identity(
    conn: &libsql::Connection,
    entity_type: EntityType,
    external_id: u64,
    name: Option<&str>,
) -> Result<Resolution, DatabaseError> {
    if let Some(existing) = entities::find_by_external_id(conn, entity_type, external_id).await? {
        return Ok(Resolution::Exact(existing));
    }
    let Some(key) = name.map(name_key).filter(|k| !k.is_empty()) else {
        return Ok(Resolution::None);
    };
    let mut candidates = entities::find_by_name_key(conn, entity_type, &key)
        .await?
        .into_iter();
    Ok(match candidates.next() {
        Some(keep) => Resolution::Heuristic {
            keep,
            duplicates: candidates.collect(),
        },
        None => Resolution::None,
    })
}

pub struct Integrator {
    store: Arc<ImportStore>,
    rules: Arc<RuleStore>,
}

impl Integrator {
    #[must_use]
    pub const fn new(store: Arc<ImportStore>, rules: Arc<RuleStore>) -> Self {
        Self { store, rules }
    }

    /// Merge one normalized entity into the store.
    ///
    /// # Errors
    ///
    /// [`IntegrityError`] for staging conflicts, self-references, cycles and
    /// failed post-write checks. [`DatabaseError`] for store failures. In
    /// both cases nothing of this record is left written.
    pub async fn integrate(&self, entity: &NormalizedEntity) -> Result<ImportOutcome, ImportError> {
        let session = self.store.write_session().await;
        let key = entity.name.as_deref().map(name_key).filter(|k| !k.is_empty());

        if let Some(key) = &key {
            if !staging::claim(session.conn(), entity.entity_type, key).await? {
                return Err(IntegrityError::StagingConflict {
                    entity_type: entity.entity_type,
                    name_key: key.clone(),
                }
                .into());
            }
        }

        let result = self.write(&session, entity).await;

        if let Some(key) = &key {
            if let Err(err) = staging::release(session.conn(), entity.entity_type, key).await {
                tracing::warn!(name_key = %key, error = %err, "failed to release staging claim");
            }
        }
        result
    }

    async fn write(
        &self,
        session: &WriteSession<'_>,
        entity: &NormalizedEntity,
    ) -> Result<ImportOutcome, ImportError> {
        let tx = session.transaction().await?;
        match self.upsert(&tx, entity).await {
            Ok(outcome) => {
                tx.commit().await.map_err(DatabaseError::from)?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn upsert(
        &self,
        conn: &libsql::Connection,
        entity: &NormalizedEntity,
    ) -> Result<ImportOutcome, ImportError> {
        let resolution =
            resolve_identity(conn, entity.entity_type, entity.external_id, entity.name.as_deref())
                .await?;

        let existing = match resolution {
            Resolution::Exact(current) => Some((current, MatchKind::Exact)),
            Resolution::Heuristic { keep, duplicates } => {
                tracing::warn!(
                    entity_type = %entity.entity_type,
                    external_id = entity.external_id,
                    entity_id = keep.id,
                    "merge candidate matched by name"
                );
                for duplicate in duplicates {
                    entities::mark_for_cleanup(conn, duplicate.id, keep.id).await?;
                    tracing::warn!(
                        entity_id = duplicate.id,
                        merged_into = keep.id,
                        "duplicate marked for cleanup"
                    );
                }
                Some((keep, MatchKind::Heuristic))
            }
            Resolution::None => None,
        };

        let resolved: BTreeMap<String, Value> = entity
            .resolved_values()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let mut row = NewEntity::new(entity.entity_type);
        row.external_id = Some(entity.external_id);
        row.name.clone_from(&entity.name);
        row.category_id = entity.category_id;
        row.needs_review = entity.needs_review();
        let review = entity.needs_review();

        let outcome = match existing {
            Some((current, matched)) => {
                let mut characteristics = current.characteristics;
                characteristics.extend(resolved);
                row.characteristics = characteristics;
                entities::update(conn, current.id, &row).await?;
                if current.is_stub {
                    ImportOutcome::Created {
                        entity_id: current.id,
                        review,
                    }
                } else {
                    ImportOutcome::Updated {
                        entity_id: current.id,
                        matched,
                        review,
                    }
                }
            }
            None => {
                row.characteristics = resolved;
                let entity_id = entities::insert(conn, &row).await?;
                ImportOutcome::Created { entity_id, review }
            }
        };

        let Some(entity_id) = outcome.entity_id() else {
            return Err(DatabaseError::InvalidState("upsert produced no entity id".into()).into());
        };
        self.wire_relations(conn, entity_id, entity).await?;
        self.validate(conn, entity_id, entity).await?;
        Ok(outcome)
    }

    /// Replace outgoing links of every configured kind with the entity's
    /// current relations.
    async fn wire_relations(
        &self,
        conn: &libsql::Connection,
        source_id: i64,
        entity: &NormalizedEntity,
    ) -> Result<(), ImportError> {
        let kinds: BTreeSet<&str> = self
            .rules
            .settings(entity.entity_type)
            .relations
            .iter()
            .map(|spec| spec.kind.as_str())
            .chain(entity.relations.iter().map(|r| r.kind.as_str()))
            .collect();
        for kind in kinds {
            relations::clear_kind(conn, source_id, kind).await?;
        }

        for relation in &entity.relations {
            let target_id =
                ensure_target(conn, relation.target_type, relation.target_external_id).await?;
            if target_id == source_id {
                return Err(IntegrityError::SelfReference {
                    kind: relation.kind.clone(),
                }
                .into());
            }
            if relation.acyclic
                && relations::would_create_cycle(conn, source_id, target_id, &relation.kind).await?
            {
                return Err(IntegrityError::Cycle {
                    kind: relation.kind.clone(),
                    source_id,
                    target_id,
                }
                .into());
            }
            relations::link(conn, source_id, target_id, &relation.kind, relation.position).await?;
        }
        Ok(())
    }

    /// Re-read the written row: the external id must match, required
    /// characteristics must be present and bounded values in range.
    async fn validate(
        &self,
        conn: &libsql::Connection,
        entity_id: i64,
        entity: &NormalizedEntity,
    ) -> Result<(), ImportError> {
        let stored = entities::get(conn, entity_id).await?;
        if stored.external_id != Some(entity.external_id) {
            return Err(IntegrityError::ExternalIdMismatch {
                expected: entity.external_id,
                found: stored.external_id,
            }
            .into());
        }
        for rule in self.rules.rules_for(entity.entity_type) {
            let key = &rule.characteristic_key;
            match stored.characteristics.get(key).filter(|v| !v.is_null()) {
                None if rule.is_required() => {
                    return Err(IntegrityError::MissingRequired { key: key.clone() }.into());
                }
                None => {}
                Some(value) => check_bounds(value, rule.min(), rule.max()).map_err(|source| {
                    IntegrityError::InvalidCharacteristic {
                        key: key.clone(),
                        source,
                    }
                })?,
            }
        }
        Ok(())
    }
}

/// Id of the row for a relation target, inserting a stub if it is missing.
async fn ensure_target(
    conn: &libsql::Connection,
    entity_type: EntityType,
    external_id: u64,
) -> Result<i64, DatabaseError> {
    if let Some(existing) = entities::find_by_external_id(conn, entity_type, external_id).await? {
        return Ok(existing.id);
    }
    let mut stub = NewEntity::new(entity_type);
    stub.external_id = Some(external_id);
    stub.is_stub = true;
    let id = entities::insert(conn, &stub).await?;
    tracing::debug!(%entity_type, external_id, entity_id = id, "created relation stub");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{Characteristic, RelationRef};
    use kiln_formula::HandlerRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn integrator(rules: RuleStore) -> (Integrator, Arc<ImportStore>) {
        let store = Arc::new(ImportStore::open_in_memory().await.unwrap());
        (Integrator::new(Arc::clone(&store), Arc::new(rules)), store)
    }

    fn monster(external_id: u64, name: &str, life: i64) -> NormalizedEntity {
        let mut entity = NormalizedEntity::new(EntityType::Monster, external_id);
        entity.name = Some(name.into());
        entity
            .characteristics
            .insert("life".into(), Characteristic::resolved(json!(life)));
        entity
    }

    fn link(kind: &str, target_type: EntityType, target: u64, acyclic: bool) -> RelationRef {
        RelationRef {
            kind: kind.into(),
            target_type,
            target_external_id: target,
            position: 0,
            acyclic,
        }
    }

    async fn manual_row(store: &ImportStore, name: &str, characteristics: Value) -> i64 {
        let mut row = NewEntity::new(EntityType::Monster);
        row.name = Some(name.into());
        row.characteristics = serde_json::from_value(characteristics).unwrap();
        let session = store.write_session().await;
        entities::insert(session.conn(), &row).await.unwrap()
    }

    #[tokio::test]
    async fn create_then_update_by_external_id() {
        let (integrator, store) = integrator(RuleStore::empty()).await;

        let first = integrator.integrate(&monster(31, "Bouftou", 40)).await.unwrap();
        let ImportOutcome::Created { entity_id, review } = first else {
            panic!("expected created, got {first:?}");
        };
        assert!(!review);

        let second = integrator.integrate(&monster(31, "Bouftou", 45)).await.unwrap();
        assert_eq!(
            second,
            ImportOutcome::Updated {
                entity_id,
                matched: MatchKind::Exact,
                review: false
            }
        );
        assert_eq!(store.count_entities(Some(EntityType::Monster)).await.unwrap(), 1);
        assert_eq!(store.entity(entity_id).await.unwrap().characteristics["life"], json!(45));
    }

    #[tokio::test]
    async fn heuristic_match_keeps_curated_values() {
        let (integrator, store) = integrator(RuleStore::empty()).await;
        let manual = manual_row(&store, "  bouftou ", json!({ "lore": "woolly", "life": 1 })).await;

        let mut entity = monster(31, "Bouftou", 40);
        entity
            .characteristics
            .insert("lore".into(), Characteristic::resolved(json!("")));
        let outcome = integrator.integrate(&entity).await.unwrap();

        assert_eq!(
            outcome,
            ImportOutcome::Updated {
                entity_id: manual,
                matched: MatchKind::Heuristic,
                review: false
            }
        );
        let stored = store.entity(manual).await.unwrap();
        assert_eq!(stored.external_id, Some(31));
        assert_eq!(stored.characteristics["lore"], json!("woolly"));
        assert_eq!(stored.characteristics["life"], json!(40));
    }

    #[tokio::test]
    async fn heuristic_duplicates_are_marked_for_cleanup() {
        let (integrator, store) = integrator(RuleStore::empty()).await;
        let keep = manual_row(&store, "Bouftou", json!({})).await;
        let extra = manual_row(&store, "BOUFTOU", json!({})).await;

        let outcome = integrator.integrate(&monster(31, "Bouftou", 40)).await.unwrap();
        assert_eq!(outcome.entity_id(), Some(keep));

        let extra = store.entity(extra).await.unwrap();
        assert!(extra.pending_cleanup);
        assert_eq!(extra.merged_into, Some(keep));
        assert_eq!(store.count_entities(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn relations_create_stubs_and_stub_promotion_counts_as_created() {
        let (integrator, store) = integrator(RuleStore::empty()).await;
        let mut entity = monster(31, "Bouftou", 40);
        entity.relations.push(link("casts", EntityType::Spell, 201, false));
        let source = integrator.integrate(&entity).await.unwrap().entity_id().unwrap();

        let stub = store
            .entity_by_external_id(EntityType::Spell, 201)
            .await
            .unwrap()
            .unwrap();
        assert!(stub.is_stub);
        let links = relations::outgoing(store.db().conn(), source).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_id, stub.id);

        let mut spell = NormalizedEntity::new(EntityType::Spell, 201);
        spell.name = Some("Bouftou Bite".into());
        let outcome = integrator.integrate(&spell).await.unwrap();
        assert_eq!(
            outcome,
            ImportOutcome::Created {
                entity_id: stub.id,
                review: false
            }
        );
        assert!(!store.entity(stub.id).await.unwrap().is_stub);
    }

    #[tokio::test]
    async fn self_reference_is_rejected_and_rolled_back() {
        let (integrator, store) = integrator(RuleStore::empty()).await;
        let mut entity = monster(31, "Bouftou", 40);
        entity.relations.push(link("summons", EntityType::Monster, 31, false));

        let err = integrator.integrate(&entity).await.unwrap_err();
        assert!(matches!(
            err,
            ImportError::Integrity(IntegrityError::SelfReference { .. })
        ));
        assert_eq!(store.count_entities(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cycles_are_rejected_for_acyclic_kinds() {
        let (integrator, store) = integrator(RuleStore::empty()).await;
        let mut a = NormalizedEntity::new(EntityType::Item, 1);
        a.relations.push(link("parent", EntityType::Item, 2, true));
        integrator.integrate(&a).await.unwrap();

        let mut b = NormalizedEntity::new(EntityType::Item, 2);
        b.name = Some("Ring".into());
        b.relations.push(link("parent", EntityType::Item, 1, true));
        let err = integrator.integrate(&b).await.unwrap_err();
        assert!(matches!(err, ImportError::Integrity(IntegrityError::Cycle { .. })));

        let b = store
            .entity_by_external_id(EntityType::Item, 2)
            .await
            .unwrap()
            .unwrap();
        assert!(b.is_stub);
        assert_eq!(b.name, None);
    }

    #[tokio::test]
    async fn failed_post_write_check_leaves_nothing_behind() {
        let rules = RuleStore::from_toml_str(
            r#"
[[rules]]
entity_type = "monster"
characteristic_key = "ap"
formula_type = "named_handler"
handler_name = "identity"
"#,
            &HandlerRegistry::builtin(),
        )
        .unwrap();
        let (integrator, store) = integrator(rules).await;

        let err = integrator.integrate(&monster(31, "Bouftou", 40)).await.unwrap_err();
        assert!(matches!(
            err,
            ImportError::Integrity(IntegrityError::MissingRequired { ref key }) if key == "ap"
        ));
        assert_eq!(store.count_entities(None).await.unwrap(), 0);
        assert_eq!(staging::count(store.db().conn()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_writer_on_the_same_name_is_a_conflict() {
        let (integrator, store) = integrator(RuleStore::empty()).await;
        {
            let session = store.write_session().await;
            staging::claim(session.conn(), EntityType::Monster, "bouftou")
                .await
                .unwrap();
        }
        let err = integrator.integrate(&monster(31, "Bouftou", 40)).await.unwrap_err();
        assert!(matches!(
            err,
            ImportError::Integrity(IntegrityError::StagingConflict { .. })
        ));
        assert_eq!(store.count_entities(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resolve_identity_prefers_exact_match() {
        let (integrator, store) = integrator(RuleStore::empty()).await;
        manual_row(&store, "Bouftou", json!({})).await;
        let created = integrator
            .integrate(&monster(99, "Bouftou Royal", 1))
            .await
            .unwrap()
            .entity_id()
            .unwrap();

        let conn = store.db().conn();
        let exact = resolve_identity(conn, EntityType::Monster, 99, Some("Bouftou"))
            .await
            .unwrap();
        assert!(matches!(exact, Resolution::Exact(ref t) if t.id == created));

        let heuristic = resolve_identity(conn, EntityType::Monster, 5, Some("bouftou"))
            .await
            .unwrap();
        assert!(matches!(heuristic, Resolution::Heuristic { ref duplicates, .. } if duplicates.is_empty()));

        let none = resolve_identity(conn, EntityType::Monster, 5, None).await.unwrap();
        assert_eq!(none, Resolution::None);
    }
}
