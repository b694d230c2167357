//! Converter: one source record in, one normalized entity out.
//!
//! Every rule for the record's entity type is evaluated against a context
//! built from the raw payload. Raw fields nothing consumes are kept in the
//! `unclassified` bucket.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kiln_core::{
    Characteristic, Decision, NormalizedEntity, RelationRef, SourceRecord, resolve_path,
};
use kiln_formula::evaluate::check_bounds;
use kiln_formula::{ConversionRule, EntitySettings, EvalContext, Evaluator, RuleStore, as_number};
use serde_json::{Map, Value};

use crate::error::ConvertError;
use crate::locale::localized;
use crate::triage::CategoryTriage;

pub struct Converter {
    rules: Arc<RuleStore>,
    evaluator: Evaluator,
}

/// First segment of a dotted path: the raw top-level field it reads.
fn top_level(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

#[allow(clippy::cast_possible_truncation)]
fn as_id(value: &Value) -> Option<i64> {
    if let Some(id) = value.as_i64() {
        return Some(id);
    }
    let x = as_number(value)?;
    (x.fract() == 0.0 && x.abs() < 9.0e15).then_some(x as i64)
}

impl Converter {
    #[must_use]
    pub const fn new(rules: Arc<RuleStore>, evaluator: Evaluator) -> Self {
        Self { rules, evaluator }
    }

    #[must_use]
    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Convert one record.
    ///
    /// Triage runs first: a blocked category stops conversion before any
    /// rule is evaluated, a pending one flags the entity for review.
    ///
    /// # Errors
    ///
    /// [`ConvertError::BlockedCategory`] for blocked categories,
    /// [`ConvertError::SourceLimit`] when a limited raw value is out of
    /// range, [`ConvertError::Rule`] when a required rule fails.
    pub async fn convert(
        &self,
        record: &SourceRecord,
        triage: &dyn CategoryTriage,
    ) -> Result<NormalizedEntity, ConvertError> {
        let entity_type = record.entity_type;
        let settings = self.rules.settings(entity_type);
        let mut entity = NormalizedEntity::new(entity_type, record.external_id);

        let mut malformed_category = false;
        let raw_category = settings
            .category_field
            .as_deref()
            .and_then(|field| record.field(field).map(|raw| (field, raw)))
            .filter(|(_, raw)| !raw.is_null());
        if let Some((field, raw)) = raw_category {
            entity.category_id = as_id(raw);
            if entity.category_id.is_none() {
                tracing::warn!(%field, value = %raw, "category is not a whole-number id, triage skipped");
                entity.field_errors.insert(
                    field.to_string(),
                    format!("'{raw}' is not a whole-number category id"),
                );
                malformed_category = true;
            }
        }
        if let Some(category_id) = entity.category_id {
            if !settings.known_categories.contains(&category_id) {
                let review = triage.observe(entity_type, category_id).await?;
                match review.decision {
                    Decision::Blocked => {
                        tracing::info!(category_id, "category blocked, skipping record");
                        return Err(ConvertError::BlockedCategory { category_id });
                    }
                    Decision::Pending => entity.review = Some(review),
                    Decision::Allowed => {}
                }
            }
        }

        self.convert_fields(record, settings, malformed_category, &mut entity)?;
        Ok(entity)
    }

    fn convert_fields(
        &self,
        record: &SourceRecord,
        settings: &EntitySettings,
        malformed_category: bool,
        entity: &mut NormalizedEntity,
    ) -> Result<(), ConvertError> {
        let locales = &self.rules.config().locales;
        let mut consumed: BTreeSet<String> = settings.ignore.iter().cloned().collect();
        consumed.insert(top_level(&settings.name_field).to_string());
        consumed.insert(settings.effects_field.clone());
        // A malformed category stays visible in `unclassified`.
        if let Some(field) = settings.category_field.as_ref().filter(|_| !malformed_category) {
            consumed.insert(top_level(field).to_string());
        }

        entity.name = record
            .field(&settings.name_field)
            .and_then(|v| localized(v, locales));

        check_limits(record, settings)?;

        let level = settings.level_field.as_deref().and_then(|field| {
            consumed.insert(top_level(field).to_string());
            record.field(field).cloned()
        });
        let effects = self.effect_view(record, settings);
        let mut used_effects = BTreeSet::new();

        for rule in self.rules.rules_for(record.entity_type) {
            let source = self.rule_source(record, rule, &effects, &mut consumed);
            if source.is_some() && rule.source.is_none() && effects.contains_key(&rule.characteristic_key) {
                used_effects.insert(rule.characteristic_key.clone());
            }
            let ctx = build_context(record, rule, source, level.as_ref(), &mut consumed);

            match self.evaluator.evaluate(rule, &ctx) {
                Ok(value) => {
                    entity
                        .characteristics
                        .insert(rule.characteristic_key.clone(), Characteristic::resolved(value));
                }
                Err(err) if rule.optional => {
                    tracing::debug!(key = %rule.characteristic_key, error = %err, "optional rule unresolved");
                    entity
                        .field_errors
                        .insert(rule.characteristic_key.clone(), err.to_string());
                    entity.characteristics.insert(
                        rule.characteristic_key.clone(),
                        Characteristic::unresolved(err.to_string()),
                    );
                }
                Err(source) => {
                    return Err(ConvertError::Rule {
                        key: rule.characteristic_key.clone(),
                        source,
                    });
                }
            }
        }

        for path in &settings.passthrough {
            consumed.insert(top_level(path).to_string());
            if let Some(value) = record.field(path) {
                let key = self.rules.transform_key(path).to_string();
                entity
                    .characteristics
                    .entry(key)
                    .or_insert_with(|| Characteristic::resolved(value.clone()));
            }
        }

        for spec in &settings.relations {
            consumed.insert(top_level(&spec.field).to_string());
            let Some(raw) = record.field(&spec.field) else {
                continue;
            };
            match relation_ids(raw) {
                Ok(ids) => entity.relations.extend(ids.into_iter().zip(0u32..).map(
                    |(target_external_id, position)| RelationRef {
                        kind: spec.kind.clone(),
                        target_type: spec.target,
                        target_external_id,
                        position,
                        acyclic: spec.acyclic,
                    },
                )),
                Err(reason) => {
                    entity.field_errors.insert(spec.field.clone(), reason);
                }
            }
        }

        if let Value::Object(fields) = &record.payload {
            for (key, value) in fields {
                if !consumed.contains(key) {
                    entity.unclassified.insert(key.clone(), value.clone());
                }
            }
        }
        for (key, row) in effects {
            if !used_effects.contains(&key) && !entity.characteristics.contains_key(&key) {
                entity
                    .unclassified
                    .insert(format!("{}.{key}", settings.effects_field), row);
            }
        }
        Ok(())
    }

    /// Effect rows keyed by characteristic key through the id maps. Rows
    /// with unmapped ids are keyed by the raw id. The first row per key wins.
    fn effect_view(&self, record: &SourceRecord, settings: &EntitySettings) -> BTreeMap<String, Value> {
        let mut view = BTreeMap::new();
        let Some(Value::Array(rows)) = record.field(&settings.effects_field) else {
            return view;
        };
        for row in rows {
            let Some(id) = row.get("characteristic").and_then(as_id) else {
                continue;
            };
            let key = self
                .rules
                .key_for_effect_id(id)
                .map_or_else(|| id.to_string(), str::to_string);
            if view.contains_key(&key) {
                tracing::debug!(%key, "duplicate effect row ignored");
                continue;
            }
            view.insert(key, row.clone());
        }
        view
    }

    /// Explicit `source` path, then the effect view, then a raw field whose
    /// transformed key equals the characteristic key.
    fn rule_source<'a>(
        &self,
        record: &'a SourceRecord,
        rule: &ConversionRule,
        effects: &'a BTreeMap<String, Value>,
        consumed: &mut BTreeSet<String>,
    ) -> Option<&'a Value> {
        if let Some(path) = &rule.source {
            consumed.insert(top_level(path).to_string());
            return record.field(path);
        }
        if let Some(row) = effects.get(&rule.characteristic_key) {
            return Some(row);
        }
        let Value::Object(fields) = &record.payload else {
            return None;
        };
        fields
            .iter()
            .filter(|(_, v)| !v.is_null())
            .find(|(raw, _)| self.rules.transform_key(raw) == rule.characteristic_key)
            .map(|(raw, value)| {
                consumed.insert(raw.clone());
                value
            })
    }
}

/// Context for one rule: `value`, `from`/`to` for effect ranges, `level`,
/// rule inputs, and numeric parameters as `param.<name>`.
fn build_context(
    record: &SourceRecord,
    rule: &ConversionRule,
    source: Option<&Value>,
    level: Option<&Value>,
    consumed: &mut BTreeSet<String>,
) -> EvalContext {
    let mut ctx = EvalContext::new();
    match source {
        Some(Value::Object(row)) if row.contains_key("from") => {
            let from = row.get("from").cloned().unwrap_or(Value::Null);
            ctx.insert("from", from.clone());
            ctx.insert("to", row.get("to").cloned().unwrap_or(Value::Null));
            ctx.insert("value", from);
        }
        Some(value) => ctx.insert("value", value.clone()),
        None => {}
    }
    if let Some(level) = level {
        ctx.insert("level", level.clone());
    }
    for (name, path) in &rule.inputs {
        consumed.insert(top_level(path).to_string());
        if let Some(value) = resolve_path(&record.payload, path) {
            ctx.insert(name.clone(), value.clone());
        }
    }
    insert_params(&mut ctx, &rule.parameters);
    ctx
}

fn insert_params(ctx: &mut EvalContext, params: &Map<String, Value>) {
    for (name, value) in params {
        if as_number(value).is_some() {
            ctx.insert(format!("param.{name}"), value.clone());
        }
    }
}

fn check_limits(record: &SourceRecord, settings: &EntitySettings) -> Result<(), ConvertError> {
    for (path, limit) in &settings.limits {
        if let Some(value) = record.field(path) {
            check_bounds(value, limit.min, limit.max).map_err(|source| {
                ConvertError::SourceLimit {
                    path: path.clone(),
                    source,
                }
            })?;
        }
    }
    Ok(())
}

/// A relation field holds one id, a list of ids, or objects with an `id`.
fn relation_ids(raw: &Value) -> Result<Vec<u64>, String> {
    let one = |v: &Value| -> Result<u64, String> {
        let id = match v {
            Value::Object(obj) => obj.get("id").and_then(as_id),
            other => as_id(other),
        };
        id.and_then(|id| u64::try_from(id).ok())
            .ok_or_else(|| format!("'{v}' is not a valid relation id"))
    };
    match raw {
        Value::Array(items) => items.iter().map(one).collect(),
        other => one(other).map(|id| vec![id]),
    }
}
