//! Rule store: declarative conversion rules plus auxiliary conversion config.
//!
//! Both are authored out of band in one TOML file and are read-only while a
//! pipeline runs. Loading validates everything that can be checked without
//! a source record, so configuration mistakes surface at startup.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use kiln_core::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RuleError;
use crate::expression::{DiceMode, check_template};
use crate::handlers::HandlerRegistry;
use crate::lookup::{Bracket, validate_table};

/// How a rule computes its value. Exactly one formula body per rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "formula_type", rename_all = "snake_case")]
pub enum Formula {
    Expression { expression_template: String },
    LookupTable { lookup_table: Vec<Bracket> },
    NamedHandler { handler_name: String },
}

impl Formula {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Expression { .. } => "expression",
            Self::LookupTable { .. } => "lookup_table",
            Self::NamedHandler { .. } => "named_handler",
        }
    }
}

/// Mapping from raw input to one characteristic, keyed by
/// `(entity_type, characteristic_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRule {
    pub entity_type: EntityType,
    pub characteristic_key: String,
    /// Raw field path. Defaults to the characteristic key, resolved through
    /// the effect-id maps and key transforms.
    #[serde(default)]
    pub source: Option<String>,
    /// Extra named inputs: context name -> raw field path.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(flatten)]
    pub formula: Formula,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Human-readable rendering; never evaluated.
    #[serde(default)]
    pub display_template: Option<String>,
    /// Optional rules record errors per field instead of aborting conversion.
    #[serde(default)]
    pub optional: bool,
}

impl ConversionRule {
    #[must_use]
    pub fn min(&self) -> Option<f64> {
        self.parameters.get("min").and_then(crate::values::as_number)
    }

    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.parameters.get("max").and_then(crate::values::as_number)
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        !self.optional
    }
}

/// Inclusive numeric limits for a raw source value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Limit {
    #[must_use]
    pub fn contains(&self, x: f64) -> bool {
        self.min.is_none_or(|min| x >= min) && self.max.is_none_or(|max| x <= max)
    }
}

/// Raw field holding one id or a list of ids that reference another entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    pub field: String,
    pub target: EntityType,
    pub kind: String,
    /// Reject links that would close a cycle through this relation kind.
    #[serde(default)]
    pub acyclic: bool,
}

fn default_name_field() -> String {
    "name".to_string()
}

fn default_effects_field() -> String {
    "effects".to_string()
}

fn default_ignore() -> Vec<String> {
    vec!["id".to_string(), "_id".to_string()]
}

/// Per-entity-type conversion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySettings {
    #[serde(default = "default_name_field")]
    pub name_field: String,
    /// Exposed to formulas as `[level]`.
    #[serde(default)]
    pub level_field: Option<String>,
    /// Raw field holding the category id used for triage.
    #[serde(default)]
    pub category_field: Option<String>,
    #[serde(default)]
    pub known_categories: Vec<i64>,
    /// Raw fields copied verbatim into characteristics.
    #[serde(default)]
    pub passthrough: Vec<String>,
    /// Source-value limits keyed by raw field path.
    #[serde(default)]
    pub limits: BTreeMap<String, Limit>,
    #[serde(default)]
    pub relations: Vec<RelationSpec>,
    /// Array of `{characteristic, from, to}` effect rows.
    #[serde(default = "default_effects_field")]
    pub effects_field: String,
    /// Raw fields that are neither converted nor surfaced as unclassified.
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

impl Default for EntitySettings {
    fn default() -> Self {
        Self {
            name_field: default_name_field(),
            level_field: None,
            category_field: None,
            known_categories: Vec::new(),
            passthrough: Vec::new(),
            limits: BTreeMap::new(),
            relations: Vec::new(),
            effects_field: default_effects_field(),
            ignore: default_ignore(),
        }
    }
}

fn default_locales() -> Vec<String> {
    vec!["fr".to_string(), "en".to_string()]
}

/// Auxiliary keyed blobs consulted by the converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Locale priority for multilingual fields. No other locale is ever picked.
    #[serde(default = "default_locales")]
    pub locales: Vec<String>,
    #[serde(default)]
    pub entities: BTreeMap<EntityType, EntitySettings>,
    /// Raw key -> characteristic key.
    #[serde(default)]
    pub key_transforms: BTreeMap<String, String>,
    /// Effect characteristic id -> characteristic key.
    #[serde(default)]
    pub characteristic_ids: BTreeMap<String, String>,
    /// Effect characteristic id -> resistance key.
    #[serde(default)]
    pub resistance_ids: BTreeMap<String, String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            locales: default_locales(),
            entities: BTreeMap::new(),
            key_transforms: BTreeMap::new(),
            characteristic_ids: BTreeMap::new(),
            resistance_ids: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    config: ConversionConfig,
    #[serde(default)]
    rules: Vec<ConversionRule>,
}

/// Validated, read-only rules and conversion config.
#[derive(Debug, Clone)]
pub struct RuleStore {
    rules: Vec<ConversionRule>,
    config: ConversionConfig,
    default_settings: EntitySettings,
    characteristic_ids: HashMap<i64, String>,
    resistance_ids: HashMap<i64, String>,
}

impl RuleStore {
    /// Read and validate a rule file.
    pub fn load(path: &Path, registry: &HandlerRegistry) -> Result<Self, RuleError> {
        let text = std::fs::read_to_string(path)?;
        let store = Self::from_toml_str(&text, registry)?;
        tracing::debug!(path = %path.display(), rules = store.len(), "loaded rule store");
        Ok(store)
    }

    pub fn from_toml_str(text: &str, registry: &HandlerRegistry) -> Result<Self, RuleError> {
        let file: RuleFile = toml::from_str(text)?;
        Self::new(file.rules, file.config, registry)
    }

    /// Validate rules against the handler registry and build lookup maps.
    pub fn new(
        rules: Vec<ConversionRule>,
        config: ConversionConfig,
        registry: &HandlerRegistry,
    ) -> Result<Self, RuleError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            validate_rule(rule, registry)?;
            if !seen.insert((rule.entity_type, rule.characteristic_key.as_str())) {
                return Err(RuleError::DuplicateRule {
                    entity_type: rule.entity_type,
                    key: rule.characteristic_key.clone(),
                });
            }
        }

        if config.locales.is_empty() {
            return Err(RuleError::InvalidConfig(
                "locales must list at least one locale".into(),
            ));
        }

        let characteristic_ids = parse_id_map("characteristic_ids", &config.characteristic_ids)?;
        let resistance_ids = parse_id_map("resistance_ids", &config.resistance_ids)?;

        Ok(Self {
            rules,
            config,
            default_settings: EntitySettings::default(),
            characteristic_ids,
            resistance_ids,
        })
    }

    /// Empty store: no rules, default config.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            config: ConversionConfig::default(),
            default_settings: EntitySettings::default(),
            characteristic_ids: HashMap::new(),
            resistance_ids: HashMap::new(),
        }
    }

    pub fn rules_for(&self, entity_type: EntityType) -> impl Iterator<Item = &ConversionRule> {
        self.rules
            .iter()
            .filter(move |r| r.entity_type == entity_type)
    }

    #[must_use]
    pub fn rule(&self, entity_type: EntityType, key: &str) -> Option<&ConversionRule> {
        self.rules_for(entity_type)
            .find(|r| r.characteristic_key == key)
    }

    #[must_use]
    pub const fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Settings for an entity type, or defaults when the file has none.
    #[must_use]
    pub fn settings(&self, entity_type: EntityType) -> &EntitySettings {
        self.config
            .entities
            .get(&entity_type)
            .unwrap_or(&self.default_settings)
    }

    /// Characteristic key for an effect id, checking characteristic ids
    /// before resistance ids.
    #[must_use]
    pub fn key_for_effect_id(&self, id: i64) -> Option<&str> {
        self.characteristic_ids
            .get(&id)
            .or_else(|| self.resistance_ids.get(&id))
            .map(String::as_str)
    }

    /// Apply configured key transforms to a raw key.
    #[must_use]
    pub fn transform_key<'a>(&'a self, raw: &'a str) -> &'a str {
        self.config
            .key_transforms
            .get(raw)
            .map_or(raw, String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule count per entity type.
    #[must_use]
    pub fn counts_by_type(&self) -> BTreeMap<EntityType, usize> {
        let mut counts = BTreeMap::new();
        for rule in &self.rules {
            *counts.entry(rule.entity_type).or_insert(0) += 1;
        }
        counts
    }
}

fn validate_rule(rule: &ConversionRule, registry: &HandlerRegistry) -> Result<(), RuleError> {
    let invalid_param = |reason: String| RuleError::InvalidParameter {
        entity_type: rule.entity_type,
        key: rule.characteristic_key.clone(),
        reason,
    };

    match &rule.formula {
        Formula::Expression {
            expression_template,
        } => {
            check_template(expression_template).map_err(|source| RuleError::InvalidExpression {
                entity_type: rule.entity_type,
                key: rule.characteristic_key.clone(),
                source,
            })?;
            DiceMode::from_parameters(&rule.parameters).map_err(|e| invalid_param(e.to_string()))?;
        }
        Formula::LookupTable { lookup_table } => {
            validate_table(lookup_table).map_err(|reason| RuleError::InvalidLookupTable {
                entity_type: rule.entity_type,
                key: rule.characteristic_key.clone(),
                reason,
            })?;
        }
        Formula::NamedHandler { handler_name } => {
            if !registry.contains(handler_name) {
                return Err(RuleError::UnknownHandler {
                    entity_type: rule.entity_type,
                    key: rule.characteristic_key.clone(),
                    handler: handler_name.clone(),
                });
            }
        }
    }

    for bound in ["min", "max"] {
        if let Some(value) = rule.parameters.get(bound) {
            if crate::values::as_number(value).is_none() {
                return Err(invalid_param(format!("{bound} must be numeric, got {value}")));
            }
        }
    }
    if let (Some(min), Some(max)) = (rule.min(), rule.max()) {
        if min > max {
            return Err(invalid_param(format!("min {min} is greater than max {max}")));
        }
    }
    Ok(())
}

fn parse_id_map(
    name: &str,
    raw: &BTreeMap<String, String>,
) -> Result<HashMap<i64, String>, RuleError> {
    raw.iter()
        .map(|(id, key)| {
            id.trim()
                .parse::<i64>()
                .map(|id| (id, key.clone()))
                .map_err(|_| RuleError::InvalidConfig(format!("{name}: '{id}' is not an integer id")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RULES: &str = r#"
[config]
locales = ["en", "fr"]

[config.entities.monster]
level_field = "grades.0.level"
category_field = "race"
known_categories = [1, 2]
passthrough = ["img"]
limits = { "grades.0.level" = { min = 1, max = 200 } }

[[config.entities.monster.relations]]
field = "spells"
target = "spell"
kind = "casts"

[config.key_transforms]
isBoss = "boss"

[config.characteristic_ids]
"10" = "strength"

[config.resistance_ids]
"33" = "earth_resistance"

[[rules]]
entity_type = "monster"
characteristic_key = "life"
source = "grades.0.lifePoints"
formula_type = "expression"
expression_template = "[value] * 2 + [level]"
parameters = { min = 1, max = 100000 }
display_template = "{life} HP"

[[rules]]
entity_type = "monster"
characteristic_key = "tier"
formula_type = "lookup_table"
lookup_table = [
    { low = 1, high = 50, value = 10 },
    { low = 51, high = 100, value = 25 },
]
optional = true

[[rules]]
entity_type = "item"
characteristic_key = "strength"
formula_type = "named_handler"
handler_name = "effect_average"
"#;

    #[test]
    fn loads_rules_and_config() {
        let store = RuleStore::from_toml_str(RULES, &HandlerRegistry::builtin()).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.rules_for(EntityType::Monster).count(), 2);

        let life = store.rule(EntityType::Monster, "life").unwrap();
        assert_eq!(life.source.as_deref(), Some("grades.0.lifePoints"));
        assert_eq!(life.min(), Some(1.0));
        assert_eq!(life.max(), Some(100_000.0));
        assert!(life.is_required());
        assert_eq!(life.formula.type_name(), "expression");

        let tier = store.rule(EntityType::Monster, "tier").unwrap();
        assert!(tier.optional);
        assert!(matches!(&tier.formula, Formula::LookupTable { lookup_table } if lookup_table.len() == 2));

        let settings = store.settings(EntityType::Monster);
        assert_eq!(settings.category_field.as_deref(), Some("race"));
        assert_eq!(settings.relations[0].target, EntityType::Spell);
        assert!(settings.limits["grades.0.level"].contains(200.0));
        assert!(!settings.limits["grades.0.level"].contains(201.0));

        assert_eq!(store.key_for_effect_id(10), Some("strength"));
        assert_eq!(store.key_for_effect_id(33), Some("earth_resistance"));
        assert_eq!(store.key_for_effect_id(99), None);
        assert_eq!(store.transform_key("isBoss"), "boss");
        assert_eq!(store.transform_key("img"), "img");
        assert_eq!(store.config().locales, vec!["en", "fr"]);
    }

    #[test]
    fn missing_entity_settings_fall_back_to_defaults() {
        let store = RuleStore::from_toml_str(RULES, &HandlerRegistry::builtin()).unwrap();
        let settings = store.settings(EntityType::Panoply);
        assert_eq!(settings.name_field, "name");
        assert_eq!(settings.effects_field, "effects");
        assert!(settings.category_field.is_none());
    }

    #[test]
    fn unknown_handler_is_rejected_at_load() {
        let text = r#"
[[rules]]
entity_type = "item"
characteristic_key = "power"
formula_type = "named_handler"
handler_name = "run_script"
"#;
        let err = RuleStore::from_toml_str(text, &HandlerRegistry::builtin()).unwrap_err();
        assert!(matches!(err, RuleError::UnknownHandler { ref handler, .. } if handler == "run_script"));
    }

    #[test]
    fn duplicate_rule_keys_are_rejected() {
        let text = r#"
[[rules]]
entity_type = "item"
characteristic_key = "power"
formula_type = "expression"
expression_template = "1"

[[rules]]
entity_type = "item"
characteristic_key = "power"
formula_type = "expression"
expression_template = "2"
"#;
        let err = RuleStore::from_toml_str(text, &HandlerRegistry::builtin()).unwrap_err();
        assert!(matches!(err, RuleError::DuplicateRule { .. }));
    }

    #[test]
    fn malformed_template_is_rejected_at_load() {
        let text = r#"
[[rules]]
entity_type = "spell"
characteristic_key = "damage"
formula_type = "expression"
expression_template = "[level] +"
"#;
        let err = RuleStore::from_toml_str(text, &HandlerRegistry::builtin()).unwrap_err();
        assert!(matches!(err, RuleError::InvalidExpression { .. }));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let text = r#"
[[rules]]
entity_type = "spell"
characteristic_key = "range"
formula_type = "expression"
expression_template = "[value]"
parameters = { min = 10, max = 1 }
"#;
        let err = RuleStore::from_toml_str(text, &HandlerRegistry::builtin()).unwrap_err();
        assert!(matches!(err, RuleError::InvalidParameter { .. }));
    }

    #[test]
    fn non_integer_effect_ids_are_rejected() {
        let text = r#"
[config.characteristic_ids]
"ten" = "strength"
"#;
        let err = RuleStore::from_toml_str(text, &HandlerRegistry::builtin()).unwrap_err();
        assert!(matches!(err, RuleError::InvalidConfig(_)));
    }

    #[test]
    fn counts_by_type_groups_rules() {
        let store = RuleStore::from_toml_str(RULES, &HandlerRegistry::builtin()).unwrap();
        let counts = store.counts_by_type();
        assert_eq!(counts.get(&EntityType::Monster), Some(&2));
        assert_eq!(counts.get(&EntityType::Item), Some(&1));
    }
}
