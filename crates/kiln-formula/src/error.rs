//! Formula, validation, and rule-loading error types.

use kiln_core::{EntityType, ErrorKind};
use thiserror::Error;

/// A rule could not produce a value for the given context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("unresolved placeholder [{name}]")]
    UnresolvedPlaceholder { name: String },

    #[error("malformed expression '{expression}': {reason}")]
    MalformedExpression { expression: String, reason: String },

    #[error("no lookup bracket matches {key} = {value}")]
    NoMatchingBracket { key: String, value: f64 },

    #[error("unknown handler '{0}'")]
    UnknownHandler(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A computed value violates the rule's declared bounds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{value} is outside the allowed range [{}, {}]", fmt_bound(.min), fmt_bound(.max))]
    OutOfRange {
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("bounded value is not numeric: {0}")]
    NotNumeric(String),
}

#[allow(clippy::ref_option)]
fn fmt_bound(bound: &Option<f64>) -> String {
    bound.map_or_else(|| "-".to_string(), |b| b.to_string())
}

/// Result error of [`crate::Evaluator::evaluate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl EvaluationError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Formula(_) => ErrorKind::FormulaEvaluation,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// The rule store file is unreadable or inconsistent.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to read rule file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse rule file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("rule {entity_type}.{key} references unknown handler '{handler}'")]
    UnknownHandler {
        entity_type: EntityType,
        key: String,
        handler: String,
    },

    #[error("duplicate rule for {entity_type}.{key}")]
    DuplicateRule { entity_type: EntityType, key: String },

    #[error("rule {entity_type}.{key} has an invalid lookup table: {reason}")]
    InvalidLookupTable {
        entity_type: EntityType,
        key: String,
        reason: String,
    },

    #[error("rule {entity_type}.{key} has an invalid expression: {source}")]
    InvalidExpression {
        entity_type: EntityType,
        key: String,
        source: FormulaError,
    },

    #[error("rule {entity_type}.{key} has an invalid parameter: {reason}")]
    InvalidParameter {
        entity_type: EntityType,
        key: String,
        reason: String,
    },

    #[error("invalid conversion config: {0}")]
    InvalidConfig(String),
}

impl RuleError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}
