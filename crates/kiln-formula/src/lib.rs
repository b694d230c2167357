//! # kiln-formula
//!
//! Declarative conversion rules and the evaluator that turns one rule plus
//! an input context into one characteristic value.
//!
//! Three formula kinds are supported:
//! - `expression`: arithmetic and dice over `[placeholder]` tokens
//! - `lookup_table`: ordered `{low, high, value}` brackets keyed by a context value
//! - `named_handler`: a pure function from the startup-built [`HandlerRegistry`]
//!
//! Every result is checked against optional `min`/`max` rule parameters.
//! Out-of-range values are rejected, never clamped.

pub mod context;
pub mod error;
pub mod evaluate;
pub mod expression;
pub mod handlers;
pub mod lookup;
pub mod rules;
mod values;

pub use context::EvalContext;
pub use error::{EvaluationError, FormulaError, RuleError, ValidationError};
pub use evaluate::Evaluator;
pub use expression::{DiceMode, Expression};
pub use handlers::{HandlerFn, HandlerRegistry};
pub use lookup::Bracket;
pub use rules::{
    ConversionConfig, ConversionRule, EntitySettings, Formula, Limit, RelationSpec, RuleStore,
};
pub use values::{as_number, number_value};
