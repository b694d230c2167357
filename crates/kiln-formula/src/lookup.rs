//! Ordered bracket tables keyed by a context value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::EvalContext;
use crate::error::FormulaError;

/// One inclusive `[low, high] -> value` bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub low: f64,
    pub high: f64,
    pub value: Value,
}

impl Bracket {
    #[must_use]
    pub fn contains(&self, x: f64) -> bool {
        self.low <= x && x <= self.high
    }
}

/// Context key a table is indexed by; `parameters.key`, default `level`.
#[must_use]
pub fn lookup_key(params: &Map<String, Value>) -> &str {
    params.get("key").and_then(Value::as_str).unwrap_or("level")
}

/// First bracket containing the keyed context value wins.
///
/// A value outside every bracket is an error, never a default.
pub fn evaluate_table(
    table: &[Bracket],
    ctx: &EvalContext,
    params: &Map<String, Value>,
) -> Result<Value, FormulaError> {
    let key = lookup_key(params);
    let x = ctx
        .number(key)
        .ok_or_else(|| FormulaError::UnresolvedPlaceholder {
            name: key.to_string(),
        })?;
    table
        .iter()
        .find(|b| b.contains(x))
        .map(|b| b.value.clone())
        .ok_or_else(|| FormulaError::NoMatchingBracket {
            key: key.to_string(),
            value: x,
        })
}

/// Structural check run at rule load.
pub fn validate_table(table: &[Bracket]) -> Result<(), String> {
    if table.is_empty() {
        return Err("table has no brackets".to_string());
    }
    for (i, bracket) in table.iter().enumerate() {
        if bracket.low > bracket.high {
            return Err(format!(
                "bracket {i} has low {} greater than high {}",
                bracket.low, bracket.high
            ));
        }
    }
    Ok(())
}
