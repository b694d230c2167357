//! Named input values for one rule evaluation.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::values::as_number;

/// Inputs visible to a formula: `value`, `level`, `from`, `to`, rule
/// inputs, and `param.<name>` entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalContext {
    values: BTreeMap<String, Value>,
}

impl EvalContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(as_number)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
