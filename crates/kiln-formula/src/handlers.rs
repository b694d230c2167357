//! Fixed registry of named conversion handlers.
//!
//! Handlers are plain function pointers registered under stable string keys
//! when the registry is built. Rules naming a key that is not registered are
//! rejected when the rule store loads.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::context::EvalContext;
use crate::error::FormulaError;
use crate::values::{as_number, number_value};

/// Signature shared by every handler: context and rule parameters in, value out.
pub type HandlerFn = fn(&EvalContext, &Map<String, Value>) -> Result<Value, FormulaError>;

#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<&'static str, HandlerFn>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl HandlerRegistry {
    /// Registry with no handlers.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Registry with every built-in handler.
    #[must_use]
    pub fn builtin() -> Self {
        Self::empty()
            .with("identity", identity)
            .with("effect_average", effect_average)
            .with("level_tier", level_tier)
            .with("scale", scale)
            .with("map_value", map_value)
            .with("flag", flag)
            .with("first_of", first_of)
    }

    /// Register an additional handler while building the registry.
    #[must_use]
    pub fn with(mut self, name: &'static str, handler: HandlerFn) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<HandlerFn> {
        self.handlers.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub fn call(
        &self,
        name: &str,
        ctx: &EvalContext,
        params: &Map<String, Value>,
    ) -> Result<Value, FormulaError> {
        let handler = self
            .get(name)
            .ok_or_else(|| FormulaError::UnknownHandler(name.to_string()))?;
        handler(ctx, params)
    }
}

fn required_number(ctx: &EvalContext, name: &str) -> Result<f64, FormulaError> {
    match ctx.get(name) {
        None => Err(FormulaError::UnresolvedPlaceholder {
            name: name.to_string(),
        }),
        Some(value) => as_number(value)
            .ok_or_else(|| FormulaError::InvalidInput(format!("{name} is not numeric: {value}"))),
    }
}

fn param_number(params: &Map<String, Value>, name: &str, default: f64) -> Result<f64, FormulaError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => as_number(value).ok_or_else(|| {
            FormulaError::InvalidInput(format!("parameter {name} is not numeric: {value}"))
        }),
    }
}

fn rounded(x: f64, params: &Map<String, Value>, default: &str) -> Result<Value, FormulaError> {
    let mode = params
        .get("rounding")
        .and_then(Value::as_str)
        .unwrap_or(default);
    let x = match mode {
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "round" => x.round(),
        "none" => x,
        other => {
            return Err(FormulaError::InvalidInput(format!(
                "unknown rounding mode '{other}'"
            )));
        }
    };
    number_value(x).ok_or_else(|| FormulaError::InvalidInput(format!("non-finite result {x}")))
}

/// The source value unchanged.
fn identity(ctx: &EvalContext, _params: &Map<String, Value>) -> Result<Value, FormulaError> {
    ctx.get("value")
        .cloned()
        .ok_or_else(|| FormulaError::UnresolvedPlaceholder {
            name: "value".into(),
        })
}

/// Midpoint of an effect range. `to` of zero or absent means a fixed value.
fn effect_average(ctx: &EvalContext, params: &Map<String, Value>) -> Result<Value, FormulaError> {
    let from = required_number(ctx, "from")?;
    let to = ctx.number("to").filter(|t| *t != 0.0).unwrap_or(from);
    rounded((from + to) / 2.0, params, "floor")
}

/// 1-based tier for a level: levels `1..=step` are tier 1.
fn level_tier(ctx: &EvalContext, params: &Map<String, Value>) -> Result<Value, FormulaError> {
    let level = required_number(ctx, "level")?;
    let step = param_number(params, "step", 20.0)?;
    if step <= 0.0 {
        return Err(FormulaError::InvalidInput("step must be positive".into()));
    }
    if level < 1.0 {
        return Err(FormulaError::InvalidInput(format!(
            "level must be at least 1, got {level}"
        )));
    }
    rounded(((level - 1.0) / step).floor() + 1.0, params, "none")
}

/// `value * factor + offset`.
fn scale(ctx: &EvalContext, params: &Map<String, Value>) -> Result<Value, FormulaError> {
    let value = required_number(ctx, "value")?;
    let factor = param_number(params, "factor", 1.0)?;
    let offset = param_number(params, "offset", 0.0)?;
    rounded(value.mul_add(factor, offset), params, "round")
}

/// Translate the source value through `parameters.map`, falling back to
/// `parameters.default` when present.
fn map_value(ctx: &EvalContext, params: &Map<String, Value>) -> Result<Value, FormulaError> {
    let value = ctx
        .get("value")
        .ok_or_else(|| FormulaError::UnresolvedPlaceholder {
            name: "value".into(),
        })?;
    let table = params
        .get("map")
        .and_then(Value::as_object)
        .ok_or_else(|| FormulaError::InvalidInput("map_value requires a 'map' table".into()))?;
    let key = map_key(value);
    table
        .get(&key)
        .or_else(|| params.get("default"))
        .cloned()
        .ok_or_else(|| FormulaError::InvalidInput(format!("no mapping for '{key}'")))
}

/// Table key for a source value. Whole-number floats key as integers, so
/// `2.0` finds a `"2"` entry.
#[allow(clippy::cast_possible_truncation)]
fn map_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(x) if x.fract() == 0.0 && x.abs() < 9.0e15 => (x as i64).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Truthiness of the source value as a boolean.
fn flag(ctx: &EvalContext, _params: &Map<String, Value>) -> Result<Value, FormulaError> {
    let truthy = match ctx.get("value") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|x| x != 0.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
        }
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Null) => false,
    };
    Ok(Value::Bool(truthy))
}

/// First present context entry among `parameters.keys`.
fn first_of(ctx: &EvalContext, params: &Map<String, Value>) -> Result<Value, FormulaError> {
    let keys = params
        .get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| FormulaError::InvalidInput("first_of requires a 'keys' list".into()))?;
    keys.iter()
        .filter_map(Value::as_str)
        .find_map(|k| ctx.get(k).cloned())
        .ok_or_else(|| FormulaError::InvalidInput("none of the listed inputs is present".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn builtin_registry_lists_handlers() {
        let registry = HandlerRegistry::builtin();
        let names: Vec<&str> = registry.names().collect();
        assert!(names.contains(&"identity"));
        assert!(names.contains(&"effect_average"));
        assert!(!registry.contains("eval"));
    }

    #[test]
    fn unknown_handler_call_is_an_error() {
        let err = HandlerRegistry::builtin()
            .call("nope", &EvalContext::new(), &Map::new())
            .unwrap_err();
        assert_eq!(err, FormulaError::UnknownHandler("nope".into()));
    }

    #[test]
    fn custom_handlers_can_be_registered() {
        fn always_seven(_: &EvalContext, _: &Map<String, Value>) -> Result<Value, FormulaError> {
            Ok(json!(7))
        }
        let registry = HandlerRegistry::empty().with("seven", always_seven);
        assert_eq!(
            registry.call("seven", &EvalContext::new(), &Map::new()).unwrap(),
            json!(7)
        );
    }

    #[test]
    fn effect_average_handles_fixed_and_ranges() {
        let ctx = EvalContext::new().with("from", 5).with("to", 10);
        assert_eq!(effect_average(&ctx, &Map::new()).unwrap(), json!(7));
        let ctx = EvalContext::new().with("from", 5).with("to", 0);
        assert_eq!(effect_average(&ctx, &Map::new()).unwrap(), json!(5));
        let ctx = EvalContext::new().with("from", 5).with("to", 10);
        assert_eq!(
            effect_average(&ctx, &params(json!({ "rounding": "none" }))).unwrap(),
            json!(7.5)
        );
    }

    #[test]
    fn level_tier_steps() {
        for (level, tier) in [(1, 1), (20, 1), (21, 2), (200, 10)] {
            let ctx = EvalContext::new().with("level", level);
            assert_eq!(level_tier(&ctx, &Map::new()).unwrap(), json!(tier));
        }
        let ctx = EvalContext::new().with("level", 0);
        assert!(level_tier(&ctx, &Map::new()).is_err());
    }

    #[test]
    fn scale_applies_factor_and_offset() {
        let ctx = EvalContext::new().with("value", 10);
        let p = params(json!({ "factor": 1.5, "offset": 2 }));
        assert_eq!(scale(&ctx, &p).unwrap(), json!(17));
    }

    #[test]
    fn map_value_keys_whole_floats_as_integers() {
        let p = params(json!({ "map": { "2": "standard", "2.5": "odd" } }));
        for (input, expected) in [
            (json!(2), "standard"),
            (json!(2.0), "standard"),
            (json!("2"), "standard"),
            (json!(2.5), "odd"),
        ] {
            let ctx = EvalContext::new().with("value", input.clone());
            assert_eq!(map_value(&ctx, &p).unwrap(), json!(expected), "{input}");
        }
    }

    #[test]
    fn map_value_uses_default() {
        let p = params(json!({ "map": { "1": "earth", "2": "fire" }, "default": "neutral" }));
        let ctx = EvalContext::new().with("value", 2);
        assert_eq!(map_value(&ctx, &p).unwrap(), json!("fire"));
        let ctx = EvalContext::new().with("value", 9);
        assert_eq!(map_value(&ctx, &p).unwrap(), json!("neutral"));
    }

    #[test]
    fn flag_truthiness() {
        for (input, expected) in [
            (json!(true), true),
            (json!(0), false),
            (json!("false"), false),
            (json!("yes"), true),
            (json!([]), false),
        ] {
            let ctx = EvalContext::new().with("value", input.clone());
            assert_eq!(flag(&ctx, &Map::new()).unwrap(), json!(expected), "{input}");
        }
    }

    #[test]
    fn first_of_picks_first_present() {
        let ctx = EvalContext::new().with("alt", 4);
        let p = params(json!({ "keys": ["value", "alt"] }));
        assert_eq!(first_of(&ctx, &p).unwrap(), json!(4));
    }
}
