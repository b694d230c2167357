//! Rule evaluation: formula dispatch plus bounds validation.

use serde_json::Value;

use crate::context::EvalContext;
use crate::error::{EvaluationError, ValidationError};
use crate::expression::{DiceMode, evaluate_template};
use crate::handlers::HandlerRegistry;
use crate::lookup::evaluate_table;
use crate::rules::{ConversionRule, Formula};
use crate::values::as_number;

/// Pure evaluator over a fixed handler registry.
///
/// Evaluation has no side effects and never consults anything beyond the
/// rule and the context it is given.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    registry: HandlerRegistry,
}

impl Evaluator {
    #[must_use]
    pub const fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub const fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Evaluate one rule against one context.
    ///
    /// # Errors
    ///
    /// [`EvaluationError::Formula`] when a placeholder is missing, the
    /// expression is malformed, no bracket matches, or the handler fails.
    /// [`EvaluationError::Validation`] when the result violates `min`/`max`.
    pub fn evaluate(
        &self,
        rule: &ConversionRule,
        ctx: &EvalContext,
    ) -> Result<Value, EvaluationError> {
        let value = match &rule.formula {
            Formula::Expression {
                expression_template,
            } => {
                let mode = DiceMode::from_parameters(&rule.parameters)?;
                evaluate_template(expression_template, ctx, mode)?
            }
            Formula::LookupTable { lookup_table } => {
                evaluate_table(lookup_table, ctx, &rule.parameters)?
            }
            Formula::NamedHandler { handler_name } => {
                self.registry.call(handler_name, ctx, &rule.parameters)?
            }
        };
        check_bounds(&value, rule.min(), rule.max())?;
        Ok(value)
    }
}

/// Reject, never clamp, values outside `[min, max]`.
pub fn check_bounds(
    value: &Value,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(), ValidationError> {
    if min.is_none() && max.is_none() {
        return Ok(());
    }
    let x = as_number(value).ok_or_else(|| ValidationError::NotNumeric(value.to_string()))?;
    let below = min.is_some_and(|m| x < m);
    let above = max.is_some_and(|m| x > m);
    if below || above {
        return Err(ValidationError::OutOfRange { value: x, min, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormulaError;
    use crate::lookup::Bracket;
    use kiln_core::EntityType;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};

    fn rule(formula: Formula, parameters: Value) -> ConversionRule {
        ConversionRule {
            entity_type: EntityType::Spell,
            characteristic_key: "damage".into(),
            source: None,
            inputs: std::collections::BTreeMap::new(),
            formula,
            parameters: parameters.as_object().cloned().unwrap_or_else(Map::new),
            display_template: None,
            optional: false,
        }
    }

    fn expression(template: &str, parameters: Value) -> ConversionRule {
        rule(
            Formula::Expression {
                expression_template: template.into(),
            },
            parameters,
        )
    }

    #[test]
    fn expression_with_level() {
        let r = expression("[level] * 2 + 10", json!({}));
        let ctx = EvalContext::new().with("level", 50);
        assert_eq!(Evaluator::default().evaluate(&r, &ctx).unwrap(), json!(110));
    }

    #[test]
    fn missing_placeholder_is_a_formula_error() {
        let r = expression("[level] * 2", json!({}));
        let err = Evaluator::default()
            .evaluate(&r, &EvalContext::new())
            .unwrap_err();
        assert_eq!(
            err,
            EvaluationError::Formula(FormulaError::UnresolvedPlaceholder {
                name: "level".into()
            })
        );
        assert_eq!(err.kind(), kiln_core::ErrorKind::FormulaEvaluation);
    }

    #[test]
    fn out_of_range_is_rejected_not_clamped() {
        let r = expression("[value]", json!({ "min": 0, "max": 100 }));
        let ctx = EvalContext::new().with("value", 150);
        let err = Evaluator::default().evaluate(&r, &ctx).unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::Validation(ValidationError::OutOfRange { value, .. }) if (value - 150.0).abs() < f64::EPSILON
        ));
        assert_eq!(err.kind(), kiln_core::ErrorKind::Validation);
    }

    #[test]
    fn bounds_are_inclusive() {
        let r = expression("[value]", json!({ "min": 0, "max": 100 }));
        let ctx = EvalContext::new().with("value", 100);
        assert_eq!(Evaluator::default().evaluate(&r, &ctx).unwrap(), json!(100));
    }

    #[test]
    fn dice_notation_mode_returns_string() {
        let r = expression("[count]d6 + 2", json!({ "dice": "notation" }));
        let ctx = EvalContext::new().with("count", 2);
        assert_eq!(
            Evaluator::default().evaluate(&r, &ctx).unwrap(),
            json!("2d6+2")
        );
    }

    #[test]
    fn lookup_table_dispatch() {
        let r = rule(
            Formula::LookupTable {
                lookup_table: vec![
                    Bracket {
                        low: 1.0,
                        high: 50.0,
                        value: json!(10),
                    },
                    Bracket {
                        low: 51.0,
                        high: 100.0,
                        value: json!(25),
                    },
                ],
            },
            json!({}),
        );
        let ctx = EvalContext::new().with("level", 60);
        assert_eq!(Evaluator::default().evaluate(&r, &ctx).unwrap(), json!(25));
    }

    #[test]
    fn named_handler_dispatch() {
        let r = rule(
            Formula::NamedHandler {
                handler_name: "effect_average".into(),
            },
            json!({}),
        );
        let ctx = EvalContext::new().with("from", 4).with("to", 8);
        assert_eq!(Evaluator::default().evaluate(&r, &ctx).unwrap(), json!(6));
    }

    #[test]
    fn non_numeric_result_with_bounds_is_rejected() {
        assert_eq!(
            check_bounds(&json!("fire"), Some(0.0), None),
            Err(ValidationError::NotNumeric("\"fire\"".into()))
        );
        assert_eq!(check_bounds(&json!("fire"), None, None), Ok(()));
    }
}
