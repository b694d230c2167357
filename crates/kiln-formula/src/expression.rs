//! Arithmetic and dice expressions over `[placeholder]` tokens.
//!
//! Grammar, after placeholder substitution:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := '-' factor | atom
//! atom   := number | dice | func '(' expr (',' expr)* ')' | '(' expr ')'
//! dice   := [count] 'd' sides
//! func   := min | max | floor | ceil | round
//! ```
//!
//! Placeholders are `[name]` with `name` matching `[A-Za-z_][A-Za-z0-9_.]*`.
//! Anything outside the grammar is rejected.

use serde_json::{Map, Value};

use crate::context::EvalContext;
use crate::error::FormulaError;
use crate::values::number_value;

/// How dice terms resolve to a value. Every mode is deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiceMode {
    /// `count * (sides + 1) / 2`
    #[default]
    Average,
    Min,
    Max,
    /// Return the substituted dice notation as a string.
    Notation,
}

impl DiceMode {
    /// Read the `dice` rule parameter.
    pub fn from_parameters(params: &Map<String, Value>) -> Result<Self, FormulaError> {
        match params.get("dice") {
            None | Some(Value::Null) => Ok(Self::Average),
            Some(Value::String(mode)) => match mode.as_str() {
                "average" => Ok(Self::Average),
                "min" => Ok(Self::Min),
                "max" => Ok(Self::Max),
                "notation" => Ok(Self::Notation),
                other => Err(FormulaError::InvalidInput(format!(
                    "unknown dice mode '{other}'"
                ))),
            },
            Some(other) => Err(FormulaError::InvalidInput(format!(
                "dice mode must be a string, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Dice { count: u32, sides: u32 },
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Min,
    Max,
    Floor,
    Ceil,
    Round,
}

impl Func {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "round" => Some(Self::Round),
            _ => None,
        }
    }

    const fn is_unary(self) -> bool {
        matches!(self, Self::Floor | Self::Ceil | Self::Round)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Dice { count: u32, sides: u32 },
    Neg(Box<Self>),
    Binary {
        op: BinOp,
        lhs: Box<Self>,
        rhs: Box<Self>,
    },
    Call { func: Func, args: Vec<Self> },
}

impl Expr {
    fn has_dice(&self) -> bool {
        match self {
            Self::Num(_) => false,
            Self::Dice { .. } => true,
            Self::Neg(inner) => inner.has_dice(),
            Self::Binary { lhs, rhs, .. } => lhs.has_dice() || rhs.has_dice(),
            Self::Call { args, .. } => args.iter().any(Self::has_dice),
        }
    }

    fn eval(&self, mode: DiceMode) -> Result<f64, String> {
        match self {
            Self::Num(n) => Ok(*n),
            Self::Dice { count, sides } => {
                let (count, sides) = (f64::from(*count), f64::from(*sides));
                Ok(match mode {
                    DiceMode::Min => count,
                    DiceMode::Max => count * sides,
                    DiceMode::Average | DiceMode::Notation => count * (sides + 1.0) / 2.0,
                })
            }
            Self::Neg(inner) => Ok(-inner.eval(mode)?),
            Self::Binary { op, lhs, rhs } => {
                let (l, r) = (lhs.eval(mode)?, rhs.eval(mode)?);
                match op {
                    BinOp::Add => Ok(l + r),
                    BinOp::Sub => Ok(l - r),
                    BinOp::Mul => Ok(l * r),
                    BinOp::Div if r == 0.0 => Err("division by zero".to_string()),
                    BinOp::Div => Ok(l / r),
                }
            }
            Self::Call { func, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(mode))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match func {
                    Func::Min => values.into_iter().fold(f64::INFINITY, f64::min),
                    Func::Max => values.into_iter().fold(f64::NEG_INFINITY, f64::max),
                    Func::Floor => values[0].floor(),
                    Func::Ceil => values[0].ceil(),
                    Func::Round => values[0].round(),
                })
            }
        }
    }
}

/// A parsed, placeholder-free expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse an expression that no longer contains placeholders.
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source).map_err(|reason| malformed(source, reason))?;
        if tokens.is_empty() {
            return Err(malformed(source, "empty expression"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let ast = parser.expr().map_err(|reason| malformed(source, reason))?;
        if let Some(extra) = parser.peek() {
            return Err(malformed(source, format!("unexpected trailing token {extra:?}")));
        }
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn has_dice(&self) -> bool {
        self.ast.has_dice()
    }

    pub fn evaluate_number(&self, mode: DiceMode) -> Result<f64, FormulaError> {
        self.ast
            .eval(mode)
            .map_err(|reason| malformed(&self.source, reason))
    }

    /// Evaluate to JSON: a dice-notation string in [`DiceMode::Notation`]
    /// when dice are present, a number otherwise.
    pub fn evaluate(&self, mode: DiceMode) -> Result<Value, FormulaError> {
        if mode == DiceMode::Notation && self.has_dice() {
            return Ok(Value::String(
                self.source.split_whitespace().collect::<String>(),
            ));
        }
        let number = self.evaluate_number(mode)?;
        number_value(number).ok_or_else(|| malformed(&self.source, "result is not a finite number"))
    }
}

/// Substitute placeholders from `ctx`, parse, and evaluate.
pub fn evaluate_template(
    template: &str,
    ctx: &EvalContext,
    mode: DiceMode,
) -> Result<Value, FormulaError> {
    let substituted = substitute_with(template, |name| match ctx.get(name) {
        None => Err(FormulaError::UnresolvedPlaceholder {
            name: name.to_string(),
        }),
        Some(value) => ctx.number(name).ok_or_else(|| {
            FormulaError::InvalidInput(format!("placeholder [{name}] is not numeric: {value}"))
        }),
    })?;
    Expression::parse(&substituted)?.evaluate(mode)
}

/// Check that a template parses once every placeholder is bound.
pub fn check_template(template: &str) -> Result<(), FormulaError> {
    let substituted = substitute_with(template, |_| Ok(1.0))?;
    Expression::parse(&substituted).map(|_| ())
}

/// Names of the placeholders used by a template, in order of appearance.
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let _ = substitute_with(template, |name| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        Ok(1.0)
    });
    names
}

fn substitute_with(
    template: &str,
    mut resolve: impl FnMut(&str) -> Result<f64, FormulaError>,
) -> Result<String, FormulaError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find(']')
            .ok_or_else(|| malformed(template, "unclosed placeholder"))?;
        let name = after[..end].trim();
        if !is_placeholder_name(name) {
            return Err(malformed(
                template,
                format!("invalid placeholder name '{name}'"),
            ));
        }
        out.push_str(&format_number(resolve(name)?));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    if out.contains(']') {
        return Err(malformed(template, "unmatched ']'"));
    }
    Ok(out)
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

#[allow(clippy::cast_possible_truncation)]
fn format_number(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

fn malformed(expression: &str, reason: impl Into<String>) -> FormulaError {
    FormulaError::MalformedExpression {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let take_digits = |start: usize| -> usize {
        let mut end = start;
        while end < chars.len() && chars[end].is_ascii_digit() {
            end += 1;
        }
        end
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            'd' | 'D' if chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                let end = take_digits(i + 1);
                let sides = parse_die_part(&chars[i + 1..end], "sides")?;
                tokens.push(Token::Dice { count: 1, sides });
                i = end;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
                    end += 1;
                }
                let text: String = chars[i..end].iter().collect();
                let is_dice = matches!(chars.get(end), Some('d' | 'D'))
                    && chars.get(end + 1).is_some_and(char::is_ascii_digit);
                if is_dice {
                    let count = parse_die_part(&chars[i..end], "count")?;
                    let sides_end = take_digits(end + 1);
                    let sides = parse_die_part(&chars[end + 1..sides_end], "sides")?;
                    tokens.push(Token::Dice { count, sides });
                    i = sides_end;
                } else {
                    let n = text
                        .parse::<f64>()
                        .map_err(|_| format!("invalid number '{text}'"))?;
                    tokens.push(Token::Num(n));
                    i = end;
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_')
                {
                    end += 1;
                }
                tokens.push(Token::Ident(chars[i..end].iter().collect()));
                i = end;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn parse_die_part(digits: &[char], part: &str) -> Result<u32, String> {
    let text: String = digits.iter().collect();
    let n = text
        .parse::<u32>()
        .map_err(|_| format!("dice {part} must be a whole number, got '{text}'"))?;
    if n == 0 {
        return Err(format!("dice {part} must be at least 1"));
    }
    Ok(n)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(format!("expected {expected:?}, found {t:?}")),
            None => Err(format!("expected {expected:?}, found end of input")),
        }
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn factor(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.factor()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Dice { count, sides }) => Ok(Expr::Dice { count, sides }),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let func = Func::parse(&name).ok_or_else(|| format!("unknown function '{name}'"))?;
                self.expect(&Token::LParen)?;
                let mut args = vec![self.expr()?];
                while self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    args.push(self.expr()?);
                }
                self.expect(&Token::RParen)?;
                if func.is_unary() && args.len() != 1 {
                    return Err(format!("{name}() takes exactly one argument"));
                }
                Ok(Expr::Call { func, args })
            }
            Some(t) => Err(format!("expected a value, found {t:?}")),
            None => Err("expected a value, found end of input".to_string()),
        }
    }
}
