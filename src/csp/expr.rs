//! Constraint expression language.
//!
//! A small typed expression language shared by constraints, schedule
//! constraints and linear programs:
//!
//! ```text
//! x + 2 * y <= 10 && color != "red"
//! abs(a - b) >= 2 -> flag
//! all_different(a, b, c)
//! level in {1, 2, 3}
//! ```
//!
//! Bare identifiers (which may contain `.`, as in `start.design`) are
//! variables; symbol constants are quoted. Expressions parse from and
//! serialize to their text form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

use super::Value;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
    Implies,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Min,
    Max,
    AllDifferent,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Self::Abs),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "all_different" | "alldiff" => Some(Self::AllDifferent),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::AllDifferent => "all_different",
        }
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Expr {
    Const(Value),
    Var(String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Logic(LogicOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Vec<Value>),
    Call(Func, Vec<Expr>),
}

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A variable has no value in the environment.
    Unbound(String),
    /// Operands of the wrong type, overflow, or division by zero.
    Type(String),
}

/// Variable lookup for evaluation.
pub trait Env {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Env for indexmap::IndexMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Env for std::collections::BTreeMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Env for std::collections::HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// Distinct variable names in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Const(_) => {}
            Self::Var(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Self::Neg(e) | Self::Not(e) | Self::In(e, _) => e.collect_vars(out),
            Self::Arith(_, l, r) | Self::Compare(_, l, r) | Self::Logic(_, l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
            Self::Call(_, args) => args.iter().for_each(|a| a.collect_vars(out)),
        }
    }

    pub fn eval(&self, env: &dyn Env) -> Result<Value, EvalError> {
        match self {
            Self::Const(v) => Ok(v.clone()),
            Self::Var(name) => env
                .lookup(name)
                .cloned()
                .ok_or_else(|| EvalError::Unbound(name.clone())),
            Self::Neg(e) => match e.eval(env)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError::Type("integer overflow".into())),
                Value::Num(n) => Ok(Value::Num(-n)),
                other => Err(EvalError::Type(format!("cannot negate {other}"))),
            },
            Self::Not(e) => Ok(Value::Bool(!e.eval(env)?.as_bool()?)),
            Self::Arith(op, l, r) => arith(*op, &l.eval(env)?, &r.eval(env)?),
            Self::Compare(op, l, r) => compare(*op, &l.eval(env)?, &r.eval(env)?).map(Value::Bool),
            Self::Logic(op, l, r) => {
                let lhs = l.eval(env)?.as_bool()?;
                let short = match op {
                    LogicOp::And if !lhs => Some(false),
                    LogicOp::Or if lhs => Some(true),
                    LogicOp::Implies if !lhs => Some(true),
                    _ => None,
                };
                match short {
                    Some(b) => Ok(Value::Bool(b)),
                    None => Ok(Value::Bool(r.eval(env)?.as_bool()?)),
                }
            }
            Self::In(e, set) => {
                let v = e.eval(env)?;
                Ok(Value::Bool(set.iter().any(|s| v.loosely_eq(s))))
            }
            Self::Call(func, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(env))
                    .collect::<Result<Vec<_>, _>>()?;
                call(*func, &values)
            }
        }
    }

    /// Evaluate as a predicate. `None` when a variable is unbound; type
    /// errors count as a violation.
    pub fn holds(&self, env: &dyn Env) -> Option<bool> {
        match self.eval(env) {
            Ok(v) => Some(v.as_bool().unwrap_or(false)),
            Err(EvalError::Unbound(_)) => None,
            Err(EvalError::Type(message)) => {
                tracing::debug!(expr = %self, %message, "constraint evaluation failed");
                Some(false)
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Logic(LogicOp::Implies, ..) => 1,
            Self::Logic(LogicOp::Or, ..) => 2,
            Self::Logic(LogicOp::And, ..) => 3,
            Self::Not(_) => 4,
            Self::Compare(..) | Self::In(..) => 5,
            Self::Arith(ArithOp::Add | ArithOp::Sub, ..) => 6,
            Self::Arith(ArithOp::Mul | ArithOp::Div, ..) => 7,
            Self::Neg(_) => 8,
            Self::Const(_) | Self::Var(_) | Self::Call(..) => 9,
        }
    }
}

fn arith(op: ArithOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let overflow = || EvalError::Type("integer overflow".into());
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        return match op {
            ArithOp::Add => a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
            ArithOp::Sub => a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
            ArithOp::Mul => a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
            ArithOp::Div if *b == 0 => Err(EvalError::Type("division by zero".into())),
            ArithOp::Div if a % b == 0 => Ok(Value::Int(a / b)),
            ArithOp::Div => Ok(Value::Num(*a as f64 / *b as f64)),
        };
    }
    let (a, b) = (l.as_f64()?, r.as_f64()?);
    let out = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div if b == 0.0 => return Err(EvalError::Type("division by zero".into())),
        ArithOp::Div => a / b,
    };
    Ok(Value::Num(out))
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, EvalError> {
    match op {
        CmpOp::Eq => return Ok(l.loosely_eq(r)),
        CmpOp::Ne => return Ok(!l.loosely_eq(r)),
        _ => {}
    }
    let ordering = l
        .partial_cmp_value(r)
        .ok_or_else(|| EvalError::Type(format!("cannot order {l} and {r}")))?;
    Ok(match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
        CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
    })
}

fn call(func: Func, args: &[Value]) -> Result<Value, EvalError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(EvalError::Type(format!(
                "{} takes {n} argument(s), got {}",
                func.name(),
                args.len()
            )))
        }
    };
    match func {
        Func::Abs => {
            arity(1)?;
            match &args[0] {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError::Type("integer overflow".into())),
                other => Ok(Value::Num(other.as_f64()?.abs())),
            }
        }
        Func::Min | Func::Max => {
            let mut best: Option<&Value> = None;
            for v in args {
                let better = match best {
                    None => true,
                    Some(b) => {
                        let ord = v
                            .partial_cmp_value(b)
                            .ok_or_else(|| EvalError::Type(format!("cannot order {v} and {b}")))?;
                        if func == Func::Min { ord.is_lt() } else { ord.is_gt() }
                    }
                };
                if better {
                    best = Some(v);
                }
            }
            best.cloned()
                .ok_or_else(|| EvalError::Type(format!("{} needs arguments", func.name())))
        }
        Func::AllDifferent => {
            for (i, a) in args.iter().enumerate() {
                if args[i + 1..].iter().any(|b| a.loosely_eq(b)) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        })
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

impl fmt::Display for LogicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Implies => "->",
        })
    }
}

struct Wrapped<'a>(&'a Expr, u8);

impl fmt::Display for Wrapped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.precedence() < self.1 {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, values: &[Value]) -> fmt::Result {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", Quoted(v))?;
    }
    Ok(())
}

/// A value as it is written inside an expression (symbols quoted).
struct Quoted<'a>(&'a Value);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Sym(s) => write!(f, "\"{s}\""),
            Value::Num(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{n:.1}"),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.precedence();
        match self {
            Self::Const(v) => write!(f, "{}", Quoted(v)),
            Self::Var(name) => write!(f, "{name}"),
            Self::Neg(e) => write!(f, "-{}", Wrapped(e, p)),
            Self::Not(e) => write!(f, "!{}", Wrapped(e, p + 1)),
            // Left-associative: the right operand needs strictly higher precedence.
            Self::Arith(op, l, r) => write!(f, "{} {op} {}", Wrapped(l, p), Wrapped(r, p + 1)),
            Self::Compare(op, l, r) => write!(f, "{} {op} {}", Wrapped(l, p + 1), Wrapped(r, p + 1)),
            // Implication is right-associative.
            Self::Logic(LogicOp::Implies, l, r) => {
                write!(f, "{} -> {}", Wrapped(l, p + 1), Wrapped(r, p))
            }
            Self::Logic(op, l, r) => write!(f, "{} {op} {}", Wrapped(l, p), Wrapped(r, p + 1)),
            Self::In(e, set) => {
                write!(f, "{} in {{", Wrapped(e, p + 1))?;
                write_values(f, set)?;
                write!(f, "}}")
            }
            Self::Call(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

/// Byte offset span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Num(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "->", "=>", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "=", "!", "+", "-", "*", "/", "(",
    ")", "{", "}", ",",
];

fn tokenize(src: &str) -> Result<Vec<(Tok, Span)>, (String, Span)> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let text = &src[start..i];
            let tok = if text.contains('.') {
                text.parse().map(Tok::Num).ok()
            } else {
                text.parse().map(Tok::Int).ok()
            };
            let span = Span { start, end: i };
            out.push((tok.ok_or_else(|| (format!("invalid number '{text}'"), span))?, span));
        } else if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'.'))
            {
                i += 1;
            }
            out.push((Tok::Ident(src[start..i].to_string()), Span { start, end: i }));
        } else if c == b'"' || c == b'\'' {
            let close = src[i + 1..]
                .find(c as char)
                .ok_or_else(|| ("unterminated string".to_string(), Span { start, end: src.len() }))?;
            let end = i + 1 + close;
            out.push((Tok::Str(src[i + 1..end].to_string()), Span { start, end: end + 1 }));
            i = end + 1;
        } else {
            let rest = &src[i..];
            let op = OPERATORS
                .iter()
                .copied()
                .find(|op| rest.starts_with(op))
                .ok_or_else(|| {
                    let ch = rest.chars().next().unwrap_or('?');
                    (format!("unexpected character '{ch}'"), Span { start, end: i + 1 })
                })?;
            i += op.len();
            out.push((Tok::Op(op), Span { start, end: i }));
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    src: &'a str,
    toks: Vec<(Tok, Span)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> ParseError {
        let at = self
            .toks
            .get(self.pos)
            .map_or(self.src.len(), |(_, span)| span.start);
        ParseError {
            input: self.src.to_string(),
            message: format!("{} at offset {at}", message.into()),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Tok::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Tok::Ident(id)) if id.eq_ignore_ascii_case(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ParseError> {
        self.eat_op(&[op])
            .map(|_| ())
            .ok_or_else(|| self.error(format!("expected '{op}'")))
    }

    fn implies(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.or()?;
        if self.eat_op(&["->", "=>"]).is_some() {
            let rhs = self.implies()?;
            return Ok(Expr::Logic(LogicOp::Implies, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and()?;
        while self.eat_op(&["||"]).is_some() || self.eat_keyword("or") {
            let rhs = self.and()?;
            lhs = Expr::Logic(LogicOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.not()?;
        while self.eat_op(&["&&"]).is_some() || self.eat_keyword("and") {
            let rhs = self.not()?;
            lhs = Expr::Logic(LogicOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op(&["!"]).is_some() || self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.sum()?;
        if self.eat_keyword("in") {
            self.expect_op("{")?;
            let mut set = Vec::new();
            if self.eat_op(&["}"]).is_none() {
                loop {
                    set.push(self.literal()?);
                    if self.eat_op(&["}"]).is_some() {
                        break;
                    }
                    self.expect_op(",")?;
                }
            }
            return Ok(Expr::In(Box::new(lhs), set));
        }
        let op = match self.eat_op(&["==", "=", "!=", "<=", ">=", "<", ">"]) {
            Some("==" | "=") => CmpOp::Eq,
            Some("!=") => CmpOp::Ne,
            Some("<=") => CmpOp::Le,
            Some(">=") => CmpOp::Ge,
            Some("<") => CmpOp::Lt,
            Some(">") => CmpOp::Gt,
            _ => return Ok(lhs),
        };
        let rhs = self.sum()?;
        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.product()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.product()?;
            let op = if op == "+" { ArithOp::Add } else { ArithOp::Sub };
            lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn product(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let rhs = self.unary()?;
            let op = if op == "*" { ArithOp::Mul } else { ArithOp::Div };
            lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op(&["-"]).is_some() {
            return Ok(match self.unary()? {
                Expr::Const(Value::Int(i)) => Expr::Const(Value::Int(-i)),
                Expr::Const(Value::Num(n)) => Expr::Const(Value::Num(-n)),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some((tok, _)) = self.toks.get(self.pos).cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        self.pos += 1;
        match tok {
            Tok::Int(i) => Ok(Expr::Const(Value::Int(i))),
            Tok::Num(n) => Ok(Expr::Const(Value::Num(n))),
            Tok::Str(s) => Ok(Expr::Const(Value::Sym(s))),
            Tok::Op("(") => {
                let inner = self.implies()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Tok::Ident(id) if id == "true" => Ok(Expr::Const(Value::Bool(true))),
            Tok::Ident(id) if id == "false" => Ok(Expr::Const(Value::Bool(false))),
            Tok::Ident(id) => {
                if self.eat_op(&["("]).is_none() {
                    return Ok(Expr::Var(id));
                }
                let func = Func::from_name(&id).ok_or_else(|| {
                    self.pos -= 1;
                    self.error(format!("unknown function '{id}'"))
                })?;
                let mut args = Vec::new();
                if self.eat_op(&[")"]).is_none() {
                    loop {
                        args.push(self.implies()?);
                        if self.eat_op(&[")"]).is_some() {
                            break;
                        }
                        self.expect_op(",")?;
                    }
                }
                Ok(Expr::Call(func, args))
            }
            Tok::Op(op) => {
                self.pos -= 1;
                Err(self.error(format!("unexpected '{op}'")))
            }
        }
    }

    fn literal(&mut self) -> Result<Value, ParseError> {
        match self.unary()? {
            Expr::Const(v) => Ok(v),
            // Bare words inside a set are symbols.
            Expr::Var(name) => Ok(Value::Sym(name)),
            other => Err(self.error(format!("set members must be constants, got '{other}'"))),
        }
    }
}

impl FromStr for Expr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let toks = tokenize(s).map_err(|(message, span)| ParseError {
            input: s.to_string(),
            message: format!("{message} at offset {}", span.start),
        })?;
        let mut parser = Parser { src: s, toks, pos: 0 };
        let expr = parser.implies()?;
        if parser.pos < parser.toks.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(expr)
    }
}

impl TryFrom<String> for Expr {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Expr> for String {
    fn from(expr: Expr) -> Self {
        expr.to_string()
    }
}
