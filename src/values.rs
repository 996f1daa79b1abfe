//! The value model: concrete values known at analysis time, and abstract
//! values standing for unknown inputs.
//!
//! The evaluator core only ever asks three things of a value: could it be
//! truthy, could it be falsy, and what residual expression reproduces it.
//! Everything else (provenance, constraints) exists to answer those
//! questions precisely after joins.

use std::rc::Rc;

use crate::ast::{BinOp, Expr, ExprKind, Literal, LogicalOp, UnaryOp};

/// Identity of a heap object. Objects allocated on different speculative
/// branches get distinct ids even when they have the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// A fully known value.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    /// Internal marker for "statement produced nothing". Normalized away by
    /// `update_empty` before a value escapes a capture scope.
    Empty,
}

impl Constant {
    pub fn is_truthy(&self) -> bool {
        match self {
            Constant::Undefined | Constant::Null | Constant::Empty => false,
            Constant::Bool(b) => *b,
            Constant::Number(n) => *n != 0.0 && !n.is_nan(),
            Constant::Str(s) => !s.is_empty(),
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Constant::Undefined | Constant::Empty => "undefined",
            Constant::Null => "object",
            Constant::Bool(_) => "boolean",
            Constant::Number(_) => "number",
            Constant::Str(_) => "string",
        }
    }
}

/// What is known about an abstract value's truthiness. Constraints are
/// monotone: they may narrow from `Any` but never widen back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruthRange {
    Any,
    Truthy,
    Falsy,
}

impl TruthRange {
    /// Least upper bound of two ranges (for joined values).
    pub fn union(self, other: TruthRange) -> TruthRange {
        if self == other {
            self
        } else {
            TruthRange::Any
        }
    }

    pub fn negate(self) -> TruthRange {
        match self {
            TruthRange::Any => TruthRange::Any,
            TruthRange::Truthy => TruthRange::Falsy,
            TruthRange::Falsy => TruthRange::Truthy,
        }
    }
}

/// Where an abstract value came from. Provenance both documents the value
/// and supplies the residual expression that reproduces it at run time.
#[derive(Debug, Clone, PartialEq)]
pub enum AbstractSource {
    /// A declared unknown input, e.g. `__abstract("n")`.
    Input(String),
    /// A binding widened by the loop policy.
    Widened(String),
    Unary {
        op: UnaryOp,
        operand: Value,
    },
    Binary {
        op: BinOp,
        left: Value,
        right: Value,
    },
    Logical {
        op: LogicalOp,
        left: Value,
        right: Value,
    },
    /// `cond ? consequent : alternate`, produced by the join algorithm.
    Conditional {
        cond: Value,
        consequent: Value,
        alternate: Value,
    },
    /// An opaque residual expression (e.g. an unevaluable call).
    Residual(Expr),
}

#[derive(Debug, Clone)]
pub struct AbstractValue {
    /// Distinguishes otherwise identical unknowns in debug output. Not part
    /// of structural equality.
    pub id: u64,
    pub range: TruthRange,
    pub source: AbstractSource,
}

impl PartialEq for AbstractValue {
    fn eq(&self, other: &Self) -> bool {
        self.range == other.range && self.source == other.source
    }
}

/// Allocates ids for abstract values. Owned by the evaluator state so two
/// identical runs number their unknowns identically.
#[derive(Debug, Default)]
pub struct AbstractIdGen {
    next: u64,
}

impl AbstractIdGen {
    pub fn fresh(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Concrete(Constant),
    Abstract(Rc<AbstractValue>),
    Object(ObjectId),
}

impl Value {
    pub fn undefined() -> Value {
        Value::Concrete(Constant::Undefined)
    }

    pub fn empty() -> Value {
        Value::Concrete(Constant::Empty)
    }

    pub fn bool(b: bool) -> Value {
        Value::Concrete(Constant::Bool(b))
    }

    pub fn number(n: f64) -> Value {
        Value::Concrete(Constant::Number(n))
    }

    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::Concrete(Constant::Str(s.into()))
    }

    pub fn abstract_input(ids: &mut AbstractIdGen, name: &str, range: TruthRange) -> Value {
        Value::Abstract(Rc::new(AbstractValue {
            id: ids.fresh(),
            range,
            source: AbstractSource::Input(name.to_string()),
        }))
    }

    pub fn is_empty_marker(&self) -> bool {
        matches!(self, Value::Concrete(Constant::Empty))
    }

    /// Could this value be truthy at run time?
    pub fn might_be_truthy(&self) -> bool {
        match self {
            Value::Concrete(c) => c.is_truthy(),
            Value::Abstract(a) => a.range != TruthRange::Falsy,
            Value::Object(_) => true,
        }
    }

    /// Could this value be falsy at run time?
    pub fn might_be_falsy(&self) -> bool {
        match self {
            Value::Concrete(c) => !c.is_truthy(),
            Value::Abstract(a) => a.range != TruthRange::Truthy,
            Value::Object(_) => false,
        }
    }

    /// The truthiness range this value is known to lie in.
    pub fn truth_range(&self) -> TruthRange {
        match (self.might_be_truthy(), self.might_be_falsy()) {
            (true, false) => TruthRange::Truthy,
            (false, true) => TruthRange::Falsy,
            _ => TruthRange::Any,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Concrete(c) => c.type_of(),
            Value::Abstract(_) => "abstract",
            Value::Object(_) => "object",
        }
    }
}

// ============================================================================
// Joined (conditional) values
// ============================================================================

/// Build the value of `cond ? consequent : alternate` for a `cond` whose
/// runtime truth is unknown.
///
/// Simplifications keep residual code minimal: identical arms collapse to
/// one side, and a `true`/`false` pair collapses to the condition itself.
pub fn conditional_value(
    ids: &mut AbstractIdGen,
    cond: &Value,
    consequent: Value,
    alternate: Value,
) -> Value {
    if consequent == alternate {
        return consequent;
    }
    if matches!(consequent, Value::Concrete(Constant::Bool(true)))
        && matches!(alternate, Value::Concrete(Constant::Bool(false)))
    {
        return cond.clone();
    }
    let range = consequent.truth_range().union(alternate.truth_range());
    Value::Abstract(Rc::new(AbstractValue {
        id: ids.fresh(),
        range,
        source: AbstractSource::Conditional {
            cond: cond.clone(),
            consequent,
            alternate,
        },
    }))
}

/// Logical negation of a value, preserving what is known about truthiness.
pub fn negated_value(ids: &mut AbstractIdGen, value: &Value) -> Value {
    match value {
        Value::Concrete(c) => Value::bool(!c.is_truthy()),
        Value::Object(_) => Value::bool(false),
        Value::Abstract(a) => Value::Abstract(Rc::new(AbstractValue {
            id: ids.fresh(),
            range: a.range.negate(),
            source: AbstractSource::Unary {
                op: UnaryOp::Not,
                operand: value.clone(),
            },
        })),
    }
}

/// Render a number the way the subject language prints it: integral values
/// without a decimal point, NaN and infinities by name.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Render a concrete value as a literal expression for residual code.
/// Objects have no literal form; callers keep the original syntax for them.
pub fn constant_to_expr(c: &Constant) -> Expr {
    let lit = match c {
        Constant::Undefined | Constant::Empty => Literal::Undefined,
        Constant::Null => Literal::Null,
        Constant::Bool(b) => Literal::Bool(*b),
        Constant::Number(n) => Literal::Number(*n),
        Constant::Str(s) => Literal::Str(s.to_string()),
    };
    Expr::synthetic(ExprKind::Lit(lit))
}
