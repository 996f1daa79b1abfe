//! Completions: the outcome of evaluating a statement or expression.
//!
//! A completion is either normal (carrying a value), abrupt (a control
//! transfer: return/throw/break/continue), or, unique to partial
//! evaluation, *possibly* abrupt: abrupt along one arm of a condition
//! whose runtime truth is unknown, normal along the other.
//!
//! Abrupt completions are data, not errors. They flow through every
//! evaluator's return value and are joined like any other effect.

use crate::ast::Ident;
use crate::values::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum AbruptCompletion {
    Return(Value),
    Throw(Value),
    Break(Option<Ident>),
    Continue(Option<Ident>),
    /// Two mutually exclusive abrupt outcomes gated on an unknown condition
    /// (e.g. one branch returns while the other throws). Kept as a disjoint
    /// pair rather than failing the evaluation.
    Joined {
        condition: Value,
        when_true: Box<AbruptCompletion>,
        when_false: Box<AbruptCompletion>,
    },
}

impl AbruptCompletion {
    /// Does any path through this completion throw?
    pub fn might_throw(&self) -> bool {
        match self {
            AbruptCompletion::Throw(_) => true,
            AbruptCompletion::Joined {
                when_true,
                when_false,
                ..
            } => when_true.might_throw() || when_false.might_throw(),
            _ => false,
        }
    }

    /// The value thrown along some path, if any path throws.
    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            AbruptCompletion::Throw(v) => Some(v),
            AbruptCompletion::Joined {
                when_true,
                when_false,
                ..
            } => when_true.thrown_value().or_else(|| when_false.thrown_value()),
            _ => None,
        }
    }

    /// Would a loop carrying `loop_label` absorb this completion as a break?
    /// An unlabeled `break` targets the nearest loop; a labeled one targets
    /// the matching label only.
    pub fn breaks_out_of(&self, loop_label: Option<&str>) -> bool {
        match self {
            AbruptCompletion::Break(None) => true,
            AbruptCompletion::Break(Some(l)) => loop_label == Some(l.as_str()),
            _ => false,
        }
    }

    /// Same rule for `continue`.
    pub fn continues_in(&self, loop_label: Option<&str>) -> bool {
        match self {
            AbruptCompletion::Continue(None) => true,
            AbruptCompletion::Continue(Some(l)) => loop_label == Some(l.as_str()),
            _ => false,
        }
    }
}

/// Abrupt along one arm of an unknown condition, normal along the other.
///
/// `gate` is a value whose runtime truthiness decides: truthy means the
/// abrupt transfer happened, falsy means evaluation continued normally
/// with `normal_value`. While a completion like this is outstanding, the
/// engine keeps capturing effects: control has not reconverged, and the
/// code after the construct runs only along the falsy path.
#[derive(Debug, Clone, PartialEq)]
pub struct PossiblyAbrupt {
    pub gate: Value,
    pub abrupt: Box<AbruptCompletion>,
    pub normal_value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Normal(Value),
    Abrupt(AbruptCompletion),
    PossiblyAbrupt(PossiblyAbrupt),
}

impl Completion {
    /// A normal completion carrying the internal "nothing" marker.
    pub fn empty() -> Completion {
        Completion::Normal(Value::empty())
    }

    pub fn normal(value: Value) -> Completion {
        Completion::Normal(value)
    }

    pub fn throw(value: Value) -> Completion {
        Completion::Abrupt(AbruptCompletion::Throw(value))
    }

    pub fn is_abrupt(&self) -> bool {
        matches!(self, Completion::Abrupt(_))
    }

    /// The engine keeps capturing effects after a construct whose completion
    /// may still continue normally (plain normal, or abrupt on only one arm).
    pub fn may_continue(&self) -> bool {
        !self.is_abrupt()
    }

    /// The value carried along the normal path, if one exists.
    pub fn normal_value(&self) -> Option<&Value> {
        match self {
            Completion::Normal(v) => Some(v),
            Completion::PossiblyAbrupt(pa) => Some(&pa.normal_value),
            Completion::Abrupt(_) => None,
        }
    }
}

/// Normalize an empty normal completion to a default value.
///
/// Statements that produce nothing complete with the internal `Empty`
/// marker; before such a completion escapes a capture scope it must be
/// coerced to a real value (`undefined` for conditionals and loops).
pub fn update_empty(completion: Completion, default: Value) -> Completion {
    match completion {
        Completion::Normal(v) if v.is_empty_marker() => Completion::Normal(default),
        Completion::PossiblyAbrupt(pa) if pa.normal_value.is_empty_marker() => {
            Completion::PossiblyAbrupt(PossiblyAbrupt {
                normal_value: default,
                ..pa
            })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_empty_replaces_marker() {
        let c = update_empty(Completion::empty(), Value::undefined());
        assert_eq!(c, Completion::Normal(Value::undefined()));
    }

    #[test]
    fn update_empty_keeps_real_values() {
        let c = update_empty(Completion::normal(Value::number(4.0)), Value::undefined());
        assert_eq!(c, Completion::Normal(Value::number(4.0)));
    }

    #[test]
    fn update_empty_ignores_abrupt() {
        let c = update_empty(Completion::throw(Value::number(1.0)), Value::undefined());
        assert!(c.is_abrupt());
    }

    #[test]
    fn joined_pair_reports_throw() {
        let joined = AbruptCompletion::Joined {
            condition: Value::bool(true),
            when_true: Box::new(AbruptCompletion::Throw(Value::number(1.0))),
            when_false: Box::new(AbruptCompletion::Return(Value::undefined())),
        };
        assert!(joined.might_throw());
        assert_eq!(joined.thrown_value(), Some(&Value::number(1.0)));
    }
}
