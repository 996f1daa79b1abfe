//! Diagnostics and engine errors.
//!
//! Three distinct channels, never mixed:
//! - Static user-program diagnostics ([`Diagnostic`]) describe problems in
//!   the program under evaluation. They go to an injected handler which
//!   decides whether evaluation recovers or aborts.
//! - Engine faults ([`EngineError`]) are the evaluator's own failures:
//!   either a fatal diagnostic (the handler said `Fail`) or an internal
//!   invariant violation. Both abort outward as `Err`.
//! - Abrupt program completions (throw/return/break/continue) are neither;
//!   they travel in [`crate::completions::Completion`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::ast::Span;

/// Diagnostic codes raised by the evaluator.
pub mod codes {
    pub const UNBOUND_VARIABLE: &str = "PE1001";
    pub const UNKNOWN_CALLEE: &str = "PE1002";
    pub const ASSIGN_UNDECLARED: &str = "PE1003";
    pub const REDECLARATION: &str = "PE1004";
    pub const NOT_AN_OBJECT: &str = "PE1005";
    pub const ABSTRACT_OBJECT: &str = "PE1006";
    pub const LOOP_UNROLL_BUDGET: &str = "PE1007";
    pub const LOOP_NEVER_TERMINATES: &str = "PE1008";
    pub const SWITCH_FALLTHROUGH: &str = "PE1009";
    pub const BAD_INTRINSIC_ARG: &str = "PE1010";
    pub const MIXED_ABRUPT_IN_TRY: &str = "PE1011";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    RecoverableError,
    FatalError,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Warning => "Warning",
            Severity::RecoverableError => "RecoverableError",
            Severity::FatalError => "FatalError",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Warning" => Ok(Severity::Warning),
            "RecoverableError" => Ok(Severity::RecoverableError),
            "FatalError" => Ok(Severity::FatalError),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// A problem in the program under evaluation (not in the engine).
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn new(severity: Severity, code: &'static str, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.severity, self.message)
    }
}

/// What the injected handler tells the engine to do with a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Record the diagnostic and continue with a placeholder abstract value.
    RecoverIfPossible,
    /// Abort the whole partial-evaluation call.
    Fail,
}

/// Injected per evaluation; decides the recovery policy per diagnostic.
pub type DiagnosticHandler<'a> = dyn FnMut(&Diagnostic) -> Recovery + 'a;

/// Failures of the evaluation call itself.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A user-program diagnostic the handler refused to recover from.
    #[error("evaluation failed: {diagnostic}")]
    Fatal { diagnostic: Diagnostic },

    /// The engine's own preconditions were violated. Always a bug; never
    /// swallowed or downgraded.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

pub type EvalResult<T> = Result<T, EngineError>;

/// Check an engine precondition, returning `EngineError::Invariant` from the
/// enclosing function when it does not hold.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::diagnostics::EngineError::Invariant(format!($($arg)*)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_round_trips_through_str() {
        for s in [Severity::Warning, Severity::RecoverableError, Severity::FatalError] {
            assert_eq!(s.to_string().parse::<Severity>().unwrap(), s);
        }
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn invariant_macro_produces_engine_error() {
        fn check(flag: bool) -> EvalResult<()> {
            invariant!(flag, "flag must be set, got {}", flag);
            Ok(())
        }
        assert!(check(true).is_ok());
        let err = check(false).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
        assert!(err.to_string().contains("internal invariant"));
    }
}
