//! Schist, a partial evaluator for a small dynamic scripting language.
//!
//! Programs are evaluated ahead of time as far as their known inputs allow;
//! unknown inputs (declared with `__abstract("name")`) flow through as
//! abstract values, and control flow that depends on them is speculatively
//! evaluated in an effect-capture sandbox and joined back into a single
//! residual program.

pub mod ast;
pub mod completions;
pub mod diagnostics;
pub mod driver;
pub mod effects;
pub mod errors;
pub mod join;
pub mod lexer;
pub mod parser;
pub mod peval;
pub mod printer;
pub mod test_support;
pub mod values;

use thiserror::Error;

pub use ast::{Position, Program, SourceMap, Span};
pub use completions::{AbruptCompletion, Completion, PossiblyAbrupt};
pub use diagnostics::{Diagnostic, DiagnosticHandler, EngineError, EvalResult, Recovery, Severity};
pub use effects::{Effects, EvalState};
pub use errors::{find_similar, levenshtein_distance, render_diagnostic, Colors};
pub use lexer::Lexer;
pub use parser::{parse_source, Parser};
pub use peval::{Evaluator, LoopPolicy, ReducedProgram};
pub use printer::print_program;
pub use values::{Constant, TruthRange, Value};

/// Failure turning source text into an AST.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("lex error: {0}")]
    Lex(#[from] lexer::LexError),
    #[error("parse error: {0}")]
    Parse(#[from] parser::ParseError),
}

impl SourceError {
    /// The source span where the failure occurred.
    pub fn span(&self) -> &Span {
        match self {
            SourceError::Lex(e) => e.span(),
            SourceError::Parse(e) => e.span(),
        }
    }
}
