//! Test support helpers: one-call pipelines from source text to parsed,
//! reduced, or printed form, shared by unit and integration tests.

use crate::ast::Program;
use crate::diagnostics::{Diagnostic, EvalResult, Recovery};
use crate::parser::parse_source;
use crate::peval::{Evaluator, ReducedProgram};
use crate::printer::print_program;

/// Parse a program, stringifying any lex or parse error.
pub fn parse(input: &str) -> Result<Program, String> {
    parse_source(input).map_err(|e| e.to_string())
}

/// Partially evaluate in sloppy mode with the recovering handler.
pub fn reduce(input: &str) -> EvalResult<ReducedProgram> {
    reduce_with(input, Recovery::RecoverIfPossible, false)
}

/// Partially evaluate in strict mode with the recovering handler.
pub fn reduce_strict(input: &str) -> EvalResult<ReducedProgram> {
    reduce_with(input, Recovery::RecoverIfPossible, true)
}

pub fn reduce_with(input: &str, mode: Recovery, strict: bool) -> EvalResult<ReducedProgram> {
    let program = parse(input).map_err(crate::diagnostics::EngineError::Invariant)?;
    let mut evaluator = Evaluator::with_recovery(mode);
    evaluator.evaluate_program(&program, strict)
}

/// Reduce and render the residual program as source text.
pub fn reduce_to_source(input: &str) -> EvalResult<String> {
    let reduced = reduce(input)?;
    Ok(print_program(&reduced.body))
}

/// The diagnostics a recovering evaluation records for `input`.
pub fn diagnostics_of(input: &str) -> EvalResult<Vec<Diagnostic>> {
    Ok(reduce(input)?.diagnostics)
}

/// Shorthand for asserting on residual text: collapse all whitespace runs
/// to single spaces so tests compare shape, not formatting.
pub fn flatten(source: &str) -> String {
    source.split_whitespace().collect::<Vec<_>>().join(" ")
}
