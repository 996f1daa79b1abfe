//! Loop reduction: bounded unrolling of concrete loops, widening of
//! data-dependent ones, and break/continue handling.

use schist::completions::Completion;
use schist::diagnostics::EngineError;
use schist::test_support::{diagnostics_of, flatten, reduce, reduce_to_source};
use schist::values::{AbstractSource, Value};

fn binding_value(reduced: &schist::ReducedProgram, name: &str) -> Value {
    reduced
        .effects
        .bindings
        .iter()
        .find(|(b, _)| b.name == name)
        .map(|(_, change)| change.new.clone())
        .unwrap_or_else(|| panic!("no binding named `{}` in effects", name))
}

// ----------------------------------------------------------------------------
// Fully concrete loops unroll away
// ----------------------------------------------------------------------------

#[test]
fn counting_loop_unrolls_completely() {
    let src = "
        let i = 0;
        let sum = 0;
        while (i < 5) {
            sum = sum + i;
            i = i + 1;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(reduced.diagnostics.is_empty());
    assert_eq!(binding_value(&reduced, "sum"), Value::number(10.0));
    assert_eq!(binding_value(&reduced, "i"), Value::number(5.0));

    let out = flatten(&reduce_to_source(src).unwrap());
    assert!(!out.contains("while"));
}

#[test]
fn zero_iteration_loop_vanishes() {
    let src = "
        let touched = false;
        while (false) { touched = true; }
    ";
    let reduced = reduce(src).unwrap();
    assert_eq!(binding_value(&reduced, "touched"), Value::bool(false));
    assert!(!flatten(&reduce_to_source(src).unwrap()).contains("while"));
}

#[test]
fn break_ends_the_unrolling() {
    let src = "
        let i = 0;
        while (true) {
            i = i + 1;
            if (i === 3) { break; }
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(matches!(reduced.completion, Completion::Normal(_)));
    assert_eq!(binding_value(&reduced, "i"), Value::number(3.0));
    assert!(!flatten(&reduce_to_source(src).unwrap()).contains("while"));
}

#[test]
fn continue_skips_the_rest_of_an_iteration() {
    let src = "
        let i = 0;
        let hits = 0;
        while (i < 6) {
            i = i + 1;
            if (i === 1) { continue; }
            hits = hits + 1;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert_eq!(binding_value(&reduced, "hits"), Value::number(5.0));
}

#[test]
fn labeled_break_escapes_the_outer_loop() {
    let src = "
        let i = 0;
        outer: while (i < 10) {
            while (true) {
                break outer;
            }
            i = i + 1;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(matches!(reduced.completion, Completion::Normal(_)));
    assert_eq!(binding_value(&reduced, "i"), Value::number(0.0));
}

#[test]
fn unlabeled_break_only_leaves_the_inner_loop() {
    let src = "
        let rounds = 0;
        while (rounds < 3) {
            rounds = rounds + 1;
            while (true) { break; }
        }
    ";
    let reduced = reduce(src).unwrap();
    assert_eq!(binding_value(&reduced, "rounds"), Value::number(3.0));
}

#[test]
fn return_inside_a_loop_ends_the_program() {
    let src = "
        let i = 0;
        while (i < 10) {
            i = i + 1;
            if (i === 2) { return i; }
        }
        let after = 1;
    ";
    let reduced = reduce(src).unwrap();
    assert!(reduced.completion.is_abrupt());
    assert_eq!(binding_value(&reduced, "i"), Value::number(2.0));
    assert!(reduced
        .effects
        .bindings
        .iter()
        .all(|(b, _)| b.name != "after"));
}

// ----------------------------------------------------------------------------
// Data-dependent loops widen and stay residual
// ----------------------------------------------------------------------------

#[test]
fn unknown_bound_widens_the_counter() {
    let src = "
        let n = __abstract(\"n\");
        let i = 0;
        while (i < n) {
            i = i + 1;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(reduced.diagnostics.is_empty());

    // The counter leaves the loop widened, not with any specific count.
    let Value::Abstract(a) = binding_value(&reduced, "i") else {
        panic!("i should be abstract after a widened loop");
    };
    assert!(
        matches!(&a.source, AbstractSource::Widened(_) | AbstractSource::Conditional { .. }),
        "unexpected provenance: {:?}",
        a.source
    );

    let out = flatten(&reduce_to_source(src).unwrap());
    assert!(out.contains("while"));
    assert!(out.contains("i = i + 1;"));
}

#[test]
fn bindings_untouched_by_the_loop_are_not_widened() {
    let src = "
        let n = __abstract(\"n\");
        let i = 0;
        let constant = 42;
        while (i < n) {
            i = i + 1;
        }
        let probe = constant;
    ";
    let reduced = reduce(src).unwrap();
    assert_eq!(binding_value(&reduced, "probe"), Value::number(42.0));
}

#[test]
fn budget_overflow_reports_and_falls_back_to_widening() {
    let src = "
        let i = 0;
        while (i < 1000) {
            i = i + 1;
        }
    ";
    let diags = diagnostics_of(src).unwrap();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, "PE1007");

    let out = flatten(&reduce_to_source(src).unwrap());
    assert!(out.contains("while"));
}

#[test]
fn provably_endless_loop_is_a_fatal_error() {
    let src = "
        let spins = 0;
        while (true) {
            spins = spins + 1;
        }
    ";
    let err = reduce(src).unwrap_err();
    match err {
        EngineError::Fatal { diagnostic } => assert_eq!(diagnostic.code, "PE1008"),
        other => panic!("expected a fatal diagnostic, got {:?}", other),
    }
}

#[test]
fn widened_loop_with_a_break_still_terminates_analysis() {
    let src = "
        let n = __abstract(\"n\");
        let i = 0;
        while (true) {
            i = i + 1;
            if (i === n) { break; }
        }
    ";
    // The break makes exit possible, so this reduces without a fatal error.
    let reduced = reduce(src).unwrap();
    let out = flatten(&schist::print_program(&reduced.body));
    assert!(out.contains("while"));
    assert!(out.contains("break;"));
}
