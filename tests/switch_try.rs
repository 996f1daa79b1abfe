//! Switch reduction (static selection and the if-chain rewrite) and
//! try/catch under definite, absent, and gated throws.

use schist::completions::{AbruptCompletion, Completion};
use schist::test_support::{diagnostics_of, flatten, reduce, reduce_to_source};
use schist::values::Value;

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
// Concrete discriminants select a case statically
// ----------------------------------------------------------------------------

#[test]
fn matching_case_runs_with_fallthrough() {
    let src = "
        let x = 0;
        switch (2) {
            case 1: x = 1; break;
            case 2: x = 2;
            case 3: x = 3; break;
            default: x = 9;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(reduced.diagnostics.is_empty());
    // Case 2 falls through into case 3, whose break ends the switch.
    assert_eq!(binding_value(&reduced, "x"), Value::number(3.0));

    let out = flatten(&reduce_to_source(src).unwrap());
    assert!(!out.contains("switch"));
    assert!(!out.contains("break"));
    assert!(!out.contains("x = 9"));
}

#[test]
fn unmatched_discriminant_falls_to_default() {
    let src = "
        let x = 0;
        switch (\"nope\") {
            case 1: x = 1; break;
            default: x = 7;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert_eq!(binding_value(&reduced, "x"), Value::number(7.0));
}

#[test]
fn unmatched_discriminant_without_default_is_a_no_op() {
    let src = "
        let x = 5;
        switch (42) {
            case 1: x = 1; break;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert_eq!(binding_value(&reduced, "x"), Value::number(5.0));
    assert!(!flatten(&reduce_to_source(src).unwrap()).contains("switch"));
}

#[test]
fn case_can_return_out_of_the_program() {
    let src = "
        switch (1) {
            case 1: return \"done\";
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(matches!(
        &reduced.completion,
        Completion::Abrupt(AbruptCompletion::Return(v)) if *v == Value::string("done")
    ));
}

// ----------------------------------------------------------------------------
// Unknown discriminants desugar to a strict-equality chain
// ----------------------------------------------------------------------------

#[test]
fn unknown_discriminant_becomes_an_if_chain() {
    let src = "
        let d = __abstract(\"d\");
        let x = 0;
        switch (d) {
            case 1: x = 1; break;
            case 2: x = 2; break;
            default: x = 9;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(reduced.diagnostics.is_empty());
    assert!(matches!(binding_value(&reduced, "x"), Value::Abstract(_)));

    let out = flatten(&schist::print_program(&reduced.body));
    assert!(!out.contains("switch"));
    assert!(out.contains("if (d === 1)"));
    assert!(out.contains("if (d === 2)"));
    assert!(out.contains("x = 9;"));
}

#[test]
fn impure_discriminant_is_bound_once() {
    let src = "
        let d = __abstract(\"d\");
        let x = 0;
        switch (x = d) {
            case 1: x = 1; break;
        }
    ";
    let reduced = reduce(src).unwrap();
    let printed = schist::print_program(&reduced.body);
    // The discriminant expression runs once, into a synthesized binding
    // that lexes as an ordinary identifier.
    let out = flatten(&printed);
    assert!(out.contains("let __switch0 ="));
    assert!(out.contains("if (__switch0 === 1)"));
    schist::parse_source(&printed).unwrap();
}

#[test]
fn synthesized_discriminant_binding_avoids_user_names() {
    let src = "
        let __switch0 = 5;
        let d = __abstract(\"d\");
        let x = 0;
        switch (x = d) {
            case 1: x = 1; break;
        }
    ";
    let reduced = reduce(src).unwrap();
    let out = flatten(&schist::print_program(&reduced.body));
    // The user's binding keeps its name; the synthesized one moves on.
    assert!(!out.contains("let __switch0 = x = d;"));
    assert!(out.contains("let __switch1 = x = d;"));
}

#[test]
fn nested_break_in_a_case_targets_a_labeled_chain() {
    let src = "
        let d = __abstract(\"d\");
        let c = __abstract(\"c\");
        let x = 0;
        switch (d) {
            case 1:
                if (c) { break; }
                x = 1;
                break;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(reduced.diagnostics.is_empty());
    assert!(matches!(reduced.completion, Completion::Normal(_)));
    // The write to x only happens when neither guard cut it off.
    assert!(matches!(binding_value(&reduced, "x"), Value::Abstract(_)));

    let printed = schist::print_program(&reduced.body);
    // The residual must round-trip through the parser: the break needs a
    // labeled statement to target.
    schist::parse_source(&printed).unwrap();
    let out = flatten(&printed);
    assert!(out.contains("__sw0:"));
    assert!(out.contains("break __sw0;"));
    assert!(!out.contains("{ break; }"));
}

#[test]
fn nested_break_in_a_statically_selected_case_stays_parseable() {
    let src = "
        let c = __abstract(\"c\");
        let x = 0;
        switch (1) {
            case 1:
                if (c) { break; }
                x = 1;
                break;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(matches!(reduced.completion, Completion::Normal(_)));
    assert!(matches!(binding_value(&reduced, "x"), Value::Abstract(_)));

    let printed = schist::print_program(&reduced.body);
    schist::parse_source(&printed).unwrap();
    let out = flatten(&printed);
    assert!(out.contains("break __sw0;"));
}

#[test]
fn fallthrough_under_unknown_discriminant_is_diagnosed() {
    let src = "
        let d = __abstract(\"d\");
        let x = 0;
        switch (d) {
            case 1: x = 1;
            case 2: x = 2; break;
        }
    ";
    let diags = diagnostics_of(src).unwrap();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, "PE1009");
}

// ----------------------------------------------------------------------------
// try / catch
// ----------------------------------------------------------------------------

#[test]
fn non_throwing_try_drops_its_handler() {
    let src = "
        let x = 0;
        try { x = 1; } catch (e) { x = 99; }
    ";
    let reduced = reduce(src).unwrap();
    assert_eq!(binding_value(&reduced, "x"), Value::number(1.0));

    let out = flatten(&schist::print_program(&reduced.body));
    assert!(!out.contains("try"));
    assert!(!out.contains("x = 99"));
}

#[test]
fn definite_throw_runs_the_handler_with_the_thrown_value() {
    let src = "
        let x = 0;
        try {
            throw \"boom\";
            x = 1;
        } catch (e) {
            x = e;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(reduced.diagnostics.is_empty());
    assert!(matches!(reduced.completion, Completion::Normal(_)));
    assert_eq!(binding_value(&reduced, "x"), Value::string("boom"));
}

#[test]
fn gated_throw_joins_handler_effects_on_the_gate() {
    let src = "
        let b = __abstract(\"b\");
        let x = 0;
        try {
            if (b) { throw \"boom\"; }
            x = 1;
        } catch (e) {
            x = 2;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(reduced.diagnostics.is_empty());
    // Control reconverges after the catch.
    assert!(matches!(reduced.completion, Completion::Normal(_)));
    assert!(matches!(binding_value(&reduced, "x"), Value::Abstract(_)));

    let out = flatten(&schist::print_program(&reduced.body));
    assert!(out.contains("try"));
    assert!(out.contains("catch (e)"));
    assert!(out.contains("x = 2;"));
}

#[test]
fn mixed_control_transfers_in_try_are_diagnosed() {
    let src = "
        let b = __abstract(\"b\");
        try {
            if (b) { throw \"t\"; } else { return 1; }
        } catch (e) {
            let handled = e;
        }
    ";
    let diags = diagnostics_of(src).unwrap();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, "PE1011");
}

#[test]
fn maybe_returning_try_leaves_the_handler_dead() {
    let src = "
        let b = __abstract(\"b\");
        let x = 0;
        try {
            if (b) { return 1; }
        } catch (e) {
            x = 99;
        }
    ";
    let reduced = reduce(src).unwrap();
    assert!(reduced.diagnostics.is_empty());
    // Nothing throws, so the handler cannot run.
    assert!(matches!(&reduced.completion, Completion::PossiblyAbrupt(pa)
        if matches!(&*pa.abrupt, AbruptCompletion::Return(_))));
    let out = flatten(&schist::print_program(&reduced.body));
    assert!(!out.contains("x = 99"));
}
