//! Property tests: the sandbox must roll back exactly, commits must land
//! exactly once, joins must keep both arms, and evaluation must be
//! deterministic.

use proptest::prelude::*;

use schist::completions::Completion;
use schist::effects::{Effects, EvalState};
use schist::join::join_effects;
use schist::test_support::reduce;
use schist::values::{conditional_value, negated_value, Constant, TruthRange, Value};
use schist::print_program;

fn arb_constant() -> BoxedStrategy<Constant> {
    prop_oneof![
        any::<bool>().prop_map(Constant::Bool),
        (-1000i32..1000).prop_map(|n| Constant::Number(f64::from(n))),
        "[a-z]{0,6}".prop_map(|s| Constant::Str(s.into())),
        Just(Constant::Null),
        Just(Constant::Undefined),
    ]
    .boxed()
}

fn arb_value() -> BoxedStrategy<Value> {
    arb_constant().prop_map(Value::Concrete).boxed()
}

/// Distinctly named bindings with arbitrary initial and overwritten values.
fn arb_writes() -> BoxedStrategy<Vec<(String, Value, Value)>> {
    prop::collection::vec((arb_value(), arb_value()), 1..8)
        .prop_map(|pairs| {
            pairs
                .into_iter()
                .enumerate()
                .map(|(i, (initial, updated))| (format!("v{}", i), initial, updated))
                .collect()
        })
        .boxed()
}

proptest! {
    #[test]
    fn rollback_restores_every_binding(writes in arb_writes()) {
        let mut state = EvalState::new();
        let bindings: Vec<_> = writes
            .iter()
            .map(|(name, initial, _)| state.declare(name, initial.clone()))
            .collect();

        state.capture_effects();
        for (binding, (_, _, updated)) in bindings.iter().zip(&writes) {
            state.write_binding(binding, updated.clone());
        }
        let created = state.create_object();
        state.set_property(created, "p", Value::number(1.0)).unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();

        for (binding, (_, initial, _)) in bindings.iter().zip(&writes) {
            let got = state.read_binding(binding);
            prop_assert_eq!(got.as_ref(), Some(initial));
        }
        // The speculatively created object died with the rollback.
        prop_assert!(!state.object_is_live(created));
    }

    #[test]
    fn committed_writes_land_exactly_once(writes in arb_writes()) {
        let mut state = EvalState::new();
        let bindings: Vec<_> = writes
            .iter()
            .map(|(name, initial, _)| state.declare(name, initial.clone()))
            .collect();

        state.capture_effects();
        for (binding, (_, _, updated)) in bindings.iter().zip(&writes) {
            state.write_binding(binding, updated.clone());
        }
        let effects = state
            .get_captured_effects(Completion::Normal(Value::undefined()))
            .unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();
        state.apply_effects(effects).unwrap();

        for (binding, (_, _, updated)) in bindings.iter().zip(&writes) {
            let got = state.read_binding(binding);
            prop_assert_eq!(got.as_ref(), Some(updated));
        }
    }

    #[test]
    fn join_keeps_both_arms(con in arb_value(), alt in arb_value()) {
        let mut state = EvalState::new();
        let binding = state.declare("x", Value::undefined());
        let cond = Value::abstract_input(&mut state.ids, "c", TruthRange::Any);

        state.capture_effects();
        state.write_binding(&binding, con.clone());
        let consequent = state
            .get_captured_effects(Completion::Normal(Value::undefined()))
            .unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();

        state.capture_effects();
        state.write_binding(&binding, alt.clone());
        let alternate = state
            .get_captured_effects(Completion::Normal(Value::undefined()))
            .unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();

        let joined = join_effects(&mut state, &cond, consequent, alternate).unwrap();
        let expected = conditional_value(&mut state.ids, &cond, con, alt);
        let change = joined.bindings.get(&binding).unwrap();
        prop_assert_eq!(&change.new, &expected);
    }

    #[test]
    fn conditional_with_equal_arms_is_that_arm(cond_name in "[a-z]{1,4}", v in arb_value()) {
        let mut state = EvalState::new();
        let cond = Value::abstract_input(&mut state.ids, &cond_name, TruthRange::Any);
        let joined = conditional_value(&mut state.ids, &cond, v.clone(), v.clone());
        prop_assert_eq!(joined, v);
    }

    #[test]
    fn double_negation_of_a_constant_is_its_truthiness(c in arb_constant()) {
        let mut state = EvalState::new();
        let value = Value::Concrete(c.clone());
        let once = negated_value(&mut state.ids, &value);
        let twice = negated_value(&mut state.ids, &once);
        prop_assert_eq!(twice, Value::bool(c.is_truthy()));
    }

    #[test]
    fn empty_join_sides_produce_an_empty_record(cond_name in "[a-z]{1,4}") {
        let mut state = EvalState::new();
        let cond = Value::abstract_input(&mut state.ids, &cond_name, TruthRange::Any);
        let one = Effects::empty().with_completion(Completion::Normal(Value::undefined()));
        let two = Effects::empty().with_completion(Completion::Normal(Value::undefined()));
        let joined = join_effects(&mut state, &cond, one, two).unwrap();
        prop_assert!(joined.bindings.is_empty());
        prop_assert!(joined.properties.is_empty());
        prop_assert!(joined.created_objects.is_empty());
    }

    #[test]
    fn arithmetic_folds_like_the_host(a in -500i32..500, b in -500i32..500) {
        let src = format!("let r = {} + {} * 2;", a, b);
        let reduced = reduce(&src).unwrap();
        let got = reduced
            .effects
            .bindings
            .iter()
            .find(|(binding, _)| binding.name == "r")
            .map(|(_, change)| change.new.clone());
        prop_assert_eq!(got, Some(Value::number(f64::from(a) + f64::from(b) * 2.0)));
    }

    #[test]
    fn evaluation_is_deterministic(a in -50i32..50, b in -50i32..50) {
        let src = format!(
            "let x = {}; let n = __abstract(\"n\"); if (n) {{ x = {}; }} let y = x + 1;",
            a, b
        );
        let first = reduce(&src).unwrap();
        let second = reduce(&src).unwrap();
        prop_assert_eq!(print_program(&first.body), print_program(&second.body));
        prop_assert_eq!(first.completion, second.completion);
        prop_assert_eq!(first.diagnostics.len(), second.diagnostics.len());
    }

    #[test]
    fn residual_output_reparses_to_the_same_text(a in -50i32..50, b in -50i32..50) {
        let src = format!(
            "let n = __abstract(\"n\"); let x = {}; if (n) {{ x = x + {}; }}",
            a, b
        );
        let reduced = reduce(&src).unwrap();
        let printed = print_program(&reduced.body);
        let reparsed = schist::parse_source(&printed).unwrap();
        prop_assert_eq!(print_program(&reparsed.body), printed);
    }
}
