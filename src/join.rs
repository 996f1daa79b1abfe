//! Joining the effects of mutually-exclusive branches.
//!
//! Given a condition whose runtime truth is unknown and the captured
//! effects of its two branches, produce one record describing "if cond
//! then these effects else those effects". Joined binding and property
//! values are conditional abstract values; joined completions track which
//! control transfers are still possible and on what condition.
//!
//! Residual statements are deliberately NOT merged here: each branch's
//! residual code becomes an arm of the residual construct, which is the
//! evaluator's job to assemble.

use std::collections::BTreeSet;

use log::debug;

use crate::completions::{AbruptCompletion, Completion, PossiblyAbrupt};
use crate::diagnostics::EvalResult;
use crate::effects::{Effects, EvalState};
use crate::invariant;
use crate::values::{conditional_value, Value};

/// Join two effect records under an unknown condition.
///
/// Callers guarantee `cond` is genuinely unknown (could be truthy AND could
/// be falsy); statically resolved conditions never reach the join.
pub fn join_effects(
    state: &mut EvalState,
    cond: &Value,
    consequent: Effects,
    alternate: Effects,
) -> EvalResult<Effects> {
    invariant!(
        cond.might_be_truthy() && cond.might_be_falsy(),
        "join_effects called with a statically resolved condition"
    );
    debug!(
        "join_effects: {}+{} bindings, {}+{} properties",
        consequent.bindings.len(),
        alternate.bindings.len(),
        consequent.properties.len(),
        alternate.properties.len()
    );

    let completion = join_completions(
        state,
        cond,
        consequent.completion.clone(),
        alternate.completion.clone(),
    )?;

    // Bindings: for a variable touched on only one side, the other side
    // keeps the pre-branch value (the recorded old value; both branches
    // were captured from the same pre-state).
    let mut bindings = consequent.bindings.clone();
    for (binding, alt_change) in &alternate.bindings {
        match consequent.bindings.get(binding) {
            Some(con_change) => {
                let joined = conditional_value(
                    &mut state.ids,
                    cond,
                    con_change.new.clone(),
                    alt_change.new.clone(),
                );
                let entry = bindings.get_mut(binding).unwrap();
                entry.new = joined;
            }
            None => {
                let pre = alt_change.old.clone().unwrap_or_else(Value::undefined);
                let joined =
                    conditional_value(&mut state.ids, cond, pre, alt_change.new.clone());
                let mut change = alt_change.clone();
                change.new = joined;
                bindings.insert(binding.clone(), change);
            }
        }
    }
    for (binding, change) in bindings.iter_mut() {
        if !alternate.bindings.contains_key(binding) {
            let pre = change.old.clone().unwrap_or_else(Value::undefined);
            change.new = conditional_value(&mut state.ids, cond, change.new.clone(), pre);
        }
    }

    // Properties: same rule per (object, key).
    let mut properties = consequent.properties.clone();
    for (prop, alt_change) in &alternate.properties {
        match consequent.properties.get(prop) {
            Some(con_change) => {
                let joined = conditional_value(
                    &mut state.ids,
                    cond,
                    con_change.new.clone(),
                    alt_change.new.clone(),
                );
                properties.get_mut(prop).unwrap().new = joined;
            }
            None => {
                let pre = alt_change.old.clone().unwrap_or_else(Value::undefined);
                let joined =
                    conditional_value(&mut state.ids, cond, pre, alt_change.new.clone());
                let mut change = alt_change.clone();
                change.new = joined;
                properties.insert(prop.clone(), change);
            }
        }
    }
    for (prop, change) in properties.iter_mut() {
        if !alternate.properties.contains_key(prop) {
            let pre = change.old.clone().unwrap_or_else(Value::undefined);
            change.new = conditional_value(&mut state.ids, cond, change.new.clone(), pre);
        }
    }

    // Created objects: union. Same-shaped allocations on both branches stay
    // distinct identities.
    let created_objects: BTreeSet<_> = consequent
        .created_objects
        .union(&alternate.created_objects)
        .copied()
        .collect();

    Ok(Effects {
        completion,
        residual: Vec::new(),
        bindings,
        properties,
        created_objects,
    })
}

/// Decomposition of a completion into (abrupt-gate, abrupt part, normal
/// value): a plain normal completion is never abrupt, a plain abrupt
/// completion always is, a possibly-abrupt one is gated.
fn parts(c: Completion) -> (Value, Option<AbruptCompletion>, Option<Value>) {
    match c {
        Completion::Normal(v) => (Value::bool(false), None, Some(v)),
        Completion::Abrupt(a) => (Value::bool(true), Some(a), None),
        Completion::PossiblyAbrupt(pa) => (pa.gate, Some(*pa.abrupt), Some(pa.normal_value)),
    }
}

/// Join two completions under an unknown condition.
pub fn join_completions(
    state: &mut EvalState,
    cond: &Value,
    consequent: Completion,
    alternate: Completion,
) -> EvalResult<Completion> {
    invariant!(
        cond.might_be_truthy() && cond.might_be_falsy(),
        "join_completions called with a statically resolved condition"
    );

    let (gate_c, abrupt_c, normal_c) = parts(consequent);
    let (gate_a, abrupt_a, normal_a) = parts(alternate);

    let gate = conditional_value(&mut state.ids, cond, gate_c, gate_a);

    let abrupt = match (abrupt_c, abrupt_a) {
        (None, None) => None,
        (Some(a), None) | (None, Some(a)) => Some(a),
        (Some(a1), Some(a2)) => Some(join_abrupt(state, cond, a1, a2)),
    };

    let normal_value = match (normal_c, normal_a) {
        (Some(n1), Some(n2)) => Some(conditional_value(&mut state.ids, cond, n1, n2)),
        (Some(n), None) | (None, Some(n)) => Some(n),
        (None, None) => None,
    };

    if !gate.might_be_truthy() {
        // Neither side transfers control.
        return Ok(Completion::Normal(
            normal_value.unwrap_or_else(Value::empty),
        ));
    }
    if !gate.might_be_falsy() {
        // Both sides transfer control.
        let a = match abrupt {
            Some(a) => a,
            None => {
                return Err(crate::diagnostics::EngineError::Invariant(
                    "always-abrupt join with no abrupt completion".into(),
                ))
            }
        };
        return Ok(Completion::Abrupt(a));
    }

    let a = match abrupt {
        Some(a) => a,
        None => {
            return Err(crate::diagnostics::EngineError::Invariant(
                "possibly-abrupt join with no abrupt completion".into(),
            ))
        }
    };
    Ok(Completion::PossiblyAbrupt(PossiblyAbrupt {
        gate,
        abrupt: Box::new(a),
        normal_value: normal_value.unwrap_or_else(Value::undefined),
    }))
}

/// Join two abrupt completions. Same-kind pairs merge into one completion
/// with a conditionally-joined payload; different kinds stay a gated
/// disjoint pair.
fn join_abrupt(
    state: &mut EvalState,
    cond: &Value,
    when_true: AbruptCompletion,
    when_false: AbruptCompletion,
) -> AbruptCompletion {
    use AbruptCompletion::*;
    match (when_true, when_false) {
        (Return(v1), Return(v2)) => Return(conditional_value(&mut state.ids, cond, v1, v2)),
        (Throw(v1), Throw(v2)) => Throw(conditional_value(&mut state.ids, cond, v1, v2)),
        (Break(l1), Break(l2)) if l1 == l2 => Break(l1),
        (Continue(l1), Continue(l2)) if l1 == l2 => Continue(l1),
        (a1, a2) => Joined {
            condition: cond.clone(),
            when_true: Box::new(a1),
            when_false: Box::new(a2),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{AbstractSource, TruthRange};

    fn unknown(state: &mut EvalState, name: &str) -> Value {
        Value::abstract_input(&mut state.ids, name, TruthRange::Any)
    }

    #[test]
    fn join_rejects_resolved_conditions() {
        let mut state = EvalState::new();
        let err = join_effects(
            &mut state,
            &Value::bool(true),
            Effects::empty(),
            Effects::empty(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn both_normal_joins_values() {
        let mut state = EvalState::new();
        let cond = unknown(&mut state, "c");
        let joined = join_completions(
            &mut state,
            &cond,
            Completion::normal(Value::number(1.0)),
            Completion::normal(Value::number(2.0)),
        )
        .unwrap();
        let Completion::Normal(Value::Abstract(a)) = joined else {
            panic!("expected a joined abstract normal value, got {:?}", joined);
        };
        assert!(matches!(a.source, AbstractSource::Conditional { .. }));
    }

    #[test]
    fn one_abrupt_side_gates_on_the_condition() {
        let mut state = EvalState::new();
        let cond = unknown(&mut state, "c");
        let joined = join_completions(
            &mut state,
            &cond,
            Completion::throw(Value::number(1.0)),
            Completion::normal(Value::undefined()),
        )
        .unwrap();
        let Completion::PossiblyAbrupt(pa) = joined else {
            panic!("expected possibly-abrupt, got {:?}", joined);
        };
        // true/false gate collapses to the condition itself.
        assert_eq!(pa.gate, cond);
        assert_eq!(*pa.abrupt, AbruptCompletion::Throw(Value::number(1.0)));
    }

    #[test]
    fn same_kind_abrupt_merges_payload() {
        let mut state = EvalState::new();
        let cond = unknown(&mut state, "c");
        let joined = join_completions(
            &mut state,
            &cond,
            Completion::Abrupt(AbruptCompletion::Return(Value::number(1.0))),
            Completion::Abrupt(AbruptCompletion::Return(Value::number(2.0))),
        )
        .unwrap();
        let Completion::Abrupt(AbruptCompletion::Return(Value::Abstract(a))) = joined else {
            panic!("expected abrupt return, got {:?}", joined);
        };
        assert!(matches!(a.source, AbstractSource::Conditional { .. }));
    }

    #[test]
    fn different_kind_abrupt_stays_a_disjoint_pair() {
        let mut state = EvalState::new();
        let cond = unknown(&mut state, "c");
        let joined = join_completions(
            &mut state,
            &cond,
            Completion::Abrupt(AbruptCompletion::Throw(Value::number(1.0))),
            Completion::Abrupt(AbruptCompletion::Return(Value::number(2.0))),
        )
        .unwrap();
        let Completion::Abrupt(AbruptCompletion::Joined {
            condition,
            when_true,
            when_false,
        }) = joined
        else {
            panic!("expected a gated disjoint pair, got {:?}", joined);
        };
        assert_eq!(condition, cond);
        assert!(matches!(*when_true, AbruptCompletion::Throw(_)));
        assert!(matches!(*when_false, AbruptCompletion::Return(_)));
    }

    #[test]
    fn binding_touched_on_one_side_joins_with_pre_branch_value() {
        let mut state = EvalState::new();
        let x = state.declare("x", Value::number(0.0));
        let cond = unknown(&mut state, "c");

        state.capture_effects();
        state.write_binding(&x, Value::number(1.0));
        let con = state
            .get_captured_effects(Completion::normal(Value::undefined()))
            .unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();

        let alt = state
            .construct_empty_effects()
            .with_completion(Completion::normal(Value::undefined()));
        let joined = join_effects(&mut state, &cond, con, alt).unwrap();

        let change = &joined.bindings[&x];
        let Value::Abstract(a) = &change.new else {
            panic!("expected joined abstract value, got {:?}", change.new);
        };
        let AbstractSource::Conditional {
            consequent,
            alternate,
            ..
        } = &a.source
        else {
            panic!("expected conditional provenance");
        };
        assert_eq!(consequent, &Value::number(1.0));
        assert_eq!(alternate, &Value::number(0.0));
    }

    #[test]
    fn created_objects_union_keeps_distinct_identities() {
        let mut state = EvalState::new();
        let cond = unknown(&mut state, "c");

        state.capture_effects();
        let a = state.create_object();
        let con = state
            .get_captured_effects(Completion::normal(Value::undefined()))
            .unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();

        state.capture_effects();
        let b = state.create_object();
        let alt = state
            .get_captured_effects(Completion::normal(Value::undefined()))
            .unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();

        let joined = join_effects(&mut state, &cond, con, alt).unwrap();
        assert!(joined.created_objects.contains(&a));
        assert!(joined.created_objects.contains(&b));
        assert_ne!(a, b);
    }
}
