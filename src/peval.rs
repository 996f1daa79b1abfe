//! The partial evaluator: one evaluator per construct, all dispatched from
//! a single exhaustive match over the closed statement/expression unions.
//!
//! Every statement evaluator returns `(completion, residual node, pending
//! residual statements)`. The conditional statement is the reference
//! implementation of the sandbox/join protocol; loops, switches, logical
//! operators, ternaries and try/catch all follow its shape: resolve the
//! governing condition statically when possible, otherwise sandbox each
//! disjoint outcome, join the captured effects keyed on the condition, and
//! keep capturing while control has not fully reconverged.

use std::rc::Rc;

use log::debug;

use crate::ast::{
    absorb_pending, block_stmt, empty_stmt, expr_stmt, if_stmt, is_trivial, BinOp, Expr, ExprKind,
    Ident, Literal, LogicalOp, Program, Span, Stmt, StmtKind, SwitchCase, UnaryOp,
};
use crate::completions::{update_empty, AbruptCompletion, Completion, PossiblyAbrupt};
use crate::diagnostics::{codes, Diagnostic, EngineError, EvalResult, Recovery, Severity};
use crate::effects::{Effects, EvalState};
use crate::errors::find_similar;
use crate::join::join_effects;
use crate::values::{
    constant_to_expr, format_number, negated_value, AbstractSource, AbstractValue, Constant,
    TruthRange, Value,
};

/// Names the evaluator resolves itself instead of looking up as bindings.
const INTRINSIC_ABSTRACT: &str = "__abstract";
const INTRINSIC_ABSTRACT_TRUTHY: &str = "__abstract_truthy";
const INTRINSIC_ABSTRACT_FALSY: &str = "__abstract_falsy";

/// The strategy for iteration constructs: how many concretely-true guard
/// evaluations to unroll before giving up and widening.
#[derive(Debug, Clone)]
pub struct LoopPolicy {
    pub max_unroll: usize,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        LoopPolicy { max_unroll: 64 }
    }
}

/// The output of partially evaluating a whole program: the reduced body,
/// the completion it reaches, the captured effect record, and every
/// diagnostic raised along the way (in emission order).
#[derive(Debug, Clone)]
pub struct ReducedProgram {
    pub body: Vec<Stmt>,
    pub completion: Completion,
    pub effects: Effects,
    pub diagnostics: Vec<Diagnostic>,
}

/// The partial evaluator.
pub struct Evaluator<'h> {
    pub state: EvalState,
    pub loop_policy: LoopPolicy,
    /// Diagnostics raised so far, in emission order.
    pub diagnostics: Vec<Diagnostic>,
    handler: Box<dyn FnMut(&Diagnostic) -> Recovery + 'h>,
    /// Counter for synthesized names (widened provenance labels, residual
    /// bindings and labels).
    synth_counter: u32,
}

impl<'h> Default for Evaluator<'h> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'h> Evaluator<'h> {
    /// An evaluator whose handler aborts on every diagnostic.
    pub fn new() -> Self {
        Self::with_handler(Box::new(|_| Recovery::Fail))
    }

    /// An evaluator with an injected diagnostic handler.
    pub fn with_handler(handler: Box<dyn FnMut(&Diagnostic) -> Recovery + 'h>) -> Self {
        Evaluator {
            state: EvalState::new(),
            loop_policy: LoopPolicy::default(),
            diagnostics: Vec::new(),
            handler,
            synth_counter: 0,
        }
    }

    /// An evaluator whose handler always answers with `mode`.
    pub fn with_recovery(mode: Recovery) -> Self {
        Self::with_handler(Box::new(move |_| mode))
    }

    /// Report a static user-program diagnostic. Fatal diagnostics and a
    /// `Fail` answer from the handler abort the evaluation call; otherwise
    /// the caller continues with a placeholder value.
    fn report(&mut self, diagnostic: Diagnostic) -> EvalResult<()> {
        debug!("diagnostic: {}", diagnostic);
        let decision = (self.handler)(&diagnostic);
        self.diagnostics.push(diagnostic.clone());
        if diagnostic.severity == Severity::FatalError || decision == Recovery::Fail {
            return Err(EngineError::Fatal { diagnostic });
        }
        Ok(())
    }

    fn fresh_abstract(&mut self, source: AbstractSource, range: TruthRange) -> Value {
        Value::Abstract(Rc::new(AbstractValue {
            id: self.state.ids.fresh(),
            range,
            source,
        }))
    }

    fn synth_name(&mut self, prefix: &str) -> String {
        let n = self.synth_counter;
        self.synth_counter += 1;
        format!("{}#{}", prefix, n)
    }

    /// A fresh name for a binding that appears in residual code. Unlike
    /// `synth_name` it must lex as an identifier, and it must not shadow
    /// anything visible in scope.
    fn synth_ident(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("__{}{}", prefix, self.synth_counter);
            self.synth_counter += 1;
            if self.state.lookup(&name).is_none() {
                return name;
            }
        }
    }

    /// Unwind open capture scopes down to `depth`, rolling each back. Used
    /// when an engine error propagates out of a sandboxed region: the LIFO
    /// discipline holds even on the failure path.
    fn unwind_to_depth(&mut self, depth: usize) {
        while self.state.capture_depth() > depth {
            if self.state.stop_effect_capture_and_undo_effects().is_err() {
                break;
            }
        }
    }

    /// Continue evaluating past an outstanding possibly-abrupt completion:
    /// open a capture scope, evaluate the rest with the normal-path value,
    /// then join the rest's effects against the abrupt path, keyed on the
    /// gate. The rest only happens when the gate is falsy.
    fn with_gated_rest<T>(
        &mut self,
        pa: PossiblyAbrupt,
        f: impl FnOnce(&mut Self, Value) -> EvalResult<(Completion, T)>,
    ) -> EvalResult<(Completion, T)> {
        let depth = self.state.capture_depth();
        self.state.capture_effects();
        let (completion, out) = match f(self, pa.normal_value.clone()) {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        let rest = self.state.get_captured_effects(completion)?;
        self.state.stop_effect_capture_and_undo_effects()?;
        let abrupt_side =
            Effects::empty().with_completion(Completion::Abrupt((*pa.abrupt).clone()));
        let joined = join_effects(&mut self.state, &pa.gate, abrupt_side, rest)?;
        let completion = joined.completion.clone();
        self.state.apply_effects(joined)?;
        Ok((completion, out))
    }

    /// Adapter so `with_gated_rest` can carry the statement triple.
    fn with_gated_rest_stmt(
        &mut self,
        pa: PossiblyAbrupt,
        f: impl FnOnce(&mut Self, Value) -> EvalResult<(Completion, (Stmt, Vec<Stmt>))>,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let (c, (node, io)) = self.with_gated_rest(pa, f)?;
        Ok((c, node, io))
    }

    // ====================================================================
    // Program and statement sequences
    // ====================================================================

    /// Partially evaluate a whole program. The evaluation runs under one
    /// outer capture scope so the returned effect record describes
    /// everything the program did; the scope is rolled back afterwards,
    /// leaving the evaluator state untouched.
    pub fn evaluate_program(
        &mut self,
        program: &Program,
        strict: bool,
    ) -> EvalResult<ReducedProgram> {
        let depth = self.state.capture_depth();
        self.state.capture_effects();
        let (completion, body) = match self.eval_block_body(&program.body, strict) {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        let completion = update_empty(completion, Value::undefined());
        let effects = self.state.get_captured_effects(completion.clone())?;
        self.state.stop_effect_capture_and_undo_effects()?;
        Ok(ReducedProgram {
            body,
            completion,
            effects,
            diagnostics: self.diagnostics.clone(),
        })
    }

    /// Evaluate a statement sequence. Sub-statements that complete
    /// possibly-abruptly leave a capture scope open (control has not
    /// reconverged); those scopes are folded here, innermost first, so the
    /// effects of later statements end up gated on the earlier statement
    /// not having transferred control.
    fn eval_block_body(
        &mut self,
        stmts: &[Stmt],
        strict: bool,
    ) -> EvalResult<(Completion, Vec<Stmt>)> {
        let base_depth = self.state.capture_depth();
        let mut pending: Vec<PossiblyAbrupt> = Vec::new();
        let mut residual: Vec<Stmt> = Vec::new();
        let mut last = Value::empty();
        let mut halted: Option<Completion> = None;

        for stmt in stmts {
            let result = self.partially_evaluate_statement(stmt, strict);
            let (c, node, io) = match result {
                Ok(v) => v,
                Err(e) => {
                    self.unwind_to_depth(base_depth);
                    return Err(e);
                }
            };
            residual.extend(io);
            if !is_trivial(&node) {
                residual.push(node);
            }
            match c {
                Completion::Normal(v) => {
                    if !v.is_empty_marker() {
                        last = v;
                    }
                }
                Completion::Abrupt(a) => {
                    halted = Some(Completion::Abrupt(a));
                    break;
                }
                Completion::PossiblyAbrupt(pa) => {
                    if !pa.normal_value.is_empty_marker() {
                        last = pa.normal_value.clone();
                    }
                    pending.push(pa);
                }
            }
        }

        let mut completion = halted.unwrap_or(Completion::Normal(last));
        for pa in pending.into_iter().rev() {
            let folded = (|| -> EvalResult<Completion> {
                let rest = self.state.get_captured_effects(completion.clone())?;
                self.state.stop_effect_capture_and_undo_effects()?;
                let abrupt_side =
                    Effects::empty().with_completion(Completion::Abrupt((*pa.abrupt).clone()));
                let joined = join_effects(&mut self.state, &pa.gate, abrupt_side, rest)?;
                let c = joined.completion.clone();
                self.state.apply_effects(joined)?;
                Ok(c)
            })();
            completion = match folded {
                Ok(c) => c,
                Err(e) => {
                    self.unwind_to_depth(base_depth);
                    return Err(e);
                }
            };
        }
        Ok((completion, residual))
    }

    // ====================================================================
    // Statement dispatch
    // ====================================================================

    /// Partially evaluate one statement. This is the public entry point of
    /// the core: it returns the completion, the residual statement, and any
    /// pending residual statements that must precede it.
    ///
    /// If the completion is possibly-abrupt, a capture scope has been
    /// (re)opened for the code that follows; the caller (normally the
    /// enclosing statement sequence) is responsible for eventually folding
    /// and closing it.
    pub fn partially_evaluate_statement(
        &mut self,
        stmt: &Stmt,
        strict: bool,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let (completion, node, io) = self.eval_stmt(stmt, strict)?;
        if matches!(completion, Completion::PossiblyAbrupt(_)) {
            // Control may not have transferred: keep tracking effects until
            // all branches come back together.
            self.state.capture_effects();
        }
        Ok((completion, node, io))
    }

    /// Exhaustive dispatch over statement kinds.
    fn eval_stmt(&mut self, stmt: &Stmt, strict: bool) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        match &stmt.node {
            StmtKind::Empty => Ok((Completion::empty(), empty_stmt(), vec![])),

            StmtKind::Expression(expr) => {
                let (c, reduced) = self.eval_expr(expr, strict)?;
                Ok((c, expr_stmt(reduced), vec![]))
            }

            StmtKind::Let { name, init } => self.eval_let(name, init.as_ref(), strict, &stmt.span),

            StmtKind::Block(body) => {
                self.state.push_scope();
                let result = self.eval_block_body(body, strict);
                self.state.pop_scope();
                let (completion, residual) = result?;
                Ok((completion, block_stmt(residual), vec![]))
            }

            StmtKind::If {
                test,
                consequent,
                alternate,
            } => self.eval_if(test, consequent, alternate.as_deref(), strict),

            StmtKind::While { test, body } => self.eval_while(None, test, body, strict, &stmt.span),

            StmtKind::Switch {
                discriminant,
                cases,
            } => self.eval_switch(discriminant, cases, strict, &stmt.span),

            StmtKind::Return(arg) => match arg {
                Some(expr) => {
                    let (c, reduced) = self.eval_expr(expr, strict)?;
                    match resolve(c, reduced) {
                        Resolved::Value(v, e) => Ok((
                            Completion::Abrupt(AbruptCompletion::Return(v)),
                            Stmt::synthetic(StmtKind::Return(Some(e))),
                            vec![],
                        )),
                        Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), expr_stmt(e), vec![])),
                        Resolved::Gated(pa, e) => self.with_gated_rest_stmt(pa, move |_ev, v| {
                            Ok((
                                Completion::Abrupt(AbruptCompletion::Return(v)),
                                (Stmt::synthetic(StmtKind::Return(Some(e))), vec![]),
                            ))
                        }),
                    }
                }
                None => Ok((
                    Completion::Abrupt(AbruptCompletion::Return(Value::undefined())),
                    Stmt::synthetic(StmtKind::Return(None)),
                    vec![],
                )),
            },

            StmtKind::Break(label) => Ok((
                Completion::Abrupt(AbruptCompletion::Break(label.clone())),
                stmt.clone(),
                vec![],
            )),

            StmtKind::Continue(label) => Ok((
                Completion::Abrupt(AbruptCompletion::Continue(label.clone())),
                stmt.clone(),
                vec![],
            )),

            StmtKind::Throw(expr) => {
                let (c, reduced) = self.eval_expr(expr, strict)?;
                match resolve(c, reduced) {
                    Resolved::Value(v, e) => Ok((
                        Completion::Abrupt(AbruptCompletion::Throw(v)),
                        Stmt::synthetic(StmtKind::Throw(e)),
                        vec![],
                    )),
                    Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), expr_stmt(e), vec![])),
                    Resolved::Gated(pa, e) => self.with_gated_rest_stmt(pa, move |_ev, v| {
                        Ok((
                            Completion::Abrupt(AbruptCompletion::Throw(v)),
                            (Stmt::synthetic(StmtKind::Throw(e)), vec![]),
                        ))
                    }),
                }
            }

            StmtKind::Try {
                block,
                param,
                handler,
            } => self.eval_try(block, param, handler, strict),

            StmtKind::Labeled { label, body } => self.eval_labeled(label, body, strict),
        }
    }

    // ====================================================================
    // let declarations
    // ====================================================================

    fn eval_let(
        &mut self,
        name: &str,
        init: Option<&Expr>,
        strict: bool,
        span: &Span,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let (value, reduced_init) = match init {
            Some(expr) => {
                let (c, reduced) = self.eval_expr(expr, strict)?;
                match resolve(c, reduced) {
                    Resolved::Value(v, e) => (v, Some(e)),
                    Resolved::Abrupt(a, e) => {
                        return Ok((Completion::Abrupt(a), expr_stmt(e), vec![]))
                    }
                    Resolved::Gated(pa, e) => {
                        let name = name.to_string();
                        let span = span.clone();
                        return self.with_gated_rest_stmt(pa, move |ev, v| {
                            ev.declare_checked(&name, v, &span)?;
                            Ok((
                                Completion::empty(),
                                (
                                    Stmt::synthetic(StmtKind::Let {
                                        name,
                                        init: Some(e),
                                    }),
                                    vec![],
                                ),
                            ))
                        });
                    }
                }
            }
            None => (Value::undefined(), None),
        };
        self.declare_checked(name, value, span)?;
        Ok((
            Completion::empty(),
            Stmt::synthetic(StmtKind::Let {
                name: name.to_string(),
                init: reduced_init,
            }),
            vec![],
        ))
    }

    fn declare_checked(&mut self, name: &str, value: Value, span: &Span) -> EvalResult<()> {
        if self.state.declared_here(name) {
            self.report(Diagnostic::new(
                Severity::RecoverableError,
                codes::REDECLARATION,
                format!("`{}` is already declared in this scope", name),
                span.clone(),
            ))?;
        }
        self.state.declare(name, value);
        Ok(())
    }

    // ====================================================================
    // The conditional statement (reference construct)
    // ====================================================================

    fn eval_if(
        &mut self,
        test: &Expr,
        consequent: &Stmt,
        alternate: Option<&Stmt>,
        strict: bool,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let (test_c, test_expr) = self.eval_expr(test, strict)?;
        match resolve(test_c, test_expr) {
            // 1. An abruptly completing guard propagates immediately; no
            //    branch is evaluated at all.
            Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), expr_stmt(e), vec![])),
            Resolved::Gated(pa, e) => {
                let consequent = consequent.clone();
                let alternate = alternate.cloned();
                self.with_gated_rest_stmt(pa, move |ev, v| {
                    let (c, node, io) =
                        ev.eval_if_resolved(v, e, &consequent, alternate.as_ref(), strict)?;
                    Ok((c, (node, io)))
                })
            }
            Resolved::Value(v, e) => self.eval_if_resolved(v, e, consequent, alternate, strict),
        }
    }

    /// Steps 2-4 of the conditional algorithm, once the guard is a value.
    fn eval_if_resolved(
        &mut self,
        test_value: Value,
        test_expr: Expr,
        consequent: &Stmt,
        alternate: Option<&Stmt>,
        strict: bool,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let guard_io = self.impure_guard_residual(&test_expr);

        // 2. Guard cannot be false: only the consequent runs.
        if !test_value.might_be_falsy() {
            let (c, node, mut io) = self.eval_stmt(consequent, strict)?;
            let c = update_empty(c, Value::undefined());
            let mut pending = guard_io;
            pending.append(&mut io);
            return Ok((c, node, pending));
        }

        // 3. Guard cannot be true: only the alternate runs (an absent
        //    alternate is an empty statement completing with undefined).
        if !test_value.might_be_truthy() {
            let (c, node, mut io) = match alternate {
                Some(stmt) => self.eval_stmt(stmt, strict)?,
                None => (Completion::Normal(Value::undefined()), empty_stmt(), vec![]),
            };
            let c = update_empty(c, Value::undefined());
            let mut pending = guard_io;
            pending.append(&mut io);
            return Ok((c, node, pending));
        }

        // 4. A genuinely unknown guard: sandbox each branch, join.
        let depth = self.state.capture_depth();
        self.state.capture_effects();
        let consequent_result = self.eval_stmt(consequent, strict);
        let (con_c, con_node, con_io) = match consequent_result {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        let con_c = update_empty(con_c, Value::undefined());
        let consequent_effects = self.state.get_captured_effects(con_c)?;
        self.state.stop_effect_capture_and_undo_effects()?;
        let consequent_node = absorb_pending(con_io, con_node);

        let (alternate_effects, alternate_node) = match alternate {
            Some(alt) => {
                self.state.capture_effects();
                let result = self.eval_stmt(alt, strict);
                let (alt_c, alt_node, alt_io) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        self.unwind_to_depth(depth);
                        return Err(e);
                    }
                };
                let alt_c = update_empty(alt_c, Value::undefined());
                let effects = self.state.get_captured_effects(alt_c)?;
                self.state.stop_effect_capture_and_undo_effects()?;
                (effects, Some(absorb_pending(alt_io, alt_node)))
            }
            None => (
                self.state
                    .construct_empty_effects()
                    .with_completion(Completion::Normal(Value::undefined())),
                None,
            ),
        };

        // Join the two effect records into one abstract view of what
        // happened, regardless of the guard's runtime value.
        let joined = join_effects(
            &mut self.state,
            &test_value,
            consequent_effects,
            alternate_effects,
        )?;
        let completion = joined.completion.clone();
        self.state.apply_effects(joined)?;

        // The residual `if` re-evaluates the guard itself; no pending
        // statement, or an impure guard would run twice.
        let node = if_stmt(test_expr, consequent_node, alternate_node);
        Ok((completion, node, vec![]))
    }

    /// When a statically decided construct drops its guard from the
    /// residual, an impure guard must still run: keep it as an expression
    /// statement.
    fn impure_guard_residual(&self, test_expr: &Expr) -> Vec<Stmt> {
        if expr_is_pure(test_expr) {
            vec![]
        } else {
            vec![expr_stmt(test_expr.clone())]
        }
    }

    // ====================================================================
    // while loops
    // ====================================================================

    fn eval_while(
        &mut self,
        label: Option<&str>,
        test: &Expr,
        body: &Stmt,
        strict: bool,
        span: &Span,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        // Attempt to resolve the loop completely by unrolling inside a
        // sandbox. If it settles, commit the attempt; otherwise discard it
        // and re-evaluate the whole loop under widening, so the residual
        // keeps the loop and any break or continue stays inside it.
        let depth = self.state.capture_depth();
        self.state.capture_effects();
        let settled = match self.unroll_loop(label, test, body, strict, span) {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        match settled {
            Some((completion, node)) => {
                let effects = match self.state.get_captured_effects(completion) {
                    Ok(eff) => eff,
                    Err(e) => {
                        self.unwind_to_depth(depth);
                        return Err(e);
                    }
                };
                self.state.stop_effect_capture_and_undo_effects()?;
                let completion = effects.completion.clone();
                self.state.apply_effects(effects)?;
                Ok((completion, node, vec![]))
            }
            None => {
                self.state.stop_effect_capture_and_undo_effects()?;
                let (c, node) = self.widen_loop(label, test, body, strict, span)?;
                Ok((c, node, vec![]))
            }
        }
    }

    /// Unroll while the guard stays concretely decidable. `Some` means the
    /// loop settled (it ran to completion, broke out, or transferred
    /// control) and the returned residual replays it; `None` means an
    /// unknown guard, a possibly-abrupt iteration, or the unroll budget
    /// stopped the attempt.
    fn unroll_loop(
        &mut self,
        label: Option<&str>,
        test: &Expr,
        body: &Stmt,
        strict: bool,
        span: &Span,
    ) -> EvalResult<Option<(Completion, Stmt)>> {
        let mut unrolled: Vec<Stmt> = Vec::new();
        let mut iterations = 0usize;

        loop {
            let (test_c, test_expr) = self.eval_expr(test, strict)?;
            let (test_value, test_expr) = match resolve(test_c, test_expr) {
                Resolved::Value(v, e) => (v, e),
                Resolved::Abrupt(a, e) => {
                    // The guard itself transfers control; the residual keeps
                    // the guard expression so the transfer happens at run
                    // time too.
                    return Ok(Some((
                        Completion::Abrupt(a),
                        finish_loop_residual(unrolled, Some(expr_stmt(e))),
                    )));
                }
                // A guard that only may transfer control cannot be unrolled.
                Resolved::Gated(..) => return Ok(None),
            };

            if !test_value.might_be_falsy() {
                // The guard is definitely truthy: this iteration runs.
                iterations += 1;
                if iterations > self.loop_policy.max_unroll {
                    self.report(Diagnostic::new(
                        Severity::RecoverableError,
                        codes::LOOP_UNROLL_BUDGET,
                        format!(
                            "loop did not settle within {} unrolled iterations",
                            self.loop_policy.max_unroll
                        ),
                        span.clone(),
                    ))?;
                    return Ok(None);
                }
                unrolled.extend(self.impure_guard_residual(&test_expr));
                let (body_c, body_node, body_io) = self.eval_stmt(body, strict)?;
                unrolled.push(absorb_pending(body_io, body_node));
                match body_c {
                    Completion::Normal(_) => continue,
                    Completion::Abrupt(a) if a.continues_in(label) => {
                        strip_last_control_tail(&mut unrolled, label);
                        continue;
                    }
                    Completion::Abrupt(a) if a.breaks_out_of(label) => {
                        strip_last_control_tail(&mut unrolled, label);
                        return Ok(Some((
                            Completion::Normal(Value::undefined()),
                            finish_loop_residual(unrolled, None),
                        )));
                    }
                    Completion::Abrupt(a) => {
                        return Ok(Some((
                            Completion::Abrupt(a),
                            finish_loop_residual(unrolled, None),
                        )));
                    }
                    // The iteration may have transferred control; an
                    // unrolled prefix cannot express that, so give up.
                    Completion::PossiblyAbrupt(_) => return Ok(None),
                }
            }

            if !test_value.might_be_truthy() {
                // The guard is definitely falsy: zero (more) iterations.
                let mut residual = unrolled;
                residual.extend(self.impure_guard_residual(&test_expr));
                return Ok(Some((
                    Completion::Normal(Value::undefined()),
                    finish_loop_residual(residual, None),
                )));
            }

            // Unknown guard: the widening path.
            return Ok(None);
        }
    }

    /// The widening policy for loops whose trip count cannot be resolved:
    /// discover the body's write footprint with a sandboxed probe pass,
    /// widen every touched binding and property to a fresh unknown, then
    /// re-evaluate guard and body under the widened state to obtain the
    /// stable residual, and join with the zero-iteration case keyed on the
    /// widened guard.
    fn widen_loop(
        &mut self,
        label: Option<&str>,
        test: &Expr,
        body: &Stmt,
        strict: bool,
        span: &Span,
    ) -> EvalResult<(Completion, Stmt)> {
        let depth = self.state.capture_depth();

        // Probe pass: one sandboxed evaluation, discarded, to find what the
        // body writes.
        self.state.capture_effects();
        let probe = (|| -> EvalResult<Completion> {
            let (test_c, _) = self.eval_expr(test, strict)?;
            if !matches!(test_c, Completion::Normal(_)) {
                return Ok(test_c);
            }
            let (body_c, _, _) = self.eval_stmt(body, strict)?;
            Ok(body_c)
        })();
        let probe_completion = match probe {
            Ok(c) => c,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        let probe_effects = match self.state.get_captured_effects(probe_completion) {
            Ok(eff) => eff,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        self.unwind_to_depth(depth);

        // Widened evaluation, captured for the join with the zero-iteration
        // case.
        self.state.capture_effects();
        let widen_result = (|| -> EvalResult<(Value, Expr, Completion, Stmt, Vec<Stmt>)> {
            for binding in probe_effects.bindings.keys() {
                let name = self.synth_name(&format!("widened:{}", binding.name));
                let widened = self.fresh_abstract(AbstractSource::Widened(name), TruthRange::Any);
                self.state.write_binding(binding, widened);
            }
            let touched_props: Vec<_> = probe_effects.properties.keys().cloned().collect();
            for prop in touched_props {
                if self.state.object_is_live(prop.object) {
                    let name = self.synth_name(&format!("widened:.{}", prop.key));
                    let widened =
                        self.fresh_abstract(AbstractSource::Widened(name), TruthRange::Any);
                    self.state.set_property(prop.object, &prop.key, widened)?;
                }
            }

            let (test_c, test_expr) = self.eval_expr(test, strict)?;
            let (test_value, test_expr) = match test_c {
                Completion::Normal(v) => (v, test_expr),
                // The guard still transfers control even with every loop
                // input widened: keep a residual loop with an opaque guard.
                _ => {
                    self.report(Diagnostic::new(
                        Severity::RecoverableError,
                        codes::LOOP_UNROLL_BUDGET,
                        "loop guard does not complete normally under widening".to_string(),
                        span.clone(),
                    ))?;
                    let v = self.fresh_abstract(
                        AbstractSource::Residual(test_expr.clone()),
                        TruthRange::Any,
                    );
                    (v, test_expr)
                }
            };
            let (body_c, body_node, body_io) = self.eval_stmt(body, strict)?;
            Ok((test_value, test_expr, body_c, body_node, body_io))
        })();
        let (guard_value, guard_expr, body_c, body_node, body_io) = match widen_result {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };

        // Break and continue targeting this loop end the iteration normally.
        let may_break = match &body_c {
            Completion::Abrupt(a) => abrupt_may_break(a, label),
            Completion::PossiblyAbrupt(pa) => abrupt_may_break(&pa.abrupt, label),
            Completion::Normal(_) => false,
        };
        let mapped = loop_body_completion(body_c, label);
        let widened_effects = match self.state.get_captured_effects(mapped) {
            Ok(eff) => eff,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        self.state.stop_effect_capture_and_undo_effects()?;

        let residual_body = absorb_pending(body_io, body_node);
        let node = Stmt::new(
            StmtKind::While {
                test: guard_expr,
                body: Rc::new(residual_body),
            },
            span.clone(),
        );

        if !guard_value.might_be_falsy() {
            if !may_break {
                // Even with every loop input widened the guard stays truthy
                // and no break can reach the outside: the loop provably
                // never exits.
                self.report(Diagnostic::new(
                    Severity::FatalError,
                    codes::LOOP_NEVER_TERMINATES,
                    "loop guard can never become falsy".to_string(),
                    span.clone(),
                ))?;
                return Err(EngineError::Invariant(
                    "fatal diagnostic did not abort".into(),
                ));
            }
            // At least one iteration runs; the only exit is the break, so
            // the widened iteration effects apply unconditionally.
            let completion = update_empty(widened_effects.completion.clone(), Value::undefined());
            self.state.apply_effects(widened_effects)?;
            return Ok((completion, node));
        }

        if !guard_value.might_be_truthy() {
            // Widening resolved the guard to falsy: zero more iterations.
            return Ok((Completion::Normal(Value::undefined()), node));
        }

        let zero_iterations = self
            .state
            .construct_empty_effects()
            .with_completion(Completion::Normal(Value::undefined()));
        let joined = join_effects(&mut self.state, &guard_value, widened_effects, zero_iterations)?;
        let completion = update_empty(joined.completion.clone(), Value::undefined());
        self.state.apply_effects(joined)?;
        Ok((completion, node))
    }

    // ====================================================================
    // switch
    // ====================================================================

    fn eval_switch(
        &mut self,
        discriminant: &Expr,
        cases: &[SwitchCase],
        strict: bool,
        span: &Span,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let (disc_c, disc_expr) = self.eval_expr(discriminant, strict)?;
        match resolve(disc_c, disc_expr) {
            Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), expr_stmt(e), vec![])),
            Resolved::Gated(pa, e) => {
                let cases = cases.to_vec();
                let span = span.clone();
                self.with_gated_rest_stmt(pa, move |ev, v| {
                    let (c, node, io) = ev.eval_switch_resolved(v, e, &cases, strict, &span)?;
                    Ok((c, (node, io)))
                })
            }
            Resolved::Value(v, e) => self.eval_switch_resolved(v, e, cases, strict, span),
        }
    }

    fn eval_switch_resolved(
        &mut self,
        disc_value: Value,
        disc_expr: Expr,
        cases: &[SwitchCase],
        strict: bool,
        span: &Span,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let tests_static = cases
            .iter()
            .all(|c| c.test.as_ref().map(expr_is_pure).unwrap_or(true));

        if matches!(disc_value, Value::Concrete(_) | Value::Object(_)) && tests_static {
            return self.eval_switch_static(&disc_value, &disc_expr, cases, strict);
        }

        // Unknown discriminant (or impure case tests): desugar into a chain
        // of strict-equality conditionals and reuse the join machinery.
        let (guard_base, mut io) = if matches!(disc_expr.node, ExprKind::Var(_) | ExprKind::Lit(_))
        {
            (disc_expr.clone(), vec![])
        } else {
            // Bind the discriminant once so the chain does not re-evaluate
            // an impure expression.
            let name = self.synth_ident("switch");
            self.state.declare(&name, disc_value.clone());
            let decl = Stmt::synthetic(StmtKind::Let {
                name: name.clone(),
                init: Some(disc_expr.clone()),
            });
            (Expr::synthetic(ExprKind::Var(name)), vec![decl])
        };

        let chain = self.desugar_switch(&guard_base, cases, span)?;
        let (c, node, mut chain_io) = self.eval_stmt(&chain, strict)?;
        io.append(&mut chain_io);
        Ok((map_switch_breaks(c), node, io))
    }

    /// Concrete discriminant and pure tests: pick the matching case (or
    /// default) statically and run from there, honoring fallthrough until
    /// an unlabeled break.
    fn eval_switch_static(
        &mut self,
        disc_value: &Value,
        disc_expr: &Expr,
        cases: &[SwitchCase],
        strict: bool,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let mut start = None;
        for (i, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                let (test_c, _) = self.eval_expr(test, strict)?;
                if let Completion::Normal(tv) = test_c {
                    if strict_equals(disc_value, &tv) == Some(true) {
                        start = Some(i);
                        break;
                    }
                }
            }
        }
        if start.is_none() {
            start = cases.iter().position(|c| c.test.is_none());
        }

        let guard_io = self.impure_guard_residual(disc_expr);
        let Some(start) = start else {
            // No case matched and no default: the switch is a no-op.
            return Ok((Completion::empty(), empty_stmt(), guard_io));
        };

        self.state.push_scope();
        let flattened: Vec<Stmt> = cases[start..]
            .iter()
            .flat_map(|c| c.body.iter().cloned())
            .collect();
        let result = self.eval_block_body(&flattened, strict);
        self.state.pop_scope();
        let (completion, mut residual) = result?;
        if matches!(&completion, Completion::Abrupt(a) if a.breaks_out_of(None)) {
            // The absorbed break has no switch left to target in the
            // residual.
            strip_last_control_tail(&mut residual, None);
        }
        // A gated break deeper in the selected body survives into the
        // residual; give it a labeled block to target.
        let node = if stmts_contain_switch_break(&residual) {
            let label = self.synth_switch_label(cases);
            let body = relabel_switch_breaks(&residual, &label);
            Stmt::synthetic(StmtKind::Labeled {
                label,
                body: Rc::new(block_stmt(body)),
            })
        } else {
            block_stmt(residual)
        };
        Ok((map_switch_breaks(completion), node, guard_io))
    }

    /// Rewrite a switch into nested `if (disc === test)` conditionals.
    /// Trailing breaks are stripped; a break buried deeper in a case body
    /// still has to end the switch in the residual, so when one exists the
    /// chain gets a synthesized label and those breaks target it. A body
    /// that would fall through into the next case cannot be expressed this
    /// way and is diagnosed.
    fn desugar_switch(
        &mut self,
        guard_base: &Expr,
        cases: &[SwitchCase],
        span: &Span,
    ) -> EvalResult<Stmt> {
        let needs_label = cases
            .iter()
            .any(|c| stmts_contain_switch_break(&strip_trailing_break(&c.body)));
        let label = if needs_label {
            Some(self.synth_switch_label(cases))
        } else {
            None
        };

        let default_body: Vec<Stmt> = cases
            .iter()
            .find(|c| c.test.is_none())
            .map(|c| desugared_arm_body(c, label.as_deref()))
            .unwrap_or_default();

        let mut chain: Option<Stmt> = if default_body.is_empty() {
            None
        } else {
            Some(block_stmt(default_body))
        };

        for case in cases.iter().rev() {
            let Some(test) = &case.test else { continue };
            if !case_body_leaves_switch(&case.body) && !case.body.is_empty() {
                self.report(Diagnostic::new(
                    Severity::RecoverableError,
                    codes::SWITCH_FALLTHROUGH,
                    "cannot analyze fallthrough out of a case under an unknown discriminant"
                        .to_string(),
                    span.clone(),
                ))?;
            }
            let body = desugared_arm_body(case, label.as_deref());
            let guard = Expr::synthetic(ExprKind::Binary {
                op: BinOp::EqStrict,
                left: Rc::new(guard_base.clone()),
                right: Rc::new(test.clone()),
            });
            chain = Some(if_stmt(guard, block_stmt(body), chain));
        }

        let chain = chain.unwrap_or_else(empty_stmt);
        Ok(match label {
            Some(label) => Stmt::synthetic(StmtKind::Labeled {
                label,
                body: Rc::new(chain),
            }),
            None => chain,
        })
    }

    /// A label for the desugared chain that no case body already mentions.
    fn synth_switch_label(&mut self, cases: &[SwitchCase]) -> String {
        loop {
            let name = format!("__sw{}", self.synth_counter);
            self.synth_counter += 1;
            if !cases.iter().any(|c| stmts_mention_label(&c.body, &name)) {
                return name;
            }
        }
    }

    // ====================================================================
    // try / catch
    // ====================================================================

    fn eval_try(
        &mut self,
        block: &Stmt,
        param: &Ident,
        handler: &Stmt,
        strict: bool,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let depth = self.state.capture_depth();
        self.state.capture_effects();
        let try_result = self.eval_stmt(block, strict);
        let (try_c, try_node, try_io) = match try_result {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        let try_effects = self.state.get_captured_effects(try_c.clone())?;
        self.state.stop_effect_capture_and_undo_effects()?;

        let try_residual = absorb_pending(try_io, try_node);
        let try_block = try_residual.clone();
        let param_name = param.clone();
        let make_try = move |handler_node: Stmt| {
            Stmt::synthetic(StmtKind::Try {
                block: Rc::new(try_block),
                param: param_name,
                handler: Rc::new(handler_node),
            })
        };

        match try_c {
            // No path through the try block throws: commit and drop the
            // handler entirely.
            Completion::Normal(_) => {
                let completion = try_effects.completion.clone();
                self.state.apply_effects(try_effects)?;
                Ok((completion, try_residual, vec![]))
            }
            Completion::Abrupt(ref a) if !a.might_throw() => {
                let completion = try_effects.completion.clone();
                self.state.apply_effects(try_effects)?;
                Ok((completion, try_residual, vec![]))
            }

            // The try block definitely throws a known value: the handler
            // definitely runs with it.
            Completion::Abrupt(AbruptCompletion::Throw(thrown)) => {
                self.state.apply_effects(try_effects)?;
                self.state.push_scope();
                self.state.declare(param, thrown);
                let result = self.eval_stmt(handler, strict);
                self.state.pop_scope();
                let (catch_c, catch_node, catch_io) = result?;
                let catch_c = update_empty(catch_c, Value::undefined());
                Ok((
                    catch_c,
                    make_try(absorb_pending(catch_io, catch_node)),
                    vec![],
                ))
            }

            // A gated disjoint pair (throw on one path, some other transfer
            // on another) is beyond what the catch join models precisely.
            Completion::Abrupt(a) => {
                self.report(Diagnostic::new(
                    Severity::RecoverableError,
                    codes::MIXED_ABRUPT_IN_TRY,
                    "try block mixes throwing and non-throwing control transfers".to_string(),
                    block.span.clone(),
                ))?;
                self.state.apply_effects(try_effects)?;
                let thrown = a.thrown_value().cloned().unwrap_or_else(Value::undefined);
                let (catch_c, catch_node) =
                    self.eval_catch_sandboxed(param, thrown, handler, strict, None)?;
                Ok((catch_c, make_try(catch_node), vec![]))
            }

            // The try block may or may not throw: the handler runs exactly
            // on the throwing paths. Sandbox it and join on the gate.
            Completion::PossiblyAbrupt(pa) => {
                self.state.apply_effects(try_effects)?;
                if pa.abrupt.might_throw() {
                    if !matches!(*pa.abrupt, AbruptCompletion::Throw(_)) {
                        self.report(Diagnostic::new(
                            Severity::RecoverableError,
                            codes::MIXED_ABRUPT_IN_TRY,
                            "try block mixes throwing and non-throwing control transfers"
                                .to_string(),
                            block.span.clone(),
                        ))?;
                    }
                    let thrown = pa
                        .abrupt
                        .thrown_value()
                        .cloned()
                        .unwrap_or_else(Value::undefined);
                    let (catch_c, catch_node) = self.eval_catch_sandboxed(
                        param,
                        thrown,
                        handler,
                        strict,
                        Some((pa.gate.clone(), pa.normal_value.clone())),
                    )?;
                    Ok((catch_c, make_try(catch_node), vec![]))
                } else {
                    // Possibly-abrupt but never by throwing (e.g. a maybe
                    // return): the handler is dead.
                    Ok((Completion::PossiblyAbrupt(pa), try_residual, vec![]))
                }
            }
        }
    }

    /// Evaluate a catch handler in a sandbox. With a gate, join against the
    /// non-throwing path; without one (the imprecise mixed case) the
    /// handler's effects are joined under a fresh unknown.
    fn eval_catch_sandboxed(
        &mut self,
        param: &Ident,
        thrown: Value,
        handler: &Stmt,
        strict: bool,
        gate_and_normal: Option<(Value, Value)>,
    ) -> EvalResult<(Completion, Stmt)> {
        let depth = self.state.capture_depth();
        self.state.capture_effects();
        self.state.push_scope();
        self.state.declare(param, thrown);
        let result = self.eval_stmt(handler, strict);
        self.state.pop_scope();
        let (catch_c, catch_node, catch_io) = match result {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        let catch_c = update_empty(catch_c, Value::undefined());
        let catch_effects = self.state.get_captured_effects(catch_c)?;
        self.state.stop_effect_capture_and_undo_effects()?;

        let (gate, normal_value) = match gate_and_normal {
            Some(pair) => pair,
            None => {
                let gate = self.fresh_abstract(
                    AbstractSource::Input("maybe-caught".to_string()),
                    TruthRange::Any,
                );
                (gate, Value::undefined())
            }
        };
        let no_throw_side = self
            .state
            .construct_empty_effects()
            .with_completion(Completion::Normal(normal_value));
        let joined = join_effects(&mut self.state, &gate, catch_effects, no_throw_side)?;
        let completion = joined.completion.clone();
        self.state.apply_effects(joined)?;
        Ok((completion, absorb_pending(catch_io, catch_node)))
    }

    // ====================================================================
    // labeled statements
    // ====================================================================

    fn eval_labeled(
        &mut self,
        label: &str,
        body: &Stmt,
        strict: bool,
    ) -> EvalResult<(Completion, Stmt, Vec<Stmt>)> {
        let (c, node, io) = match &body.node {
            StmtKind::While { test, body: inner } => {
                self.eval_while(Some(label), test, inner, strict, &body.span)?
            }
            _ => self.eval_stmt(body, strict)?,
        };
        let c = match c {
            Completion::Abrupt(a) if a.breaks_out_of(Some(label)) => {
                Completion::Normal(Value::undefined())
            }
            Completion::PossiblyAbrupt(pa) if pa.abrupt.breaks_out_of(Some(label)) => {
                Completion::Normal(pa.normal_value)
            }
            other => other,
        };
        // A construct that reduced away needs no label.
        let node = if is_trivial(&node) {
            node
        } else {
            Stmt::synthetic(StmtKind::Labeled {
                label: label.to_string(),
                body: Rc::new(node),
            })
        };
        Ok((c, node, io))
    }

    // ====================================================================
    // Expressions
    // ====================================================================

    /// Partially evaluate an expression, returning its completion and the
    /// reduced expression. Expressions never produce pending residual
    /// statements; that channel exists only at statement level.
    fn eval_expr(&mut self, expr: &Expr, strict: bool) -> EvalResult<(Completion, Expr)> {
        match &expr.node {
            ExprKind::Lit(lit) => Ok((Completion::Normal(literal_value(lit)), expr.clone())),

            ExprKind::Var(name) => self.eval_var(name, expr),

            ExprKind::Assign { target, value } => self.eval_assign(target, value, strict, expr),

            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, strict),

            ExprKind::Unary { op, operand } => self.eval_unary(*op, operand, strict),

            ExprKind::Logical { op, left, right } => self.eval_logical(*op, left, right, strict),

            ExprKind::Conditional {
                cond,
                consequent,
                alternate,
            } => self.eval_ternary(cond, consequent, alternate, strict),

            ExprKind::Member {
                object,
                property,
                dot,
            } => self.eval_member_read(object, property, *dot, strict),

            ExprKind::ObjectLit(entries) => self.eval_object_literal(entries, strict),

            ExprKind::Call { callee, args } => self.eval_call(callee, args, strict, expr),
        }
    }

    fn eval_var(&mut self, name: &str, expr: &Expr) -> EvalResult<(Completion, Expr)> {
        match self.state.lookup(name) {
            Some((_, value)) => {
                let reduced = reduce_value_expr(&value, expr);
                Ok((Completion::Normal(value), reduced))
            }
            None => {
                let mut message = format!("`{}` is not defined", name);
                let names = self.state.visible_names();
                let suggestions = find_similar(name, names.iter().map(|s| s.as_str()), 2);
                if let Some(first) = suggestions.first() {
                    message.push_str(&format!(" (did you mean `{}`?)", first));
                }
                self.report(Diagnostic::new(
                    Severity::RecoverableError,
                    codes::UNBOUND_VARIABLE,
                    message,
                    expr.span.clone(),
                ))?;
                let placeholder =
                    self.fresh_abstract(AbstractSource::Input(name.to_string()), TruthRange::Any);
                Ok((Completion::Normal(placeholder), expr.clone()))
            }
        }
    }

    fn eval_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        strict: bool,
        whole: &Expr,
    ) -> EvalResult<(Completion, Expr)> {
        let (value_c, value_expr) = self.eval_expr(value, strict)?;
        match resolve(value_c, value_expr) {
            Resolved::Value(v, e) => {
                let reduced = self.assign_resolved(target, v.clone(), &e, strict, &whole.span)?;
                Ok((Completion::Normal(v), reduced))
            }
            Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), e)),
            Resolved::Gated(pa, e) => {
                let target = target.clone();
                let span = whole.span.clone();
                self.with_gated_rest(pa, move |ev, v| {
                    let reduced = ev.assign_resolved(&target, v.clone(), &e, strict, &span)?;
                    Ok((Completion::Normal(v), reduced))
                })
            }
        }
    }

    /// Perform an assignment once the right-hand side is a value. Returns
    /// the reduced assignment expression.
    fn assign_resolved(
        &mut self,
        target: &Expr,
        value: Value,
        value_expr: &Expr,
        strict: bool,
        span: &Span,
    ) -> EvalResult<Expr> {
        match &target.node {
            ExprKind::Var(name) => {
                match self.state.lookup(name) {
                    Some((binding, _)) => self.state.write_binding(&binding, value),
                    None => {
                        if strict {
                            self.report(Diagnostic::new(
                                Severity::RecoverableError,
                                codes::ASSIGN_UNDECLARED,
                                format!("assignment to undeclared variable `{}`", name),
                                span.clone(),
                            ))?;
                        }
                        // Sloppy-mode semantics: the name springs into
                        // existence on the global scope.
                        let global = self.state.global_scope();
                        self.state.declare_in(global, name, value);
                    }
                }
                Ok(Expr::synthetic(ExprKind::Assign {
                    target: Rc::new(target.clone()),
                    value: Rc::new(value_expr.clone()),
                }))
            }
            ExprKind::Member {
                object,
                property,
                dot,
            } => {
                let (obj_c, obj_expr) = self.eval_expr(object, strict)?;
                let reduced = |obj_expr: Expr| {
                    Expr::synthetic(ExprKind::Assign {
                        target: Rc::new(Expr::synthetic(ExprKind::Member {
                            object: Rc::new(obj_expr),
                            property: property.clone(),
                            dot: *dot,
                        })),
                        value: Rc::new(value_expr.clone()),
                    })
                };
                let obj_value = match obj_c {
                    Completion::Normal(v) => v,
                    // The target object evaluation transfers control; the
                    // write never happens along that path and the residual
                    // syntax reproduces the transfer.
                    _ => return Ok(reduced(obj_expr)),
                };
                let key = self.resolve_property_key(property, *dot, strict)?;
                match (&obj_value, key) {
                    (Value::Object(id), Some(key)) => {
                        self.state.set_property(*id, &key, value)?;
                    }
                    (Value::Abstract(_), _) | (Value::Object(_), None) => {
                        self.report(Diagnostic::new(
                            Severity::RecoverableError,
                            codes::ABSTRACT_OBJECT,
                            "property write through an unknown object or key cannot be tracked"
                                .to_string(),
                            span.clone(),
                        ))?;
                    }
                    (Value::Concrete(_), _) => {
                        self.report(Diagnostic::new(
                            Severity::RecoverableError,
                            codes::NOT_AN_OBJECT,
                            format!("cannot set a property on a {}", obj_value.type_name()),
                            span.clone(),
                        ))?;
                    }
                }
                Ok(reduced(obj_expr))
            }
            _ => Err(EngineError::Invariant(
                "assignment target is neither a variable nor a member".into(),
            )),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        let (left_c, left_e) = self.eval_expr(left, strict)?;
        match resolve(left_c, left_e) {
            Resolved::Value(lv, le) => self.eval_binary_with_left(op, lv, le, right, strict),
            Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), e)),
            Resolved::Gated(pa, e) => {
                let right = right.clone();
                self.with_gated_rest(pa, move |ev, lv| {
                    ev.eval_binary_with_left(op, lv, e, &right, strict)
                })
            }
        }
    }

    fn eval_binary_with_left(
        &mut self,
        op: BinOp,
        lv: Value,
        le: Expr,
        right: &Expr,
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        let (right_c, right_e) = self.eval_expr(right, strict)?;
        match resolve(right_c, right_e) {
            Resolved::Value(rv, re) => {
                let (v, reduced) = self.fold_binary(op, &lv, &le, &rv, &re);
                Ok((Completion::Normal(v), reduced))
            }
            Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), e)),
            Resolved::Gated(pa, e) => self.with_gated_rest(pa, move |ev, rv| {
                let (v, reduced) = ev.fold_binary(op, &lv, &le, &rv, &e);
                Ok((Completion::Normal(v), reduced))
            }),
        }
    }

    /// Fold a binary operation: concrete operands compute now, anything
    /// else stays abstract with the reduced operands as provenance.
    fn fold_binary(
        &mut self,
        op: BinOp,
        lv: &Value,
        le: &Expr,
        rv: &Value,
        re: &Expr,
    ) -> (Value, Expr) {
        if let (Value::Concrete(l), Value::Concrete(r)) = (lv, rv) {
            let v = fold_concrete_binary(op, l, r);
            let reduced = reduce_value_expr(
                &v,
                &Expr::synthetic(ExprKind::Binary {
                    op,
                    left: Rc::new(le.clone()),
                    right: Rc::new(re.clone()),
                }),
            );
            return (v, reduced);
        }
        // (In)equality of two live objects is identity, decidable even
        // though the operands are not constants.
        if let (Value::Object(a), Value::Object(b)) = (lv, rv) {
            let identity = match op {
                BinOp::EqStrict | BinOp::EqLoose => Some(a == b),
                BinOp::NeqStrict | BinOp::NeqLoose => Some(a != b),
                _ => None,
            };
            if let Some(eq) = identity {
                let v = Value::bool(eq);
                let reduced = reduce_value_expr(&v, le);
                return (v, reduced);
            }
        }
        let reduced = Expr::synthetic(ExprKind::Binary {
            op,
            left: Rc::new(le.clone()),
            right: Rc::new(re.clone()),
        });
        let value = self.fresh_abstract(
            AbstractSource::Binary {
                op,
                left: lv.clone(),
                right: rv.clone(),
            },
            TruthRange::Any,
        );
        (value, reduced)
    }

    fn eval_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        let (c, e) = self.eval_expr(operand, strict)?;
        match resolve(c, e) {
            Resolved::Value(v, e) => {
                let (v, reduced) = self.fold_unary(op, &v, &e);
                Ok((Completion::Normal(v), reduced))
            }
            Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), e)),
            Resolved::Gated(pa, e) => self.with_gated_rest(pa, move |ev, v| {
                let (v, reduced) = ev.fold_unary(op, &v, &e);
                Ok((Completion::Normal(v), reduced))
            }),
        }
    }

    fn fold_unary(&mut self, op: UnaryOp, v: &Value, e: &Expr) -> (Value, Expr) {
        let residual = |e: &Expr| {
            Expr::synthetic(ExprKind::Unary {
                op,
                operand: Rc::new(e.clone()),
            })
        };
        match op {
            UnaryOp::Not => {
                let value = negated_value(&mut self.state.ids, v);
                let reduced = match &value {
                    Value::Concrete(c) => constant_to_expr(c),
                    _ => residual(e),
                };
                (value, reduced)
            }
            UnaryOp::Neg => match v {
                Value::Concrete(c) => {
                    let value = Value::number(-to_number(c));
                    (value.clone(), reduce_value_expr(&value, e))
                }
                _ => {
                    let value = self.fresh_abstract(
                        AbstractSource::Unary {
                            op,
                            operand: v.clone(),
                        },
                        TruthRange::Any,
                    );
                    (value, residual(e))
                }
            },
            UnaryOp::TypeOf => match v {
                Value::Concrete(c) => {
                    let value = Value::string(c.type_of());
                    (value.clone(), reduce_value_expr(&value, e))
                }
                Value::Object(_) => {
                    let value = Value::string("object");
                    (value.clone(), reduce_value_expr(&value, e))
                }
                Value::Abstract(_) => {
                    // typeof always yields a non-empty string.
                    let value = self.fresh_abstract(
                        AbstractSource::Unary {
                            op,
                            operand: v.clone(),
                        },
                        TruthRange::Truthy,
                    );
                    (value, residual(e))
                }
            },
        }
    }

    fn eval_logical(
        &mut self,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        let (left_c, left_e) = self.eval_expr(left, strict)?;
        match resolve(left_c, left_e) {
            Resolved::Value(lv, le) => self.eval_logical_with_left(op, lv, le, right, strict),
            Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), e)),
            Resolved::Gated(pa, e) => {
                let right = right.clone();
                self.with_gated_rest(pa, move |ev, lv| {
                    ev.eval_logical_with_left(op, lv, e, &right, strict)
                })
            }
        }
    }

    fn eval_logical_with_left(
        &mut self,
        op: LogicalOp,
        lv: Value,
        le: Expr,
        right: &Expr,
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        let short_circuits = match op {
            LogicalOp::And => !lv.might_be_truthy(),
            LogicalOp::Or => !lv.might_be_falsy(),
        };
        if short_circuits {
            // The right side never runs.
            return Ok((Completion::Normal(lv), le));
        }

        let right_definitely_runs = match op {
            LogicalOp::And => !lv.might_be_falsy(),
            LogicalOp::Or => !lv.might_be_truthy(),
        };
        if right_definitely_runs {
            let (right_c, right_e) = self.eval_expr(right, strict)?;
            // An impure left side must stay in the residual even though its
            // value is decided.
            let reduced = if expr_is_pure(&le) {
                right_e
            } else {
                Expr::synthetic(ExprKind::Logical {
                    op,
                    left: Rc::new(le),
                    right: Rc::new(right_e),
                })
            };
            return Ok((right_c, reduced));
        }

        // Truly unknown left side: sandbox the right, join on the left's
        // truthiness.
        let depth = self.state.capture_depth();
        self.state.capture_effects();
        let right_result = self.eval_expr(right, strict);
        let (right_c, right_e) = match right_result {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        let right_effects = self.state.get_captured_effects(right_c)?;
        self.state.stop_effect_capture_and_undo_effects()?;

        let left_side = self
            .state
            .construct_empty_effects()
            .with_completion(Completion::Normal(lv.clone()));
        let joined = match op {
            // `l && r`: the right side runs exactly when l is truthy.
            LogicalOp::And => join_effects(&mut self.state, &lv, right_effects, left_side)?,
            // `l || r`: the right side runs exactly when l is falsy.
            LogicalOp::Or => join_effects(&mut self.state, &lv, left_side, right_effects)?,
        };
        let completion = joined.completion.clone();
        self.state.apply_effects(joined)?;

        let reduced = Expr::synthetic(ExprKind::Logical {
            op,
            left: Rc::new(le),
            right: Rc::new(right_e),
        });
        Ok((completion, reduced))
    }

    fn eval_ternary(
        &mut self,
        cond: &Expr,
        consequent: &Expr,
        alternate: &Expr,
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        let (cond_c, cond_e) = self.eval_expr(cond, strict)?;
        match resolve(cond_c, cond_e) {
            Resolved::Value(cv, ce) => {
                self.eval_ternary_resolved(cv, ce, consequent, alternate, strict)
            }
            Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), e)),
            Resolved::Gated(pa, e) => {
                let consequent = consequent.clone();
                let alternate = alternate.clone();
                self.with_gated_rest(pa, move |ev, cv| {
                    ev.eval_ternary_resolved(cv, e, &consequent, &alternate, strict)
                })
            }
        }
    }

    fn eval_ternary_resolved(
        &mut self,
        cond_value: Value,
        cond_expr: Expr,
        consequent: &Expr,
        alternate: &Expr,
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        if !cond_value.might_be_falsy() {
            let (c, e) = self.eval_expr(consequent, strict)?;
            let reduced = if expr_is_pure(&cond_expr) {
                e
            } else {
                Expr::synthetic(ExprKind::Conditional {
                    cond: Rc::new(cond_expr),
                    consequent: Rc::new(e),
                    alternate: Rc::new(alternate.clone()),
                })
            };
            return Ok((c, reduced));
        }
        if !cond_value.might_be_truthy() {
            let (c, e) = self.eval_expr(alternate, strict)?;
            let reduced = if expr_is_pure(&cond_expr) {
                e
            } else {
                Expr::synthetic(ExprKind::Conditional {
                    cond: Rc::new(cond_expr),
                    consequent: Rc::new(consequent.clone()),
                    alternate: Rc::new(e),
                })
            };
            return Ok((c, reduced));
        }

        let depth = self.state.capture_depth();
        self.state.capture_effects();
        let con_result = self.eval_expr(consequent, strict);
        let (con_c, con_e) = match con_result {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        let con_effects = self.state.get_captured_effects(con_c)?;
        self.state.stop_effect_capture_and_undo_effects()?;

        self.state.capture_effects();
        let alt_result = self.eval_expr(alternate, strict);
        let (alt_c, alt_e) = match alt_result {
            Ok(v) => v,
            Err(e) => {
                self.unwind_to_depth(depth);
                return Err(e);
            }
        };
        let alt_effects = self.state.get_captured_effects(alt_c)?;
        self.state.stop_effect_capture_and_undo_effects()?;

        let joined = join_effects(&mut self.state, &cond_value, con_effects, alt_effects)?;
        let completion = joined.completion.clone();
        self.state.apply_effects(joined)?;

        let reduced = Expr::synthetic(ExprKind::Conditional {
            cond: Rc::new(cond_expr),
            consequent: Rc::new(con_e),
            alternate: Rc::new(alt_e),
        });
        Ok((completion, reduced))
    }

    fn eval_member_read(
        &mut self,
        object: &Expr,
        property: &Rc<Expr>,
        dot: bool,
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        let (obj_c, obj_e) = self.eval_expr(object, strict)?;
        match resolve(obj_c, obj_e) {
            Resolved::Value(ov, oe) => self.member_read_resolved(ov, oe, property, dot, strict),
            Resolved::Abrupt(a, e) => Ok((Completion::Abrupt(a), e)),
            Resolved::Gated(pa, e) => {
                let property = property.clone();
                self.with_gated_rest(pa, move |ev, ov| {
                    ev.member_read_resolved(ov, e, &property, dot, strict)
                })
            }
        }
    }

    fn member_read_resolved(
        &mut self,
        obj_value: Value,
        obj_expr: Expr,
        property: &Rc<Expr>,
        dot: bool,
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        let reduced_member = |obj_expr: Expr| {
            Expr::synthetic(ExprKind::Member {
                object: Rc::new(obj_expr),
                property: property.clone(),
                dot,
            })
        };

        // Reading a property off null/undefined throws at run time, and we
        // know that now.
        if let Value::Concrete(c @ (Constant::Null | Constant::Undefined)) = &obj_value {
            let error = Value::string(format!(
                "TypeError: cannot read properties of {}",
                match c {
                    Constant::Null => "null",
                    _ => "undefined",
                }
            ));
            return Ok((Completion::throw(error), reduced_member(obj_expr)));
        }

        let key = self.resolve_property_key(property, dot, strict)?;
        match (&obj_value, key) {
            (Value::Object(id), Some(key)) => {
                let value = self
                    .state
                    .get_property(*id, &key)
                    .unwrap_or_else(Value::undefined);
                let reduced = reduce_value_expr(&value, &reduced_member(obj_expr));
                Ok((Completion::Normal(value), reduced))
            }
            (Value::Abstract(_), _) | (Value::Object(_), None) => {
                let reduced = reduced_member(obj_expr);
                let value =
                    self.fresh_abstract(AbstractSource::Residual(reduced.clone()), TruthRange::Any);
                Ok((Completion::Normal(value), reduced))
            }
            (Value::Concrete(_), _) => {
                // Property reads on other primitives: no methods are
                // modeled, the result is undefined.
                Ok((
                    Completion::Normal(Value::undefined()),
                    reduce_value_expr(&Value::undefined(), &reduced_member(obj_expr)),
                ))
            }
        }
    }

    /// Resolve a property expression to a concrete key if possible.
    fn resolve_property_key(
        &mut self,
        property: &Expr,
        dot: bool,
        strict: bool,
    ) -> EvalResult<Option<String>> {
        if dot {
            return Ok(match &property.node {
                ExprKind::Lit(Literal::Str(s)) => Some(s.clone()),
                ExprKind::Var(name) => Some(name.clone()),
                _ => None,
            });
        }
        let (c, _) = self.eval_expr(property, strict)?;
        Ok(match c {
            Completion::Normal(Value::Concrete(Constant::Str(s))) => Some(s.to_string()),
            Completion::Normal(Value::Concrete(Constant::Number(n))) => Some(format_number(n)),
            _ => None,
        })
    }

    fn eval_object_literal(
        &mut self,
        entries: &[(Ident, Expr)],
        strict: bool,
    ) -> EvalResult<(Completion, Expr)> {
        let id = self.state.create_object();
        let mut reduced_entries: Vec<(Ident, Expr)> = Vec::with_capacity(entries.len());
        for (index, (key, value_expr)) in entries.iter().enumerate() {
            let (c, e) = self.eval_expr(value_expr, strict)?;
            match resolve(c, e) {
                Resolved::Value(v, e) => {
                    self.state.set_property(id, key, v)?;
                    reduced_entries.push((key.clone(), e));
                }
                Resolved::Abrupt(a, e) => return Ok((Completion::Abrupt(a), e)),
                Resolved::Gated(pa, e) => {
                    // A maybe-throwing initializer: this write and the rest
                    // of the literal happen only along the normal path.
                    let key = key.clone();
                    let remaining: Vec<(Ident, Expr)> =
                        entries.iter().skip(index + 1).cloned().collect();
                    return self.with_gated_rest(pa, move |ev, v| {
                        ev.state.set_property(id, &key, v)?;
                        reduced_entries.push((key, e));
                        for (key, value_expr) in &remaining {
                            let (c, e) = ev.eval_expr(value_expr, strict)?;
                            match c {
                                Completion::Normal(v) => {
                                    ev.state.set_property(id, key, v)?;
                                    reduced_entries.push((key.clone(), e));
                                }
                                other => return Ok((other, e)),
                            }
                        }
                        Ok((
                            Completion::Normal(Value::Object(id)),
                            Expr::synthetic(ExprKind::ObjectLit(reduced_entries)),
                        ))
                    });
                }
            }
        }
        Ok((
            Completion::Normal(Value::Object(id)),
            Expr::synthetic(ExprKind::ObjectLit(reduced_entries)),
        ))
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        strict: bool,
        whole: &Expr,
    ) -> EvalResult<(Completion, Expr)> {
        let mut reduced_args: Vec<Expr> = Vec::with_capacity(args.len());
        let mut arg_values: Vec<Value> = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let (c, e) = self.eval_expr(arg, strict)?;
            match resolve(c, e) {
                Resolved::Value(v, e) => {
                    arg_values.push(v);
                    reduced_args.push(e);
                }
                Resolved::Abrupt(a, e) => return Ok((Completion::Abrupt(a), e)),
                Resolved::Gated(pa, e) => {
                    // Finish the call along the normal path only.
                    let callee = callee.clone();
                    let remaining: Vec<Expr> = args.iter().skip(index + 1).cloned().collect();
                    let whole = whole.clone();
                    return self.with_gated_rest(pa, move |ev, v| {
                        arg_values.push(v);
                        reduced_args.push(e);
                        for arg in &remaining {
                            let (c, e) = ev.eval_expr(arg, strict)?;
                            match c {
                                Completion::Normal(v) => {
                                    arg_values.push(v);
                                    reduced_args.push(e);
                                }
                                other => return Ok((other, e)),
                            }
                        }
                        ev.finish_call(&callee, arg_values, reduced_args, &whole)
                    });
                }
            }
        }
        self.finish_call(callee, arg_values, reduced_args, whole)
    }

    fn finish_call(
        &mut self,
        callee: &Expr,
        arg_values: Vec<Value>,
        reduced_args: Vec<Expr>,
        whole: &Expr,
    ) -> EvalResult<(Completion, Expr)> {
        let reduced_call = Expr::synthetic(ExprKind::Call {
            callee: Rc::new(callee.clone()),
            args: reduced_args,
        });

        let intrinsic = match &callee.node {
            ExprKind::Var(name) => match name.as_str() {
                INTRINSIC_ABSTRACT => Some(TruthRange::Any),
                INTRINSIC_ABSTRACT_TRUTHY => Some(TruthRange::Truthy),
                INTRINSIC_ABSTRACT_FALSY => Some(TruthRange::Falsy),
                _ => None,
            },
            _ => None,
        };

        match intrinsic {
            Some(range) => {
                let name = match arg_values.first() {
                    Some(Value::Concrete(Constant::Str(s))) => s.to_string(),
                    None => self.synth_name("input"),
                    Some(_) => {
                        self.report(Diagnostic::new(
                            Severity::RecoverableError,
                            codes::BAD_INTRINSIC_ARG,
                            "the abstract-input intrinsic takes a string name".to_string(),
                            whole.span.clone(),
                        ))?;
                        self.synth_name("input")
                    }
                };
                let value = self.fresh_abstract(AbstractSource::Input(name), range);
                // The intrinsic call is the input's declaration: it stays
                // in the residual program verbatim.
                Ok((Completion::Normal(value), reduced_call))
            }
            None => {
                self.report(Diagnostic::new(
                    Severity::RecoverableError,
                    codes::UNKNOWN_CALLEE,
                    format!("cannot statically evaluate this call{}", callee_hint(callee)),
                    whole.span.clone(),
                ))?;
                let value = self.fresh_abstract(
                    AbstractSource::Residual(reduced_call.clone()),
                    TruthRange::Any,
                );
                Ok((Completion::Normal(value), reduced_call))
            }
        }
    }
}

/// Outcome of dereferencing an expression completion: truthiness checks and
/// stores only ever see values, never raw completions.
enum Resolved {
    Value(Value, Expr),
    Abrupt(AbruptCompletion, Expr),
    Gated(PossiblyAbrupt, Expr),
}

fn resolve(c: Completion, reduced: Expr) -> Resolved {
    match c {
        Completion::Normal(v) => Resolved::Value(v, reduced),
        Completion::Abrupt(a) => Resolved::Abrupt(a, reduced),
        Completion::PossiblyAbrupt(pa) => Resolved::Gated(pa, reduced),
    }
}

// ============================================================================
// Free helpers
// ============================================================================

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Number(n) => Value::number(*n),
        Literal::Str(s) => Value::string(s.as_str()),
        Literal::Bool(b) => Value::bool(*b),
        Literal::Null => Value::Concrete(Constant::Null),
        Literal::Undefined => Value::undefined(),
    }
}

/// Reduce an expression to a literal when its value is a known constant;
/// otherwise keep the (already reduced) syntax.
fn reduce_value_expr(value: &Value, fallback: &Expr) -> Expr {
    match value {
        Value::Concrete(c) if !matches!(c, Constant::Empty) => constant_to_expr(c),
        _ => fallback.clone(),
    }
}

/// Syntactic purity: an expression whose evaluation cannot write bindings,
/// properties, or allocate.
fn expr_is_pure(expr: &Expr) -> bool {
    match &expr.node {
        ExprKind::Lit(_) | ExprKind::Var(_) => true,
        ExprKind::Assign { .. } | ExprKind::Call { .. } | ExprKind::ObjectLit(_) => false,
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            expr_is_pure(left) && expr_is_pure(right)
        }
        ExprKind::Unary { operand, .. } => expr_is_pure(operand),
        ExprKind::Conditional {
            cond,
            consequent,
            alternate,
        } => expr_is_pure(cond) && expr_is_pure(consequent) && expr_is_pure(alternate),
        ExprKind::Member {
            object, property, ..
        } => expr_is_pure(object) && expr_is_pure(property),
    }
}

/// Residual for a (partially) unrolled loop: the unrolled prefix plus an
/// optional trailing statement (a residual loop or an abrupt guard).
fn finish_loop_residual(mut unrolled: Vec<Stmt>, trailing: Option<Stmt>) -> Stmt {
    if let Some(t) = trailing {
        if !is_trivial(&t) {
            unrolled.push(t);
        }
    }
    unrolled.retain(|s| !is_trivial(s));
    match unrolled.len() {
        0 => empty_stmt(),
        1 => unrolled.pop().unwrap(),
        _ => block_stmt(unrolled),
    }
}

/// Remove the break or continue that ended an absorbed iteration from its
/// residual: a fully unrolled loop replays as straight-line code, with no
/// loop left for the transfer to target.
fn strip_last_control_tail(unrolled: &mut Vec<Stmt>, label: Option<&str>) {
    if let Some(last) = unrolled.pop() {
        let last = strip_control_tail(last, label);
        if !is_trivial(&last) {
            unrolled.push(last);
        }
    }
}

fn strip_control_tail(stmt: Stmt, label: Option<&str>) -> Stmt {
    match &stmt.node {
        StmtKind::Break(l) | StmtKind::Continue(l) if l.is_none() || l.as_deref() == label => {
            empty_stmt()
        }
        StmtKind::Block(body) => {
            let mut body = body.clone();
            if let Some(last) = body.pop() {
                let last = strip_control_tail(last, label);
                if !is_trivial(&last) {
                    body.push(last);
                }
            }
            block_stmt(body)
        }
        _ => stmt,
    }
}

/// Can any path through this abrupt completion break out of a loop with
/// the given label?
fn abrupt_may_break(a: &AbruptCompletion, label: Option<&str>) -> bool {
    match a {
        AbruptCompletion::Joined {
            when_true,
            when_false,
            ..
        } => abrupt_may_break(when_true, label) || abrupt_may_break(when_false, label),
        other => other.breaks_out_of(label),
    }
}

/// Map a loop body completion to the loop's own completion: break and
/// continue that target this loop end it (or the iteration) normally.
fn loop_body_completion(c: Completion, label: Option<&str>) -> Completion {
    match c {
        Completion::Normal(_) => Completion::Normal(Value::undefined()),
        Completion::Abrupt(a) if a.breaks_out_of(label) || a.continues_in(label) => {
            Completion::Normal(Value::undefined())
        }
        Completion::Abrupt(a) => Completion::Abrupt(a),
        Completion::PossiblyAbrupt(pa) => {
            if pa.abrupt.breaks_out_of(label) || pa.abrupt.continues_in(label) {
                Completion::Normal(pa.normal_value)
            } else {
                Completion::PossiblyAbrupt(pa)
            }
        }
    }
}

/// Map unlabeled breaks out of a switch to normal completion.
fn map_switch_breaks(c: Completion) -> Completion {
    match c {
        Completion::Abrupt(a) if a.breaks_out_of(None) => Completion::Normal(Value::undefined()),
        Completion::PossiblyAbrupt(pa) if pa.abrupt.breaks_out_of(None) => {
            Completion::Normal(pa.normal_value)
        }
        other => other,
    }
}

/// Strip a single trailing unlabeled `break` from a case body.
fn strip_trailing_break(body: &[Stmt]) -> Vec<Stmt> {
    let mut out: Vec<Stmt> = body.to_vec();
    if matches!(out.last().map(|s| &s.node), Some(StmtKind::Break(None))) {
        out.pop();
    }
    out
}

/// A case arm of the desugared chain: trailing break stripped, remaining
/// switch-bound breaks retargeted at the chain's label when it has one.
fn desugared_arm_body(case: &SwitchCase, label: Option<&str>) -> Vec<Stmt> {
    let body = strip_trailing_break(&case.body);
    match label {
        Some(label) => relabel_switch_breaks(&body, label),
        None => body,
    }
}

/// Does this statement list contain an unlabeled `break` that binds to the
/// enclosing switch? Nested loops and switches rebind unlabeled breaks, so
/// the walk stops at them.
fn stmts_contain_switch_break(stmts: &[Stmt]) -> bool {
    stmts.iter().any(stmt_contains_switch_break)
}

fn stmt_contains_switch_break(stmt: &Stmt) -> bool {
    match &stmt.node {
        StmtKind::Break(None) => true,
        StmtKind::Block(body) => stmts_contain_switch_break(body),
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => {
            stmt_contains_switch_break(consequent)
                || alternate
                    .as_deref()
                    .map_or(false, stmt_contains_switch_break)
        }
        StmtKind::Try { block, handler, .. } => {
            stmt_contains_switch_break(block) || stmt_contains_switch_break(handler)
        }
        StmtKind::Labeled { body, .. } => stmt_contains_switch_break(body),
        _ => false,
    }
}

/// Rewrite the unlabeled breaks that bind to the switch into breaks on
/// `label`, so the desugared chain can absorb them as a labeled statement.
fn relabel_switch_breaks(stmts: &[Stmt], label: &str) -> Vec<Stmt> {
    stmts
        .iter()
        .map(|s| relabel_switch_break(s, label))
        .collect()
}

fn relabel_switch_break(stmt: &Stmt, label: &str) -> Stmt {
    let node = match &stmt.node {
        StmtKind::Break(None) => StmtKind::Break(Some(label.to_string())),
        StmtKind::Block(body) => StmtKind::Block(relabel_switch_breaks(body, label)),
        StmtKind::If {
            test,
            consequent,
            alternate,
        } => StmtKind::If {
            test: test.clone(),
            consequent: Rc::new(relabel_switch_break(consequent, label)),
            alternate: alternate
                .as_ref()
                .map(|a| Rc::new(relabel_switch_break(a, label))),
        },
        StmtKind::Try {
            block,
            param,
            handler,
        } => StmtKind::Try {
            block: Rc::new(relabel_switch_break(block, label)),
            param: param.clone(),
            handler: Rc::new(relabel_switch_break(handler, label)),
        },
        StmtKind::Labeled { label: inner, body } => StmtKind::Labeled {
            label: inner.clone(),
            body: Rc::new(relabel_switch_break(body, label)),
        },
        other => other.clone(),
    };
    Stmt::new(node, stmt.span.clone())
}

/// Is `label` the target or name of anything in this statement list?
fn stmts_mention_label(stmts: &[Stmt], label: &str) -> bool {
    stmts.iter().any(|s| stmt_mentions_label(s, label))
}

fn stmt_mentions_label(stmt: &Stmt, label: &str) -> bool {
    match &stmt.node {
        StmtKind::Break(Some(l)) | StmtKind::Continue(Some(l)) => l == label,
        StmtKind::Block(body) => stmts_mention_label(body, label),
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => {
            stmt_mentions_label(consequent, label)
                || alternate
                    .as_deref()
                    .map_or(false, |a| stmt_mentions_label(a, label))
        }
        StmtKind::While { body, .. } => stmt_mentions_label(body, label),
        StmtKind::Switch { cases, .. } => {
            cases.iter().any(|c| stmts_mention_label(&c.body, label))
        }
        StmtKind::Try { block, handler, .. } => {
            stmt_mentions_label(block, label) || stmt_mentions_label(handler, label)
        }
        StmtKind::Labeled { label: l, body } => l == label || stmt_mentions_label(body, label),
        _ => false,
    }
}

/// Does a case body end by leaving the switch (break/return/throw/continue)?
fn case_body_leaves_switch(body: &[Stmt]) -> bool {
    matches!(
        body.last().map(|s| &s.node),
        Some(StmtKind::Break(_) | StmtKind::Return(_) | StmtKind::Throw(_) | StmtKind::Continue(_))
    )
}

fn callee_hint(callee: &Expr) -> String {
    match &callee.node {
        ExprKind::Var(name) => format!(" to `{}`", name),
        _ => String::new(),
    }
}

/// Numeric coercion over the constant subset, following the subject
/// language's rules.
fn to_number(c: &Constant) -> f64 {
    match c {
        Constant::Undefined | Constant::Empty => f64::NAN,
        Constant::Null => 0.0,
        Constant::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Constant::Number(n) => *n,
        Constant::Str(s) => {
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else {
                t.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
    }
}

/// Strict equality over constants.
fn constant_strict_eq(l: &Constant, r: &Constant) -> bool {
    match (l, r) {
        (Constant::Undefined, Constant::Undefined) => true,
        (Constant::Null, Constant::Null) => true,
        (Constant::Bool(a), Constant::Bool(b)) => a == b,
        (Constant::Number(a), Constant::Number(b)) => a == b,
        (Constant::Str(a), Constant::Str(b)) => a == b,
        _ => false,
    }
}

/// Loose equality over the constant subset: null and undefined are equal to
/// each other, everything else coerces through numbers.
fn constant_loose_eq(l: &Constant, r: &Constant) -> bool {
    match (l, r) {
        (Constant::Null | Constant::Undefined, Constant::Null | Constant::Undefined) => true,
        (Constant::Str(a), Constant::Str(b)) => a == b,
        _ => {
            let (a, b) = (to_number(l), to_number(r));
            !a.is_nan() && !b.is_nan() && a == b
        }
    }
}

/// Strict equality where it is statically decidable; `None` when the
/// operands are not comparable at analysis time.
fn strict_equals(l: &Value, r: &Value) -> Option<bool> {
    match (l, r) {
        (Value::Concrete(a), Value::Concrete(b)) => Some(constant_strict_eq(a, b)),
        (Value::Object(a), Value::Object(b)) => Some(a == b),
        (Value::Concrete(_), Value::Object(_)) | (Value::Object(_), Value::Concrete(_)) => {
            Some(false)
        }
        _ => None,
    }
}

/// Fold a binary operation over two constants.
fn fold_concrete_binary(op: BinOp, l: &Constant, r: &Constant) -> Value {
    use BinOp::*;
    match op {
        Add => match (l, r) {
            (Constant::Str(a), _) => Value::string(format!("{}{}", a, constant_to_display(r))),
            (_, Constant::Str(b)) => Value::string(format!("{}{}", constant_to_display(l), b)),
            _ => Value::number(to_number(l) + to_number(r)),
        },
        Sub => Value::number(to_number(l) - to_number(r)),
        Mul => Value::number(to_number(l) * to_number(r)),
        Div => Value::number(to_number(l) / to_number(r)),
        Rem => Value::number(to_number(l) % to_number(r)),
        EqStrict => Value::bool(constant_strict_eq(l, r)),
        NeqStrict => Value::bool(!constant_strict_eq(l, r)),
        EqLoose => Value::bool(constant_loose_eq(l, r)),
        NeqLoose => Value::bool(!constant_loose_eq(l, r)),
        Lt | Lte | Gt | Gte => {
            let ordered = match (l, r) {
                (Constant::Str(a), Constant::Str(b)) => Some((a.as_ref() < b.as_ref(), a == b)),
                _ => {
                    let (a, b) = (to_number(l), to_number(r));
                    if a.is_nan() || b.is_nan() {
                        None
                    } else {
                        Some((a < b, a == b))
                    }
                }
            };
            match ordered {
                // Comparisons involving NaN are always false.
                None => Value::bool(false),
                Some((lt, eq)) => Value::bool(match op {
                    Lt => lt,
                    Lte => lt || eq,
                    Gt => !lt && !eq,
                    Gte => !lt,
                    _ => unreachable!(),
                }),
            }
        }
    }
}

/// How a constant reads when concatenated into a string.
fn constant_to_display(c: &Constant) -> String {
    match c {
        Constant::Undefined | Constant::Empty => "undefined".to_string(),
        Constant::Null => "null".to_string(),
        Constant::Bool(b) => b.to_string(),
        Constant::Number(n) => format_number(*n),
        Constant::Str(s) => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Constant {
        Constant::Number(n)
    }

    #[test]
    fn concrete_arithmetic_folds() {
        assert_eq!(
            fold_concrete_binary(BinOp::Add, &num(2.0), &num(3.0)),
            Value::number(5.0)
        );
        assert_eq!(
            fold_concrete_binary(BinOp::Add, &Constant::Str("a".into()), &num(1.0)),
            Value::string("a1")
        );
        assert_eq!(
            fold_concrete_binary(BinOp::Lt, &num(1.0), &num(2.0)),
            Value::bool(true)
        );
        // NaN never orders.
        assert_eq!(
            fold_concrete_binary(BinOp::Lt, &num(f64::NAN), &num(2.0)),
            Value::bool(false)
        );
    }

    #[test]
    fn loose_equality_bridges_null_and_undefined() {
        assert_eq!(
            fold_concrete_binary(BinOp::EqLoose, &Constant::Null, &Constant::Undefined),
            Value::bool(true)
        );
        assert_eq!(
            fold_concrete_binary(BinOp::EqStrict, &Constant::Null, &Constant::Undefined),
            Value::bool(false)
        );
        assert_eq!(
            fold_concrete_binary(BinOp::EqLoose, &num(1.0), &Constant::Str("1".into())),
            Value::bool(true)
        );
    }

    #[test]
    fn purity_is_syntactic() {
        let pure = Expr::synthetic(ExprKind::Binary {
            op: BinOp::Add,
            left: Rc::new(Expr::synthetic(ExprKind::Var("x".into()))),
            right: Rc::new(Expr::synthetic(ExprKind::Lit(Literal::Number(1.0)))),
        });
        assert!(expr_is_pure(&pure));

        let impure = Expr::synthetic(ExprKind::Assign {
            target: Rc::new(Expr::synthetic(ExprKind::Var("x".into()))),
            value: Rc::new(Expr::synthetic(ExprKind::Lit(Literal::Number(1.0)))),
        });
        assert!(!expr_is_pure(&impure));
    }

    #[test]
    fn trailing_break_is_stripped() {
        let body = vec![
            expr_stmt(Expr::synthetic(ExprKind::Lit(Literal::Number(1.0)))),
            Stmt::synthetic(StmtKind::Break(None)),
        ];
        let stripped = strip_trailing_break(&body);
        assert_eq!(stripped.len(), 1);
        assert!(case_body_leaves_switch(&body));
        assert!(!case_body_leaves_switch(&stripped));
    }

    #[test]
    fn nested_breaks_are_found_and_relabeled() {
        let body = vec![if_stmt(
            Expr::synthetic(ExprKind::Var("c".into())),
            Stmt::synthetic(StmtKind::Break(None)),
            None,
        )];
        assert!(stmts_contain_switch_break(&body));

        let relabeled = relabel_switch_breaks(&body, "__sw0");
        assert!(!stmts_contain_switch_break(&relabeled));
        assert!(stmts_mention_label(&relabeled, "__sw0"));

        // An unlabeled break inside a nested loop binds to that loop.
        let looped = vec![Stmt::synthetic(StmtKind::While {
            test: Expr::synthetic(ExprKind::Lit(Literal::Bool(true))),
            body: Rc::new(Stmt::synthetic(StmtKind::Break(None))),
        })];
        assert!(!stmts_contain_switch_break(&looped));
    }

    #[test]
    fn loop_absorbs_matching_breaks() {
        let c = loop_body_completion(Completion::Abrupt(AbruptCompletion::Break(None)), None);
        assert_eq!(c, Completion::Normal(Value::undefined()));

        let c = loop_body_completion(
            Completion::Abrupt(AbruptCompletion::Break(Some("outer".into()))),
            None,
        );
        assert!(c.is_abrupt());
    }
}
