//! Effect records and the effect-capture sandbox.
//!
//! The sandbox is the discipline that lets the evaluator speculate: open a
//! capture scope, evaluate a branch, copy its effects out, roll everything
//! back, and later commit a (possibly joined) record. Capture is transparent
//! to reads: writes land in the live state immediately and are undone when
//! the scope closes, so a branch sees its own mutations while evaluating.
//!
//! The capture-scope stack is an ordinary field of [`EvalState`], strictly
//! LIFO. Violating the nesting order is an engine bug and surfaces as an
//! `EngineError::Invariant`, never as silent misbehavior.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, trace};

use crate::ast::Stmt;
use crate::completions::Completion;
use crate::diagnostics::EvalResult;
use crate::invariant;
use crate::values::{AbstractIdGen, ObjectId, Value};

/// Identity of a lexical scope. Scopes live in an arena on [`EvalState`] so
/// a binding can be named stably across capture and rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// A variable identity: which scope declared it, under what name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Binding {
    pub scope: ScopeId,
    pub name: String,
}

/// Old and new value of a mutated binding. `old: None` means the binding
/// did not exist before the capture scope opened (a declaration).
#[derive(Debug, Clone, PartialEq)]
pub struct BindingChange {
    pub old: Option<Value>,
    pub new: Value,
}

/// Identity of an object property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyRef {
    pub object: ObjectId,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub old: Option<Value>,
    pub new: Value,
}

/// An immutable snapshot of everything a region of evaluation did: the
/// completion it reached, residual code that must still run, and the
/// mutations it performed. Produced by `get_captured_effects`, consumed
/// exactly once by `apply_effects` or by the join algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct Effects {
    pub completion: Completion,
    pub residual: Vec<Stmt>,
    pub bindings: BTreeMap<Binding, BindingChange>,
    pub properties: BTreeMap<PropertyRef, PropertyChange>,
    pub created_objects: BTreeSet<ObjectId>,
}

impl Effects {
    /// An effect record that did nothing and completed with the empty marker.
    pub fn empty() -> Effects {
        Effects {
            completion: Completion::empty(),
            residual: Vec::new(),
            bindings: BTreeMap::new(),
            properties: BTreeMap::new(),
            created_objects: BTreeSet::new(),
        }
    }

    pub fn with_completion(mut self, completion: Completion) -> Effects {
        self.completion = completion;
        self
    }
}

#[derive(Debug, Default)]
struct CaptureFrame {
    bindings: BTreeMap<Binding, BindingChange>,
    properties: BTreeMap<PropertyRef, PropertyChange>,
    created: BTreeSet<ObjectId>,
    residual: Vec<Stmt>,
}

#[derive(Debug)]
struct ScopeData {
    bindings: HashMap<String, Value>,
    parent: Option<ScopeId>,
}

#[derive(Debug, Default)]
struct ObjectData {
    properties: BTreeMap<String, Value>,
}

/// Interpreter-wide state: the scope tree, the heap, and the capture stack.
///
/// Single-threaded by construction. "Evaluating both branches" is two
/// sequential sandboxed evaluations; the capture stack is the only thing
/// keeping a branch's speculative writes out of the other branch's view.
#[derive(Debug)]
pub struct EvalState {
    scopes: Vec<ScopeData>,
    heap: Vec<Option<ObjectData>>,
    captures: Vec<CaptureFrame>,
    /// Residual emitted while no capture scope is open.
    root_residual: Vec<Stmt>,
    current: ScopeId,
    pub ids: AbstractIdGen,
}

impl Default for EvalState {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalState {
    pub fn new() -> EvalState {
        EvalState {
            scopes: vec![ScopeData {
                bindings: HashMap::new(),
                parent: None,
            }],
            heap: Vec::new(),
            captures: Vec::new(),
            root_residual: Vec::new(),
            current: ScopeId(0),
            ids: AbstractIdGen::default(),
        }
    }

    // ------------------------------------------------------------------
    // Scopes and bindings
    // ------------------------------------------------------------------

    pub fn global_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn current_scope(&self) -> ScopeId {
        self.current
    }

    /// Enter a fresh child scope of the current one.
    pub fn push_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData {
            bindings: HashMap::new(),
            parent: Some(self.current),
        });
        self.current = id;
        id
    }

    /// Leave the current scope. Scope data stays in the arena so rollback
    /// can still resolve binding identities recorded while it was live.
    pub fn pop_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current.0 as usize].parent {
            self.current = parent;
        }
    }

    /// True if `name` is declared directly in the current scope.
    pub fn declared_here(&self, name: &str) -> bool {
        self.scopes[self.current.0 as usize]
            .bindings
            .contains_key(name)
    }

    /// Declare a binding in the given scope and record the write.
    pub fn declare_in(&mut self, scope: ScopeId, name: &str, value: Value) -> Binding {
        let binding = Binding {
            scope,
            name: name.to_string(),
        };
        self.write_binding(&binding, value);
        binding
    }

    /// Declare a binding in the current scope.
    pub fn declare(&mut self, name: &str, value: Value) -> Binding {
        self.declare_in(self.current, name, value)
    }

    /// Resolve a name against the scope chain.
    pub fn lookup(&self, name: &str) -> Option<(Binding, Value)> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            let data = &self.scopes[id.0 as usize];
            if let Some(value) = data.bindings.get(name) {
                return Some((
                    Binding {
                        scope: id,
                        name: name.to_string(),
                    },
                    value.clone(),
                ));
            }
            scope = data.parent;
        }
        None
    }

    /// All names visible from the current scope (for "did you mean" hints).
    pub fn visible_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            let data = &self.scopes[id.0 as usize];
            names.extend(data.bindings.keys().cloned());
            scope = data.parent;
        }
        names.sort();
        names.dedup();
        names
    }

    pub fn read_binding(&self, binding: &Binding) -> Option<Value> {
        self.scopes[binding.scope.0 as usize]
            .bindings
            .get(&binding.name)
            .cloned()
    }

    /// Write a binding through the capture discipline: the live state is
    /// updated immediately, and the innermost open frame remembers the
    /// first-seen old value so the write can be undone or copied out.
    pub fn write_binding(&mut self, binding: &Binding, value: Value) {
        let old = self.scopes[binding.scope.0 as usize]
            .bindings
            .insert(binding.name.clone(), value.clone());
        if let Some(frame) = self.captures.last_mut() {
            trace!("capture: binding write {:?}", binding);
            frame
                .bindings
                .entry(binding.clone())
                .and_modify(|c| c.new = value.clone())
                .or_insert(BindingChange { old, new: value });
        }
    }

    // ------------------------------------------------------------------
    // Heap
    // ------------------------------------------------------------------

    /// Allocate a fresh object. Recorded as created in the innermost open
    /// frame, so rolling the frame back deletes it again.
    pub fn create_object(&mut self) -> ObjectId {
        let id = ObjectId(self.heap.len() as u32);
        self.heap.push(Some(ObjectData::default()));
        if let Some(frame) = self.captures.last_mut() {
            frame.created.insert(id);
        }
        id
    }

    pub fn object_is_live(&self, id: ObjectId) -> bool {
        self.heap
            .get(id.0 as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn get_property(&self, id: ObjectId, key: &str) -> Option<Value> {
        self.heap
            .get(id.0 as usize)?
            .as_ref()?
            .properties
            .get(key)
            .cloned()
    }

    /// Property names of a live object, in deterministic order.
    pub fn property_keys(&self, id: ObjectId) -> Vec<String> {
        match self.heap.get(id.0 as usize).and_then(|s| s.as_ref()) {
            Some(data) => data.properties.keys().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn set_property(&mut self, id: ObjectId, key: &str, value: Value) -> EvalResult<()> {
        invariant!(self.object_is_live(id), "property write to dead object {:?}", id);
        let data = self.heap[id.0 as usize].as_mut().unwrap();
        let old = data.properties.insert(key.to_string(), value.clone());
        if let Some(frame) = self.captures.last_mut() {
            let prop = PropertyRef {
                object: id,
                key: key.to_string(),
            };
            frame
                .properties
                .entry(prop)
                .and_modify(|c| c.new = value.clone())
                .or_insert(PropertyChange { old, new: value });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Residual code-generation target
    // ------------------------------------------------------------------

    /// Append residual statements to the current code-generation target:
    /// the innermost open frame, or the root buffer outside any capture.
    pub fn emit_residual(&mut self, stmts: Vec<Stmt>) {
        match self.captures.last_mut() {
            Some(frame) => frame.residual.extend(stmts),
            None => self.root_residual.extend(stmts),
        }
    }

    pub fn take_root_residual(&mut self) -> Vec<Stmt> {
        std::mem::take(&mut self.root_residual)
    }

    // ------------------------------------------------------------------
    // The sandbox protocol
    // ------------------------------------------------------------------

    pub fn capture_depth(&self) -> usize {
        self.captures.len()
    }

    /// Open a capture scope: subsequent binding/property writes and object
    /// creations are buffered for copy-out and rollback.
    pub fn capture_effects(&mut self) {
        debug!("capture_effects: depth {} -> {}", self.captures.len(), self.captures.len() + 1);
        self.captures.push(CaptureFrame::default());
    }

    /// Copy out the effects accumulated since the matching `capture_effects`
    /// without closing the scope. The completion reached by the evaluated
    /// region is supplied by the caller; the frame records mutations, not
    /// control flow.
    pub fn get_captured_effects(&self, completion: Completion) -> EvalResult<Effects> {
        let frame = match self.captures.last() {
            Some(f) => f,
            None => {
                return Err(crate::diagnostics::EngineError::Invariant(
                    "get_captured_effects with no open capture scope".into(),
                ))
            }
        };
        Ok(Effects {
            completion,
            residual: frame.residual.clone(),
            bindings: frame.bindings.clone(),
            properties: frame.properties.clone(),
            created_objects: frame.created.clone(),
        })
    }

    /// Close the current capture scope and roll back every mutation it
    /// recorded, restoring the state visible before it opened. Capture is
    /// copy-out, not move: rollback happens whether or not the effects were
    /// first copied into a record.
    pub fn stop_effect_capture_and_undo_effects(&mut self) -> EvalResult<()> {
        let frame = match self.captures.pop() {
            Some(f) => f,
            None => {
                return Err(crate::diagnostics::EngineError::Invariant(
                    "stop_effect_capture_and_undo_effects with no open capture scope".into(),
                ))
            }
        };
        debug!(
            "rollback: {} bindings, {} properties, {} created objects",
            frame.bindings.len(),
            frame.properties.len(),
            frame.created.len()
        );

        for (binding, change) in frame.bindings {
            let scope = &mut self.scopes[binding.scope.0 as usize];
            match change.old {
                Some(old) => {
                    scope.bindings.insert(binding.name, old);
                }
                None => {
                    scope.bindings.remove(&binding.name);
                }
            }
        }
        for (prop, change) in frame.properties {
            // Writes to objects the same frame created are moot: the object
            // is about to be deleted.
            if frame.created.contains(&prop.object) {
                continue;
            }
            if let Some(Some(data)) = self.heap.get_mut(prop.object.0 as usize) {
                match change.old {
                    Some(old) => {
                        data.properties.insert(prop.key, old);
                    }
                    None => {
                        data.properties.remove(&prop.key);
                    }
                }
            }
        }
        for id in frame.created {
            self.heap[id.0 as usize] = None;
        }
        Ok(())
    }

    /// Commit a previously captured (or joined) record onto the live state.
    ///
    /// Every write goes back through the normal write path, so an enclosing
    /// capture scope observes the commit. Not idempotent: applying the same
    /// record twice double-mutates.
    pub fn apply_effects(&mut self, effects: Effects) -> EvalResult<()> {
        debug!(
            "apply_effects: {} bindings, {} properties, {} created objects, {} residual stmts",
            effects.bindings.len(),
            effects.properties.len(),
            effects.created_objects.len(),
            effects.residual.len()
        );
        for id in &effects.created_objects {
            invariant!(
                (id.0 as usize) < self.heap.len(),
                "created object {:?} was never allocated",
                id
            );
            if self.heap[id.0 as usize].is_none() {
                self.heap[id.0 as usize] = Some(ObjectData::default());
            }
            if let Some(frame) = self.captures.last_mut() {
                frame.created.insert(*id);
            }
        }
        for (prop, change) in effects.properties {
            self.set_property(prop.object, &prop.key, change.new)?;
        }
        for (binding, change) in effects.bindings {
            self.write_binding(&binding, change.new);
        }
        self.emit_residual(effects.residual);
        Ok(())
    }

    /// An effect record representing "nothing happened": normal-empty
    /// completion, no mutations, no residual.
    pub fn construct_empty_effects(&self) -> Effects {
        Effects::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::Constant;

    fn snapshot(state: &EvalState, binding: &Binding) -> Option<Value> {
        state.read_binding(binding)
    }

    #[test]
    fn rollback_restores_bindings_exactly() {
        let mut state = EvalState::new();
        let x = state.declare("x", Value::number(1.0));

        state.capture_effects();
        state.write_binding(&x, Value::number(2.0));
        state.write_binding(&x, Value::number(3.0));
        assert_eq!(snapshot(&state, &x), Some(Value::number(3.0)));
        state.stop_effect_capture_and_undo_effects().unwrap();

        assert_eq!(snapshot(&state, &x), Some(Value::number(1.0)));
        assert_eq!(state.capture_depth(), 0);
    }

    #[test]
    fn rollback_removes_declarations() {
        let mut state = EvalState::new();
        state.capture_effects();
        state.declare("fresh", Value::number(7.0));
        assert!(state.lookup("fresh").is_some());
        state.stop_effect_capture_and_undo_effects().unwrap();
        assert!(state.lookup("fresh").is_none());
    }

    #[test]
    fn rollback_deletes_created_objects_and_their_properties() {
        let mut state = EvalState::new();
        state.capture_effects();
        let obj = state.create_object();
        state.set_property(obj, "k", Value::number(1.0)).unwrap();
        assert!(state.object_is_live(obj));
        state.stop_effect_capture_and_undo_effects().unwrap();
        assert!(!state.object_is_live(obj));
    }

    #[test]
    fn rollback_restores_properties_of_preexisting_objects() {
        let mut state = EvalState::new();
        let obj = state.create_object();
        state.set_property(obj, "k", Value::number(1.0)).unwrap();

        state.capture_effects();
        state.set_property(obj, "k", Value::number(2.0)).unwrap();
        state.set_property(obj, "added", Value::number(3.0)).unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();

        assert_eq!(state.get_property(obj, "k"), Some(Value::number(1.0)));
        assert_eq!(state.get_property(obj, "added"), None);
    }

    #[test]
    fn captured_effects_record_first_old_and_last_new() {
        let mut state = EvalState::new();
        let x = state.declare("x", Value::number(1.0));

        state.capture_effects();
        state.write_binding(&x, Value::number(2.0));
        state.write_binding(&x, Value::number(3.0));
        let effects = state.get_captured_effects(Completion::empty()).unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();

        let change = &effects.bindings[&x];
        assert_eq!(change.old, Some(Value::number(1.0)));
        assert_eq!(change.new, Value::number(3.0));
    }

    #[test]
    fn apply_commits_into_enclosing_frame() {
        let mut state = EvalState::new();
        let x = state.declare("x", Value::number(1.0));

        // Outer frame observes the commit of the inner record.
        state.capture_effects();
        state.capture_effects();
        state.write_binding(&x, Value::number(9.0));
        let inner = state.get_captured_effects(Completion::empty()).unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();
        assert_eq!(snapshot(&state, &x), Some(Value::number(1.0)));

        state.apply_effects(inner).unwrap();
        assert_eq!(snapshot(&state, &x), Some(Value::number(9.0)));

        let outer = state.get_captured_effects(Completion::empty()).unwrap();
        assert_eq!(outer.bindings[&x].new, Value::number(9.0));
        state.stop_effect_capture_and_undo_effects().unwrap();
        assert_eq!(snapshot(&state, &x), Some(Value::number(1.0)));
    }

    #[test]
    fn apply_resurrects_created_objects() {
        let mut state = EvalState::new();
        state.capture_effects();
        let obj = state.create_object();
        state.set_property(obj, "k", Value::number(5.0)).unwrap();
        let effects = state.get_captured_effects(Completion::empty()).unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();
        assert!(!state.object_is_live(obj));

        state.apply_effects(effects).unwrap();
        assert!(state.object_is_live(obj));
        assert_eq!(state.get_property(obj, "k"), Some(Value::number(5.0)));
    }

    #[test]
    fn commit_writes_recorded_values_regardless_of_current_state() {
        let mut state = EvalState::new();
        let x = state.declare("x", Value::number(1.0));

        state.capture_effects();
        state.write_binding(&x, Value::number(2.0));
        let effects = state.get_captured_effects(Completion::empty()).unwrap();
        state.stop_effect_capture_and_undo_effects().unwrap();

        // Change x before committing; the record is the full contract.
        state.write_binding(&x, Value::number(42.0));
        state.apply_effects(effects).unwrap();
        assert_eq!(snapshot(&state, &x), Some(Value::number(2.0)));
    }

    #[test]
    fn sandbox_misuse_is_an_invariant_violation() {
        let mut state = EvalState::new();
        assert!(state.get_captured_effects(Completion::empty()).is_err());
        assert!(state.stop_effect_capture_and_undo_effects().is_err());
    }

    #[test]
    fn distinct_ids_for_objects_created_on_sibling_branches() {
        let mut state = EvalState::new();
        state.capture_effects();
        let a = state.create_object();
        state.stop_effect_capture_and_undo_effects().unwrap();
        state.capture_effects();
        let b = state.create_object();
        state.stop_effect_capture_and_undo_effects().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_marker_completion_in_empty_effects() {
        let state = EvalState::new();
        let effects = state.construct_empty_effects();
        assert!(matches!(
            effects.completion,
            Completion::Normal(Value::Concrete(Constant::Empty))
        ));
        assert!(effects.bindings.is_empty());
    }
}
