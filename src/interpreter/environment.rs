// File: src/interpreter/environment.rs
//
// Lexical and variable environments, global bindings, and the execution
// context stack the VM pushes/pops around closure calls and blocks. Most
// local variables live in VM registers, not here — `Env` is the fallback
// path for globals and for closures that capture lexical context beyond
// what the register allocator turned into upvalues (see
// `interpreter::value::ClosureData::captured_context`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::DeclKind;
use crate::errors::{ArdanError, ErrorKind};
use crate::interpreter::value::Value;

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    kind: DeclKind,
}

/// A single scope frame in the lexical/variable env chain.
#[derive(Debug)]
pub struct Env {
    bindings: HashMap<String, Binding>,
    parent: Option<Rc<RefCell<Env>>>,
}

impl Env {
    pub fn root() -> Rc<RefCell<Env>> {
        Rc::new(RefCell::new(Env { bindings: HashMap::new(), parent: None }))
    }

    pub fn child(parent: Rc<RefCell<Env>>) -> Rc<RefCell<Env>> {
        Rc::new(RefCell::new(Env { bindings: HashMap::new(), parent: Some(parent) }))
    }

    /// Binds a fresh name in this frame, overwriting any existing binding
    /// of the same name in this exact frame (redeclaration is a static
    /// error the code generator already rejects before this ever runs).
    pub fn define(&mut self, name: impl Into<String>, value: Value, kind: DeclKind) {
        self.bindings.insert(name.into(), Binding { value, kind });
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(b) = self.bindings.get(name) {
            return Some(b.value.clone());
        }
        self.parent.as_ref().and_then(|p| p.borrow().get(name))
    }

    /// Walks the chain to find the owning frame and overwrite the binding.
    /// Fails rather than implicitly creating a global (see SPEC_FULL.md §9
    /// open-question resolution).
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), ArdanError> {
        if let Some(b) = self.bindings.get_mut(name) {
            if b.kind == DeclKind::Const {
                return Err(ArdanError::new(ErrorKind::AssignToConst, format!("cannot assign to const `{name}`")));
            }
            b.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.borrow_mut().set(name, value),
            None => Err(ArdanError::new(ErrorKind::UndefinedVariable, format!("`{name}` is not defined"))),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.bindings.contains_key(name) || self.parent.as_ref().map(|p| p.borrow().has(name)).unwrap_or(false)
    }
}

/// `{lexical_env, variable_env}` — lexical resolves `let`/`const` and block
/// scopes, variable resolves `var` and function declarations. Both chain
/// through parent pointers; at the module root they're the same frame.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub lexical_env: Rc<RefCell<Env>>,
    pub variable_env: Rc<RefCell<Env>>,
}

impl ExecutionContext {
    pub fn global() -> Self {
        let root = Env::root();
        ExecutionContext { lexical_env: root.clone(), variable_env: root }
    }

    /// Nests a new lexical environment whose parent is the current frame's
    /// lexical env; the variable env is inherited unchanged.
    pub fn push_lexical(&self) -> ExecutionContext {
        ExecutionContext { lexical_env: Env::child(self.lexical_env.clone()), variable_env: self.variable_env.clone() }
    }

    pub fn define(&self, name: impl Into<String>, value: Value, kind: DeclKind) {
        let target = if kind == DeclKind::Var { &self.variable_env } else { &self.lexical_env };
        target.borrow_mut().define(name, value, kind);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.lexical_env.borrow().get(name).or_else(|| self.variable_env.borrow().get(name))
    }

    pub fn set(&self, name: &str, value: Value) -> Result<(), ArdanError> {
        if self.lexical_env.borrow().has(name) {
            return self.lexical_env.borrow_mut().set(name, value);
        }
        self.variable_env.borrow_mut().set(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_scope_shadows_parent() {
        let ctx = ExecutionContext::global();
        ctx.define("x", Value::Number(1.0), DeclKind::Let);
        let inner = ctx.push_lexical();
        inner.define("x", Value::Number(2.0), DeclKind::Let);
        assert!(matches!(inner.get("x"), Some(Value::Number(n)) if n == 2.0));
        assert!(matches!(ctx.get("x"), Some(Value::Number(n)) if n == 1.0));
    }

    #[test]
    fn assigning_to_const_fails() {
        let ctx = ExecutionContext::global();
        ctx.define("x", Value::Number(1.0), DeclKind::Const);
        assert!(ctx.set("x", Value::Number(2.0)).is_err());
    }

    #[test]
    fn assigning_to_undeclared_global_fails() {
        let ctx = ExecutionContext::global();
        assert!(ctx.set("never_declared", Value::Undefined).is_err());
    }
}
