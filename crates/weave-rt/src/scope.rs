//! Name-to-value scope chain.
//!
//! There is no rebinding: each declaration is a new shadowing entry
//! visible to later bindings in the same record (§3). A `Scope` is a
//! cheaply cloneable handle onto a shared, append-only binding table with
//! a parent link, so closures can capture "the scope as of now" by
//! cloning the handle -- later bindings in the defining record (added
//! after the closure's definition point) are visible to it too, mirroring
//! the source repository's lexical-capture behaviour.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::value::Value;

struct ScopeInner {
    parent: Option<Scope>,
    bindings: RefCell<FxHashMap<String, Value>>,
}

#[derive(Clone)]
pub struct Scope(Rc<ScopeInner>);

impl Scope {
    pub fn root() -> Self {
        Scope(Rc::new(ScopeInner { parent: None, bindings: RefCell::new(FxHashMap::default()) }))
    }

    pub fn child(&self) -> Self {
        Scope(Rc::new(ScopeInner {
            parent: Some(self.clone()),
            bindings: RefCell::new(FxHashMap::default()),
        }))
    }

    /// Binds `name` in this scope only, shadowing any outer binding of the
    /// same name for lookups that start here.
    pub fn bind(&self, name: impl Into<String>, value: Value) {
        self.0.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Looks up `name` in this scope, then each parent in turn.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.0.bindings.borrow().get(name) {
            return Some(v.clone());
        }
        self.0.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// True if `name` is bound directly in this scope (not a parent).
    pub fn has_own(&self, name: &str) -> bool {
        self.0.bindings.borrow().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_sees_parent_bindings() {
        let root = Scope::root();
        root.bind("a", Value::Int(1));
        let child = root.child();
        assert!(matches!(child.lookup("a"), Some(Value::Int(1))));
    }

    #[test]
    fn child_binding_does_not_leak_to_parent() {
        let root = Scope::root();
        let child = root.child();
        child.bind("a", Value::Int(1));
        assert!(root.lookup("a").is_none());
    }

    #[test]
    fn later_binding_in_same_scope_shadows_earlier() {
        let s = Scope::root();
        s.bind("a", Value::Int(1));
        s.bind("a", Value::Int(2));
        assert!(matches!(s.lookup("a"), Some(Value::Int(2))));
    }
}
