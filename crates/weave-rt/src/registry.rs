//! The host function registry: name → callable surface (§4.3, §6.1).
//!
//! Replaces the source repository's lazy, DI-container-polling service
//! proxies with a registry populated once, before evaluation starts;
//! modifying it during a live evaluation is undefined per §5.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::envelope::TransactionEnvelope;
use crate::scope::Scope;
use crate::value::Value;

/// Host futures are `!Send`: `Scope` is `Rc`-based, so the whole
/// evaluator (and anything it hands a `context` to) is single-threaded.
/// A `Runtime` drives its scheduler tasks on a `tokio::task::LocalSet`.
pub type HostFuture = Pin<Box<dyn Future<Output = TransactionEnvelope>>>;

/// A host callable: positional args, keyword args, and an optional
/// injected `context` (the calling scope), returning a transaction
/// envelope. Boxed so the registry can hold a mix of closures and
/// `async fn` adapters.
pub trait HostCallable {
    fn call(&self, pos_args: Vec<Value>, kw_args: IndexMap<String, Value>, context: Option<Scope>) -> HostFuture;
}

impl<F> HostCallable for F
where
    F: Fn(Vec<Value>, IndexMap<String, Value>, Option<Scope>) -> HostFuture,
{
    fn call(&self, pos_args: Vec<Value>, kw_args: IndexMap<String, Value>, context: Option<Scope>) -> HostFuture {
        (self)(pos_args, kw_args, context)
    }
}

/// Declared signature metadata for a registered host function, inspected
/// by `CallError` diagnostics and tooling.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub accepts_context: bool,
    pub known_kwargs: Vec<String>,
}

#[derive(Clone)]
struct Entry {
    callable: Rc<dyn HostCallable>,
    signature: Signature,
}

/// Name→callable surface. Dotted names (`pkg.foo`) are registered and
/// looked up as whole strings; field-access-style dotted resolution for
/// values returned by a call happens in the evaluator, not here.
///
/// Cloning copies the name→callable map shallowly (callables are
/// `Rc`-shared), which lets a [`crate::Runtime`] freeze its registry into
/// an `Rc` for the scheduler once setup is done while still mutating its
/// own owned copy via `&mut self`.
#[derive(Default, Clone)]
pub struct HostRegistry {
    entries: HashMap<String, Entry>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, callable: Rc<dyn HostCallable>, accepts_context: bool) {
        self.entries.insert(
            name.into(),
            Entry { callable, signature: Signature { accepts_context, known_kwargs: Vec::new() } },
        );
    }

    pub fn register_with_signature(&mut self, name: impl Into<String>, callable: Rc<dyn HostCallable>, signature: Signature) {
        self.entries.insert(name.into(), Entry { callable, signature });
    }

    pub fn get(&self, name: &str) -> Option<(&Rc<dyn HostCallable>, &Signature)> {
        self.entries.get(name).map(|e| (&e.callable, &e.signature))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
