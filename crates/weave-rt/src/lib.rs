//! The Weave runtime: evaluator, flow combinators, and trigger scheduler.
//!
//! [`Runtime`] is the embedding surface (§6.4): host applications build
//! one, register functions and types on it, then `parse`/`evaluate`
//! source or `run` it end-to-end including the scheduler loops a source
//! text's triggers install.

pub mod combinators;
pub mod envelope;
pub mod error;
pub mod evaluator;
pub mod registry;
pub mod scheduler;
pub mod scope;
pub mod stdlib;
pub mod trigger;
pub mod types;
pub mod value;

use std::rc::Rc;

use tokio::task::LocalSet;

use combinators::{EventBus, ThrottleState};
use envelope::TransactionEnvelope;
use error::Diagnostic;
use evaluator::Evaluator;
use registry::{HostCallable, HostRegistry, Signature};
use scheduler::Scheduler;
use scope::Scope;
use trigger::Trigger;
use types::{CustomTypes, Schema};
use value::Value;

pub use error::EvalError;
pub use weave_parser::{Node, SyntaxError};

/// A parsed and evaluated source text plus the scheduler handle for the
/// triggers it registered, if `run` started one.
pub struct RunOutcome {
    pub record: Value,
    pub scheduler: Option<Rc<Scheduler>>,
}

/// Owns the host registry, the custom-type table, and the shared
/// combinator side-state (§5's shared-resources list). Registering a
/// function or type after a live evaluation has started is undefined,
/// matching the registry's own documented policy: build a `Runtime`,
/// finish registering, then `parse`/`evaluate`/`run`.
#[derive(Default)]
pub struct Runtime {
    registry: HostRegistry,
    custom_types: CustomTypes,
    throttle: Rc<ThrottleState>,
    events: Rc<EventBus>,
}

impl Runtime {
    /// Builds a runtime with the standard library (§3, §4.3 ADDED)
    /// pre-registered; `register_function` may still shadow any of its
    /// names before the first `evaluate`/`run` call.
    pub fn new() -> Self {
        let mut registry = HostRegistry::new();
        stdlib::install(&mut registry);
        Self { registry, ..Self::default() }
    }

    /// `register_function(name, fn, accepts_ctx)` (§6.1, §6.4). `name`
    /// may be dotted (`pkg.foo`); it is looked up as a whole string.
    pub fn register_function(&mut self, name: impl Into<String>, callable: Rc<dyn HostCallable>, accepts_ctx: bool) {
        self.registry.register(name, callable, accepts_ctx);
    }

    /// As [`Runtime::register_function`] but with declared keyword-argument
    /// names recorded for `CallError` diagnostics.
    pub fn register_function_with_signature(&mut self, name: impl Into<String>, callable: Rc<dyn HostCallable>, signature: Signature) {
        self.registry.register_with_signature(name, callable, signature);
    }

    /// `register_type(name, schema)` (§6.1, §6.4): installs a custom type
    /// usable in typed declarations and as a type-constructor call.
    pub fn register_type(&mut self, name: impl Into<String>, schema: Value) {
        self.custom_types.register(name, Schema(schema));
    }

    /// `parse(source) -> AST | SyntaxError` (§6.4).
    pub fn parse(&self, source: &str) -> Result<Node, SyntaxError> {
        weave_parser::parse(source)
    }

    /// `evaluate(ast, scope) -> (record Value, triggers)` (§6.4).
    pub async fn evaluate(&self, ast: &Node, initial_scope: Scope) -> Result<(Value, Vec<Trigger>), Diagnostic> {
        let evaluator = Evaluator::new(&self.registry, &self.custom_types, &self.throttle, &self.events);
        evaluator.evaluate(ast, initial_scope).await
    }

    /// `run(source) -> (record Value, scheduler handle)` (§6.4): parses,
    /// evaluates against a fresh root scope, and spawns a scheduler task
    /// per discovered trigger on `local`. Callers drive `local` themselves
    /// (typically via `local_set.run_until(...)`), since the evaluator's
    /// `Scope` chain is `!Send`.
    ///
    /// The registry and custom-type table are cloned into fresh `Rc`s at
    /// this point (callables are themselves `Rc`-shared, so this is
    /// shallow): the scheduler's tasks outlive this call and need owned
    /// access, while `Runtime` keeps its own copy mutable via `&mut self`
    /// for any later `register_function`/`register_type` call.
    pub async fn run(&self, source: &str, local: &LocalSet) -> Result<RunOutcome, RunError> {
        let ast = self.parse(source).map_err(RunError::Syntax)?;
        let (record, triggers) = self.evaluate(&ast, Scope::root()).await.map_err(RunError::Eval)?;

        let scheduler = if triggers.is_empty() {
            None
        } else {
            Some(Rc::new(Scheduler::spawn(
                local,
                triggers,
                Rc::new(self.registry.clone()),
                Rc::new(self.custom_types.clone()),
                self.throttle.clone(),
                self.events.clone(),
            )))
        };
        Ok(RunOutcome { record, scheduler })
    }

    /// `shutdown(handle)` (§6.4): signals cancellation to every scheduler
    /// task produced by `run` and awaits their cooperative exit.
    pub async fn shutdown(&self, scheduler: Rc<Scheduler>) {
        scheduler.shutdown().await;
    }

    /// Delivers `value` to any `trigger(name)` calls currently suspended
    /// on `name` (the host-facing half of the `EventBus` §4.5 relies on).
    pub fn publish_event(&self, name: &str, value: Value) {
        self.events.publish(name, value);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{0}")]
    Syntax(SyntaxError),
    #[error("{0}")]
    Eval(Diagnostic),
}

/// Renders an evaluator [`Diagnostic`] as the transaction envelope a
/// caller outside the evaluator (e.g. a host-level error boundary) would
/// see, mirroring how a failed step looks from inside `catch`.
pub fn diagnostic_to_envelope(diagnostic: &Diagnostic) -> TransactionEnvelope {
    TransactionEnvelope::single_failure(diagnostic.error.kind_name(), diagnostic.error.to_string())
}
