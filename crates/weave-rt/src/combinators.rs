//! Flow combinators (§4.5): `pipe`, `catch`, `fallback`, `switch`,
//! `branch`, `retry`, `timeout`, `throttle`, `batch`, `race`, `foreach`,
//! `guard`, `trigger`. Each is recognised by name at a call site and
//! dispatched here instead of going through ordinary call evaluation,
//! since combinators need the *unevaluated* step arguments (a step may be
//! invoked zero, one, or many times) rather than eagerly evaluated
//! values.
//!
//! All combinators are built on top of [`Evaluator::eval_step`] and are
//! cancellation-safe in the same sense async/await is: a combinator that
//! drops a pending step future (timeout, race) simply never polls it
//! again, which tears down whatever that step had suspended on.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, warn};
use weave_common::Span;
use weave_parser::{Node, NodeKind};

use crate::envelope::{ErrorReport, TransactionEnvelope};
use crate::error::{Diagnostic, EvalError, StackFrame};
use crate::evaluator::{EResult, Evaluator};
use crate::scope::Scope;
use crate::trigger::Trigger;
use crate::value::Value;

/// Per-identifier last-execution clock for `throttle`. Identifiers are
/// derived from the throttled step's source span, so two `throttle`
/// call sites never share a cooldown even if they call the same step.
#[derive(Default)]
pub struct ThrottleState(RefCell<HashMap<String, Instant>>);

impl ThrottleState {
    pub fn new() -> Self {
        Self::default()
    }

    fn wait_for(&self, key: &str, min_gap: Duration) -> Duration {
        match self.0.borrow().get(key) {
            Some(last) => min_gap.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    fn record(&self, key: &str) {
        self.0.borrow_mut().insert(key.to_string(), Instant::now());
    }
}

/// Named broadcast channels backing the `trigger(name)` combinator. A
/// host (or the scheduler) publishes a payload under a name; any number
/// of suspended `trigger(name)` calls wake with a clone of it.
#[derive(Default)]
pub struct EventBus(RefCell<HashMap<String, tokio::sync::broadcast::Sender<Value>>>);

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, name: &str) -> tokio::sync::broadcast::Sender<Value> {
        self.0
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| tokio::sync::broadcast::channel(16).0)
            .clone()
    }

    /// Publishes `value` under `name` to every currently-waiting `trigger`.
    pub fn publish(&self, name: &str, value: Value) {
        let _ = self.sender(name).send(value);
    }

    async fn wait(&self, name: &str) -> Value {
        let mut rx = self.sender(name).subscribe();
        loop {
            match rx.recv().await {
                Ok(v) => return v,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Value::Null,
            }
        }
    }
}

struct Outcome {
    success: bool,
}

/// A step's success/failure is read off its result the same way a pipe
/// boundary reads it: envelope-shaped values carry it explicitly, any
/// other value is an implicit success.
fn outcome_of(value: &Value) -> Outcome {
    match TransactionEnvelope::try_from_value(value) {
        Some(env) => Outcome { success: env.success },
        None => Outcome { success: true },
    }
}

fn error_report_value(e: &ErrorReport) -> Value {
    let mut m = IndexMap::new();
    m.insert("kind".to_string(), Value::Str(e.kind.clone()));
    m.insert("message".to_string(), Value::Str(e.message.clone()));
    Value::Dict(m)
}

fn diag_to_error_report(d: &Diagnostic) -> ErrorReport {
    ErrorReport::new(d.error.kind_name(), d.error.to_string())
}

/// Entry point called from the evaluator whenever a call's callee is a
/// bare name; returns `None` when `name` isn't a recognised combinator so
/// the caller falls through to ordinary call evaluation.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn eval_combinator(
    evaluator: &Evaluator<'_>,
    name: &str,
    pos_arg_nodes: &[Node],
    _kw_arg_nodes: &[(String, Node)],
    span: Span,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> Option<EResult<Value>> {
    let result = match (name, pos_arg_nodes.len()) {
        ("pipe", _) => evaluator.eval_pipe(pos_arg_nodes, scope, root_scope, depth, stack, triggers).await,
        ("catch", 2) => catch(evaluator, &pos_arg_nodes[0], &pos_arg_nodes[1], scope, root_scope, depth, stack, triggers).await,
        ("fallback", 2) => fallback(evaluator, &pos_arg_nodes[0], &pos_arg_nodes[1], scope, root_scope, depth, stack, triggers).await,
        ("switch", 1) => switch(evaluator, &pos_arg_nodes[0], scope, root_scope, depth, stack, triggers, span).await,
        ("branch", 2) => branch(evaluator, &pos_arg_nodes[0], &pos_arg_nodes[1], scope, root_scope, depth, stack, triggers).await,
        ("retry", 3) => retry(evaluator, &pos_arg_nodes[0], &pos_arg_nodes[1], &pos_arg_nodes[2], scope, root_scope, depth, stack, triggers).await,
        ("timeout", 2) => timeout(evaluator, &pos_arg_nodes[0], &pos_arg_nodes[1], scope, root_scope, depth, stack, triggers).await,
        ("throttle", 2) => throttle(evaluator, &pos_arg_nodes[0], &pos_arg_nodes[1], scope, root_scope, depth, stack, triggers).await,
        ("batch", _) => batch(evaluator, pos_arg_nodes, scope, root_scope, depth, stack, triggers).await,
        ("race", _) => race(evaluator, pos_arg_nodes, scope, root_scope, depth, stack, triggers).await,
        ("foreach", 2) => foreach(evaluator, &pos_arg_nodes[0], &pos_arg_nodes[1], scope, root_scope, depth, stack, triggers).await,
        ("guard", 1) => guard(evaluator, &pos_arg_nodes[0], scope, root_scope, depth, stack, triggers).await,
        ("trigger", 1) => trigger(evaluator, &pos_arg_nodes[0], scope, root_scope, depth, stack, triggers).await,
        ("pipe" | "catch" | "fallback" | "switch" | "branch" | "retry" | "timeout" | "throttle" | "foreach" | "guard" | "trigger", _) => {
            Err(Diagnostic::new(
                EvalError::CallError { span, message: format!("'{name}' called with the wrong number of arguments") },
                stack.clone(),
            ))
        }
        _ => return None,
    };
    Some(result)
}

#[allow(clippy::too_many_arguments)]
async fn catch(
    evaluator: &Evaluator<'_>,
    try_node: &Node,
    fallback_node: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let try_result = evaluator.eval_step(try_node, scope, root_scope, depth, stack, triggers).await?;
    if outcome_of(&try_result).success {
        return Ok(try_result);
    }
    let try_env = TransactionEnvelope::try_from_value(&try_result);

    let fallback_scope = scope.child();
    if let Some(env) = &try_env {
        fallback_scope.bind("errors", Value::List(env.errors.iter().map(error_report_value).collect()));
    }
    let fallback_result = evaluator.eval_step(fallback_node, &fallback_scope, root_scope, depth, stack, triggers).await?;

    let Some(fb_env) = TransactionEnvelope::try_from_value(&fallback_result) else {
        return Ok(fallback_result);
    };
    let mut errors = try_env.map(|e| e.errors).unwrap_or_default();
    errors.extend(fb_env.errors);
    Ok(TransactionEnvelope { errors, ..fb_env }.to_value())
}

#[allow(clippy::too_many_arguments)]
async fn fallback(
    evaluator: &Evaluator<'_>,
    primary: &Node,
    secondary: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let primary_result = evaluator.eval_step(primary, scope, root_scope, depth, stack, triggers).await?;
    if outcome_of(&primary_result).success {
        return Ok(primary_result);
    }
    evaluator.eval_step(secondary, scope, root_scope, depth, stack, triggers).await
}

#[allow(clippy::too_many_arguments)]
async fn switch(
    evaluator: &Evaluator<'_>,
    arg_node: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
    span: Span,
) -> EResult<Value> {
    let NodeKind::Dict(items) = &arg_node.kind else {
        return Err(Diagnostic::new(
            EvalError::CallError { span, message: "switch requires a dict literal argument".into() },
            stack.clone(),
        ));
    };
    for item in items {
        let NodeKind::Pair(key, value) = &item.kind else { continue };
        let NodeKind::Str(cond_text) = &key.kind else { continue };
        let cond_ast =
            weave_parser::parse_expr(cond_text).map_err(|e| Diagnostic::new(EvalError::Syntax(e), stack.clone()))?;
        let cond_value = evaluator.eval_expr(&cond_ast, scope, root_scope, depth, stack, triggers).await?;
        if cond_value.is_truthy() {
            return evaluator.eval_step(value, scope, root_scope, depth, stack, triggers).await;
        }
    }
    Ok(Value::Null)
}

#[allow(clippy::too_many_arguments)]
async fn branch(
    evaluator: &Evaluator<'_>,
    on_success: &Node,
    on_failure: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let context_result = scope.lookup("@result").unwrap_or(Value::Null);
    let step = if outcome_of(&context_result).success { on_success } else { on_failure };
    evaluator.eval_step(step, scope, root_scope, depth, stack, triggers).await
}

#[allow(clippy::too_many_arguments)]
async fn retry(
    evaluator: &Evaluator<'_>,
    step_node: &Node,
    attempts_node: &Node,
    delay_node: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let attempts_v = evaluator.eval_expr(attempts_node, scope, root_scope, depth, stack, triggers).await?;
    let delay_v = evaluator.eval_expr(delay_node, scope, root_scope, depth, stack, triggers).await?;
    let attempts = attempts_v.as_int().unwrap_or(1).max(1);
    let delay_secs = match delay_v {
        Value::Int(i) => i as f64,
        Value::Float(f) => f,
        _ => 0.0,
    };

    let mut last = Value::Null;
    for attempt in 0..attempts {
        last = evaluator.eval_step(step_node, scope, root_scope, depth, stack, triggers).await?;
        if outcome_of(&last).success {
            return Ok(last);
        }
        warn!(attempt = attempt + 1, attempts, span = %step_node.span, "retry: step failed");
        if attempt + 1 < attempts && delay_secs > 0.0 {
            let backoff = Duration::from_secs_f64(delay_secs * (attempt as f64 + 1.0));
            debug!(?backoff, span = %step_node.span, "retry: backing off before next attempt");
            tokio::time::sleep(backoff).await;
        }
    }
    Ok(last)
}

#[allow(clippy::too_many_arguments)]
async fn timeout(
    evaluator: &Evaluator<'_>,
    step_node: &Node,
    seconds_node: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let seconds_v = evaluator.eval_expr(seconds_node, scope, root_scope, depth, stack, triggers).await?;
    let seconds = match seconds_v {
        Value::Int(i) => i as f64,
        Value::Float(f) => f,
        _ => 0.0,
    };
    match tokio::time::timeout(Duration::from_secs_f64(seconds.max(0.0)), evaluator.eval_step(step_node, scope, root_scope, depth, stack, triggers)).await
    {
        Ok(result) => result,
        Err(_elapsed) => {
            warn!(seconds, span = %step_node.span, "timeout: step did not complete in time, cancelling");
            Ok(TransactionEnvelope::single_failure("TimeoutError", "operation timed out").to_value())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn throttle(
    evaluator: &Evaluator<'_>,
    step_node: &Node,
    ms_node: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let ms_v = evaluator.eval_expr(ms_node, scope, root_scope, depth, stack, triggers).await?;
    let ms = ms_v.as_int().unwrap_or(0).max(0) as u64;
    let key = step_node.span.to_string();
    let wait = evaluator.throttle.wait_for(&key, Duration::from_millis(ms));
    if !wait.is_zero() {
        debug!(?wait, span = %step_node.span, "throttle: delaying step");
        tokio::time::sleep(wait).await;
    }
    evaluator.throttle.record(&key);
    evaluator.eval_step(step_node, scope, root_scope, depth, stack, triggers).await
}

type StepFuture<'f> = Pin<Box<dyn Future<Output = (EResult<Value>, Vec<Trigger>)> + 'f>>;

fn step_future<'f>(evaluator: &'f Evaluator<'_>, step: &'f Node, scope: &'f Scope, root_scope: &'f Scope, depth: usize) -> StepFuture<'f> {
    Box::pin(async move {
        let mut local_stack = Vec::new();
        let mut local_triggers = Vec::new();
        let result = evaluator.eval_step(step, scope, root_scope, depth, &mut local_stack, &mut local_triggers).await;
        (result, local_triggers)
    })
}

async fn batch(
    evaluator: &Evaluator<'_>,
    steps: &[Node],
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    _stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let futs: Vec<_> = steps.iter().map(|s| step_future(evaluator, s, scope, root_scope, depth)).collect();
    let results = futures::future::join_all(futs).await;

    let mut values = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    let mut any_failure = false;
    for (result, local_triggers) in results {
        triggers.extend(local_triggers);
        match result {
            Ok(v) => {
                if !outcome_of(&v).success {
                    any_failure = true;
                }
                if let Some(env) = TransactionEnvelope::try_from_value(&v) {
                    errors.extend(env.errors);
                }
                values.push(v);
            }
            Err(d) => {
                any_failure = true;
                errors.push(diag_to_error_report(&d));
                values.push(Value::Null);
            }
        }
    }
    Ok(TransactionEnvelope { success: !any_failure, data: Value::List(values), errors, action: None, identifier: None }.to_value())
}

async fn race(
    evaluator: &Evaluator<'_>,
    steps: &[Node],
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    _stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let futs: Vec<_> = steps.iter().map(|s| step_future(evaluator, s, scope, root_scope, depth)).collect();
    // The unfinished futures are dropped here, which cancels them: a
    // suspended async step is simply never polled again.
    let ((result, local_triggers), _index, _rest) = futures::future::select_all(futs).await;
    triggers.extend(local_triggers);
    result
}

#[allow(clippy::too_many_arguments)]
async fn foreach(
    evaluator: &Evaluator<'_>,
    items_node: &Node,
    step_node: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let items_value = evaluator.eval_expr(items_node, scope, root_scope, depth, stack, triggers).await?;
    let Value::List(items) = items_value else {
        return Err(Diagnostic::new(
            EvalError::TypeError { span: items_node.span, declared: "list".into(), actual: items_value.type_name().to_string(), name: None },
            stack.clone(),
        ));
    };
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(evaluator.eval_pipe_stage(step_node, item, scope, root_scope, depth, stack, triggers).await?);
    }
    Ok(Value::List(results))
}

#[allow(clippy::too_many_arguments)]
async fn guard(
    evaluator: &Evaluator<'_>,
    expr_node: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let v = evaluator.eval_expr(expr_node, scope, root_scope, depth, stack, triggers).await?;
    let env = if v.is_truthy() {
        TransactionEnvelope::ok(v)
    } else {
        TransactionEnvelope::single_failure("ValidationError", "guard predicate was not truthy")
    };
    Ok(env.to_value())
}

#[allow(clippy::too_many_arguments)]
async fn trigger(
    evaluator: &Evaluator<'_>,
    name_node: &Node,
    scope: &Scope,
    root_scope: &Scope,
    depth: usize,
    stack: &mut Vec<StackFrame>,
    triggers: &mut Vec<Trigger>,
) -> EResult<Value> {
    let name_value = evaluator.eval_expr(name_node, scope, root_scope, depth, stack, triggers).await?;
    let name = name_value.as_str().unwrap_or_default().to_string();
    let payload = evaluator.events.wait(&name).await;
    Ok(TransactionEnvelope::ok(payload).to_value())
}
