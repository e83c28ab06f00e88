//! The evaluator / resolver (§4.4): name resolution, typed declarations,
//! pipe semantics, and user-defined function invocation.
//!
//! The evaluator is co-recursive with the flow combinators in
//! `combinators.rs`: a combinator step ultimately calls back into
//! [`Evaluator::eval_call`] / [`Evaluator::invoke_function_value`] to run
//! a step, and the evaluator calls into the registry to run host steps.

use std::cmp::Ordering;
use std::rc::Rc;

use async_recursion::async_recursion;
use indexmap::IndexMap;
use weave_common::Span;
use weave_parser::{BinOpKind, Node, NodeKind, NumberLit, UnaryOpKind};

use crate::combinators::{self, EventBus, ThrottleState};
use crate::envelope::TransactionEnvelope;
use crate::error::{Diagnostic, EvalError, StackFrame};
use crate::registry::HostRegistry;
use crate::scope::Scope;
use crate::trigger::{CronField, Trigger, TriggerKind};
use crate::types::{check_builtin_assignable, normalize, normalize_type_name, CustomTypes};
use crate::value::{FunctionDef, Value};

pub const DEFAULT_MAX_DEPTH: usize = 1000;

pub type EResult<T> = Result<T, Diagnostic>;

/// Owns the read-only collaborators an evaluation needs: the host
/// registry, the custom-type table, and the combinator side-state
/// (§5's "shared resources" list plus the throttle/event state the
/// combinators in §4.5 need). None of these are mutated except through
/// their own interior-mutability rules once an evaluation starts.
pub struct Evaluator<'a> {
    registry: &'a HostRegistry,
    custom_types: &'a CustomTypes,
    pub(crate) throttle: &'a ThrottleState,
    pub(crate) events: &'a EventBus,
    pub max_depth: usize,
}

enum CalleeLookup {
    User(Rc<FunctionDef>),
    Host(String),
    TypeCtor(String),
    NotCallable,
    NotFound,
}

fn is_builtin_type_name(name: &str) -> bool {
    matches!(
        name,
        "int" | "float" | "str" | "bool" | "dict" | "list" | "tuple" | "any" | "function" | "number"
    )
}

impl<'a> Evaluator<'a> {
    pub fn new(registry: &'a HostRegistry, custom_types: &'a CustomTypes, throttle: &'a ThrottleState, events: &'a EventBus) -> Self {
        Self { registry, custom_types, throttle, events, max_depth: DEFAULT_MAX_DEPTH }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// `evaluate(ast, initial_scope) -> (Value, Vec<Trigger>)`.
    pub async fn evaluate(&self, ast: &Node, initial_scope: Scope) -> EResult<(Value, Vec<Trigger>)> {
        let mut stack = Vec::new();
        let mut triggers = Vec::new();
        let value = self.eval_record(ast, &initial_scope, &initial_scope, 0, &mut stack, &mut triggers).await?;
        Ok((value, triggers))
    }

    fn diag(&self, error: EvalError, stack: &[StackFrame]) -> Diagnostic {
        Diagnostic::new(error, stack.to_vec())
    }

    // ── Records ──────────────────────────────────────────────────────────

    /// Evaluates a `Dict` node as a record: items in source order, each
    /// visible to the next via `working_scope`. Trigger-shaped items are
    /// collected into `triggers` instead of being bound as fields.
    #[async_recursion(?Send)]
    pub(crate) async fn eval_record(
        &self,
        node: &Node,
        working_scope: &Scope,
        root_scope: &Scope,
        depth: usize,
        stack: &mut Vec<StackFrame>,
        triggers: &mut Vec<Trigger>,
    ) -> EResult<Value> {
        let NodeKind::Dict(items) = &node.kind else {
            return self.eval_expr(node, working_scope, root_scope, depth, stack, triggers).await;
        };

        let mut result = IndexMap::new();

        for item in items {
            match &item.kind {
                NodeKind::Declaration { target, value } => {
                    let v = self.eval_expr(value, working_scope, root_scope, depth, stack, triggers).await?;
                    let (name, v) = self.bind_typed(target, v, item.span, stack)?;
                    working_scope.bind(name.clone(), v.clone());
                    result.insert(name, v);
                }
                NodeKind::Pair(key, value) => {
                    if let Some(kind) = classify_trigger_key(key) {
                        triggers.push(Trigger::new(kind, (**value).clone(), working_scope.clone()));
                        continue;
                    }
                    let v = self.eval_expr(value, working_scope, root_scope, depth, stack, triggers).await?;
                    if let NodeKind::TypedVar(name, ty) = &key.kind {
                        let v = self.check_type(ty, v, item.span, stack)?;
                        working_scope.bind(name.clone(), v.clone());
                        result.insert(name.clone(), v);
                    } else {
                        let name = self.key_to_string(key, stack)?;
                        working_scope.bind(name.clone(), v.clone());
                        result.insert(name, v);
                    }
                }
                _ => {
                    // A bare expression statement: evaluated for its side
                    // effect (e.g. an immediate host call), not bound.
                    self.eval_expr(item, working_scope, root_scope, depth, stack, triggers).await?;
                }
            }
        }

        Ok(Value::Dict(result))
    }

    fn bind_typed(&self, target: &Node, value: Value, span: Span, stack: &[StackFrame]) -> EResult<(String, Value)> {
        match &target.kind {
            NodeKind::TypedVar(name, ty) => {
                let v = self.check_type(ty, value, span, stack)?;
                Ok((name.clone(), v))
            }
            NodeKind::Var(name) => Ok((name.clone(), value)),
            _ => Err(self.diag(
                EvalError::RuntimeError { span: Some(span), message: "invalid declaration target".into() },
                stack,
            )),
        }
    }

    fn key_to_string(&self, key: &Node, stack: &[StackFrame]) -> EResult<String> {
        match &key.kind {
            NodeKind::Var(name) => Ok(name.clone()),
            NodeKind::Str(s) => Ok(s.clone()),
            NodeKind::Number(NumberLit::Int(n)) => Ok(n.to_string()),
            NodeKind::Number(NumberLit::Float(f)) => Ok(f.to_string()),
            NodeKind::Bool(b) => Ok(b.to_string()),
            _ => Err(self.diag(
                EvalError::RuntimeError { span: Some(key.span), message: "unsupported mapping key shape".into() },
                stack,
            )),
        }
    }

    fn check_type(&self, ty: &str, value: Value, span: Span, stack: &[StackFrame]) -> EResult<Value> {
        let norm = normalize_type_name(ty);
        if is_builtin_type_name(norm) {
            check_builtin_assignable(ty, value, span).map_err(|e| self.diag(e, stack))
        } else if let Some(schema) = self.custom_types.get(ty) {
            normalize(value, schema, span).map_err(|e| self.diag(e, stack))
        } else {
            Err(self.diag(EvalError::NameError { span, name: format!("unknown type '{ty}'") }, stack))
        }
    }

    // ── Expressions ──────────────────────────────────────────────────────

    #[async_recursion(?Send)]
    pub(crate) async fn eval_expr(
        &self,
        node: &Node,
        scope: &Scope,
        root_scope: &Scope,
        depth: usize,
        stack: &mut Vec<StackFrame>,
        triggers: &mut Vec<Trigger>,
    ) -> EResult<Value> {
        if depth > self.max_depth {
            return Err(self.diag(EvalError::RecursionError { span: node.span }, stack));
        }
        match &node.kind {
            NodeKind::Number(NumberLit::Int(i)) => Ok(Value::Int(*i)),
            NodeKind::Number(NumberLit::Float(f)) => Ok(Value::Float(*f)),
            NodeKind::Str(s) => Ok(Value::Str(s.clone())),
            NodeKind::Bool(b) => Ok(Value::Bool(*b)),
            NodeKind::Any => Ok(Value::Null),
            NodeKind::Var(name) => self.eval_name(name, node.span, scope, root_scope, stack),
            NodeKind::TypedVar(name, _) => self.eval_name(name, node.span, scope, root_scope, stack),
            NodeKind::Dict(_) => {
                self.eval_record(node, &scope.child(), root_scope, depth, stack, triggers).await
            }
            NodeKind::List(items) | NodeKind::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, scope, root_scope, depth, stack, triggers).await?);
                }
                Ok(Value::List(values))
            }
            NodeKind::Call { callee, pos_args, kw_args } => {
                if let NodeKind::Var(name) = &callee.kind {
                    if let Some(result) =
                        combinators::eval_combinator(self, name, pos_args, kw_args, node.span, scope, root_scope, depth, stack, triggers)
                            .await
                    {
                        return result;
                    }
                }
                self.eval_call(callee, None, pos_args, kw_args, node.span, scope, root_scope, depth, stack, triggers)
                    .await
            }
            NodeKind::BinOp { op, left, right } => {
                self.eval_binop(*op, left, right, scope, root_scope, depth, stack, triggers).await
            }
            NodeKind::UnaryOp { op, operand } => {
                let v = self.eval_expr(operand, scope, root_scope, depth, stack, triggers).await?;
                self.apply_unary(*op, v, node.span, stack)
            }
            NodeKind::Pipe(stages) => self.eval_pipe(stages, scope, root_scope, depth, stack, triggers).await,
            NodeKind::FunctionLit { params, body, returns } => Ok(Value::Function(Rc::new(FunctionDef {
                name: None,
                params: params.clone(),
                body: (**body).clone(),
                returns: returns.clone(),
                closure: scope.clone(),
            }))),
            NodeKind::Pair(..) | NodeKind::Declaration { .. } => Err(self.diag(
                EvalError::RuntimeError {
                    span: Some(node.span),
                    message: "a pair/declaration cannot appear in expression position".into(),
                },
                stack,
            )),
        }
    }

    /// §4.3 name resolution for a *value* position: scope chain, then the
    /// root record. Dotted segments after the first are field accesses.
    fn eval_name(&self, name: &str, span: Span, scope: &Scope, root_scope: &Scope, stack: &[StackFrame]) -> EResult<Value> {
        let mut parts = name.split('.');
        let first = parts.next().unwrap();
        let mut current = scope
            .lookup(first)
            .or_else(|| root_scope.lookup(first))
            .ok_or_else(|| self.diag(EvalError::NameError { span, name: name.to_string() }, stack))?;
        for seg in parts {
            current = match current {
                Value::Dict(map) => map
                    .get(seg)
                    .cloned()
                    .ok_or_else(|| self.diag(EvalError::NameError { span, name: name.to_string() }, stack))?,
                _ => return Err(self.diag(EvalError::NameError { span, name: name.to_string() }, stack)),
            };
        }
        Ok(current)
    }

    // ── Binary / unary operators ────────────────────────────────────────

    #[async_recursion(?Send)]
    async fn eval_binop(
        &self,
        op: BinOpKind,
        left: &Node,
        right: &Node,
        scope: &Scope,
        root_scope: &Scope,
        depth: usize,
        stack: &mut Vec<StackFrame>,
        triggers: &mut Vec<Trigger>,
    ) -> EResult<Value> {
        match op {
            BinOpKind::And => {
                let l = self.eval_expr(left, scope, root_scope, depth, stack, triggers).await?;
                if !l.is_truthy() {
                    return Ok(l);
                }
                self.eval_expr(right, scope, root_scope, depth, stack, triggers).await
            }
            BinOpKind::Or => {
                let l = self.eval_expr(left, scope, root_scope, depth, stack, triggers).await?;
                if l.is_truthy() {
                    return Ok(l);
                }
                self.eval_expr(right, scope, root_scope, depth, stack, triggers).await
            }
            _ => {
                let l = self.eval_expr(left, scope, root_scope, depth, stack, triggers).await?;
                let r = self.eval_expr(right, scope, root_scope, depth, stack, triggers).await?;
                self.apply_binop(op, l, r, left.span.merge(right.span), stack)
            }
        }
    }

    fn apply_binop(&self, op: BinOpKind, l: Value, r: Value, span: Span, stack: &[StackFrame]) -> EResult<Value> {
        use BinOpKind::*;
        match op {
            Eq => Ok(Value::Bool(values_equal(&l, &r))),
            NotEq => Ok(Value::Bool(!values_equal(&l, &r))),
            Lt | Gt | LtEq | GtEq => {
                let ord = numeric_cmp(&l, &r).or_else(|| string_cmp(&l, &r)).ok_or_else(|| {
                    self.diag(
                        EvalError::TypeError {
                            span,
                            declared: "number or str".into(),
                            actual: format!("{}/{}", l.type_name(), r.type_name()),
                            name: None,
                        },
                        stack,
                    )
                })?;
                let b = match op {
                    Lt => ord == Ordering::Less,
                    Gt => ord == Ordering::Greater,
                    LtEq => ord != Ordering::Greater,
                    GtEq => ord != Ordering::Less,
                    _ => unreachable!(),
                };
                Ok(Value::Bool(b))
            }
            Add | Sub | Mul | Div | Mod | Pow => self.apply_arith(op, l, r, span, stack),
            And | Or => unreachable!("short-circuit operators are handled in eval_binop"),
        }
    }

    fn apply_arith(&self, op: BinOpKind, l: Value, r: Value, span: Span, stack: &[StackFrame]) -> EResult<Value> {
        use BinOpKind::*;
        let overflow = || self.diag(EvalError::ArithmeticError { span, message: "integer overflow".into() }, stack);
        let div_zero = || self.diag(EvalError::ArithmeticError { span, message: "division by zero".into() }, stack);

        if let (Value::Int(a), Value::Int(b)) = (&l, &r) {
            let (a, b) = (*a, *b);
            return match op {
                Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
                Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
                Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
                Div => {
                    if b == 0 {
                        Err(div_zero())
                    } else {
                        a.checked_div(b).map(Value::Int).ok_or_else(overflow)
                    }
                }
                Mod => {
                    if b == 0 {
                        Err(div_zero())
                    } else {
                        Ok(Value::Int(a % b))
                    }
                }
                Pow => {
                    if b >= 0 {
                        a.checked_pow(b as u32).map(Value::Int).ok_or_else(overflow)
                    } else {
                        Ok(Value::Float((a as f64).powf(b as f64)))
                    }
                }
                _ => unreachable!(),
            };
        }

        let af = as_f64(&l, span).map_err(|e| self.diag(e, stack))?;
        let bf = as_f64(&r, span).map_err(|e| self.diag(e, stack))?;
        match op {
            Add => Ok(Value::Float(af + bf)),
            Sub => Ok(Value::Float(af - bf)),
            Mul => Ok(Value::Float(af * bf)),
            Div => {
                if bf == 0.0 {
                    Err(div_zero())
                } else {
                    Ok(Value::Float(af / bf))
                }
            }
            Mod => {
                if bf == 0.0 {
                    Err(div_zero())
                } else {
                    Ok(Value::Float(af % bf))
                }
            }
            Pow => Ok(Value::Float(af.powf(bf))),
            _ => unreachable!(),
        }
    }

    fn apply_unary(&self, op: UnaryOpKind, v: Value, span: Span, stack: &[StackFrame]) -> EResult<Value> {
        match op {
            UnaryOpKind::Not => Ok(Value::Bool(!v.is_truthy())),
            UnaryOpKind::Neg => match v {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| self.diag(EvalError::ArithmeticError { span, message: "negation overflow".into() }, stack)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(self.diag(
                    EvalError::TypeError { span, declared: "number".into(), actual: other.type_name().to_string(), name: None },
                    stack,
                )),
            },
        }
    }

    // ── Pipe ─────────────────────────────────────────────────────────────

    pub(crate) async fn eval_pipe(
        &self,
        stages: &[Node],
        scope: &Scope,
        root_scope: &Scope,
        depth: usize,
        stack: &mut Vec<StackFrame>,
        triggers: &mut Vec<Trigger>,
    ) -> EResult<Value> {
        let mut current = self.eval_expr(&stages[0], scope, root_scope, depth, stack, triggers).await?;
        for stage in &stages[1..] {
            let out = self.eval_pipe_stage(stage, current, scope, root_scope, depth, stack, triggers).await?;
            current = match TransactionEnvelope::try_from_value(&out) {
                Some(env) if !env.success => return Ok(out),
                Some(env) => env.data,
                None => out,
            };
        }
        Ok(current)
    }

    pub(crate) async fn eval_pipe_stage(
        &self,
        stage: &Node,
        incoming: Value,
        scope: &Scope,
        root_scope: &Scope,
        depth: usize,
        stack: &mut Vec<StackFrame>,
        triggers: &mut Vec<Trigger>,
    ) -> EResult<Value> {
        match &stage.kind {
            NodeKind::Call { callee, pos_args, kw_args } => {
                self.eval_call(callee, Some(incoming), pos_args, kw_args, stage.span, scope, root_scope, depth, stack, triggers)
                    .await
            }
            NodeKind::Var(_) => {
                self.eval_call(stage, Some(incoming), &[], &[], stage.span, scope, root_scope, depth, stack, triggers).await
            }
            NodeKind::FunctionLit { .. } => {
                let f = self.eval_expr(stage, scope, root_scope, depth, stack, triggers).await?;
                self.invoke_function_value(f, vec![incoming], IndexMap::new(), stage.span, root_scope, depth, stack, triggers)
                    .await
            }
            _ => Err(self.diag(
                EvalError::CallError { span: stage.span, message: "pipe stage must be a call, identifier, or function literal".into() },
                stack,
            )),
        }
    }

    /// Evaluates a combinator "step" argument (§4.5): a call, a bare
    /// identifier invoked with no arguments, a function literal invoked
    /// with no arguments, or (for branches like `switch`'s arms) any
    /// plain expression.
    #[async_recursion(?Send)]
    pub(crate) async fn eval_step(
        &self,
        node: &Node,
        scope: &Scope,
        root_scope: &Scope,
        depth: usize,
        stack: &mut Vec<StackFrame>,
        triggers: &mut Vec<Trigger>,
    ) -> EResult<Value> {
        match &node.kind {
            NodeKind::Call { callee, pos_args, kw_args } => {
                if let NodeKind::Var(name) = &callee.kind {
                    if let Some(result) =
                        combinators::eval_combinator(self, name, pos_args, kw_args, node.span, scope, root_scope, depth, stack, triggers)
                            .await
                    {
                        return result;
                    }
                }
                self.eval_call(callee, None, pos_args, kw_args, node.span, scope, root_scope, depth, stack, triggers).await
            }
            NodeKind::Var(_) => self.eval_call(node, None, &[], &[], node.span, scope, root_scope, depth, stack, triggers).await,
            NodeKind::FunctionLit { .. } => {
                let f = self.eval_expr(node, scope, root_scope, depth, stack, triggers).await?;
                self.invoke_function_value(f, Vec::new(), IndexMap::new(), node.span, root_scope, depth, stack, triggers).await
            }
            _ => self.eval_expr(node, scope, root_scope, depth, stack, triggers).await,
        }
    }

    // ── Calls ────────────────────────────────────────────────────────────

    #[async_recursion(?Send)]
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn eval_call(
        &self,
        callee: &Node,
        leading: Option<Value>,
        pos_arg_nodes: &[Node],
        kw_arg_nodes: &[(String, Node)],
        span: Span,
        scope: &Scope,
        root_scope: &Scope,
        depth: usize,
        stack: &mut Vec<StackFrame>,
        triggers: &mut Vec<Trigger>,
    ) -> EResult<Value> {
        let mut pos_args = Vec::with_capacity(pos_arg_nodes.len() + 1);
        pos_args.extend(leading);
        for n in pos_arg_nodes {
            pos_args.push(self.eval_expr(n, scope, root_scope, depth, stack, triggers).await?);
        }
        let mut kw_args = IndexMap::new();
        for (k, n) in kw_arg_nodes {
            kw_args.insert(k.clone(), self.eval_expr(n, scope, root_scope, depth, stack, triggers).await?);
        }

        let name = match &callee.kind {
            NodeKind::Var(name) => name.clone(),
            _ => {
                let v = self.eval_expr(callee, scope, root_scope, depth, stack, triggers).await?;
                return self.invoke_function_value(v, pos_args, kw_args, span, root_scope, depth, stack, triggers).await;
            }
        };

        stack.push((format!("call {name}"), span));
        let result = self.dispatch_call(&name, pos_args, kw_args, span, scope, root_scope, depth, stack, triggers).await;
        stack.pop();
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_call(
        &self,
        name: &str,
        pos_args: Vec<Value>,
        kw_args: IndexMap<String, Value>,
        span: Span,
        scope: &Scope,
        root_scope: &Scope,
        depth: usize,
        stack: &mut Vec<StackFrame>,
        triggers: &mut Vec<Trigger>,
    ) -> EResult<Value> {
        match self.resolve_callee_by_name(name, scope, root_scope) {
            CalleeLookup::User(def) => {
                self.invoke_function_value(Value::Function(def), pos_args, kw_args, span, root_scope, depth, stack, triggers)
                    .await
            }
            CalleeLookup::Host(full_name) => {
                let (callable, sig) = self.registry.get(&full_name).expect("checked by contains() above");
                let ctx = if sig.accepts_context { Some(scope.clone()) } else { None };
                let env = callable.call(pos_args, kw_args, ctx).await;
                Ok(env.to_value())
            }
            CalleeLookup::TypeCtor(ty) => {
                let v = pos_args
                    .into_iter()
                    .next()
                    .ok_or_else(|| self.diag(EvalError::CallError { span, message: "type constructor requires one argument".into() }, stack))?;
                self.check_type(&ty, v, span, stack)
            }
            CalleeLookup::NotCallable => {
                Err(self.diag(EvalError::CallError { span, message: format!("'{name}' is not callable") }, stack))
            }
            CalleeLookup::NotFound => Err(self.diag(EvalError::NameError { span, name: name.to_string() }, stack)),
        }
    }

    /// §4.3 resolution order in call position: scope chain, registry,
    /// root record, type name.
    fn resolve_callee_by_name(&self, name: &str, scope: &Scope, root_scope: &Scope) -> CalleeLookup {
        if let Some(v) = scope.lookup(name) {
            return match v {
                Value::Function(f) => CalleeLookup::User(f),
                _ => CalleeLookup::NotCallable,
            };
        }
        if self.registry.contains(name) {
            return CalleeLookup::Host(name.to_string());
        }
        if let Some(v) = root_scope.lookup(name) {
            return match v {
                Value::Function(f) => CalleeLookup::User(f),
                _ => CalleeLookup::NotCallable,
            };
        }

        let mut segs = name.splitn(2, '.');
        let first = segs.next().unwrap();
        if let Some(rest) = segs.next() {
            return self.resolve_dotted(first, rest, scope, root_scope);
        }

        let norm = normalize_type_name(first);
        if is_builtin_type_name(norm) || self.custom_types.contains(first) {
            return CalleeLookup::TypeCtor(first.to_string());
        }
        CalleeLookup::NotFound
    }

    fn resolve_dotted(&self, first: &str, rest: &str, scope: &Scope, root_scope: &Scope) -> CalleeLookup {
        let Some(mut current) = scope.lookup(first).or_else(|| root_scope.lookup(first)) else {
            return CalleeLookup::NotFound;
        };
        for seg in rest.split('.') {
            current = match current {
                Value::Dict(map) => match map.get(seg) {
                    Some(v) => v.clone(),
                    None => return CalleeLookup::NotFound,
                },
                _ => return CalleeLookup::NotCallable,
            };
        }
        match current {
            Value::Function(f) => CalleeLookup::User(f),
            _ => CalleeLookup::NotCallable,
        }
    }

    /// Invokes a resolved function value, binding parameters positionally
    /// then by keyword, evaluating the body in a fresh child of the
    /// function's captured closure scope, and looking the declared
    /// `returns` names up in that scope to form the result.
    #[async_recursion(?Send)]
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn invoke_function_value(
        &self,
        func: Value,
        pos_args: Vec<Value>,
        kw_args: IndexMap<String, Value>,
        span: Span,
        root_scope: &Scope,
        depth: usize,
        stack: &mut Vec<StackFrame>,
        triggers: &mut Vec<Trigger>,
    ) -> EResult<Value> {
        let Value::Function(def) = func else {
            return Err(self.diag(EvalError::CallError { span, message: "value is not callable".into() }, stack));
        };
        if depth + 1 > self.max_depth {
            return Err(self.diag(EvalError::RecursionError { span }, stack));
        }
        if pos_args.len() > def.params.len() {
            return Err(self.diag(
                EvalError::CallError {
                    span,
                    message: format!("too many positional arguments: expected at most {}, got {}", def.params.len(), pos_args.len()),
                },
                stack,
            ));
        }

        let call_scope = def.closure.child();
        for (i, (pname, ptype)) in def.params.iter().enumerate() {
            let raw = if i < pos_args.len() {
                pos_args[i].clone()
            } else if let Some(v) = kw_args.get(pname) {
                v.clone()
            } else {
                return Err(self.diag(EvalError::CallError { span, message: format!("missing required parameter '{pname}'") }, stack));
            };
            let checked = self.check_type(ptype, raw, span, stack)?;
            call_scope.bind(pname.clone(), checked);
        }

        self.eval_record(&def.body, &call_scope, root_scope, depth + 1, stack, triggers).await?;

        if def.returns.is_empty() {
            return Ok(Value::Null);
        }
        if def.returns.len() == 1 {
            let (rname, rty) = &def.returns[0];
            let v = call_scope
                .lookup(rname)
                .ok_or_else(|| self.diag(EvalError::NameError { span, name: rname.clone() }, stack))?;
            self.check_type(rty, v, span, stack)
        } else {
            let mut values = Vec::with_capacity(def.returns.len());
            for (rname, rty) in &def.returns {
                let v = call_scope
                    .lookup(rname)
                    .ok_or_else(|| self.diag(EvalError::NameError { span, name: rname.clone() }, stack))?;
                values.push(self.check_type(rty, v, span, stack)?);
            }
            Ok(Value::List(values))
        }
    }
}

/// An item's key is an `Event` candidate if it's a call node, or a `Cron`
/// candidate if it's a five-element tuple with at least one wildcard
/// field (§4.4).
fn classify_trigger_key(key: &Node) -> Option<TriggerKind> {
    match &key.kind {
        NodeKind::Call { callee, pos_args, kw_args } => Some(TriggerKind::Event {
            callee: callee.clone(),
            pos_args: pos_args.clone(),
            kw_args: kw_args.clone(),
        }),
        NodeKind::Tuple(items) if items.len() == 5 => {
            let fields: Option<Vec<CronField>> = items.iter().map(tuple_item_to_cron_field).collect();
            let fields = fields?;
            if fields.iter().any(|f| matches!(f, CronField::Any)) {
                Some(TriggerKind::Cron {
                    minute: fields[0],
                    hour: fields[1],
                    day: fields[2],
                    month: fields[3],
                    weekday: fields[4],
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

fn tuple_item_to_cron_field(node: &Node) -> Option<CronField> {
    match &node.kind {
        NodeKind::Any => Some(CronField::Any),
        NodeKind::Number(NumberLit::Int(n)) if *n >= 0 => Some(CronField::Literal(*n as u32)),
        NodeKind::Str(s) => {
            if s == "*" {
                Some(CronField::Any)
            } else {
                s.parse::<u32>().ok().map(CronField::Literal)
            }
        }
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b)),
        (Value::Dict(x), Value::Dict(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).map_or(false, |v2| values_equal(v, v2)))
        }
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn as_f64_opt(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    as_f64_opt(a)?.partial_cmp(&as_f64_opt(b)?)
}

fn string_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn as_f64(v: &Value, span: Span) -> Result<f64, EvalError> {
    as_f64_opt(v).ok_or_else(|| EvalError::TypeError {
        span,
        declared: "number".into(),
        actual: v.type_name().to_string(),
        name: None,
    })
}
