//! End-to-end scenarios mirroring the testable-property scenarios S1-S6.
//!
//! The evaluator's `Scope` chain is `Rc`-based and therefore `!Send`, so
//! every test drives its async body through a `tokio::task::LocalSet`
//! rather than the default `#[tokio::test]` multi-threaded executor.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::task::LocalSet;

use weave_rt::registry::{HostCallable, HostFuture};
use weave_rt::scope::Scope;
use weave_rt::trigger::{CronField, TriggerKind};
use weave_rt::value::Value;
use weave_rt::Runtime;

async fn run_local<F: std::future::Future>(fut: F) -> F::Output {
    LocalSet::new().run_until(fut).await
}

fn dict_get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Dict(map) => map.get(key),
        _ => None,
    }
}

/// S1 - typed binding: sequential scope visibility and a successful int
/// declaration chain.
#[tokio::test(flavor = "current_thread")]
async fn s1_typed_binding() {
    run_local(async {
        let wv = Runtime::new();
        let ast = wv.parse("{ int:x := 5; int:y := x + 10; }").expect("parses");
        let (record, triggers) = wv.evaluate(&ast, Scope::root()).await.expect("evaluates");

        assert!(triggers.is_empty());
        assert!(matches!(dict_get(&record, "x"), Some(Value::Int(5))));
        assert!(matches!(dict_get(&record, "y"), Some(Value::Int(15))));
    })
    .await;
}

/// S2 - type failure: a successfully parsed declaration that fails the
/// `int` assignability check at evaluation time.
#[tokio::test(flavor = "current_thread")]
async fn s2_type_failure() {
    run_local(async {
        let wv = Runtime::new();
        let ast = wv.parse(r#"{ int:x := "hello"; }"#).expect("parses");
        let err = wv.evaluate(&ast, Scope::root()).await.unwrap_err();

        assert_eq!(err.error.kind_name(), "TypeError");
    })
    .await;
}

/// S3 - pipe threading a value through a user-defined function.
#[tokio::test(flavor = "current_thread")]
async fn s3_pipe_with_user_function() {
    run_local(async {
        let wv = Runtime::new();
        let source = "{ function:plus10 := (int:x), { r := x + 10 }, (int:r); int:v := 20 |> plus10; }";
        let ast = wv.parse(source).expect("parses");
        let (record, _) = wv.evaluate(&ast, Scope::root()).await.expect("evaluates");

        assert!(matches!(dict_get(&record, "v"), Some(Value::Int(30))));
    })
    .await;
}

/// S4 - switch falls through to its `true` default branch when no earlier
/// condition string is truthy.
#[tokio::test(flavor = "current_thread")]
async fn s4_switch_default() {
    run_local(async {
        let wv = Runtime::new();
        let source = r#"{
            str:tag := "unknown";
            any:out := switch({ "tag == 'a'": 1, "tag == 'b'": 2, "true": 99 });
        }"#;
        let ast = wv.parse(source).expect("parses");
        let (record, _) = wv.evaluate(&ast, Scope::root()).await.expect("evaluates");

        assert!(matches!(dict_get(&record, "out"), Some(Value::Int(99))));
    })
    .await;
}

/// A host callable that fails its first two invocations, then succeeds,
/// counting calls so the test can assert `retry` stopped as soon as it
/// got a success.
struct Flaky {
    calls: Rc<RefCell<u32>>,
}

impl HostCallable for Flaky {
    fn call(&self, _pos_args: Vec<Value>, _kw_args: IndexMap<String, Value>, _context: Option<Scope>) -> HostFuture {
        let calls = self.calls.clone();
        Box::pin(async move {
            let mut count = calls.borrow_mut();
            *count += 1;
            if *count < 3 {
                weave_rt::envelope::TransactionEnvelope::single_failure("RuntimeError", "not yet")
            } else {
                weave_rt::envelope::TransactionEnvelope::ok(Value::Str("done".to_string()))
            }
        })
    }
}

/// S5 - retry succeeds on the third attempt and stops calling afterward.
#[tokio::test(flavor = "current_thread")]
async fn s5_retry_then_succeed() {
    run_local(async {
        let mut wv = Runtime::new();
        let calls = Rc::new(RefCell::new(0u32));
        wv.register_function("flaky", Rc::new(Flaky { calls: calls.clone() }), false);

        let ast = wv.parse("{ any:v := retry(flaky(), 5, 0); }").expect("parses");
        let (record, _) = wv.evaluate(&ast, Scope::root()).await.expect("evaluates");

        let Some(Value::Dict(envelope)) = dict_get(&record, "v").cloned() else {
            panic!("expected an envelope dict");
        };
        assert!(matches!(envelope.get("success"), Some(Value::Bool(true))));
        assert_eq!(*calls.borrow(), 3);
    })
    .await;
}

/// S6 - a five-wildcard tuple key is registered as a cron trigger rather
/// than bound as an ordinary field, with every field wildcard and the
/// action lexically captured.
#[tokio::test(flavor = "current_thread")]
async fn s6_cron_trigger_registered_not_bound() {
    run_local(async {
        let wv = Runtime::new();
        let ast = wv.parse(r#"{ ("*", "*", "*", "*", "*") : log("tick"); }"#).expect("parses");
        let (record, triggers) = wv.evaluate(&ast, Scope::root()).await.expect("evaluates");

        let Value::Dict(map) = &record else { panic!("expected dict root") };
        assert!(map.is_empty(), "the cron key must not be bound as a field");

        assert_eq!(triggers.len(), 1);
        match &triggers[0].kind {
            TriggerKind::Cron { minute, hour, day, month, weekday } => {
                for field in [*minute, *hour, *day, *month, *weekday] {
                    assert_eq!(field, CronField::Any);
                }
            }
            TriggerKind::Event { .. } => panic!("expected a cron trigger"),
        }
    })
    .await;
}

/// A host callable that never completes, used to drive `timeout` past its
/// deadline under paused time.
struct Never;

impl HostCallable for Never {
    fn call(&self, _pos_args: Vec<Value>, _kw_args: IndexMap<String, Value>, _context: Option<Scope>) -> HostFuture {
        Box::pin(std::future::pending())
    }
}

/// `retry` waits a growing backoff between failed attempts instead of
/// retrying immediately. Real time is never advanced here; the test drives
/// the clock itself so the three attempts resolve without an actual delay.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn retry_backs_off_between_attempts_with_paused_time() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let mut wv = Runtime::new();
            let calls = Rc::new(RefCell::new(0u32));
            wv.register_function("flaky", Rc::new(Flaky { calls: calls.clone() }), false);

            let ast = wv.parse("{ any:v := retry(flaky(), 5, 1); }").expect("parses");
            let handle = tokio::task::spawn_local(async move { wv.evaluate(&ast, Scope::root()).await });

            // Two failed attempts back off 1s then 2s before the third
            // attempt succeeds; advance past both without a real sleep.
            for _ in 0..5 {
                tokio::task::yield_now().await;
                tokio::time::advance(Duration::from_secs(3)).await;
            }

            let (record, _) = handle.await.expect("task did not panic").expect("evaluates");
            let Some(Value::Dict(envelope)) = dict_get(&record, "v").cloned() else {
                panic!("expected an envelope dict");
            };
            assert!(matches!(envelope.get("success"), Some(Value::Bool(true))));
            assert_eq!(*calls.borrow(), 3);
        })
        .await;
}

/// `timeout` cancels a step that never completes once its deadline elapses,
/// yielding a failed `TimeoutError` envelope rather than hanging forever.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn timeout_cancels_a_step_that_never_completes() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let mut wv = Runtime::new();
            wv.register_function("never", Rc::new(Never), false);

            let ast = wv.parse("{ any:v := timeout(never(), 1); }").expect("parses");
            let handle = tokio::task::spawn_local(async move { wv.evaluate(&ast, Scope::root()).await });

            tokio::task::yield_now().await;
            tokio::time::advance(Duration::from_secs(2)).await;

            let (record, _) = handle.await.expect("task did not panic").expect("evaluates");
            let Some(Value::Dict(envelope)) = dict_get(&record, "v").cloned() else {
                panic!("expected an envelope dict");
            };
            assert!(matches!(envelope.get("success"), Some(Value::Bool(false))));
        })
        .await;
}

/// The built-in standard library (keys/values/pick/merge) is available
/// without any host registration.
#[tokio::test(flavor = "current_thread")]
async fn stdlib_functions_available_without_host_registration() {
    run_local(async {
        let wv = Runtime::new();
        let source = r#"{
            dict:src := { a: 1, b: 2, c: 3 };
            list:k := src |> keys;
            dict:p := src |> pick(["a", "c"]);
        }"#;
        let ast = wv.parse(source).expect("parses");
        let (record, _) = wv.evaluate(&ast, Scope::root()).await.expect("evaluates");

        let Some(Value::List(keys)) = dict_get(&record, "k").cloned() else { panic!("expected list") };
        assert_eq!(keys.len(), 3);

        let Some(Value::Dict(picked)) = dict_get(&record, "p").cloned() else { panic!("expected dict") };
        assert_eq!(picked.len(), 2);
        assert!(picked.contains_key("a") && picked.contains_key("c"));
    })
    .await;
}
