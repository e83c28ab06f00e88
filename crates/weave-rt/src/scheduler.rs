//! Trigger scheduler (§4.6): one cooperative task per registered trigger,
//! run on a [`tokio::task::LocalSet`] since the evaluator's `Scope` chain
//! is `Rc`-based and therefore `!Send`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use chrono::{Datelike, Timelike};
use tokio::sync::watch;
use tokio::task::{JoinHandle, LocalSet};
use tracing::{debug, warn};

use crate::error::StackFrame;
use crate::evaluator::Evaluator;
use crate::registry::HostRegistry;
use crate::trigger::{CronField, Trigger, TriggerKind};
use crate::types::CustomTypes;
use crate::value::Value;

use crate::combinators::{EventBus, ThrottleState};

const EVENT_POLL_WAIT: Duration = Duration::from_secs(1);
const EVENT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// A live set of scheduler tasks plus the shared cancellation signal that
/// stops them. `shutdown()` is the only way a task set ends.
pub struct Scheduler {
    cancel_tx: watch::Sender<bool>,
    handles: RefCell<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns one task per `triggers` entry onto `local` and returns a
    /// handle that can shut every one of them down.
    pub fn spawn(
        local: &LocalSet,
        triggers: Vec<Trigger>,
        registry: Rc<HostRegistry>,
        custom_types: Rc<CustomTypes>,
        throttle: Rc<ThrottleState>,
        events: Rc<EventBus>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(triggers.len());
        for trigger in triggers {
            let registry = registry.clone();
            let custom_types = custom_types.clone();
            let throttle = throttle.clone();
            let events = events.clone();
            let mut cancel_rx = cancel_rx.clone();
            handles.push(local.spawn_local(async move {
                run_trigger_loop(trigger, &registry, &custom_types, &throttle, &events, &mut cancel_rx).await;
            }));
        }
        Scheduler { cancel_tx, handles: RefCell::new(handles) }
    }

    /// Signals cancellation to every task and awaits their cooperative exit.
    pub async fn shutdown(&self) {
        let _ = self.cancel_tx.send(true);
        let handles = std::mem::take(&mut *self.handles.borrow_mut());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn run_trigger_loop(
    trigger: Trigger,
    registry: &HostRegistry,
    custom_types: &CustomTypes,
    throttle: &ThrottleState,
    events: &EventBus,
    cancel: &mut watch::Receiver<bool>,
) {
    match &trigger.kind {
        TriggerKind::Event { .. } => run_event_loop(trigger, registry, custom_types, throttle, events, cancel).await,
        TriggerKind::Cron { .. } => run_cron_loop(trigger, registry, custom_types, throttle, events, cancel).await,
    }
}

async fn run_event_loop(
    trigger: Trigger,
    registry: &HostRegistry,
    custom_types: &CustomTypes,
    throttle: &ThrottleState,
    events: &EventBus,
    cancel: &mut watch::Receiver<bool>,
) {
    let TriggerKind::Event { callee, pos_args, kw_args } = &trigger.kind else {
        unreachable!("run_event_loop only called for Event triggers")
    };
    let evaluator = Evaluator::new(registry, custom_types, throttle, events);

    loop {
        if *cancel.borrow() {
            return;
        }

        let mut stack: Vec<StackFrame> = Vec::new();
        let mut sub_triggers = Vec::new();
        let call_result = evaluator
            .eval_call(callee, None, pos_args, kw_args, callee.span, &trigger.scope, &trigger.scope, 0, &mut stack, &mut sub_triggers)
            .await;

        let sleep_for = match call_result {
            Ok(value) => {
                let env = crate::envelope::TransactionEnvelope::try_from_value(&value);
                match env {
                    Some(env) if env.success && !matches!(env.data, Value::Null) => {
                        let action_scope = trigger.scope.child();
                        action_scope.bind("@event", env.data);
                        let mut action_stack = Vec::new();
                        let mut action_triggers = Vec::new();
                        if let Err(d) = evaluator
                            .eval_expr(&trigger.action, &action_scope, &trigger.scope, 0, &mut action_stack, &mut action_triggers)
                            .await
                        {
                            warn!(error = %d, "event trigger action failed");
                            EVENT_ERROR_BACKOFF
                        } else {
                            Duration::ZERO
                        }
                    }
                    _ => EVENT_POLL_WAIT,
                }
            }
            Err(d) => {
                warn!(error = %d, "event trigger poll failed");
                EVENT_ERROR_BACKOFF
            }
        };

        if sleep_for.is_zero() {
            continue;
        }
        if wait_or_cancelled(sleep_for, cancel).await {
            return;
        }
    }
}

async fn run_cron_loop(
    trigger: Trigger,
    registry: &HostRegistry,
    custom_types: &CustomTypes,
    throttle: &ThrottleState,
    events: &EventBus,
    cancel: &mut watch::Receiver<bool>,
) {
    let TriggerKind::Cron { minute, hour, day, month, weekday } = &trigger.kind else {
        unreachable!("run_cron_loop only called for Cron triggers")
    };
    let evaluator = Evaluator::new(registry, custom_types, throttle, events);

    loop {
        if *cancel.borrow() {
            return;
        }

        let now = chrono::Local::now();
        if cron_matches(*minute, *hour, *day, *month, *weekday, &now) {
            debug!(span = %trigger.action.span, "cron trigger firing");
            let mut stack = Vec::new();
            let mut sub_triggers = Vec::new();
            if let Err(d) = evaluator
                .eval_expr(&trigger.action, &trigger.scope, &trigger.scope, 0, &mut stack, &mut sub_triggers)
                .await
            {
                warn!(error = %d, "cron trigger action failed");
            }
        }

        if wait_or_cancelled(seconds_to_next_minute(&now), cancel).await {
            return;
        }
    }
}

/// Weekday field uses a Monday=0 convention, matching the `datetime.weekday()`
/// numbering the original implementation's cron loop pattern-matches against
/// (`examples/original_source/src/framework/service/language.py`'s
/// `_cron_loop`), not chrono's own Sunday=0 `num_days_from_sunday`.
fn cron_matches(
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
    now: &chrono::DateTime<chrono::Local>,
) -> bool {
    minute.matches(now.minute())
        && hour.matches(now.hour())
        && day.matches(now.day())
        && month.matches(now.month())
        && weekday.matches(now.weekday().num_days_from_monday())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn weekday_field_uses_monday_zero_convention() {
        // 2024-01-01 is a Monday.
        let monday = chrono::Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert!(cron_matches(
            CronField::Any,
            CronField::Any,
            CronField::Any,
            CronField::Any,
            CronField::Literal(0),
            &monday,
        ));
        let tuesday = chrono::Local.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        assert!(!cron_matches(
            CronField::Any,
            CronField::Any,
            CronField::Any,
            CronField::Any,
            CronField::Literal(0),
            &tuesday,
        ));
        assert!(cron_matches(
            CronField::Any,
            CronField::Any,
            CronField::Any,
            CronField::Any,
            CronField::Literal(1),
            &tuesday,
        ));
    }

    #[test]
    fn seconds_to_next_minute_is_bounded_by_a_minute() {
        let now = chrono::Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 30).unwrap();
        let remaining = seconds_to_next_minute(&now);
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining >= Duration::from_secs(29));
    }
}

fn seconds_to_next_minute(now: &chrono::DateTime<chrono::Local>) -> Duration {
    let secs_into_minute = now.second() as u64;
    let nanos = now.timestamp_subsec_nanos() as u64;
    let remainder_nanos = (60 - secs_into_minute).saturating_sub(1) * 1_000_000_000 + (1_000_000_000 - nanos.max(1));
    Duration::from_nanos(remainder_nanos.max(1_000_000))
}

/// Sleeps for `duration` unless cancellation is signalled first. Returns
/// `true` if cancellation woke the sleep.
async fn wait_or_cancelled(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        result = cancel.changed() => result.is_err() || *cancel.borrow(),
    }
}
