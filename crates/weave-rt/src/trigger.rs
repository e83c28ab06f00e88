//! Triggers: long-lived, scheduler-owned reactions discovered during
//! evaluation (§3, §4.4). Modelled as scheduler-owned values rather than
//! background tasks spun up eagerly from inside a synchronous-looking
//! evaluation, per the design notes.

use weave_parser::Node;

use crate::scope::Scope;

/// Either an `Event` candidate (a call-node key) or a `Cron` candidate (a
/// five-element tuple key with wildcard-or-literal fields).
#[derive(Debug, Clone)]
pub enum TriggerKind {
    Event {
        callee: Box<Node>,
        pos_args: Vec<Node>,
        kw_args: Vec<(String, Node)>,
    },
    Cron {
        minute: CronField,
        hour: CronField,
        day: CronField,
        month: CronField,
        weekday: CronField,
    },
}

/// A single cron tuple slot: either the wildcard or a literal integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronField {
    Any,
    Literal(u32),
}

impl CronField {
    pub fn matches(self, current: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Literal(v) => v == current,
        }
    }
}

/// `(TriggerKind, ActionNode, CapturedScope)`, installed with the working
/// scope at the moment of detection (lexical capture).
#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub action: Node,
    pub scope: Scope,
}

impl Trigger {
    pub fn new(kind: TriggerKind, action: Node, scope: Scope) -> Self {
        Self { kind, action, scope }
    }
}
