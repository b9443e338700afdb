//! Unit lifecycle events.
//!
//! Every unit of a call produces exactly one `BeforeExecute` followed by
//! exactly one `Success` or `Failure`. Events go to a single `EventSink`
//! chosen by the caller (discard, callback or channel) and are always
//! logged and counted.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use shardline_common::error::ShardError;
use shardline_common::value::{format_params, ParamValue};
use shardline_observability::record_unit_event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeExecute,
    Success,
    Failure,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::BeforeExecute => "before_execute",
            EventKind::Success => "success",
            EventKind::Failure => "failure",
        }
    }
}

/// Which unit an event is about.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitInfo {
    pub call_id: u64,
    pub unit_index: usize,
    pub shard: String,
    pub sql: String,
    pub parameters: Vec<ParamValue>,
    /// "query", "update" or "execute".
    pub operation: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    BeforeExecute(UnitInfo),
    Success(UnitInfo),
    Failure { unit: UnitInfo, error: ShardError },
}

impl ExecutionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ExecutionEvent::BeforeExecute(_) => EventKind::BeforeExecute,
            ExecutionEvent::Success(_) => EventKind::Success,
            ExecutionEvent::Failure { .. } => EventKind::Failure,
        }
    }

    pub fn unit(&self) -> &UnitInfo {
        match self {
            ExecutionEvent::BeforeExecute(unit) | ExecutionEvent::Success(unit) => unit,
            ExecutionEvent::Failure { unit, .. } => unit,
        }
    }

    /// Present only on `Failure`.
    pub fn error(&self) -> Option<&ShardError> {
        match self {
            ExecutionEvent::Failure { error, .. } => Some(error),
            _ => None,
        }
    }
}

type EventCallback = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Where lifecycle events are delivered.
#[derive(Clone, Default)]
pub enum EventSink {
    /// Log and count only.
    #[default]
    Discard,
    Callback(EventCallback),
    Channel(Sender<ExecutionEvent>),
}

impl EventSink {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        EventSink::Callback(Arc::new(f))
    }

    /// An unbounded channel sink and its receiving end.
    pub fn channel() -> (Self, Receiver<ExecutionEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (EventSink::Channel(tx), rx)
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let unit = event.unit();
        record_unit_event(event.kind().as_str(), &unit.shard, unit.operation);
        match &event {
            ExecutionEvent::BeforeExecute(u) => tracing::trace!(
                "call {} unit {} before execute on {}: {} {}",
                u.call_id,
                u.unit_index,
                u.shard,
                u.sql,
                format_params(&u.parameters)
            ),
            ExecutionEvent::Success(u) => tracing::debug!(
                "call {} unit {} succeeded on {}",
                u.call_id,
                u.unit_index,
                u.shard
            ),
            ExecutionEvent::Failure { unit: u, error } => tracing::warn!(
                "call {} unit {} failed on {}: {} (sql: {})",
                u.call_id,
                u.unit_index,
                u.shard,
                error,
                u.sql
            ),
        }

        match self {
            EventSink::Discard => {}
            EventSink::Callback(f) => f(&event),
            EventSink::Channel(tx) => {
                if tx.send(event).is_err() {
                    tracing::trace!("Event receiver dropped; event discarded");
                }
            }
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSink::Discard => write!(f, "EventSink::Discard"),
            EventSink::Callback(_) => write!(f, "EventSink::Callback"),
            EventSink::Channel(_) => write!(f, "EventSink::Channel"),
        }
    }
}
