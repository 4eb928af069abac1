//! Notifications emitted by the debugger
//!
//! Subscribers receive [`DebugEvent`]s over unbounded channels so emitting
//! never blocks the interception path.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::queue::EventId;

/// Why the debugger paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseReason {
    /// An active breakpoint matched
    Breakpoint,
    /// The controller asked for a pause
    Manual,
    /// A stepped message reached its next interception point
    Step,
}

/// Cause handed to a pause transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseCause {
    pub reason: PauseReason,
    /// Node the pause originated at
    pub node: Option<String>,
    pub breakpoint: Option<String>,
}

impl PauseCause {
    pub fn manual() -> Self {
        Self {
            reason: PauseReason::Manual,
            node: None,
            breakpoint: None,
        }
    }

    pub fn breakpoint(breakpoint_id: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            reason: PauseReason::Breakpoint,
            node: Some(node.into()),
            breakpoint: Some(breakpoint_id.into()),
        }
    }

    pub fn step(node: impl Into<String>) -> Self {
        Self {
            reason: PauseReason::Step,
            node: Some(node.into()),
            breakpoint: None,
        }
    }
}

/// A message was held
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub id: EventId,
    /// Exact location key
    pub location: String,
    pub msg: Value,
    /// Depth of the location's queue after holding
    pub depth: usize,
    /// Receiving input for held sends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// A held message left the queue (released or deleted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedEvent {
    pub id: EventId,
    pub location: String,
    /// Depth of the location's queue after removal
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    pub reason: PauseReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<String>,
    /// Paused set after the transition; `["*"]` when everything is paused
    pub paused_locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumedEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

/// Lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebugEvent {
    Queued(QueuedEvent),
    Dispatched(DispatchedEvent),
    Paused(PausedEvent),
    Resumed(ResumedEvent),
}

impl DebugEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DebugEvent::Queued(_) => "queued",
            DebugEvent::Dispatched(_) => "dispatched",
            DebugEvent::Paused(_) => "paused",
            DebugEvent::Resumed(_) => "resumed",
        }
    }
}

/// Subscribers of one debugger
#[derive(Debug, Default)]
pub(crate) struct ListenerSet {
    senders: Vec<mpsc::UnboundedSender<DebugEvent>>,
}

impl ListenerSet {
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DebugEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping closed ones
    pub fn emit(&mut self, event: DebugEvent) {
        tracing::trace!(event = event.name(), "emit");
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }
}
