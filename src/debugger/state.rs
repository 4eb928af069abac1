//! Engine state and inspection snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::breakpoint::Breakpoint;
use crate::config::DebuggerConfig;
use crate::location::Location;
use crate::queue::EventId;

/// Marker used for "every location" in the paused set
pub const ALL_LOCATIONS: &str = "*";

/// Debugger state
///
/// - `Disabled`: interception is unregistered, nothing is held
/// - `Enabled`: traffic flows unless a breakpoint matches
/// - `Paused`: traffic at paused locations is held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Disabled,
    Enabled,
    Paused,
}

impl EngineState {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, EngineState::Disabled)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, EngineState::Paused)
    }
}

/// Nodes currently paused
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PausedLocations {
    #[default]
    None,
    All,
    Nodes(BTreeSet<String>),
}

impl PausedLocations {
    pub fn is_empty(&self) -> bool {
        match self {
            PausedLocations::None => true,
            PausedLocations::All => false,
            PausedLocations::Nodes(nodes) => nodes.is_empty(),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PausedLocations::All)
    }

    /// Is traffic at this node held?
    pub fn covers(&self, node_id: &str) -> bool {
        match self {
            PausedLocations::None => false,
            PausedLocations::All => true,
            PausedLocations::Nodes(nodes) => nodes.contains(node_id),
        }
    }

    /// Add a node. Returns false if it was already covered.
    pub fn add_node(&mut self, node_id: &str) -> bool {
        match self {
            PausedLocations::All => false,
            PausedLocations::Nodes(nodes) => nodes.insert(node_id.to_string()),
            PausedLocations::None => {
                *self = PausedLocations::Nodes(BTreeSet::from([node_id.to_string()]));
                true
            }
        }
    }

    /// Remove one paused node. `*` clears everything.
    pub fn remove_node(&mut self, node_id: &str) -> bool {
        if node_id == ALL_LOCATIONS {
            let was_paused = !self.is_empty();
            *self = PausedLocations::None;
            return was_paused;
        }
        match self {
            PausedLocations::Nodes(nodes) => {
                let removed = nodes.remove(node_id);
                if nodes.is_empty() {
                    *self = PausedLocations::None;
                }
                removed
            }
            _ => false,
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            PausedLocations::None => Vec::new(),
            PausedLocations::All => vec![ALL_LOCATIONS.to_string()],
            PausedLocations::Nodes(nodes) => nodes.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub depth: usize,
}

/// Snapshot published to controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerState {
    pub enabled: bool,
    pub state: EngineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<DebuggerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<Breakpoint>>,
    /// Exact location key -> depth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queues: Option<BTreeMap<String, QueueDepth>>,
}

impl DebuggerState {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            state: EngineState::Disabled,
            paused_locations: None,
            config: None,
            breakpoints: None,
            queues: None,
        }
    }
}

/// One held message as listed by the inspection surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: EventId,
    pub location: Location,
    /// Exact key of `location`
    pub location_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub msg: Value,
    pub held_at: DateTime<Utc>,
}
