//! Debugger configuration
//!
//! Controls how far a pause reaches when a breakpoint fires.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::DebuggerError;

/// Environment variable read by [`DebuggerConfig::from_env`]
pub const BREAKPOINT_ACTION_ENV: &str = "FLOW_DEBUGGER_BREAKPOINT_ACTION";

/// What a breakpoint (or a followed step) pauses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakpointAction {
    /// Any pause holds traffic at every location.
    #[default]
    #[serde(rename = "pause-all")]
    PauseAll,

    /// A breakpoint pauses only the node it fired on. Traffic at other
    /// nodes keeps flowing. Manual pauses still stop everything.
    #[serde(rename = "pause-bp")]
    PauseNode,
}

impl BreakpointAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakpointAction::PauseAll => "pause-all",
            BreakpointAction::PauseNode => "pause-bp",
        }
    }
}

impl fmt::Display for BreakpointAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakpointAction {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pause-all" | "all" => Ok(BreakpointAction::PauseAll),
            "pause-bp" | "node" => Ok(BreakpointAction::PauseNode),
            other => Err(DebuggerError::config_error(format!(
                "unknown breakpoint action '{}'",
                other
            ))),
        }
    }
}

/// Debugger configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerConfig {
    /// Scope of a breakpoint-triggered pause
    #[serde(default)]
    pub breakpoint_action: BreakpointAction,
}

impl DebuggerConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the breakpoint action
    pub fn with_breakpoint_action(mut self, action: BreakpointAction) -> Self {
        self.breakpoint_action = action;
        self
    }

    /// Load configuration from the environment.
    ///
    /// Unset variables fall back to defaults; a set but unrecognised value is an error.
    pub fn from_env() -> Result<Self, DebuggerError> {
        let mut config = Self::default();
        if let Ok(value) = env::var(BREAKPOINT_ACTION_ENV) {
            config.breakpoint_action = value.parse()?;
        }
        Ok(config)
    }

    /// Apply a partial update. Returns true if any field changed.
    pub fn apply(&mut self, patch: &ConfigPatch) -> bool {
        let mut changed = false;
        if let Some(action) = patch.breakpoint_action {
            if action != self.breakpoint_action {
                self.breakpoint_action = action;
                changed = true;
            }
        }
        changed
    }
}

/// Partial configuration update, as sent by a controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default)]
    pub breakpoint_action: Option<BreakpointAction>,
}
