//! Graph locations
//!
//! A [`Location`] names one directed port on one node in one graph context.
//! It has two string forms:
//!
//! - the exact key `<path>/<node>[<i|o>][<port>]`, used to group held
//!   messages and for display;
//! - the match key, used for breakpoint lookup. For nodes inside a subflow
//!   instance the context path is replaced by `*`, so one breakpoint covers
//!   every instance of that subflow.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DebuggerError;
use crate::host::RoutingEvent;

/// Wildcard that replaces the context path in match keys
pub const WILDCARD_PATH: &str = "*";

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    #[serde(rename = "i")]
    In,
    #[serde(rename = "o")]
    Out,
}

impl PortType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortType::In => "i",
            PortType::Out => "o",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortType {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i" | "in" => Ok(PortType::In),
            "o" | "out" => Ok(PortType::Out),
            other => Err(DebuggerError::InvalidPortType(other.to_string())),
        }
    }
}

/// One directed port on one node within one graph context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Node id; the template id for nodes inside a subflow instance
    pub node_id: String,
    /// Path of the containing context
    pub path: String,
    pub port_type: PortType,
    pub port_index: usize,
    /// Set when the node is an instance inside a reusable subflow
    #[serde(default)]
    pub in_nested_context: bool,
}

impl Location {
    pub fn new(
        node_id: impl Into<String>,
        path: impl Into<String>,
        port_type: PortType,
        port_index: usize,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            path: path.into(),
            port_type,
            port_index,
            in_nested_context: false,
        }
    }

    /// Mark the location as living inside a subflow instance
    pub fn nested(mut self) -> Self {
        self.in_nested_context = true;
        self
    }

    /// Derive the location of a routing event.
    ///
    /// Sends are observed on the source node's output port; receives on the
    /// destination node's single input.
    pub fn from_event(event: &RoutingEvent) -> Self {
        let (node, port_type, port_index) = match event {
            RoutingEvent::Send(ev) => (&ev.source, PortType::Out, ev.source_port),
            RoutingEvent::Receive(ev) => (&ev.destination, PortType::In, 0),
        };
        Self {
            node_id: node.location_id().to_string(),
            path: node.context.path.clone(),
            port_type,
            port_index,
            in_nested_context: node.alias.is_some(),
        }
    }

    /// Exact key: `<path>/<node>[<t>][<n>]`
    pub fn exact_key(&self) -> String {
        format!(
            "{}/{}[{}][{}]",
            self.path, self.node_id, self.port_type, self.port_index
        )
    }

    /// Key used for breakpoint lookup
    pub fn match_key(&self) -> String {
        if self.in_nested_context {
            format!(
                "{}/{}[{}][{}]",
                WILDCARD_PATH, self.node_id, self.port_type, self.port_index
            )
        } else {
            self.exact_key()
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.exact_key())
    }
}

impl FromStr for Location {
    type Err = DebuggerError;

    /// Parse an exact or match key. A `*` path yields a nested location.
    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let (head, port_index) = split_bracket(key, key)?;
        let (head, port_type) = split_bracket(head, key)?;
        let port_index = port_index
            .parse::<usize>()
            .map_err(|_| DebuggerError::invalid_location(key, "port index is not a number"))?;
        let port_type = port_type.parse::<PortType>()?;

        let (path, node_id) = head
            .rsplit_once('/')
            .ok_or_else(|| DebuggerError::invalid_location(key, "missing '/' before node id"))?;
        if node_id.is_empty() {
            return Err(DebuggerError::invalid_location(key, "empty node id"));
        }

        let location = Location::new(node_id, path, port_type, port_index);
        if path == WILDCARD_PATH {
            Ok(location.nested())
        } else {
            Ok(location)
        }
    }
}

/// Split a trailing `[...]` group off `s`
fn split_bracket<'a>(s: &'a str, key: &str) -> Result<(&'a str, &'a str), DebuggerError> {
    let body = s
        .strip_suffix(']')
        .ok_or_else(|| DebuggerError::invalid_location(key, "expected trailing ']'"))?;
    body.rsplit_once('[')
        .ok_or_else(|| DebuggerError::invalid_location(key, "unbalanced '['"))
}

/// Breakpoint creation request as sent by a controller UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointRequest {
    /// Node id
    pub id: String,
    pub path: String,
    #[serde(default = "default_port_type")]
    pub port_type: String,
    #[serde(default)]
    pub port_index: usize,
}

fn default_port_type() -> String {
    PortType::Out.as_str().to_string()
}

impl TryFrom<BreakpointRequest> for Location {
    type Error = DebuggerError;

    fn try_from(req: BreakpointRequest) -> Result<Self, Self::Error> {
        if req.id.is_empty() {
            return Err(DebuggerError::InvalidBreakpoint("missing node id".into()));
        }
        let port_type = req.port_type.parse::<PortType>()?;
        let location = Location::new(req.id, req.path, port_type, req.port_index);
        if location.path == WILDCARD_PATH {
            Ok(location.nested())
        } else {
            Ok(location)
        }
    }
}
