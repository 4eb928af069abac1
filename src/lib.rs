//! flow-debugger: breakpoints, pause and step for live flow graphs
//!
//! Sits on the message path of a running dataflow graph and decides for
//! every message whether it flows on immediately or is held. Held messages
//! can then be released one at a time, all at once, or dropped.
//!
//! - [`Location`]: one directed port on one node in one graph context
//! - [`queue::EventQueue`]: O(1) doubly-linked queues over held events
//! - [`FlowDebugger`]: state machine, breakpoint table and per-message decision
//! - [`host`]: the boundary to the host runtime's interception points
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flow_debugger::{DebuggerConfig, FlowDebugger, HookSet, Location, PortType};
//!
//! let hooks = Arc::new(HookSet::new());
//! let debugger = FlowDebugger::with_host(DebuggerConfig::default(), hooks.clone());
//! debugger.enable();
//! debugger.set_breakpoint(Location::new("n1", "flow1", PortType::Out, 0));
//!
//! // host: hooks.pre_route(send_event, done) ...
//! debugger.step(None);
//! debugger.resume();
//! ```

pub mod config;
pub mod debugger;
pub mod error;
pub mod host;
pub mod location;
pub mod queue;

// Re-exports for convenience
pub use config::{BreakpointAction, ConfigPatch, DebuggerConfig};
pub use debugger::{
    Breakpoint, DebugEvent, DebuggerState, EngineState, FlowDebugger, MessageSummary, PauseCause,
    PauseReason, QueueDepth,
};
pub use error::DebuggerError;
pub use host::{
    ContextKind, Delivery, DoneCallback, FlowContext, HookRegistry, HookSet, Message, NodeRef,
    ReceiveEvent, RouteHooks, RoutingEvent, SendEvent,
};
pub use location::{BreakpointRequest, Location, PortType};
pub use queue::EventId;
