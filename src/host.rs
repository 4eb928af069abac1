//! Host runtime boundary
//!
//! The debugger does not route messages itself. A host runtime owns the
//! routing pipeline and offers two interception points: `pre_route` (a node
//! is about to send on an output port) and `on_receive` (a node is about to
//! receive on its input). For each event the host hands over the event and a
//! completion callback, and must not deliver until that callback fires.
//!
//! ```text
//!   node A ──send──▶ [pre_route hook] ──▶ router ──▶ [on_receive hook] ──▶ node B
//!                          │                                │
//!                          └──────── FlowDebugger ──────────┘
//! ```
//!
//! [`HookSet`] is a small in-memory [`HookRegistry`] that a host (or a test)
//! can drive directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Node type whose internal receive events are never intercepted
pub const INJECT_NODE_TYPE: &str = "inject";

/// Prefix of context kinds that mark a subflow module
const MODULE_KIND_PREFIX: &str = "module:";

/// A message travelling between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identity assigned by the host when the message was created
    pub id: String,
    /// Message content. Opaque to the debugger.
    pub body: Value,
}

impl Message {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

/// Kind of graph context a node lives in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextKind {
    /// A top-level flow
    Flow,
    /// An instance of a reusable subflow
    Subflow,
    /// A subflow packaged as a module; `module:<name>`
    Module(String),
}

impl ContextKind {
    /// Parse the host's type tag (`flow`, `subflow:<id>`, `module:<name>`)
    pub fn from_type_tag(tag: &str) -> Self {
        if tag == "flow" {
            ContextKind::Flow
        } else if let Some(name) = tag.strip_prefix(MODULE_KIND_PREFIX) {
            ContextKind::Module(name.to_string())
        } else {
            ContextKind::Subflow
        }
    }

    pub fn is_module(&self) -> bool {
        matches!(self, ContextKind::Module(_))
    }
}

/// A (possibly nested) graph context
#[derive(Debug, Clone, PartialEq)]
pub struct FlowContext {
    pub id: String,
    /// Resolvable path of this context, e.g. `flow1/sf1`
    pub path: String,
    pub kind: ContextKind,
    pub parent: Option<Arc<FlowContext>>,
}

impl FlowContext {
    /// Create a top-level flow whose path is its id
    pub fn flow(id: impl Into<String>) -> Arc<Self> {
        let id = id.into();
        Arc::new(Self {
            path: id.clone(),
            id,
            kind: ContextKind::Flow,
            parent: None,
        })
    }

    /// Create a context nested under `parent`
    pub fn nested(parent: &Arc<FlowContext>, id: impl Into<String>, kind: ContextKind) -> Arc<Self> {
        let id = id.into();
        Arc::new(Self {
            path: format!("{}/{}", parent.path, id),
            id,
            kind,
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Walk from this context to the root
    pub fn ancestors(&self) -> impl Iterator<Item = &FlowContext> {
        std::iter::successors(Some(self), |ctx| ctx.parent.as_deref())
    }

    /// True if this context or any enclosing subflow is a module.
    /// The walk stops at the first top-level flow.
    pub fn in_module(&self) -> bool {
        for ctx in self.ancestors() {
            match ctx.kind {
                ContextKind::Flow => return false,
                ContextKind::Module(_) => return true,
                ContextKind::Subflow => {}
            }
        }
        false
    }
}

/// A node as seen by the interception hooks
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRef {
    pub id: String,
    /// Id of the template node this instance was generated from, when the
    /// node lives inside a subflow instance
    pub alias: Option<String>,
    pub node_type: String,
    pub context: Arc<FlowContext>,
}

impl NodeRef {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, context: Arc<FlowContext>) -> Self {
        Self {
            id: id.into(),
            alias: None,
            node_type: node_type.into(),
            context,
        }
    }

    /// Mark the node as an instance of `alias` inside a subflow
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Id used for locations: the alias when present, otherwise the node id
    pub fn location_id(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.id)
    }
}

/// A node is about to send a message on one of its outputs
#[derive(Debug, Clone, PartialEq)]
pub struct SendEvent {
    pub msg: Message,
    pub source: NodeRef,
    pub source_port: usize,
    pub destination: NodeRef,
}

/// A node is about to receive a message
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveEvent {
    pub msg: Message,
    pub destination: NodeRef,
}

/// Event observed at one of the host's interception points
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingEvent {
    Send(SendEvent),
    Receive(ReceiveEvent),
}

impl RoutingEvent {
    pub fn msg(&self) -> &Message {
        match self {
            RoutingEvent::Send(ev) => &ev.msg,
            RoutingEvent::Receive(ev) => &ev.msg,
        }
    }

    /// The node whose port this event is observed on
    pub fn node(&self) -> &NodeRef {
        match self {
            RoutingEvent::Send(ev) => &ev.source,
            RoutingEvent::Receive(ev) => &ev.destination,
        }
    }

    /// Display key of the receiving input for a send event: `/<id>[i][0]`
    pub fn destination_key(&self) -> Option<String> {
        match self {
            RoutingEvent::Send(ev) => Some(format!("/{}[i][0]", ev.destination.id)),
            RoutingEvent::Receive(_) => None,
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(self, RoutingEvent::Send(_))
    }
}

/// How the host should proceed with an event once the debugger lets go of it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Continue routing the event normally
    Continue,
    /// Drop the event; do not deliver it
    Abort,
}

/// Completion callback supplied by the host with every intercepted event.
///
/// The debugger invokes it exactly once, handing the event back.
pub type DoneCallback = Box<dyn FnOnce(RoutingEvent, Delivery) + Send + 'static>;

/// Callbacks the host invokes at its interception points
pub trait RouteHooks: Send + Sync {
    /// Called before a send is routed
    fn pre_route(&self, event: SendEvent, done: DoneCallback);

    /// Called before a node receives a message
    fn on_receive(&self, event: ReceiveEvent, done: DoneCallback);
}

/// Registration surface of the host's interception mechanism
pub trait HookRegistry: Send + Sync {
    /// Register hooks under an owner name, replacing any previous registration
    fn add_hooks(&self, owner: &str, hooks: Arc<dyn RouteHooks>);

    /// Remove hooks registered under an owner name
    fn remove_hooks(&self, owner: &str);
}

/// Should a send event be offered to the debugger at all?
///
/// Sends inside subflow modules are opaque. A send whose source is the
/// subflow instance node itself is the instance routing into its first
/// internal node, not a real output.
pub fn should_intercept_send(event: &SendEvent) -> bool {
    let node = &event.source;
    if node.context.in_module() {
        return false;
    }
    if node.context.kind != ContextKind::Flow && node.id == node.context.id {
        return false;
    }
    true
}

/// Should a receive event be offered to the debugger at all?
pub fn should_intercept_receive(event: &ReceiveEvent) -> bool {
    let node = &event.destination;
    node.node_type != INJECT_NODE_TYPE && !node.context.in_module()
}

/// Dispatch to the send or receive filter
pub fn should_intercept(event: &RoutingEvent) -> bool {
    match event {
        RoutingEvent::Send(ev) => should_intercept_send(ev),
        RoutingEvent::Receive(ev) => should_intercept_receive(ev),
    }
}

/// In-memory hook registry.
///
/// Runs registered hooks in owner-name order; with several owners, each
/// hook's `done` feeds the event into the next one.
#[derive(Default)]
pub struct HookSet {
    hooks: Mutex<BTreeMap<String, Arc<dyn RouteHooks>>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered owners
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_registered(&self, owner: &str) -> bool {
        self.lock().contains_key(owner)
    }

    /// Run an event through every registered hook, then `done`
    pub fn dispatch(&self, event: RoutingEvent, done: DoneCallback) {
        let chain: Vec<Arc<dyn RouteHooks>> = self.lock().values().cloned().collect();
        Self::run_chain(chain, event, done);
    }

    /// Run a send event through the `pre_route` hooks
    pub fn pre_route(&self, event: SendEvent, done: DoneCallback) {
        self.dispatch(RoutingEvent::Send(event), done);
    }

    /// Run a receive event through the `on_receive` hooks
    pub fn on_receive(&self, event: ReceiveEvent, done: DoneCallback) {
        self.dispatch(RoutingEvent::Receive(event), done);
    }

    fn run_chain(mut chain: Vec<Arc<dyn RouteHooks>>, event: RoutingEvent, done: DoneCallback) {
        if chain.is_empty() {
            done(event, Delivery::Continue);
            return;
        }
        let hook = chain.remove(0);
        let next: DoneCallback = Box::new(move |event, delivery| match delivery {
            Delivery::Continue => Self::run_chain(chain, event, done),
            Delivery::Abort => done(event, Delivery::Abort),
        });
        match event {
            RoutingEvent::Send(ev) => hook.pre_route(ev, next),
            RoutingEvent::Receive(ev) => hook.on_receive(ev, next),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<dyn RouteHooks>>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HookRegistry for HookSet {
    fn add_hooks(&self, owner: &str, hooks: Arc<dyn RouteHooks>) {
        self.lock().insert(owner.to_string(), hooks);
    }

    fn remove_hooks(&self, owner: &str) {
        self.lock().remove(owner);
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("owners", &self.lock().keys().cloned().collect::<Vec<_>>())
            .finish()
    }
}
