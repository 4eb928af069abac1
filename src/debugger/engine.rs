//! FlowDebugger - the interception and replay engine
//!
//! Every intercepted message goes through [`FlowDebugger::on_intercepted_event`].
//! Messages that must be held are not copied: the engine keeps the host's
//! event together with its completion callback and only calls the callback
//! when the message is released, deleted or the debugger is disabled.
//!
//! Held messages are linked into two queues at once (global arrival order
//! and per-location arrival order) so any of them can be released in O(1).
//!
//! Completion callbacks always run with the engine lock released. A callback
//! may therefore re-enter the engine, e.g. the host routes a released message
//! straight into the next interception point, where it can hit a breakpoint
//! and pause the engine in the middle of a drain.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::breakpoint::{Breakpoint, BreakpointTable};
use super::events::{
    DebugEvent, DispatchedEvent, ListenerSet, PauseCause, PauseReason, PausedEvent, QueuedEvent,
    ResumedEvent,
};
use super::state::{DebuggerState, EngineState, MessageSummary, PausedLocations, QueueDepth};
use crate::config::{BreakpointAction, ConfigPatch, DebuggerConfig};
use crate::host::{
    should_intercept, Delivery, DoneCallback, HookRegistry, ReceiveEvent, RouteHooks,
    RoutingEvent, SendEvent,
};
use crate::location::Location;
use crate::queue::{Arena, EventId, EventQueue, Lane, LaneLinks, Linked};

/// Owner name the debugger registers its hooks under
pub const HOOK_OWNER: &str = "flow-debugger";

/// A message held by the debugger
struct HeldEvent {
    id: EventId,
    event: RoutingEvent,
    location: Location,
    location_key: String,
    done: DoneCallback,
    held_at: DateTime<Utc>,
    links: LaneLinks,
}

impl Linked for HeldEvent {
    fn id(&self) -> EventId {
        self.id
    }

    fn links(&self) -> &LaneLinks {
        &self.links
    }

    fn links_mut(&mut self) -> &mut LaneLinks {
        &mut self.links
    }
}

impl HeldEvent {
    fn summary(&self) -> MessageSummary {
        MessageSummary {
            id: self.id,
            location: self.location.clone(),
            location_key: self.location_key.clone(),
            destination: self.event.destination_key(),
            msg: self.event.msg().body.clone(),
            held_at: self.held_at,
        }
    }

    fn release(self, delivery: Delivery) {
        (self.done)(self.event, delivery);
    }
}

impl fmt::Debug for HeldEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldEvent")
            .field("id", &self.id)
            .field("location", &self.location_key)
            .field("held_at", &self.held_at)
            .finish_non_exhaustive()
    }
}

/// State guarded by the engine lock
#[derive(Debug)]
struct Inner {
    config: DebuggerConfig,
    enabled: bool,
    paused: PausedLocations,
    breakpoints: BreakpointTable,
    events: Arena<HeldEvent>,
    by_time: EventQueue,
    /// Exact location key -> queue; never holds an empty queue
    by_location: BTreeMap<String, EventQueue>,
    next_event_id: EventId,
    /// Message ids released by `step` whose next hop should pause (pause-bp only)
    stepping: HashSet<String>,
    listeners: ListenerSet,
}

impl Inner {
    fn new(config: DebuggerConfig) -> Self {
        Self {
            config,
            enabled: false,
            paused: PausedLocations::None,
            breakpoints: BreakpointTable::default(),
            events: Arena::new(),
            by_time: EventQueue::new(Lane::Time),
            by_location: BTreeMap::new(),
            next_event_id: 0,
            stepping: HashSet::new(),
            listeners: ListenerSet::default(),
        }
    }

    fn state(&self) -> EngineState {
        if !self.enabled {
            EngineState::Disabled
        } else if self.paused.is_empty() {
            EngineState::Enabled
        } else {
            EngineState::Paused
        }
    }

    /// Transition into (or widen) the paused state.
    ///
    /// Returns false when the cause is already covered.
    fn pause(&mut self, cause: PauseCause) -> bool {
        if !self.enabled {
            return false;
        }
        let widen_to_all = cause.reason == PauseReason::Manual
            || self.config.breakpoint_action == BreakpointAction::PauseAll;
        let changed = match (&cause.node, widen_to_all) {
            (Some(node), false) => self.paused.add_node(node),
            _ => {
                let was_all = self.paused.is_all();
                self.paused = PausedLocations::All;
                !was_all
            }
        };
        if !changed {
            return false;
        }

        let log_reason = match cause.reason {
            PauseReason::Breakpoint => cause
                .breakpoint
                .as_deref()
                .and_then(|id| self.breakpoints.get(id))
                .map(|bp| format!("@{}", bp.location))
                .unwrap_or_else(|| "@breakpoint".to_string()),
            PauseReason::Step => format!("@{}", cause.node.as_deref().unwrap_or("?")),
            PauseReason::Manual => "manual".to_string(),
        };
        info!(reason = %log_reason, "Flows paused");

        let paused_locations = self.paused.to_vec();
        self.listeners.emit(DebugEvent::Paused(PausedEvent {
            reason: cause.reason,
            node: cause.node,
            breakpoint: cause.breakpoint,
            paused_locations,
        }));
        true
    }

    /// Link a new held event into both queues
    fn hold(&mut self, location: Location, event: RoutingEvent, done: DoneCallback) -> EventId {
        let id = self.next_event_id;
        self.next_event_id += 1;

        let location_key = location.exact_key();
        let queued = QueuedEvent {
            id,
            location: location_key.clone(),
            msg: event.msg().body.clone(),
            depth: 0,
            destination: event.destination_key(),
        };

        self.events.insert(
            id,
            HeldEvent {
                id,
                event,
                location,
                location_key: location_key.clone(),
                done,
                held_at: Utc::now(),
                links: LaneLinks::default(),
            },
        );
        self.by_time.enqueue(&mut self.events, id);
        let queue = self
            .by_location
            .entry(location_key.clone())
            .or_insert_with(|| EventQueue::new(Lane::Location));
        queue.enqueue(&mut self.events, id);
        let depth = queue.len();

        debug!(id, location = %location_key, depth, "Message held");
        self.listeners
            .emit(DebugEvent::Queued(QueuedEvent { depth, ..queued }));
        id
    }

    /// Unlink an event from both queues and take it out of the arena.
    ///
    /// Returns the event and the remaining depth of its location queue.
    fn detach(&mut self, id: EventId) -> Option<(HeldEvent, usize)> {
        let key = self.events.get(&id)?.location_key.clone();
        self.by_time.remove(&mut self.events, id);
        let depth = match self.by_location.get_mut(&key) {
            Some(queue) => {
                queue.remove(&mut self.events, id);
                queue.len()
            }
            None => 0,
        };
        if depth == 0 {
            self.by_location.remove(&key);
        }
        let held = self.events.remove(&id)?;
        Some((held, depth))
    }

    fn emit_dispatched(&mut self, held: &HeldEvent, depth: usize) {
        self.listeners.emit(DebugEvent::Dispatched(DispatchedEvent {
            id: held.id,
            location: held.location_key.clone(),
            depth,
        }));
    }

    /// Oldest held event whose node is not paused
    fn next_releasable(&self) -> Option<EventId> {
        match &self.paused {
            PausedLocations::All => None,
            PausedLocations::None => self.by_time.peek_head(),
            PausedLocations::Nodes(_) => self
                .by_time
                .iter(&self.events)
                .find(|held| !self.paused.covers(&held.location.node_id))
                .map(|held| held.id),
        }
    }

    /// Detach every held event in arrival order
    fn take_all(&mut self) -> Vec<HeldEvent> {
        let mut all = Vec::with_capacity(self.by_time.len());
        while let Some(id) = self.by_time.peek_head() {
            match self.detach(id) {
                Some((held, _)) => all.push(held),
                None => break,
            }
        }
        all
    }

    fn queue_depths(&self) -> BTreeMap<String, QueueDepth> {
        self.by_location
            .iter()
            .map(|(key, queue)| (key.clone(), QueueDepth { depth: queue.len() }))
            .collect()
    }
}

struct Shared {
    inner: Mutex<Inner>,
    host: Option<Arc<dyn HookRegistry>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Shared {
    /// Held messages must not be lost when the last handle goes away
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        let was_enabled = std::mem::replace(&mut inner.enabled, false);
        let held = inner.take_all();
        if was_enabled {
            if let Some(host) = &self.host {
                host.remove_hooks(HOOK_OWNER);
            }
        }
        for event in held {
            event.release(Delivery::Continue);
        }
    }
}

/// Handle to a debugger engine.
///
/// Cloning is cheap; all clones control the same engine.
#[derive(Clone)]
pub struct FlowDebugger {
    shared: Arc<Shared>,
}

impl Default for FlowDebugger {
    fn default() -> Self {
        Self::new(DebuggerConfig::default())
    }
}

impl FlowDebugger {
    /// Create a debugger that is driven directly through
    /// [`intercept`](Self::intercept) / [`on_intercepted_event`](Self::on_intercepted_event)
    pub fn new(config: DebuggerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::new(config)),
                host: None,
            }),
        }
    }

    /// Create a debugger that registers its hooks with a host on `enable()`
    pub fn with_host(config: DebuggerConfig, host: Arc<dyn HookRegistry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::new(config)),
                host: Some(host),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.lock()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start intercepting traffic. No-op if already enabled.
    pub fn enable(&self) {
        let mut inner = self.lock();
        if inner.enabled {
            return;
        }
        inner.enabled = true;
        // Hooks exist only while `enabled` is set under the lock
        if let Some(host) = &self.shared.host {
            let hooks = DebuggerHooks {
                engine: Arc::downgrade(&self.shared),
            };
            host.add_hooks(HOOK_OWNER, Arc::new(hooks));
        }
        drop(inner);
        info!("Enabled");
    }

    /// Stop intercepting and quietly release everything held.
    ///
    /// Held messages continue in arrival order; no `dispatched`
    /// notifications are emitted.
    pub fn disable(&self) {
        let held = {
            let mut inner = self.lock();
            if !inner.enabled {
                return;
            }
            inner.enabled = false;
            inner.paused = PausedLocations::None;
            inner.stepping.clear();
            if let Some(host) = &self.shared.host {
                host.remove_hooks(HOOK_OWNER);
            }
            inner.take_all()
        };
        info!(released = held.len(), "Disabled");
        for event in held {
            event.release(Delivery::Continue);
        }
    }

    /// Pause all traffic (manual pause)
    pub fn pause(&self) {
        self.pause_with(PauseCause::manual());
    }

    /// Pause with an explicit cause. Returns true if the state changed.
    ///
    /// A breakpoint cause must name a breakpoint in the table.
    pub(crate) fn pause_with(&self, cause: PauseCause) -> bool {
        let mut inner = self.lock();
        if let Some(id) = cause.breakpoint.as_deref() {
            if inner.breakpoints.get(id).is_none() {
                debug!(breakpoint = id, "Pause for unknown breakpoint ignored");
                return false;
            }
        }
        inner.pause(cause)
    }

    /// Unpause everything and drain held messages in arrival order.
    ///
    /// The drain stops early if a released message pauses the engine again.
    pub fn resume(&self) {
        {
            let mut inner = self.lock();
            if inner.state() != EngineState::Paused {
                return;
            }
            inner.paused = PausedLocations::None;
            inner.stepping.clear();
            info!("Flows resumed");
            inner.listeners.emit(DebugEvent::Resumed(ResumedEvent { node: None }));
        }
        self.drain();
    }

    /// Unpause a single node (pause-bp policy) and drain what became releasable.
    ///
    /// `*` resumes everything. No-op if the node is not individually paused.
    pub fn resume_node(&self, node_id: &str) {
        {
            let mut inner = self.lock();
            if !inner.enabled || !inner.paused.remove_node(node_id) {
                return;
            }
            if inner.paused.is_empty() {
                inner.stepping.clear();
            }
            info!(node = node_id, "Flows resumed");
            inner.listeners.emit(DebugEvent::Resumed(ResumedEvent {
                node: Some(node_id.to_string()),
            }));
        }
        self.drain();
    }

    /// Release held events until nothing is releasable
    fn drain(&self) {
        let mut released = 0usize;
        loop {
            let held = {
                let mut inner = self.lock();
                if !inner.enabled {
                    break;
                }
                let Some(id) = inner.next_releasable() else {
                    break;
                };
                let Some((held, depth)) = inner.detach(id) else {
                    break;
                };
                inner.emit_dispatched(&held, depth);
                held
            };
            released += 1;
            held.release(Delivery::Continue);
        }
        debug!(released, "Drain finished");
    }

    /// Release exactly one held event while staying paused.
    ///
    /// With an id, that event is released out of order; otherwise the
    /// oldest one. Only valid while paused.
    ///
    /// Under pause-bp the released message is followed to its next
    /// interception point. The host must route it from within the
    /// completion callback; once the callback returns it is no longer
    /// followed.
    pub fn step(&self, event_id: Option<EventId>) {
        let mut followed = None;
        let held = {
            let mut inner = self.lock();
            if inner.state() != EngineState::Paused {
                return;
            }
            let id = match event_id {
                Some(id) => inner.by_time.find_by_id(&inner.events, id).map(Linked::id),
                None => inner.by_time.peek_head(),
            };
            let Some((held, depth)) = id.and_then(|id| inner.detach(id)) else {
                return;
            };
            info!(location = %held.location_key, id = held.id, "Step");
            if inner.config.breakpoint_action == BreakpointAction::PauseNode {
                let msg_id = held.event.msg().id.clone();
                if inner.stepping.insert(msg_id.clone()) {
                    followed = Some(msg_id);
                }
            }
            inner.emit_dispatched(&held, depth);
            held
        };
        held.release(Delivery::Continue);
        // Did not reach another interception point (terminal node or dropped)
        if let Some(msg_id) = followed {
            self.lock().stepping.remove(&msg_id);
        }
    }

    /// Drop a held message: its callback receives [`Delivery::Abort`].
    ///
    /// Unknown ids are ignored.
    pub fn delete_message(&self, event_id: EventId) {
        let held = {
            let mut inner = self.lock();
            let Some((held, depth)) = inner.detach(event_id) else {
                return;
            };
            debug!(id = event_id, location = %held.location_key, "Message deleted");
            inner.emit_dispatched(&held, depth);
            held
        };
        held.release(Delivery::Abort);
    }

    // =========================================================================
    // Interception
    // =========================================================================

    /// Offer a routing event to the debugger.
    ///
    /// Applies the host-level filters, derives the event's location and runs
    /// the per-message decision.
    pub fn intercept(&self, event: RoutingEvent, done: DoneCallback) {
        if !should_intercept(&event) {
            done(event, Delivery::Continue);
            return;
        }
        let location = Location::from_event(&event);
        self.on_intercepted_event(location, event, done);
    }

    /// Per-message decision: hold the event or let it through.
    ///
    /// - paused at this node: hold
    /// - message was just stepped (pause-bp): pause this node, hold
    /// - active breakpoint on the match key: pause, hold
    /// - otherwise: `done` runs immediately
    ///
    /// Calls arriving while disabled pass straight through.
    pub fn on_intercepted_event(&self, location: Location, event: RoutingEvent, done: DoneCallback) {
        let mut inner = self.lock();
        if !inner.enabled {
            drop(inner);
            done(event, Delivery::Continue);
            return;
        }

        let stepped = inner.stepping.remove(&event.msg().id);
        let node = location.node_id.clone();

        if inner.paused.covers(&node) {
            inner.hold(location, event, done);
            return;
        }
        if stepped {
            inner.pause(PauseCause::step(node));
            inner.hold(location, event, done);
            return;
        }
        let hit = inner
            .breakpoints
            .active_at(&location.match_key())
            .map(|bp| bp.id.clone());
        if let Some(breakpoint_id) = hit {
            inner.pause(PauseCause::breakpoint(breakpoint_id, node));
            inner.hold(location, event, done);
            return;
        }

        drop(inner);
        done(event, Delivery::Continue);
    }

    // =========================================================================
    // Breakpoints
    // =========================================================================

    /// Add an active breakpoint and return its id
    pub fn set_breakpoint(&self, location: Location) -> String {
        let id = self.lock().breakpoints.insert(location);
        debug!(breakpoint = %id, "Breakpoint set");
        id
    }

    /// Remove a breakpoint. Unknown ids are ignored.
    pub fn clear_breakpoint(&self, breakpoint_id: &str) {
        self.lock().breakpoints.remove(breakpoint_id);
    }

    /// Toggle a breakpoint without losing it. Unknown ids are ignored.
    pub fn set_breakpoint_active(&self, breakpoint_id: &str, active: bool) {
        self.lock().breakpoints.set_active(breakpoint_id, active);
    }

    pub fn breakpoint(&self, breakpoint_id: &str) -> Option<Breakpoint> {
        self.lock().breakpoints.get(breakpoint_id).cloned()
    }

    /// All breakpoints in creation order
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.lock().breakpoints.list()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn config(&self) -> DebuggerConfig {
        self.lock().config.clone()
    }

    /// Apply a partial config update. Returns true if anything changed.
    pub fn set_config(&self, patch: &ConfigPatch) -> bool {
        let mut inner = self.lock();
        let changed = inner.config.apply(patch);
        if changed {
            inner.stepping.clear();
            info!(breakpoint_action = %inner.config.breakpoint_action, "Configuration updated");
        }
        changed
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Receive every notification emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DebugEvent> {
        self.lock().listeners.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().listeners.len()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn state(&self) -> EngineState {
        self.lock().state()
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn paused_locations(&self) -> Vec<String> {
        self.lock().paused.to_vec()
    }

    /// Full snapshot for controllers
    pub fn snapshot(&self) -> DebuggerState {
        let inner = self.lock();
        if !inner.enabled {
            return DebuggerState::disabled();
        }
        DebuggerState {
            enabled: true,
            state: inner.state(),
            paused_locations: Some(inner.paused.to_vec()),
            config: Some(inner.config.clone()),
            breakpoints: Some(inner.breakpoints.list()),
            queues: Some(inner.queue_depths()),
        }
    }

    /// Exact location key -> number of held messages
    pub fn queue_depths(&self) -> BTreeMap<String, QueueDepth> {
        self.lock().queue_depths()
    }

    /// Number of held messages
    pub fn queue_len(&self) -> usize {
        self.lock().by_time.len()
    }

    /// Held event ids in global arrival order
    pub fn queued_ids(&self) -> Vec<EventId> {
        let inner = self.lock();
        inner.by_time.ids(&inner.events)
    }

    /// Held event ids at one location, in arrival order
    pub fn queued_ids_at(&self, location_key: &str) -> Vec<EventId> {
        let inner = self.lock();
        inner
            .by_location
            .get(location_key)
            .map(|queue| queue.ids(&inner.events))
            .unwrap_or_default()
    }

    /// Held messages in global arrival order
    pub fn messages(&self) -> Vec<MessageSummary> {
        let inner = self.lock();
        inner.by_time.iter(&inner.events).map(HeldEvent::summary).collect()
    }

    /// One held message
    pub fn message(&self, event_id: EventId) -> Option<MessageSummary> {
        let inner = self.lock();
        inner
            .by_time
            .find_by_id(&inner.events, event_id)
            .map(HeldEvent::summary)
    }

    /// Text dump of every queue
    pub fn dump(&self) -> String {
        let inner = self.lock();
        let mut out = format!(
            "Debugger State\n---\n{}\n",
            inner.by_time.dump(&inner.events)
        );
        for (key, queue) in &inner.by_location {
            out.push_str(&format!(
                "---\nLocation: {}\n{}\n",
                key,
                queue.dump(&inner.events)
            ));
        }
        out
    }
}

impl fmt::Debug for FlowDebugger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("FlowDebugger")
            .field("state", &inner.state())
            .field("held", &inner.by_time.len())
            .finish()
    }
}

/// Hooks registered with the host; hold only a weak reference to the engine
struct DebuggerHooks {
    engine: Weak<Shared>,
}

impl DebuggerHooks {
    fn forward(&self, event: RoutingEvent, done: DoneCallback) {
        match self.engine.upgrade() {
            Some(shared) => FlowDebugger { shared }.intercept(event, done),
            None => done(event, Delivery::Continue),
        }
    }
}

impl RouteHooks for DebuggerHooks {
    fn pre_route(&self, event: SendEvent, done: DoneCallback) {
        self.forward(RoutingEvent::Send(event), done);
    }

    fn on_receive(&self, event: ReceiveEvent, done: DoneCallback) {
        self.forward(RoutingEvent::Receive(event), done);
    }
}
