//! Integration tests for the debugger driven through a host hook registry
//!
//! A small in-memory flow routes every message through `pre_route` on the
//! sending node and then `on_receive` on the destination, the same way a
//! host runtime would. Released messages re-enter the debugger at the next
//! hop, so these tests cover re-entrant behavior end to end.

use std::sync::{Arc, Mutex};

use flow_debugger::{
    BreakpointAction, BreakpointRequest, ContextKind, DebugEvent, DebuggerConfig, Delivery,
    EngineState, FlowContext, FlowDebugger, HookSet, Location, Message, NodeRef, PauseReason,
    PortType, ReceiveEvent, RoutingEvent, SendEvent,
};
use serde_json::json;
use tokio::sync::mpsc;

// =============================================================================
// Test host
// =============================================================================

struct TestFlow {
    hooks: Arc<HookSet>,
    flow: Arc<FlowContext>,
    /// (node, msg id) for every message that reached a node's input
    delivered: Arc<Mutex<Vec<(String, String)>>>,
}

impl TestFlow {
    fn new() -> Self {
        Self {
            hooks: Arc::new(HookSet::new()),
            flow: FlowContext::flow("f1"),
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn debugger(&self, config: DebuggerConfig) -> FlowDebugger {
        FlowDebugger::with_host(config, self.hooks.clone())
    }

    fn node(&self, id: &str) -> NodeRef {
        NodeRef::new(id, "function", self.flow.clone())
    }

    fn send(&self, msg: &str, from: &str, to: &str) {
        let event = SendEvent {
            msg: Message::new(msg, json!({ "payload": msg })),
            source: self.node(from),
            source_port: 0,
            destination: self.node(to),
        };
        self.route(event);
    }

    /// Push a send event through both interception points
    fn route(&self, event: SendEvent) {
        let hooks = Arc::clone(&self.hooks);
        let delivered = Arc::clone(&self.delivered);
        self.hooks.pre_route(
            event,
            Box::new(move |event, delivery| {
                let RoutingEvent::Send(send) = event else {
                    return;
                };
                if delivery == Delivery::Abort {
                    return;
                }
                let receive = ReceiveEvent {
                    msg: send.msg,
                    destination: send.destination,
                };
                hooks.on_receive(
                    receive,
                    Box::new(move |event, delivery| {
                        if delivery == Delivery::Continue {
                            delivered
                                .lock()
                                .unwrap()
                                .push((event.node().id.clone(), event.msg().id.clone()));
                        }
                    }),
                );
            }),
        );
    }

    fn take_delivered(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.delivered.lock().unwrap())
    }
}

fn delivered(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(node, msg)| (node.to_string(), msg.to_string()))
        .collect()
}

fn collect(rx: &mut mpsc::UnboundedReceiver<DebugEvent>) -> Vec<DebugEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn input_of(node: &str) -> Location {
    Location::new(node, "f1", PortType::In, 0)
}

// =============================================================================
// Hook lifecycle
// =============================================================================

#[test]
fn test_hooks_registered_only_while_enabled() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    assert!(flow.hooks.is_empty());

    debugger.enable();
    assert!(flow.hooks.is_registered(flow_debugger::debugger::HOOK_OWNER));

    debugger.disable();
    assert!(flow.hooks.is_empty());
}

#[test]
fn test_racing_enable_disable_keeps_hooks_in_sync() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());

    for _ in 0..50 {
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let debugger = debugger.clone();
                std::thread::spawn(move || {
                    if t % 2 == 0 {
                        debugger.enable();
                    } else {
                        debugger.disable();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(
            flow.hooks.is_registered(flow_debugger::debugger::HOOK_OWNER),
            debugger.is_enabled()
        );
    }
}

#[test]
fn test_breakpoints_ignored_while_disabled() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.set_breakpoint(input_of("n2"));

    flow.send("a", "n1", "n2");

    assert_eq!(flow.take_delivered(), delivered(&[("n2", "a")]));
    assert_eq!(debugger.state(), EngineState::Disabled);
}

#[test]
fn test_dropping_debugger_unhooks_host() {
    let flow = TestFlow::new();
    {
        let debugger = flow.debugger(DebuggerConfig::default());
        debugger.enable();
        debugger.pause();
        flow.send("a", "n1", "n2");
        assert!(flow.take_delivered().is_empty());
    }
    assert!(flow.hooks.is_empty());
    assert_eq!(flow.take_delivered(), delivered(&[("n2", "a")]));
}

// =============================================================================
// Holding and releasing
// =============================================================================

#[test]
fn test_breakpoint_on_input_holds_at_receive() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    debugger.set_breakpoint(input_of("n2"));

    flow.send("a", "n1", "n2");

    assert!(flow.take_delivered().is_empty());
    assert_eq!(debugger.state(), EngineState::Paused);
    let messages = debugger.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].location_key, "f1/n2[i][0]");
    assert_eq!(messages[0].destination, None);

    debugger.step(None);
    assert_eq!(flow.take_delivered(), delivered(&[("n2", "a")]));
    assert_eq!(debugger.state(), EngineState::Paused);
}

#[test]
fn test_deleted_message_never_arrives() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    debugger.pause();

    flow.send("a", "n1", "n2");
    flow.send("b", "n1", "n2");
    debugger.delete_message(0);
    debugger.delete_message(999);
    debugger.resume();

    assert_eq!(flow.take_delivered(), delivered(&[("n2", "b")]));
}

#[test]
fn test_stepped_message_continues_through_next_hop_when_not_paused_there() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    debugger.pause();

    flow.send("a", "n1", "n2");
    debugger.step(None);

    // pause-all: the receive at n2 is held as well
    assert!(flow.take_delivered().is_empty());
    assert_eq!(debugger.queued_ids(), vec![1]);
    assert_eq!(debugger.queued_ids_at("f1/n2[i][0]"), vec![1]);

    debugger.step(Some(1));
    assert_eq!(flow.take_delivered(), delivered(&[("n2", "a")]));
    assert_eq!(debugger.queue_len(), 0);
}

#[test]
fn test_repause_mid_drain_keeps_rest_queued() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    let bp = debugger.set_breakpoint(input_of("n2"));
    debugger.pause();

    flow.send("a", "n1", "n3");
    flow.send("b", "n1", "n3");
    flow.send("c", "n1", "n2");
    flow.send("d", "n1", "n3");
    assert_eq!(debugger.queued_ids(), vec![0, 1, 2, 3]);

    let mut rx = debugger.subscribe();
    debugger.resume();

    assert_eq!(flow.take_delivered(), delivered(&[("n3", "a"), ("n3", "b")]));
    assert_eq!(debugger.state(), EngineState::Paused);
    assert_eq!(debugger.queued_ids(), vec![3, 4]);
    assert_eq!(debugger.queued_ids_at("f1/n1[o][0]"), vec![3]);
    assert_eq!(debugger.queued_ids_at("f1/n2[i][0]"), vec![4]);

    let names: Vec<&str> = collect(&mut rx).iter().map(DebugEvent::name).collect();
    assert_eq!(
        names,
        vec!["resumed", "dispatched", "dispatched", "dispatched", "paused", "queued"]
    );

    let snapshot = debugger.snapshot();
    assert_eq!(snapshot.breakpoints.unwrap()[0].id, bp);

    debugger.resume();
    assert_eq!(flow.take_delivered(), delivered(&[("n3", "d"), ("n2", "c")]));
    assert_eq!(debugger.state(), EngineState::Enabled);
}

#[test]
fn test_disable_flushes_every_hop() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    debugger.pause();

    flow.send("a", "n1", "n2");
    flow.send("b", "n2", "n3");
    let mut rx = debugger.subscribe();
    debugger.disable();

    // hooks are gone before the released messages reach their receive hop
    assert_eq!(flow.take_delivered(), delivered(&[("n2", "a"), ("n3", "b")]));
    assert!(collect(&mut rx).is_empty());
    assert_eq!(debugger.queue_len(), 0);
}

// =============================================================================
// Breakpoint matching
// =============================================================================

#[test]
fn test_wildcard_breakpoint_matches_every_subflow_instance() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    let wildcard: Location = "*/tmpl-1[o][0]".parse().unwrap();
    assert!(wildcard.in_nested_context);
    let bp = debugger.set_breakpoint(wildcard);

    for instance in ["sf-a", "sf-b"] {
        let ctx = FlowContext::nested(&flow.flow, instance, ContextKind::Subflow);
        let source = NodeRef::new(format!("{}-inner", instance), "function", ctx.clone())
            .with_alias("tmpl-1");
        flow.route(SendEvent {
            msg: Message::new(instance, json!({})),
            source,
            source_port: 0,
            destination: NodeRef::new("out", "function", ctx),
        });
    }

    assert!(flow.take_delivered().is_empty());
    assert_eq!(debugger.queued_ids_at("f1/sf-a/tmpl-1[o][0]"), vec![0]);
    assert_eq!(debugger.queued_ids_at("f1/sf-b/tmpl-1[o][0]"), vec![1]);
    assert_eq!(debugger.breakpoints().len(), 1);
    assert_eq!(debugger.breakpoint(&bp).unwrap().location.path, "*");
}

#[test]
fn test_same_location_reuses_breakpoint() {
    let debugger = FlowDebugger::default();
    let first = debugger.set_breakpoint(input_of("n2"));
    debugger.set_breakpoint_active(&first, false);

    let second = debugger.set_breakpoint(input_of("n2"));
    assert_eq!(first, second);
    assert!(debugger.breakpoint(&first).unwrap().active);

    let other = debugger.set_breakpoint(input_of("n3"));
    assert_ne!(first, other);
    assert!(first.parse::<u64>().unwrap() < other.parse::<u64>().unwrap());
}

#[test]
fn test_breakpoint_request_defaults_to_output() {
    let req: BreakpointRequest =
        serde_json::from_value(json!({ "id": "n1", "path": "f1" })).unwrap();
    let location = Location::try_from(req).unwrap();
    assert_eq!(location.exact_key(), "f1/n1[o][0]");

    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    debugger.set_breakpoint(location);
    flow.send("a", "n1", "n2");
    assert_eq!(debugger.queued_ids_at("f1/n1[o][0]"), vec![0]);
}

#[test]
fn test_filtered_events_are_never_held() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    debugger.pause();

    // A subflow instance routing into its first internal node
    let instance = FlowContext::nested(&flow.flow, "sf-a", ContextKind::Subflow);
    flow.route(SendEvent {
        msg: Message::new("inst", json!({})),
        source: NodeRef::new("sf-a", "subflow:tmpl", instance.clone()),
        source_port: 0,
        destination: NodeRef::new("inject-like", "inject", instance),
    });

    // Traffic inside a module subflow
    let module = FlowContext::nested(
        &flow.flow,
        "mod-a",
        ContextKind::from_type_tag("module:contrib-foo"),
    );
    flow.route(SendEvent {
        msg: Message::new("mod", json!({})),
        source: NodeRef::new("m1", "function", module.clone()),
        source_port: 0,
        destination: NodeRef::new("m2", "function", module),
    });

    assert_eq!(
        flow.take_delivered(),
        delivered(&[("inject-like", "inst"), ("m2", "mod")])
    );
    assert_eq!(debugger.queue_len(), 0);
}

// =============================================================================
// Pause-node policy
// =============================================================================

#[test]
fn test_pause_node_follows_stepped_message() {
    let flow = TestFlow::new();
    let config = DebuggerConfig::new().with_breakpoint_action(BreakpointAction::PauseNode);
    let debugger = flow.debugger(config);
    debugger.enable();
    debugger.set_breakpoint(Location::new("n1", "f1", PortType::Out, 0));

    flow.send("a", "n1", "n2");
    flow.send("x", "n5", "n6");
    assert_eq!(flow.take_delivered(), delivered(&[("n6", "x")]));

    let mut rx = debugger.subscribe();
    debugger.step(None);

    // stepped message pauses again at its next hop
    assert!(flow.take_delivered().is_empty());
    assert_eq!(
        debugger.paused_locations(),
        vec!["n1".to_string(), "n2".to_string()]
    );
    let step_pause = collect(&mut rx).into_iter().find_map(|event| match event {
        DebugEvent::Paused(paused) => Some(paused),
        _ => None,
    });
    let step_pause = step_pause.unwrap();
    assert_eq!(step_pause.reason, PauseReason::Step);
    assert_eq!(step_pause.node.as_deref(), Some("n2"));

    debugger.resume_node("n2");
    assert_eq!(flow.take_delivered(), delivered(&[("n2", "a")]));
    assert_eq!(debugger.paused_locations(), vec!["n1".to_string()]);
}

// =============================================================================
// Notifications
// =============================================================================

#[tokio::test]
async fn test_subscriber_receives_lifecycle_in_order() {
    let flow = TestFlow::new();
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    debugger.set_breakpoint(input_of("n2"));
    let mut rx = debugger.subscribe();

    flow.send("a", "n1", "n2");
    debugger.resume();

    let mut names = Vec::new();
    for _ in 0..4 {
        let event = rx.recv().await.unwrap();
        names.push(event.name());
    }
    assert_eq!(names, vec!["paused", "queued", "resumed", "dispatched"]);
}

#[tokio::test]
async fn test_closed_subscribers_are_pruned() {
    let debugger = FlowDebugger::default();
    debugger.enable();
    let rx = debugger.subscribe();
    let mut kept = debugger.subscribe();
    assert_eq!(debugger.subscriber_count(), 2);

    drop(rx);
    debugger.pause();

    assert_eq!(debugger.subscriber_count(), 1);
    assert!(matches!(kept.recv().await, Some(DebugEvent::Paused(_))));
}

#[test]
fn test_notifications_serialize_tagged() {
    let debugger = FlowDebugger::default();
    debugger.enable();
    let mut rx = debugger.subscribe();
    debugger.pause();

    let event = rx.try_recv().unwrap();
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "paused");
    assert_eq!(value["reason"], "manual");
    assert_eq!(value["pausedLocations"], json!(["*"]));
}

// =============================================================================
// Thread safety
// =============================================================================

static_assertions::assert_impl_all!(FlowDebugger: Send, Sync, Clone);
static_assertions::assert_impl_all!(HookSet: Send, Sync);

#[test]
fn test_concurrent_senders_all_held_then_released() {
    let flow = Arc::new(TestFlow::new());
    let debugger = flow.debugger(DebuggerConfig::default());
    debugger.enable();
    debugger.pause();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let flow = Arc::clone(&flow);
            std::thread::spawn(move || {
                for i in 0..25 {
                    flow.send(&format!("t{}-{}", t, i), &format!("n{}", t), "sink");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(debugger.queue_len(), 100);
    let ids = debugger.queued_ids();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    debugger.resume();
    assert_eq!(flow.take_delivered().len(), 100);
    assert_eq!(debugger.queue_len(), 0);
}
