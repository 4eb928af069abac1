//! # Flow Debugger Demo
//!
//! Runs a tiny three-node flow (`source -> format -> sink`) through an
//! in-memory hook registry with the debugger attached, and walks through
//! a breakpoint hit, a single step and a resume.
//!
//! ## Quick Start
//! ```bash
//! cargo run --bin flow-debugger-demo -- --messages 3
//! FLOW_DEBUGGER_BREAKPOINT_ACTION=pause-bp cargo run --bin flow-debugger-demo
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use flow_debugger::{
    BreakpointAction, DebugEvent, DebuggerConfig, Delivery, FlowContext, FlowDebugger, HookSet,
    Location, Message, NodeRef, ReceiveEvent, RoutingEvent, SendEvent,
};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================
#[derive(Parser, Debug)]
#[command(
    name = "flow-debugger-demo",
    version,
    about = "Walk a small flow through breakpoint, step and resume",
    long_about = r#"
Flow Debugger Demo

Builds the flow  source -> format -> sink, sets a breakpoint on the output
of `format`, pushes a few messages through and then:
  1. shows the held messages
  2. steps the oldest one
  3. resumes and drains the rest

EXAMPLES:
  flow-debugger-demo --messages 5
  flow-debugger-demo --breakpoint f1/format[o][0] --json
  flow-debugger-demo --breakpoint-action pause-bp
"#
)]
struct Args {
    /// Number of messages to inject
    #[arg(short = 'n', long = "messages", default_value_t = 3, value_name = "COUNT")]
    messages: usize,

    /// Breakpoint location key
    #[arg(
        short = 'b',
        long = "breakpoint",
        default_value = "f1/format[o][0]",
        value_name = "KEY"
    )]
    breakpoint: String,

    /// Pause policy (overrides FLOW_DEBUGGER_BREAKPOINT_ACTION)
    #[arg(long = "breakpoint-action", value_name = "ACTION")]
    breakpoint_action: Option<BreakpointAction>,

    /// Print the state snapshot as JSON after every phase
    #[arg(long = "json", default_value = "false")]
    json: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long = "verbose", default_value = "false")]
    verbose: bool,
}

// =============================================================================
// DEMO HOST
// =============================================================================
/// Routes messages through `pre_route` on the sender and `on_receive` on the
/// destination; receiving `format` forwards to `sink`.
#[derive(Clone)]
struct DemoFlow {
    hooks: Arc<HookSet>,
    flow: Arc<FlowContext>,
}

impl DemoFlow {
    fn new() -> Self {
        Self {
            hooks: Arc::new(HookSet::new()),
            flow: FlowContext::flow("f1"),
        }
    }

    fn node(&self, id: &str) -> NodeRef {
        NodeRef::new(id, "function", self.flow.clone())
    }

    fn send(&self, msg: Message, from: &str, to: &str) {
        let event = SendEvent {
            msg,
            source: self.node(from),
            source_port: 0,
            destination: self.node(to),
        };
        let host = self.clone();
        self.hooks.pre_route(
            event,
            Box::new(move |event, delivery| {
                if delivery == Delivery::Abort {
                    info!(msg = %event.msg().id, "Dropped before delivery");
                    return;
                }
                if let RoutingEvent::Send(send) = event {
                    host.receive(ReceiveEvent {
                        msg: send.msg,
                        destination: send.destination,
                    });
                }
            }),
        );
    }

    fn receive(&self, event: ReceiveEvent) {
        let host = self.clone();
        self.hooks.on_receive(
            event,
            Box::new(move |event, delivery| {
                if delivery == Delivery::Abort {
                    return;
                }
                let node = event.node().id.clone();
                let msg = event.msg().clone();
                info!(node = %node, msg = %msg.id, "Delivered");
                if node == "format" {
                    let body = json!({ "formatted": msg.body });
                    host.send(Message::new(msg.id, body), "format", "sink");
                }
            }),
        );
    }
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================
#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose)?;

    let mut config = DebuggerConfig::from_env()?;
    if let Some(action) = args.breakpoint_action {
        config = config.with_breakpoint_action(action);
    }
    info!(breakpoint_action = %config.breakpoint_action, "Configuration loaded");

    let breakpoint: Location = args
        .breakpoint
        .parse()
        .with_context(|| format!("Invalid breakpoint '{}'", args.breakpoint))?;

    let host = DemoFlow::new();
    let debugger = FlowDebugger::with_host(config, host.hooks.clone());
    let mut rx = debugger.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    debugger.enable();
    let bp = debugger.set_breakpoint(breakpoint);
    info!(breakpoint = %bp, "Breakpoint set");

    for i in 0..args.messages {
        host.send(
            Message::new(format!("m{}", i), json!({ "payload": i })),
            "source",
            "format",
        );
    }
    report(&debugger, "after inject", args.json)?;

    debugger.step(None);
    report(&debugger, "after step", args.json)?;

    debugger.resume();
    report(&debugger, "after resume", args.json)?;

    debugger.disable();
    drop(debugger);
    printer.await.context("Notification printer failed")?;

    info!("Demo completed");
    Ok(())
}

fn print_event(event: &DebugEvent) {
    match event {
        DebugEvent::Queued(e) => println!("  queued     #{} at {} (depth {})", e.id, e.location, e.depth),
        DebugEvent::Dispatched(e) => {
            println!("  dispatched #{} from {} (depth {})", e.id, e.location, e.depth)
        }
        DebugEvent::Paused(e) => println!("  paused     {:?} {:?}", e.reason, e.paused_locations),
        DebugEvent::Resumed(e) => println!("  resumed    {}", e.node.as_deref().unwrap_or("*")),
    }
}

fn report(debugger: &FlowDebugger, phase: &str, as_json: bool) -> Result<()> {
    println!("\n{}", "=".repeat(60));
    println!("{} [{:?}, {} held]", phase.to_uppercase(), debugger.state(), debugger.queue_len());
    println!("{}", "=".repeat(60));
    if as_json {
        println!("{}", serde_json::to_string_pretty(&debugger.snapshot())?);
    } else {
        print!("{}", debugger.dump());
    }
    Ok(())
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================
/// RUST_LOG wins over `--verbose` when set
fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["test"]);
        assert_eq!(args.messages, 3);
        assert_eq!(args.breakpoint, "f1/format[o][0]");
        assert!(args.breakpoint_action.is_none());
        assert!(!args.json);
    }

    #[test]
    fn test_args_with_flags() {
        let args = Args::parse_from([
            "test",
            "-n",
            "5",
            "--breakpoint-action",
            "pause-bp",
            "--json",
            "-v",
        ]);
        assert_eq!(args.messages, 5);
        assert_eq!(args.breakpoint_action, Some(BreakpointAction::PauseNode));
        assert!(args.json);
        assert!(args.verbose);
    }

    #[test]
    fn test_demo_flow_holds_at_breakpoint() {
        let host = DemoFlow::new();
        let debugger = FlowDebugger::with_host(DebuggerConfig::default(), host.hooks.clone());
        debugger.enable();
        debugger.set_breakpoint("f1/format[o][0]".parse().unwrap());

        host.send(Message::new("m0", json!(0)), "source", "format");
        assert_eq!(debugger.queued_ids_at("f1/format[o][0]"), vec![0]);

        debugger.resume();
        assert_eq!(debugger.queue_len(), 0);
    }
}
