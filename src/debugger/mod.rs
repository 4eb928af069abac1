//! Debugger engine
//!
//! ```text
//!                 ┌──────────── enable ────────────┐
//!                 │                                ▼
//!           ┌──────────┐                     ┌──────────┐  breakpoint / pause  ┌────────┐
//!           │ Disabled │ ◀──── disable ───── │ Enabled  │ ───────────────────▶ │ Paused │
//!           └──────────┘                     └──────────┘ ◀──── resume ─────── └────────┘
//!                 ▲                                                                │
//!                 └──────────────────────── disable ───────────────────────────────┘
//! ```
//!
//! While paused, intercepted messages are held in arrival order. The
//! controller releases them one at a time (`step`), all at once (`resume`),
//! or drops them (`delete_message`).

pub mod breakpoint;
pub mod engine;
pub mod events;
pub mod state;

pub use breakpoint::Breakpoint;
pub use engine::{FlowDebugger, HOOK_OWNER};
pub use events::{
    DebugEvent, DispatchedEvent, PauseCause, PauseReason, PausedEvent, QueuedEvent, ResumedEvent,
};
pub use state::{DebuggerState, EngineState, MessageSummary, PausedLocations, QueueDepth, ALL_LOCATIONS};
