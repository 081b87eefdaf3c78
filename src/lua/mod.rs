//! Lua automation runtime.
//!
//! Each automation script gets its own interpreter, its own scheduler and
//! its own lock. Nothing is shared between automations, so a slow or
//! sleeping script only ever delays itself.
//!
//! # Architecture
//!
//! ```text
//! Automation (lifecycle controller)
//!  ├── AutomationCore (Arc, shared with tick workers)
//!  │    ├── Mutex<ScriptEnvironment>   reentrancy lock
//!  │    │    ├── Lua state (mlua)
//!  │    │    ├── OnLoad / OnTick / OnUnload
//!  │    │    └── Primitives
//!  │    │         ├── print, log    (output, attributed to the mod)
//!  │    │         ├── sleep
//!  │    │         ├── bytestoint, inttobytes, bytestofloat, floattobytes
//!  │    │         └── Ratchetron, GAME_PID
//!  │    ├── LifecycleState
//!  │    └── TickState (tick_count, missed_ticks, busy)
//!  └── TickScheduler (tokio interval driver)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let automation = Automation::load(request, &config.layout(), api, AutomationOptions::default())?;
//! automation.start(&tokio::runtime::Handle::current());
//! // ... later
//! automation.unload()?;
//! ```

pub mod automation;
pub mod environment;
pub mod lifecycle;
pub mod primitives;
pub mod scheduler;

pub use automation::{Automation, AutomationEvent, AutomationEventSender, AutomationOptions};
pub use environment::{Hook, LoadRequest, ModDescriptor, ScriptEnvironment};
pub use lifecycle::{LifecycleEvent, LifecycleState};
pub use scheduler::{TickOutcome, TickScheduler, TickState};
