//! trainer-lua - Lua automations for game trainer mods.
//!
//! Loads user-authored Lua scripts next to a set of shared libraries and
//! ticks them at a fixed frame rate so they can read and write the memory of
//! a running game through a host API.
//!
//! # Modules
//!
//! - [`lua`] - Script environments, the tick scheduler and the lifecycle
//! - [`host`] - The host API capability handed to scripts
//! - [`config`] - Configuration loading and the mods directory layout
//! - [`error`] - Load, lifecycle and marshalling errors

pub mod config;
pub mod constants;
pub mod error;
pub mod host;
pub mod lua;

// Re-export commonly used types
pub use config::{Config, ModsLayout};
pub use error::{LifecycleError, MarshallingError, ScriptError, ScriptLoadError};
pub use host::{GameApi, MemoryImage};
pub use lua::{
    Automation, AutomationEvent, AutomationOptions, LifecycleState, LoadRequest, ModDescriptor,
    TickOutcome,
};
