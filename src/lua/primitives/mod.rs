//! Lua primitive functions exposed to automation scripts.
//!
//! These form the native bridge: the only Rust functions a script can call
//! besides the Lua standard library. Primitives are registered when a script
//! environment is created, before any library or script runs.
//!
//! # Available Primitives
//!
//! - `print`, `log` - Output attributed to the owning mod
//! - `sleep` - Block the calling hook for a number of milliseconds
//! - `bytestoint`, `inttobytes` - Big-endian integer marshalling
//! - `bytestofloat`, `floattobytes` - Big-endian IEEE-754 single marshalling
//! - `Ratchetron`, `GAME_PID` - Host API capability and attached process id
//!
//! # Adding New Primitives
//!
//! 1. Create a new module (e.g., `foo.rs`)
//! 2. Implement a `register(lua: &Lua, ...) -> Result<()>` function
//! 3. Add `pub mod foo;` here
//! 4. Call it from `register_all` or `register_host`

pub mod bytes;
pub mod host;
pub mod log;
pub mod time;

use std::sync::Arc;

use anyhow::Result;
use mlua::Lua;

use crate::host::GameApi;

pub use bytes::{bytes_to_float, bytes_to_int, float_to_bytes, int_to_bytes, ByteArray};
pub use host::HostApiHandle;

/// Register every bridge function that does not depend on the host API.
///
/// # Errors
///
/// Returns an error if any primitive registration fails.
pub fn register_all(lua: &Lua, mod_name: Arc<str>) -> Result<()> {
    log::register(lua, mod_name)?;
    time::register(lua)?;
    bytes::register(lua)?;
    Ok(())
}

/// Inject the host API capability and the attached process id.
///
/// # Errors
///
/// Returns an error if the globals cannot be set.
pub fn register_host(lua: &Lua, api: Arc<dyn GameApi>, process_id: u32) -> Result<()> {
    host::register(lua, api, process_id)
}
