//! Host API capability for Lua scripts.
//!
//! Injects the [`GameApi`] as the `Ratchetron` userdata and the attached
//! process id as `GAME_PID`.
//!
//! # Usage in Lua
//!
//! ```lua
//! local pid = Ratchetron:getCurrentPID()         -- same as GAME_PID at load
//! local raw = Ratchetron:ReadMemory(GAME_PID, 0x00B00000, 4)
//! Ratchetron:WriteMemory(GAME_PID, 0x00B00000, {0, 0, 0x27, 0x10})
//! ```
//!
//! Failures from the host surface as Lua errors.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use mlua::{Lua, UserData, UserDataMethods};

use crate::constants::{HOST_API_GLOBAL, PROCESS_ID_GLOBAL};
use crate::host::GameApi;

use super::bytes::ByteArray;

/// Userdata handle wrapping the shared host API.
#[derive(Debug, Clone)]
pub struct HostApiHandle(pub Arc<dyn GameApi>);

impl UserData for HostApiHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("getCurrentPID", |_, this, ()| Ok(this.0.current_pid()));

        methods.add_method(
            "ReadMemory",
            |_, this, (pid, address, size): (u32, u32, u32)| {
                this.0
                    .read_memory(pid, address, size)
                    .map(ByteArray)
                    .map_err(|e| mlua::Error::external(format!("ReadMemory failed: {e:#}")))
            },
        );

        methods.add_method(
            "WriteMemory",
            |_, this, (pid, address, bytes): (u32, u32, ByteArray)| {
                this.0
                    .write_memory(pid, address, &bytes.0)
                    .map_err(|e| mlua::Error::external(format!("WriteMemory failed: {e:#}")))
            },
        );
    }
}

/// Register the host API and process id globals.
///
/// # Errors
///
/// Returns an error if the userdata cannot be created or set.
pub fn register(lua: &Lua, api: Arc<dyn GameApi>, process_id: u32) -> Result<()> {
    let handle = lua
        .create_userdata(HostApiHandle(api))
        .map_err(|e| anyhow!("Failed to create {HOST_API_GLOBAL} userdata: {e}"))?;

    let globals = lua.globals();
    globals
        .set(HOST_API_GLOBAL, handle)
        .map_err(|e| anyhow!("Failed to set {HOST_API_GLOBAL}: {e}"))?;
    globals
        .set(PROCESS_ID_GLOBAL, process_id)
        .map_err(|e| anyhow!("Failed to set {PROCESS_ID_GLOBAL}: {e}"))?;

    Ok(())
}
