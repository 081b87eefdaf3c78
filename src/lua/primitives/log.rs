//! Logging primitives for Lua scripts.
//!
//! Replaces Lua's `print` and adds a `log` table, all routed through Rust's
//! `log` crate under the `lua` target. Every line is attributed to the mod
//! that owns the script.
//!
//! # Usage in Lua
//!
//! ```lua
//! print("Bolts:", bolts)              -- [Infinite Bolts] Bolts:	150000
//! log.warn("Player pointer is null")
//! log.debug("Raw bytes: " .. #raw)
//! ```

use std::sync::Arc;

use anyhow::{anyhow, Result};
use mlua::{Function, Lua, Value, Variadic};

use crate::constants::LUA_LOG_TARGET;

/// Join values the way Lua's own `print` does: `tostring` each, tab-separated.
fn join_values(lua: &Lua, values: Variadic<Value>) -> mlua::Result<String> {
    let tostring: Function = lua.globals().get("tostring")?;
    let mut parts = Vec::with_capacity(values.len());
    for value in values {
        parts.push(tostring.call::<String>(value)?);
    }
    Ok(parts.join("\t"))
}

/// Register `print` and the `log` table for the mod named `mod_name`.
///
/// - `print(...)` - Info level, `[mod] a\tb\tc`
/// - `log.info(msg)`, `log.warn(msg)`, `log.error(msg)`, `log.debug(msg)`
///
/// # Errors
///
/// Returns an error if Lua table or function creation fails.
pub fn register(lua: &Lua, mod_name: Arc<str>) -> Result<()> {
    let name = Arc::clone(&mod_name);
    let print_fn = lua
        .create_function(move |lua, values: Variadic<Value>| {
            let line = join_values(lua, values)?;
            log::info!(target: LUA_LOG_TARGET, "[{}] {}", name, line);
            Ok(())
        })
        .map_err(|e| anyhow!("Failed to create print function: {e}"))?;
    lua.globals()
        .set("print", print_fn)
        .map_err(|e| anyhow!("Failed to set print: {e}"))?;

    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    for level in [log::Level::Info, log::Level::Warn, log::Level::Error, log::Level::Debug] {
        let name = Arc::clone(&mod_name);
        let level_fn = lua
            .create_function(move |_, msg: String| {
                log::log!(target: LUA_LOG_TARGET, level, "[{}] {}", name, msg);
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{} function: {e}", level_key(level)))?;
        log_table
            .set(level_key(level), level_fn)
            .map_err(|e| anyhow!("Failed to set log.{}: {e}", level_key(level)))?;
    }

    lua.globals()
        .set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}

fn level_key(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "error",
        log::Level::Warn => "warn",
        log::Level::Info => "info",
        log::Level::Debug => "debug",
        log::Level::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Table;

    #[test]
    fn test_log_table_created() {
        let lua = Lua::new();
        register(&lua, Arc::from("Test Mod")).expect("Should register log primitives");

        let log_table: Table = lua.globals().get("log").expect("log table should exist");
        let _: Function = log_table.get("info").expect("log.info should exist");
        let _: Function = log_table.get("warn").expect("log.warn should exist");
        let _: Function = log_table.get("error").expect("log.error should exist");
        let _: Function = log_table.get("debug").expect("log.debug should exist");
    }

    #[test]
    fn test_print_accepts_mixed_values() {
        let lua = Lua::new();
        register(&lua, Arc::from("Test Mod")).expect("Should register log primitives");

        lua.load(r#"print("bolts", 150000, true, nil, {})"#)
            .exec()
            .expect("print should be callable with any values");
        lua.load("print()").exec().expect("print should accept no arguments");
    }

    #[test]
    fn test_join_values_matches_lua_print() {
        let lua = Lua::new();
        let values = Variadic::from_iter([
            Value::Integer(1),
            Value::Boolean(false),
            Value::Nil,
        ]);
        let joined = join_values(&lua, values).expect("Should join");
        assert_eq!(joined, "1\tfalse\tnil");
    }
}
