//! `sleep` primitive for Lua scripts.
//!
//! Blocks the thread running the calling hook. Each automation ticks on its
//! own worker, so a sleeping script only delays itself; the scheduler keeps
//! counting intervals and records them as missed ticks.
//!
//! ```lua
//! Ratchetron:WriteMemory(GAME_PID, 0x00B00000, inttobytes(1, 1))
//! sleep(100)  -- milliseconds
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use mlua::Lua;

/// Register the global `sleep(milliseconds)` function.
///
/// # Errors
///
/// Returns an error if Lua function creation fails.
pub fn register(lua: &Lua) -> Result<()> {
    let sleep_fn = lua
        .create_function(|_, millis: u64| {
            std::thread::sleep(Duration::from_millis(millis));
            Ok(())
        })
        .map_err(|e| anyhow!("Failed to create sleep function: {e}"))?;

    lua.globals()
        .set("sleep", sleep_fn)
        .map_err(|e| anyhow!("Failed to set sleep: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_blocks_caller() {
        let lua = Lua::new();
        register(&lua).expect("Should register sleep");

        let started = Instant::now();
        lua.load("sleep(20)").exec().expect("sleep should be callable");
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_rejects_negative() {
        let lua = Lua::new();
        register(&lua).expect("Should register sleep");
        assert!(lua.load("sleep(-1)").exec().is_err());
    }
}
