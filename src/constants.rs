//! Application-wide constants for trainer-lua.
//!
//! Script-visible names live here because they form the contract with
//! user-authored automations: renaming any of them breaks existing mods.

use std::time::Duration;

// ============================================================================
// Scheduling
// ============================================================================

/// Default tick interval: one frame at 60 Hz.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_micros(16_667);

/// Default tick interval in milliseconds, as written in config files.
pub const DEFAULT_TICK_INTERVAL_MS: f64 = 16.667;

// ============================================================================
// Script namespace
// ============================================================================

/// Global holding the host automation API capability.
pub const HOST_API_GLOBAL: &str = "Ratchetron";

/// Global holding the attached game's process id.
pub const PROCESS_ID_GLOBAL: &str = "GAME_PID";

// ============================================================================
// Mods directory layout
// ============================================================================

/// Directory under the mods root holding shared libraries.
pub const LIBS_DIR: &str = "libs";

/// Library directory applied to every game.
pub const STANDARD_LIBS_DIR: &str = "standard";

/// Default mods root, relative to the working directory.
pub const DEFAULT_MODS_ROOT: &str = "mods";

// ============================================================================
// Logging targets
// ============================================================================

/// Log target for output produced by scripts (`print`, `log.*`).
pub const LUA_LOG_TARGET: &str = "lua";

/// Log target for scheduler and lifecycle diagnostics.
pub const AUTOMATION_LOG_TARGET: &str = "automation";
