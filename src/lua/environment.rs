//! Script environment: one interpreter per automation.
//!
//! [`ScriptEnvironment::load`] runs the bootstrap protocol in a fixed order:
//!
//! 1. create the interpreter and register the native bridge
//! 2. inject the host API and process id
//! 3. execute every file in `libs/standard`
//! 4. execute every file in `libs/<game_id>`
//! 5. append the main script's directory to `package.path`
//! 6. execute the main script
//! 7. resolve `OnLoad`, `OnTick`, `OnUnload`
//! 8. call `OnLoad()`
//!
//! Library directories are executed in filesystem enumeration order, which is
//! unspecified. Libraries must not depend on each other's load order.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mlua::{FromLua, Function, IntoLuaMulti, Lua, Table, Value};

use crate::config::ModsLayout;
use crate::constants::AUTOMATION_LOG_TARGET;
use crate::error::{LifecycleError, ScriptError, ScriptLoadError};
use crate::host::GameApi;

use super::primitives;

/// Lifecycle hooks a script may define as globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Called once after the main script has run.
    OnLoad,
    /// Called every tick with the tick index.
    OnTick,
    /// Called once when the automation is unloaded.
    OnUnload,
}

impl Hook {
    /// All hooks, in lifecycle order.
    pub const ALL: [Self; 3] = [Self::OnLoad, Self::OnTick, Self::OnUnload];

    /// Global name the script defines the hook under.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::OnLoad => "OnLoad",
            Self::OnTick => "OnTick",
            Self::OnUnload => "OnUnload",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The mod that owns an automation.
///
/// Used for log attribution and for reporting failures upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModDescriptor {
    /// Stable identifier.
    pub id: String,
    /// Display name, prefixed to every line the script prints.
    pub name: String,
}

impl ModDescriptor {
    /// Descriptor with the given id and display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// What to load and on whose behalf.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Main script of the automation.
    pub main_script: PathBuf,
    /// Game identifier selecting `libs/<game_id>`.
    pub game_id: String,
    /// Owning mod.
    pub owner: Arc<ModDescriptor>,
    /// Process id exposed as `GAME_PID`; defaults to the host API's current pid.
    pub process_id: Option<u32>,
}

/// Hook functions resolved once after the main script runs.
#[derive(Default)]
struct Hooks {
    on_load: Option<Function>,
    on_tick: Option<Function>,
    on_unload: Option<Function>,
}

impl Hooks {
    fn get(&self, hook: Hook) -> Option<&Function> {
        match hook {
            Hook::OnLoad => self.on_load.as_ref(),
            Hook::OnTick => self.on_tick.as_ref(),
            Hook::OnUnload => self.on_unload.as_ref(),
        }
    }
}

/// A loaded automation script and the interpreter it runs in.
///
/// Not safe for concurrent entry: callers serialize every hook call behind a
/// single lock (see [`crate::lua::Automation`]).
pub struct ScriptEnvironment {
    /// The interpreter. `None` once closed or abandoned.
    lua: Option<Lua>,
    hooks: Hooks,
    /// Directory of the main script, searched by `require`.
    load_root: PathBuf,
    /// Main script name relative to the mods root.
    chunk_name: String,
    owner: Arc<ModDescriptor>,
}

impl fmt::Debug for ScriptEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks: Vec<&str> = Hook::ALL
            .iter()
            .filter(|h| self.hooks.get(**h).is_some())
            .map(|h| h.name())
            .collect();
        f.debug_struct("ScriptEnvironment")
            .field("chunk_name", &self.chunk_name)
            .field("load_root", &self.load_root)
            .field("owner", &self.owner.name)
            .field("hooks", &hooks)
            .field("released", &self.is_released())
            .finish()
    }
}

impl ScriptEnvironment {
    /// Bootstrap an automation and call its `OnLoad` hook.
    ///
    /// # Errors
    ///
    /// Returns a [`ScriptLoadError`] if any bootstrap step fails; later steps
    /// are not attempted. An interpreter that raised a script error is
    /// abandoned rather than closed.
    pub fn load(
        request: &LoadRequest,
        layout: &ModsLayout,
        api: Arc<dyn GameApi>,
    ) -> Result<Self, ScriptLoadError> {
        let process_id = request.process_id.unwrap_or_else(|| api.current_pid());

        let lua = Lua::new();
        primitives::register_all(&lua, Arc::from(request.owner.name.as_str()))
            .map_err(|e| ScriptLoadError::Setup(ScriptError::new(format!("{e:#}"))))?;
        primitives::register_host(&lua, api, process_id)
            .map_err(|e| ScriptLoadError::Setup(ScriptError::new(format!("{e:#}"))))?;

        let load_root = request
            .main_script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut env = Self {
            lua: Some(lua),
            hooks: Hooks::default(),
            load_root,
            chunk_name: layout.display_name(&request.main_script),
            owner: Arc::clone(&request.owner),
        };

        match env.bootstrap(request, layout) {
            Ok(()) => Ok(env),
            Err(e) => {
                if e.script_error().is_some() {
                    env.abandon();
                } else {
                    env.close();
                }
                Err(e)
            }
        }
    }

    /// Steps 3-8 of the bootstrap protocol.
    fn bootstrap(&mut self, request: &LoadRequest, layout: &ModsLayout) -> Result<(), ScriptLoadError> {
        let lua = self.lua.as_ref().ok_or(LifecycleError::Released)?;

        Self::exec_library_dir(lua, &layout.standard_library_dir(), layout)?;
        Self::exec_library_dir(lua, &layout.game_library_dir(&request.game_id), layout)?;

        Self::extend_package_path(lua, &self.load_root)?;

        let source = read_source(&request.main_script)?;
        exec_chunk(lua, &self.chunk_name, source)?;

        self.hooks = self.resolve_hooks(lua)?;
        log::debug!(
            target: AUTOMATION_LOG_TARGET,
            "[{}] Resolved hooks for {}: {:?}",
            self.owner.name,
            self.chunk_name,
            self
        );

        self.call_hook(Hook::OnLoad, ())?;
        Ok(())
    }

    /// Execute every regular file in `dir`. A missing directory is skipped.
    fn exec_library_dir(lua: &Lua, dir: &Path, layout: &ModsLayout) -> Result<(), ScriptLoadError> {
        if !dir.is_dir() {
            log::debug!(target: AUTOMATION_LOG_TARGET, "No library directory at {}", dir.display());
            return Ok(());
        }

        let io_error = |source: std::io::Error| ScriptLoadError::Io {
            path: dir.to_path_buf(),
            source,
        };

        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if !path.is_file() {
                continue;
            }
            let name = layout.display_name(&path);
            exec_chunk(lua, &name, read_source(&path)?)?;
            log::debug!(target: AUTOMATION_LOG_TARGET, "Loaded library {}", name);
        }
        Ok(())
    }

    /// Append `<load_root>/?.lua` and `<load_root>/?/init.lua` to `package.path`.
    fn extend_package_path(lua: &Lua, load_root: &Path) -> Result<(), ScriptLoadError> {
        let setup = |e: mlua::Error| ScriptLoadError::Setup(e.into());

        let package: Table = lua.globals().get("package").map_err(setup)?;
        let current: String = package.get("path").map_err(setup)?;
        let new_path = format!(
            "{current};{file};{init}",
            file = load_root.join("?.lua").display(),
            init = load_root.join("?").join("init.lua").display(),
        );
        package.set("path", new_path).map_err(setup)?;
        Ok(())
    }

    fn resolve_hooks(&self, lua: &Lua) -> Result<Hooks, ScriptLoadError> {
        let globals = lua.globals();
        let resolve = |hook: Hook| -> Result<Option<Function>, ScriptLoadError> {
            match globals.get::<Value>(hook.name()) {
                Ok(Value::Nil) => Ok(None),
                Ok(Value::Function(func)) => Ok(Some(func)),
                Ok(other) => Err(ScriptLoadError::InvalidHook {
                    name: hook.name(),
                    found: other.type_name(),
                }),
                Err(e) => Err(ScriptLoadError::Script {
                    chunk: self.chunk_name.clone(),
                    error: e.into(),
                }),
            }
        };

        Ok(Hooks {
            on_load: resolve(Hook::OnLoad)?,
            on_tick: resolve(Hook::OnTick)?,
            on_unload: resolve(Hook::OnUnload)?,
        })
    }

    /// Call a lifecycle hook.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Released`] if the environment was closed
    /// - [`LifecycleError::MissingHook`] if the script does not define it
    /// - [`LifecycleError::Script`] if the hook raised an error
    pub fn call_hook(&self, hook: Hook, args: impl IntoLuaMulti) -> Result<(), LifecycleError> {
        if self.is_released() {
            return Err(LifecycleError::Released);
        }
        let func = self.hooks.get(hook).ok_or(LifecycleError::MissingHook(hook))?;
        func.call::<()>(args).map_err(|e| LifecycleError::Script {
            hook,
            error: e.into(),
        })
    }

    /// Whether the script defines `hook`.
    #[must_use]
    pub fn has_hook(&self, hook: Hook) -> bool {
        self.hooks.get(hook).is_some()
    }

    /// Read a global from the script namespace.
    pub fn global<T: FromLua>(&self, name: &str) -> Result<T, ScriptError> {
        let lua = self
            .lua
            .as_ref()
            .ok_or_else(|| ScriptError::new(LifecycleError::Released.to_string()))?;
        lua.globals().get(name).map_err(ScriptError::from)
    }

    /// Main script name relative to the mods root.
    #[must_use]
    pub fn chunk_name(&self) -> &str {
        &self.chunk_name
    }

    /// Whether the interpreter has been closed or abandoned.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.lua.is_none()
    }

    /// Release the interpreter. Idempotent.
    pub fn close(&mut self) {
        self.hooks = Hooks::default();
        if let Some(lua) = self.lua.take() {
            drop(lua);
            log::debug!(
                target: AUTOMATION_LOG_TARGET,
                "[{}] Closed interpreter for {}",
                self.owner.name,
                self.chunk_name
            );
        }
    }

    /// Give up the interpreter without closing it.
    ///
    /// Closing runs `__gc` finalizers, which is script code; after a script
    /// error the state may be inconsistent, so it is leaked instead.
    pub fn abandon(&mut self) {
        self.hooks = Hooks::default();
        if let Some(lua) = self.lua.take() {
            std::mem::forget(lua);
            log::warn!(
                target: AUTOMATION_LOG_TARGET,
                "[{}] Abandoned interpreter for {} after a script error",
                self.owner.name,
                self.chunk_name
            );
        }
    }
}

fn read_source(path: &Path) -> Result<Vec<u8>, ScriptLoadError> {
    fs::read(path).map_err(|source| ScriptLoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn exec_chunk(lua: &Lua, name: &str, source: Vec<u8>) -> Result<(), ScriptLoadError> {
    lua.load(source)
        .set_name(format!("@{name}"))
        .exec()
        .map_err(|e| ScriptLoadError::Script {
            chunk: name.to_string(),
            error: e.into(),
        })
}
