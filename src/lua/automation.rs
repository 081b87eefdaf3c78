//! Lifecycle controller for one automation script.
//!
//! [`Automation`] ties a [`ScriptEnvironment`] to a [`TickScheduler`] and
//! drives the [`LifecycleState`] machine. The owning mod keeps the
//! `Automation`; the scheduler's driver task and its blocking tick workers
//! share the same [`AutomationCore`] through an `Arc`.
//!
//! # Locking
//!
//! Every hook call happens while holding the environment mutex, whether it
//! comes from a tick worker or from [`Automation::unload`]. That mutex is
//! the reentrancy lock: at most one thread is ever inside the interpreter.
//! The state mutex is only held briefly and never while waiting for the
//! environment.
//!
//! # Failure reporting
//!
//! Failures are reported upward as [`AutomationEvent`]s on an unbounded
//! channel. The automation itself only ever disables itself; whether the
//! rest of the owning mod goes down with it is the owner's decision.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mlua::FromLua;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::ModsLayout;
use crate::constants::{AUTOMATION_LOG_TARGET, DEFAULT_TICK_INTERVAL};
use crate::error::{LifecycleError, ScriptError, ScriptLoadError};
use crate::host::GameApi;

use super::environment::{Hook, LoadRequest, ModDescriptor, ScriptEnvironment};
use super::lifecycle::{LifecycleEvent, LifecycleState};
use super::scheduler::{TickScheduler, TickState};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Notification sent to the owning mod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationEvent {
    /// Bootstrap failed; the automation never ran.
    LoadFailed {
        /// Owning mod id.
        mod_id: String,
        /// What went wrong.
        error: ScriptError,
    },
    /// A hook raised an error; the automation is now `Failed`.
    Failed {
        /// Owning mod id.
        mod_id: String,
        /// Hook that failed.
        hook: Hook,
        /// Interpreter error.
        error: ScriptError,
    },
    /// The automation unloaded cleanly.
    Unloaded {
        /// Owning mod id.
        mod_id: String,
    },
}

/// Channel the owning mod receives [`AutomationEvent`]s on.
pub type AutomationEventSender = UnboundedSender<AutomationEvent>;

/// Options for [`Automation::load`].
#[derive(Debug, Clone)]
pub struct AutomationOptions {
    /// Interval between ticks.
    pub tick_interval: std::time::Duration,
    /// Where to report failures and unloads, if anywhere.
    pub events: Option<AutomationEventSender>,
}

impl Default for AutomationOptions {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            events: None,
        }
    }
}

/// State shared between the controller and the scheduler's workers.
pub(crate) struct AutomationCore {
    pub(crate) owner: Arc<ModDescriptor>,
    /// Reentrancy lock around the interpreter.
    env: Mutex<ScriptEnvironment>,
    state: Mutex<LifecycleState>,
    pub(crate) ticks: TickState,
    cancel: CancellationToken,
    events: Option<AutomationEventSender>,
}

impl AutomationCore {
    pub(crate) fn lock_env(&self) -> MutexGuard<'_, ScriptEnvironment> {
        lock(&self.env)
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    fn transition(&self, event: LifecycleEvent) -> LifecycleState {
        let mut state = lock(&self.state);
        let next = state.on(event);
        if next != *state {
            log::debug!(
                target: AUTOMATION_LOG_TARGET,
                "[{}] {} -> {} ({:?})",
                self.owner.name,
                *state,
                next,
                event
            );
        }
        *state = next;
        next
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }

    /// Move to `Failed` after `hook` raised `error`.
    ///
    /// The caller holds the environment lock. The interpreter is abandoned,
    /// the scheduler stopped and the owner notified.
    pub(crate) fn fail(
        &self,
        env: &mut ScriptEnvironment,
        event: LifecycleEvent,
        hook: Hook,
        error: ScriptError,
    ) {
        self.transition(event);
        env.abandon();
        self.stop();
        self.report(AutomationEvent::Failed {
            mod_id: self.owner.id.clone(),
            hook,
            error,
        });
    }

    fn report(&self, event: AutomationEvent) {
        send_event(self.events.as_ref(), &self.owner, event);
    }
}

/// Deliver `event` to the owner, if it is listening. Returns whether it was sent.
fn send_event(
    events: Option<&AutomationEventSender>,
    owner: &ModDescriptor,
    event: AutomationEvent,
) -> bool {
    let Some(tx) = events else {
        return false;
    };
    if tx.send(event).is_err() {
        log::debug!(
            target: AUTOMATION_LOG_TARGET,
            "[{}] Owner stopped listening for automation events",
            owner.name
        );
        return false;
    }
    true
}

/// A loaded automation: its interpreter, its scheduler and its lifecycle.
///
/// Dropping an `Automation` stops its scheduler but does not call `OnUnload`;
/// call [`unload`](Self::unload) for an orderly shutdown.
pub struct Automation {
    core: Arc<AutomationCore>,
    scheduler: TickScheduler,
}

impl fmt::Debug for Automation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Automation")
            .field("owner", &self.core.owner)
            .field("state", &self.state())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Automation {
    /// Bootstrap an automation and leave it `Running` with its scheduler
    /// ready but not started.
    ///
    /// # Errors
    ///
    /// Returns the [`ScriptLoadError`] of the first failing bootstrap step.
    /// The failure is also logged and reported as
    /// [`AutomationEvent::LoadFailed`].
    pub fn load(
        request: LoadRequest,
        layout: &ModsLayout,
        api: Arc<dyn GameApi>,
        options: AutomationOptions,
    ) -> Result<Self, ScriptLoadError> {
        let owner = Arc::clone(&request.owner);
        let script = layout.display_name(&request.main_script);
        let state = LifecycleState::Loading;

        log::info!(
            target: AUTOMATION_LOG_TARGET,
            "[{}] Loading Lua automation from {}...",
            owner.name,
            script
        );

        let env = match ScriptEnvironment::load(&request, layout, api) {
            Ok(env) => env,
            Err(e) => {
                let failed = state.on(LifecycleEvent::LoadFailed);
                let error = e
                    .script_error()
                    .cloned()
                    .unwrap_or_else(|| ScriptError::new(e.to_string()));
                log::error!(
                    target: AUTOMATION_LOG_TARGET,
                    "[{}] Automation {} is {}: {}\n{}",
                    owner.name,
                    script,
                    failed,
                    e,
                    error.trace_or_empty()
                );
                send_event(
                    options.events.as_ref(),
                    &owner,
                    AutomationEvent::LoadFailed {
                        mod_id: owner.id.clone(),
                        error,
                    },
                );
                return Err(e);
            }
        };

        let core = Arc::new(AutomationCore {
            owner: Arc::clone(&owner),
            env: Mutex::new(env),
            state: Mutex::new(state.on(LifecycleEvent::Loaded)),
            ticks: TickState::default(),
            cancel: CancellationToken::new(),
            events: options.events,
        });
        for hook in [Hook::OnTick, Hook::OnUnload] {
            if !core.lock_env().has_hook(hook) {
                log::warn!(
                    target: AUTOMATION_LOG_TARGET,
                    "[{}] {} does not define {}; calling it will fail the automation",
                    owner.name,
                    script,
                    hook
                );
            }
        }
        let scheduler = TickScheduler::new(Arc::clone(&core), options.tick_interval);

        log::info!(
            target: AUTOMATION_LOG_TARGET,
            "[{}] Loaded Lua automation {}",
            owner.name,
            script
        );

        Ok(Self { core, scheduler })
    }

    /// Start ticking on the given tokio runtime.
    ///
    /// Returns `false` if the scheduler was already started or stopped.
    pub fn start(&self, handle: &Handle) -> bool {
        if self.state() != LifecycleState::Running {
            return false;
        }
        self.scheduler.start(handle)
    }

    /// Stop ticking, run `OnUnload` and release the interpreter.
    ///
    /// Waits for an in-flight tick to finish first. Does nothing when the
    /// automation is already `Failed` or `Unloaded`.
    ///
    /// # Errors
    ///
    /// Returns the [`LifecycleError`] raised by `OnUnload` (including a
    /// missing `OnUnload`). The automation is then `Failed` and its
    /// interpreter is abandoned, not closed.
    pub fn unload(&self) -> Result<(), LifecycleError> {
        self.scheduler.stop();
        let mut env = self.core.lock_env();

        let state = self.core.state();
        if state.is_terminal() {
            log::debug!(
                target: AUTOMATION_LOG_TARGET,
                "[{}] Unload ignored, automation is {}",
                self.core.owner.name,
                state
            );
            return Ok(());
        }

        match env.call_hook(Hook::OnUnload, ()) {
            Ok(()) => {
                env.close();
                self.core.transition(LifecycleEvent::UnloadSucceeded);
                self.core.report(AutomationEvent::Unloaded {
                    mod_id: self.core.owner.id.clone(),
                });
                log::info!(
                    target: AUTOMATION_LOG_TARGET,
                    "[{}] Unloaded Lua automation {}",
                    self.core.owner.name,
                    env.chunk_name()
                );
                Ok(())
            }
            Err(err) => {
                let error = err.to_script_error();
                log::error!(
                    target: AUTOMATION_LOG_TARGET,
                    "[{}] {} failed: {}\n{}",
                    self.core.owner.name,
                    Hook::OnUnload,
                    error.message,
                    error.trace_or_empty()
                );
                self.core
                    .fail(&mut env, LifecycleEvent::UnloadFailed, Hook::OnUnload, error);
                Err(err)
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.core.state()
    }

    /// Owning mod.
    #[must_use]
    pub fn owner(&self) -> &ModDescriptor {
        &self.core.owner
    }

    /// The tick scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    /// Read a global from the script namespace.
    ///
    /// Waits for an in-flight tick. Fails once the interpreter is released.
    pub fn global<T: FromLua>(&self, name: &str) -> Result<T, ScriptError> {
        self.core.lock_env().global(name)
    }
}

impl Drop for Automation {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}
