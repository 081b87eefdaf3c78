//! Automation lifecycle state machine.
//!
//! ```text
//!            Loaded              UnloadSucceeded
//! Loading ──────────▶ Running ──────────────────▶ Unloaded
//!    │                   │
//!    │ LoadFailed        │ TickFailed / UnloadFailed
//!    ▼                   ▼
//!  Failed ◀──────────────┘
//! ```
//!
//! `Failed` and `Unloaded` are terminal: every event leaves them unchanged.

use std::fmt;

/// Where an automation is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// Bootstrapping libraries and the main script.
    #[default]
    Loading,
    /// Loaded; the scheduler may tick it.
    Running,
    /// A script error ended the automation. No hook runs again.
    Failed,
    /// Unloaded cleanly; the interpreter has been released.
    Unloaded,
}

/// Something that happened to an automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Bootstrap and `OnLoad` succeeded.
    Loaded,
    /// A bootstrap step or `OnLoad` failed.
    LoadFailed,
    /// `OnTick` raised a script error.
    TickFailed,
    /// `OnUnload` returned normally.
    UnloadSucceeded,
    /// `OnUnload` raised a script error.
    UnloadFailed,
}

impl LifecycleState {
    /// The state after `event`.
    ///
    /// Events that do not apply to the current state leave it unchanged.
    #[must_use]
    pub fn on(self, event: LifecycleEvent) -> Self {
        use LifecycleEvent as E;
        match (self, event) {
            (Self::Loading, E::Loaded) => Self::Running,
            (Self::Loading, E::LoadFailed)
            | (Self::Running, E::TickFailed | E::UnloadFailed) => Self::Failed,
            (Self::Running, E::UnloadSucceeded) => Self::Unloaded,
            (state, _) => state,
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Unloaded)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Unloaded => "unloaded",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleEvent as E;
    use LifecycleState as S;

    const EVENTS: [LifecycleEvent; 5] = [
        E::Loaded,
        E::LoadFailed,
        E::TickFailed,
        E::UnloadSucceeded,
        E::UnloadFailed,
    ];

    #[test]
    fn test_initial_state_is_loading() {
        assert_eq!(S::default(), S::Loading);
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(S::Loading.on(E::Loaded), S::Running);
        assert_eq!(S::Loading.on(E::LoadFailed), S::Failed);
        assert_eq!(S::Running.on(E::TickFailed), S::Failed);
        assert_eq!(S::Running.on(E::UnloadSucceeded), S::Unloaded);
        assert_eq!(S::Running.on(E::UnloadFailed), S::Failed);
    }

    #[test]
    fn test_inapplicable_events_ignored() {
        assert_eq!(S::Loading.on(E::TickFailed), S::Loading);
        assert_eq!(S::Running.on(E::Loaded), S::Running);
    }

    #[test]
    fn test_terminal_states_absorb_everything() {
        for state in [S::Failed, S::Unloaded] {
            assert!(state.is_terminal());
            for event in EVENTS {
                assert_eq!(state.on(event), state);
            }
        }
        assert!(!S::Loading.is_terminal());
        assert!(!S::Running.is_terminal());
    }
}
