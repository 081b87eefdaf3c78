//! Error types for automation loading, lifecycle hooks and marshalling.
//!
//! Every error that originates inside the interpreter is carried as a
//! [`ScriptError`], which keeps the human-readable message and the Lua stack
//! traceback apart so callers can log them separately.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::lua::environment::Hook;

/// Marker Lua puts between an error message and its traceback.
const TRACEBACK_MARKER: &str = "\nstack traceback:";

/// An error raised by the interpreter: message plus call-stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// Human-readable error message (`file:line: message` for runtime errors).
    pub message: String,
    /// Lua stack traceback, when the interpreter produced one.
    pub trace: Option<String>,
}

impl ScriptError {
    /// Build an error with a message and no trace.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    /// Split a raw interpreter message into message and traceback.
    fn from_raw(raw: &str) -> Self {
        match raw.split_once(TRACEBACK_MARKER) {
            Some((message, rest)) => Self {
                message: message.to_string(),
                trace: Some(format!("stack traceback:{rest}")),
            },
            None => Self::new(raw),
        }
    }

    /// The traceback, or an empty string when there is none.
    #[must_use]
    pub fn trace_or_empty(&self) -> &str {
        self.trace.as_deref().unwrap_or("")
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScriptError {}

impl From<mlua::Error> for ScriptError {
    fn from(err: mlua::Error) -> Self {
        match err {
            mlua::Error::CallbackError { traceback, cause } => Self {
                message: cause.to_string(),
                trace: Some(traceback),
            },
            mlua::Error::RuntimeError(raw) => Self::from_raw(&raw),
            mlua::Error::SyntaxError { message, .. } => Self::new(message),
            other => Self::from_raw(&other.to_string()),
        }
    }
}

/// Failure while bootstrapping an automation.
///
/// The automation never reaches `Running` when this is returned.
#[derive(Debug, Error)]
pub enum ScriptLoadError {
    /// A script file or library directory could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The interpreter could not be prepared (bridge or global registration).
    #[error("failed to set up interpreter: {0}")]
    Setup(#[source] ScriptError),

    /// A library file or the main script failed to compile or run.
    #[error("error in {chunk}: {error}")]
    Script {
        /// Chunk name, relative to the mods root.
        chunk: String,
        /// Interpreter error.
        #[source]
        error: ScriptError,
    },

    /// A hook name is bound to something that is not a function.
    #[error("global {name} must be a function, found {found}")]
    InvalidHook {
        /// Hook name.
        name: &'static str,
        /// Lua type name of the value found.
        found: &'static str,
    },

    /// `OnLoad` was missing or raised an error.
    #[error(transparent)]
    OnLoad(#[from] LifecycleError),
}

impl ScriptLoadError {
    /// The interpreter error behind this failure, if there is one.
    #[must_use]
    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            Self::Setup(error) | Self::Script { error, .. } => Some(error),
            Self::OnLoad(LifecycleError::Script { error, .. }) => Some(error),
            _ => None,
        }
    }
}

/// Failure while invoking a lifecycle hook.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The script does not define the hook.
    #[error("{0} is not defined")]
    MissingHook(Hook),

    /// The hook raised a script error.
    #[error("{hook} failed: {error}")]
    Script {
        /// Hook that failed.
        hook: Hook,
        /// Interpreter error.
        #[source]
        error: ScriptError,
    },

    /// The environment has already been closed or abandoned.
    #[error("script environment has been released")]
    Released,
}

impl LifecycleError {
    /// Message and trace suitable for reporting, whatever the variant.
    #[must_use]
    pub fn to_script_error(&self) -> ScriptError {
        match self {
            Self::Script { error, .. } => error.clone(),
            other => ScriptError::new(other.to_string()),
        }
    }
}

/// Invalid argument to a bridge conversion.
///
/// Raised back into the calling script, never silently truncated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshallingError {
    /// Byte array length not accepted by the conversion.
    #[error("{function}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Bridge function name.
        function: &'static str,
        /// Accepted lengths, human-readable.
        expected: &'static str,
        /// Length received.
        actual: usize,
    },

    /// Output size outside `1..=4`.
    #[error("inttobytes: size must be between 1 and 4, got {0}")]
    InvalidSize(i64),

    /// Array element that does not fit in a byte.
    #[error("byte at index {index} is out of range: {value}")]
    ByteOutOfRange {
        /// 1-based index in the Lua sequence.
        index: usize,
        /// Offending value.
        value: i64,
    },

    /// Array element that is not an integer (fractional number, nil, string...).
    #[error("byte at index {index} must be an integer, got {found}")]
    NotAByte {
        /// 1-based index in the Lua sequence.
        index: usize,
        /// The value found, or its Lua type.
        found: String,
    },

    /// Byte table with holes or non-sequence keys.
    #[error("byte array must be a sequence: length {length} but {entries} entries")]
    NotASequence {
        /// Border reported by the table.
        length: usize,
        /// Number of keys actually present.
        entries: usize,
    },

    /// Numeric argument that does not hold an exact integer.
    #[error("{function}: {argument} must be an integer, got {found}")]
    NotAnInteger {
        /// Bridge function name.
        function: &'static str,
        /// Argument name.
        argument: &'static str,
        /// The value found, or its Lua type.
        found: String,
    },
}
