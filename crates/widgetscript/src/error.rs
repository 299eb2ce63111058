//! Error taxonomy shared by every stage of context construction.
//!
//! All errors are raised synchronously to the immediate caller. None of them
//! are retried: external tools are assumed to be deterministic for identical
//! inputs, so a failed compilation only succeeds again after the inputs change.

use std::{fmt, io};

use thiserror::Error;

/// External tool stage that produced an [`WidgetError::ExternalToolFailure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolStage {
    /// Python -> JavaScript transpilation
    Transpile,
    /// Module bundling into one flat script
    Bundle,
    /// Optional minification of the bundled script
    Minify,
}

impl fmt::Display for ToolStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transpile => write!(f, "transpile"),
            Self::Bundle => write!(f, "bundle"),
            Self::Minify => write!(f, "minify"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WidgetError {
    /// A marker call has zero or more than three arguments
    #[error("`{marker}` should have 1, 2 or 3 arguments, found {found}")]
    InvalidMarkerArity { marker: &'static str, found: usize },

    /// The first marker argument is not a call expression
    #[error("first argument to `{marker}` should be a function call, found `{found}`")]
    InvalidMarkerTarget { marker: &'static str, found: String },

    /// A flat unit's function declares parameters
    #[error("flat function `{name}` can't have parameters")]
    InvalidFlatUnitSignature { name: String },

    /// A function unit does not contain exactly one top-level function definition
    #[error("expected exactly one top-level function definition, found {found} statement(s)")]
    InvalidFunctionUnit { found: usize },

    /// Source text of a unit failed to parse
    #[error("invalid Python source: {message}")]
    InvalidSource { message: String },

    /// An external tool could not be spawned, exited non-zero, or produced no output
    #[error("{stage} stage failed ({status}): {stderr}")]
    ExternalToolFailure {
        stage: ToolStage,
        status: String,
        stderr: String,
    },

    /// A precompiled context was injected a second time
    #[error("precompiled context {id} was already injected")]
    AlreadyInjected { id: String },

    /// No host was supplied to reach the generated wrapper functions
    #[error("no host context available to install Python wrapper functions")]
    MissingHostContext,

    /// An encoded argument could not be decoded
    #[error("invalid encoded argument: {0}")]
    Codec(String),

    /// The host environment rejected a script or registration
    #[error("host error: {0}")]
    Host(String),

    /// Configuration could not be read or parsed
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WidgetError>;

impl WidgetError {
    pub(crate) fn invalid_source(error: impl fmt::Display) -> Self {
        Self::InvalidSource {
            message: error.to_string(),
        }
    }
}
