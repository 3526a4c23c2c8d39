// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-build :: error
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use thiserror::Error;

use crate::diagnostics::Diagnostic;

#[derive(Debug, Error)]
pub enum BuildError {
    /// No target core selected, or a core/variant reference that cannot be resolved.
    #[error("{0}")]
    Configuration(String),

    /// The executable could not be started at all.
    #[error("{program}: {source}")]
    ToolInvocation {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A structured error recovered from compiler or linker output.
    #[error("{0}")]
    Compile(Diagnostic),

    /// The tool ran and exited non-zero without a recognised diagnostic.
    #[error("Error compiling.")]
    ToolFailed { program: String, code: Option<i32> },

    #[error("Error communicating with {program} (exit code {code:?})")]
    PostCompile { program: String, code: Option<i32> },

    #[error("Couldn't create: {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid board configuration in {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn no_board() -> Self {
        BuildError::Configuration(
            "No board selected; please choose a board from the Tools > Board menu.".into(),
        )
    }

    /// The promoted diagnostic, if this failure carries one.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            BuildError::Compile(d) => Some(d),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
