//! Executor error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::stage::StageError;

/// A single action could not be carried out.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("command failed: {cmd} (exit code: {code:?})\n{output}")]
    CommandFailed {
        cmd: String,
        code: Option<i32>,
        output: String,
    },

    #[error("cannot run {cmd}: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("invalid pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error(transparent)]
    Stage(#[from] StageError),
}

impl ActionError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// A required step failed; the install stopped here.
///
/// Steps listed in `completed` already wrote into the keg and were not
/// rolled back.
#[derive(Error, Debug)]
#[error("step '{step}' failed: {cause}")]
pub struct StepFailure {
    pub step: String,
    #[source]
    pub cause: ActionError,
    pub completed: Vec<String>,
}
