//! Top-level error type.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::lock::LockError;
use crate::executor::StepFailure;
use crate::formula::FormulaError;
use crate::plan::PlanError;
use crate::receipt::ReceiptError;
use crate::stage::StageError;
use crate::verify::VerificationFailure;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Fetch or integrity failure; always raised before any step runs.
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// A required step failed. Earlier steps may have written into the keg.
    #[error("{failure}{}", completed_note(&failure.completed))]
    Step {
        #[source]
        failure: Box<StepFailure>,
    },

    #[error(transparent)]
    Verification(#[from] VerificationFailure),

    #[error(transparent)]
    Receipt(#[from] ReceiptError),

    #[error("{name} {version} is already installed at {}", path.display())]
    AlreadyInstalled {
        name: String,
        version: String,
        path: PathBuf,
    },

    #[error("{0} has no head repository")]
    NoHead(String),

    #[error("cannot clone {url}: {reason}")]
    Clone { url: String, reason: String },

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn completed_note(completed: &[String]) -> String {
    if completed.is_empty() {
        String::new()
    } else {
        format!("\n(partial install; completed steps: {})", completed.join(", "))
    }
}

impl From<StepFailure> for Error {
    fn from(failure: StepFailure) -> Self {
        Self::Step {
            failure: Box::new(failure),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
