//! Execution context for a plan run.

use std::path::PathBuf;

/// Where the source tree lives and how loudly to run.
#[derive(Debug, Clone)]
pub struct Context {
    /// Root of the extracted main source
    pub source_dir: PathBuf,
    /// If true, log actions without executing them
    pub dry_run: bool,
    /// If true, echo commands as they execute
    pub verbose: bool,
}

impl Context {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            dry_run: false,
            verbose: false,
        }
    }

    /// Set dry run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set verbose mode.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
