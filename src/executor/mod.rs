//! Plan executor - runs install steps in order under the build environment.
//!
//! Steps run strictly one after another. Each resolves its working directory
//! first (staging a resource on demand), then applies its actions in order.
//! A failing required step stops the run; a failing best-effort step is
//! logged and recorded, and the run moves on.

mod actions;
mod context;
mod error;
mod util;

pub use actions::copy_tree;
pub use context::Context;
pub use error::{ActionError, StepFailure};
pub use util::{command_line, shell_quote};

use std::path::PathBuf;

use crate::core::output;
use crate::env::BuildEnv;
use crate::formula::Formula;
use crate::plan::{Plan, Step, WorkDir};
use crate::stage::Stager;

/// A best-effort step that failed without stopping the install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepWarning {
    pub step: String,
    pub message: String,
}

/// What an execution did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub completed: Vec<String>,
    pub warnings: Vec<StepWarning>,
}

/// Runs a [`Plan`].
pub struct Executor {
    ctx: Context,
}

impl Executor {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Execute every step of `plan`.
    pub fn execute(
        &self,
        plan: &Plan,
        env: &BuildEnv,
        stager: &mut Stager,
        formula: &Formula,
    ) -> Result<Report, StepFailure> {
        let mut report = Report::default();
        let total = plan.steps.len();

        for (i, step) in plan.steps.iter().enumerate() {
            output::step(i + 1, total, &step.id);

            match self.run_step(step, env, stager, formula) {
                Ok(()) => report.completed.push(step.id.clone()),
                Err(cause) if step.required => {
                    return Err(StepFailure {
                        step: step.id.clone(),
                        cause,
                        completed: report.completed,
                    });
                }
                Err(cause) => {
                    output::warning(&format!("{} failed (continuing): {}", step.id, cause));
                    report.warnings.push(StepWarning {
                        step: step.id.clone(),
                        message: cause.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    fn run_step(
        &self,
        step: &Step,
        env: &BuildEnv,
        stager: &mut Stager,
        formula: &Formula,
    ) -> Result<(), ActionError> {
        let cwd = self.workdir(&step.workdir, stager, formula)?;
        for action in &step.actions {
            actions::apply(&self.ctx, &cwd, env, action)?;
        }
        Ok(())
    }

    fn workdir(
        &self,
        workdir: &WorkDir,
        stager: &mut Stager,
        formula: &Formula,
    ) -> Result<PathBuf, ActionError> {
        match workdir {
            WorkDir::Source(rel) => {
                let dir = if rel.as_os_str().is_empty() {
                    self.ctx.source_dir.clone()
                } else {
                    self.ctx.source_dir.join(rel)
                };
                if !self.ctx.dry_run && !dir.is_dir() {
                    return Err(ActionError::Missing(dir));
                }
                Ok(dir)
            }
            WorkDir::Resource(name) => {
                let resource = formula
                    .resource(name)
                    .ok_or_else(|| ActionError::Missing(stager.stage_dir(name)))?;
                if self.ctx.dry_run {
                    return Ok(stager.stage_dir(name));
                }
                Ok(stager.stage(resource)?)
            }
        }
    }
}
