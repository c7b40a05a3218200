//! Conditional step planning.
//!
//! A recipe declares every step it might run as a [`Candidate`] guarded by a
//! [`Condition`]. [`plan`] evaluates each condition once against the composed
//! environment and host snapshot and returns a concrete [`Plan`]: the steps
//! that will run, in order, and the ones that will not, with the reason.
//!
//! Ordering is fixed by declaration. Primary steps come first, augmenting
//! steps follow in the order the recipe listed them; a condition only decides
//! whether a step is present, never where it goes.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::version::OsVersion;
use crate::env::BuildEnv;
use crate::formula::Formula;
use crate::host::{HostSnapshot, Os};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("step '{step}' works in resource '{resource}', which the formula does not declare")]
    UnknownResource { step: String, resource: String },

    #[error("step id '{0}' declared twice")]
    DuplicateStep(String),
}

/// Where a step's relative paths resolve and its commands run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkDir {
    /// A directory inside the extracted source tree (`""` is the root).
    Source(PathBuf),
    /// The staged content of a formula resource.
    Resource(String),
}

impl WorkDir {
    pub fn source() -> Self {
        Self::Source(PathBuf::new())
    }

    pub fn source_subdir(rel: impl Into<PathBuf>) -> Self {
        Self::Source(rel.into())
    }

    pub fn resource(name: &str) -> Self {
        Self::Resource(name.to_string())
    }
}

impl fmt::Display for WorkDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(rel) if rel.as_os_str().is_empty() => f.write_str("<source>"),
            Self::Source(rel) => write!(f, "<source>/{}", rel.display()),
            Self::Resource(name) => write!(f, "<resource {}>", name),
        }
    }
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Which entries a [`Action::Chmod`] touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Files,
    Dirs,
}

/// One unit of work inside a step.
///
/// Relative paths resolve against the step's working directory; install
/// destinations are absolute paths inside the keg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run(Invocation),
    /// Move a file or directory into `dest_dir`, optionally renaming it.
    Install {
        src: PathBuf,
        dest_dir: PathBuf,
        rename: Option<String>,
    },
    /// Move everything matching a relative glob into `dest_dir`.
    InstallGlob { pattern: String, dest_dir: PathBuf },
    /// Copy an already installed file into `dest_dir`.
    Copy { src: PathBuf, dest_dir: PathBuf },
    /// Set `mode` on entries matching any of the absolute `patterns`.
    Chmod {
        patterns: Vec<String>,
        mode: u32,
        kind: EntryKind,
    },
    Write { path: PathBuf, contents: String },
    /// Remove a file that must exist.
    Remove { path: PathBuf },
    /// Remove a tree if present.
    RemoveTree { path: PathBuf },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(inv) => write!(f, "run {}", inv),
            Self::Install {
                src,
                dest_dir,
                rename: Some(name),
            } => write!(f, "install {} => {}", src.display(), dest_dir.join(name).display()),
            Self::Install { src, dest_dir, .. } => {
                write!(f, "install {} -> {}", src.display(), dest_dir.display())
            }
            Self::InstallGlob { pattern, dest_dir } => {
                write!(f, "install {} -> {}", pattern, dest_dir.display())
            }
            Self::Copy { src, dest_dir } => {
                write!(f, "copy {} -> {}", src.display(), dest_dir.display())
            }
            Self::Chmod {
                patterns,
                mode,
                kind,
            } => {
                let what = match kind {
                    EntryKind::Files => "files",
                    EntryKind::Dirs => "dirs",
                };
                write!(f, "chmod {:04o} {} {}", mode, what, patterns.join(" "))
            }
            Self::Write { path, .. } => write!(f, "write {}", path.display()),
            Self::Remove { path } => write!(f, "rm {}", path.display()),
            Self::RemoveTree { path } => write!(f, "rm -rf {}", path.display()),
        }
    }
}

/// A named, ordered list of actions sharing one working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub id: String,
    pub workdir: WorkDir,
    pub actions: Vec<Action>,
    /// A failing required step aborts the install; others only warn.
    pub required: bool,
}

impl Step {
    pub fn new(id: &str, workdir: WorkDir) -> Self {
        Self {
            id: id.to_string(),
            workdir,
            actions: Vec::new(),
            required: true,
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn run<I, S>(mut self, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.push(Action::Run(Invocation::new(program, args)));
        self
    }

    pub fn install(mut self, src: impl Into<PathBuf>, dest_dir: &Path) -> Self {
        self.actions.push(Action::Install {
            src: src.into(),
            dest_dir: dest_dir.to_path_buf(),
            rename: None,
        });
        self
    }

    pub fn install_as(mut self, src: impl Into<PathBuf>, dest_dir: &Path, name: &str) -> Self {
        self.actions.push(Action::Install {
            src: src.into(),
            dest_dir: dest_dir.to_path_buf(),
            rename: Some(name.to_string()),
        });
        self
    }

    pub fn install_glob(mut self, pattern: &str, dest_dir: &Path) -> Self {
        self.actions.push(Action::InstallGlob {
            pattern: pattern.to_string(),
            dest_dir: dest_dir.to_path_buf(),
        });
        self
    }

    pub fn copy(mut self, src: &Path, dest_dir: &Path) -> Self {
        self.actions.push(Action::Copy {
            src: src.to_path_buf(),
            dest_dir: dest_dir.to_path_buf(),
        });
        self
    }

    /// `globs` are relative to `root`, whose own path is escaped.
    pub fn chmod(mut self, root: &Path, globs: &[&str], mode: u32, kind: EntryKind) -> Self {
        let base = glob::Pattern::escape(&root.display().to_string());
        self.actions.push(Action::Chmod {
            patterns: globs.iter().map(|g| format!("{}/{}", base, g)).collect(),
            mode,
            kind,
        });
        self
    }

    pub fn write(mut self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.actions.push(Action::Write {
            path: path.into(),
            contents: contents.to_string(),
        });
        self
    }

    pub fn remove(mut self, path: &Path) -> Self {
        self.actions.push(Action::Remove {
            path: path.to_path_buf(),
        });
        self
    }

    pub fn remove_tree(mut self, path: &Path) -> Self {
        self.actions.push(Action::RemoveTree {
            path: path.to_path_buf(),
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The main build; always ordered first.
    Primary,
    /// Extra artifacts layered on top.
    Augment,
}

/// Host predicate guarding a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Always,
    Os(Os),
    /// Given OS at or above a version. An unknown host version fails.
    OsAtLeast(Os, OsVersion),
    Feature(String),
    Dependency(String),
    Not(Box<Condition>),
    All(Vec<Condition>),
}

impl Condition {
    pub fn feature(name: &str) -> Self {
        Self::Feature(name.to_string())
    }

    pub fn dependency(name: &str) -> Self {
        Self::Dependency(name.to_string())
    }

    pub fn not(cond: Condition) -> Self {
        Self::Not(Box::new(cond))
    }

    pub fn holds(&self, env: &BuildEnv, snapshot: &HostSnapshot) -> bool {
        match self {
            Self::Always => true,
            Self::Os(os) => snapshot.os == *os,
            Self::OsAtLeast(os, min) => {
                snapshot.os == *os && snapshot.os_version.as_ref().is_some_and(|v| v >= min)
            }
            Self::Feature(name) => env.feature(name),
            Self::Dependency(name) => snapshot.dependency(name).is_some(),
            Self::Not(inner) => !inner.holds(env, snapshot),
            Self::All(all) => all.iter().all(|c| c.holds(env, snapshot)),
        }
    }

    /// Human readable requirement, used as the skip reason.
    pub fn describe(&self) -> String {
        match self {
            Self::Always => "always".to_string(),
            Self::Os(os) => format!("requires {}", os),
            Self::OsAtLeast(os, v) => format!("requires {} >= {}", os, v),
            Self::Feature(name) => format!("requires feature '{}'", name),
            Self::Dependency(name) => format!("requires dependency '{}'", name),
            Self::Not(inner) => format!("not ({})", inner.describe()),
            Self::All(all) => all
                .iter()
                .map(Condition::describe)
                .collect::<Vec<_>>()
                .join(" and "),
        }
    }
}

/// A step the recipe may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub step: Step,
    pub role: Role,
    pub condition: Condition,
}

impl Candidate {
    pub fn primary(step: Step) -> Self {
        Self {
            step,
            role: Role::Primary,
            condition: Condition::Always,
        }
    }

    pub fn augment(step: Step) -> Self {
        Self {
            step,
            role: Role::Augment,
            condition: Condition::Always,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }
}

/// A step left out of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub id: String,
    pub reason: String,
}

/// Concrete, ordered install steps for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<Step>,
    pub skipped: Vec<Skipped>,
}

impl Plan {
    pub fn ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Resource names the planned steps work in, in first-use order.
    pub fn resources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .filter_map(|s| match &s.workdir {
                WorkDir::Resource(name) => Some(name.as_str()),
                WorkDir::Source(_) => None,
            })
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

/// Evaluate every candidate once and order the survivors.
pub fn plan(
    formula: &Formula,
    candidates: Vec<Candidate>,
    env: &BuildEnv,
    snapshot: &HostSnapshot,
) -> Result<Plan, PlanError> {
    let mut ids = HashSet::new();
    for c in &candidates {
        if !ids.insert(c.step.id.clone()) {
            return Err(PlanError::DuplicateStep(c.step.id.clone()));
        }
        if let WorkDir::Resource(name) = &c.step.workdir
            && formula.resource(name).is_none()
        {
            return Err(PlanError::UnknownResource {
                step: c.step.id.clone(),
                resource: name.clone(),
            });
        }
    }

    let (primary, augment): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| c.role == Role::Primary);

    let mut plan = Plan::default();
    for c in primary.into_iter().chain(augment) {
        if c.condition.holds(env, snapshot) {
            plan.steps.push(c.step);
        } else {
            plan.skipped.push(Skipped {
                id: c.step.id,
                reason: c.condition.describe(),
            });
        }
    }
    Ok(plan)
}
