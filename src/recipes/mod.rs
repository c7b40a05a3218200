//! Built-in recipes.
//!
//! A formula says *what* to fetch; a [`Recipe`] says how to build it: which
//! host facts to probe, which variables to add to the build environment, and
//! which install steps exist under which conditions.

pub mod git;

use crate::env::{BuildEnv, EnvBuilder};
use crate::formula::{Formula, FormulaError};
use crate::host::{HostSnapshot, ProbeSet};
use crate::layout::Layout;
use crate::plan::Candidate;
use crate::verify::SmokeTest;

pub use git::GitRecipe;

/// Everything a recipe may consult when declaring its steps.
pub struct StepContext<'a> {
    pub formula: &'a Formula,
    pub env: &'a BuildEnv,
    pub snapshot: &'a HostSnapshot,
    pub layout: &'a Layout,
}

pub trait Recipe {
    fn formula(&self) -> &Formula;

    /// Host facts beyond the basics that [`HostSnapshot::capture`] should record.
    fn probes(&self) -> ProbeSet;

    /// Add recipe variables and feature switches.
    fn environment(&self, env: &mut EnvBuilder, snapshot: &HostSnapshot);

    /// Every step this recipe may run, in declared order.
    fn candidates(&self, ctx: &StepContext<'_>) -> Vec<Candidate>;

    fn smoke_test(&self) -> SmokeTest;
}

/// Names accepted by [`lookup`].
pub const NAMES: &[&str] = &[git::NAME];

/// Find a built-in recipe by formula name or alias.
///
/// `formula` replaces the bundled descriptor (a mirror or pinned release).
pub fn lookup(
    name: &str,
    formula: Option<Formula>,
) -> Option<Result<Box<dyn Recipe>, FormulaError>> {
    match name {
        git::NAME | "git" => Some(match formula {
            Some(f) => Ok(Box::new(GitRecipe::with_formula(f)) as Box<dyn Recipe>),
            None => GitRecipe::new().map(|r| Box::new(r) as Box<dyn Recipe>),
        }),
        _ => None,
    }
}
