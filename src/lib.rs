//! Formula-driven source package builder.
//!
//! A formula (static TOML) names a source archive, its checksum, direct
//! dependencies and auxiliary resources. A recipe turns it into an install:
//!
//! 1. probe the host once into a [`HostSnapshot`];
//! 2. [`compose`] the build environment;
//! 3. [`plan`] the install steps whose conditions hold;
//! 4. fetch and verify every archive the plan needs ([`Stager`]);
//! 5. run the steps in order ([`Executor`]) into the keg
//!    `<cellar>/<name>/<version>` and write an install receipt;
//! 6. optionally [`verify`] the result with the recipe's smoke test.
//!
//! # Example formula
//!
//! ```toml
//! name = "git-curl-openssl"
//! url = "https://mirrors.edge.kernel.org/pub/software/scm/git/git-2.35.3.tar.xz"
//! sha256 = "15e9db4f9bf2ed9fff30cb62a00c5c7c0901015f5ab048cdb4e8b04ddee00fa2"
//! depends_on = ["curl", "gettext", "openssl@1.1", "pcre2"]
//!
//! [[resource]]
//! name = "man"
//! url = "https://mirrors.edge.kernel.org/pub/software/scm/git/git-manpages-2.35.3.tar.xz"
//! sha256 = "a78c7ee00731cfa903fdf17e3af472c6413c1e014cedd771f6d29932def1e324"
//! ```

pub mod core;
pub mod env;
pub mod error;
pub mod executor;
pub mod formula;
pub mod host;
pub mod install;
pub mod layout;
pub mod plan;
pub mod receipt;
pub mod recipes;
pub mod stage;
pub mod verify;

pub use crate::core::config::{Config, Overrides};
pub use crate::core::output;
pub use env::{BuildEnv, EnvBuilder, compose};
pub use error::{Error, Result};
pub use executor::{Context, Executor, Report, StepFailure};
pub use formula::{Formula, Resource};
pub use host::{HostProbe, HostSnapshot, Os, ProbeSet, SystemProbe};
pub use install::{InstallOptions, InstallOutcome, Installer, prepare};
pub use layout::Layout;
pub use plan::{Candidate, Condition, Plan, Step, WorkDir, plan};
pub use receipt::Receipt;
pub use recipes::{Recipe, lookup};
pub use stage::{Fetcher, HttpFetcher, IntegrityError, Stager};
pub use verify::{SmokeTest, VerificationFailure, verify};
