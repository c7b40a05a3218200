//! Install orchestration.
//!
//! ```text
//! snapshot → compose env → plan → prefetch + verify every archive
//!          → extract source → lock keg → execute steps → receipt → [verify]
//! ```
//!
//! Everything that can fail without touching the keg (planning, downloads,
//! checksums, source extraction) happens before the lock is taken and before
//! the first step runs.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::core::config::Config;
use crate::core::lock::acquire_keg_lock;
use crate::core::output;
use crate::env::{BuildEnv, compose};
use crate::error::{Error, Result};
use crate::executor::{Context, Executor, Report};
use crate::formula::Resource;
use crate::host::{HostSnapshot, SystemProbe};
use crate::layout::Layout;
use crate::plan::{Plan, plan};
use crate::receipt::{self, Receipt, SkippedStep};
use crate::recipes::{Recipe, StepContext};
use crate::stage::{Fetcher, Stager};
use crate::verify::{VerificationFailure, VerifyReport, verify};

/// Version directory used for `--head` builds.
pub const HEAD_VERSION: &str = "HEAD";

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Build from the head repository instead of the release archive
    pub head: bool,
    /// Run the smoke test after installing
    pub test: bool,
    /// Print the plan and actions without fetching or executing
    pub dry_run: bool,
    /// Keep the build tree after the run
    pub keep_build: bool,
    pub verbose: bool,
}

/// Composed environment, target layout and step plan for one host.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub env: BuildEnv,
    pub layout: Layout,
    pub plan: Plan,
}

/// Everything that depends only on the recipe, the snapshot and the cellar.
pub fn prepare(
    recipe: &dyn Recipe,
    snapshot: &HostSnapshot,
    cellar: &Path,
    head: bool,
) -> Result<Prepared> {
    let formula = recipe.formula();
    let env = compose(formula, recipe, snapshot);
    let version = if head { HEAD_VERSION } else { formula.version() };
    let layout = Layout::new(cellar, formula.name(), version);

    let ctx = StepContext {
        formula,
        env: &env,
        snapshot,
        layout: &layout,
    };
    let plan = plan(formula, recipe.candidates(&ctx), &env, snapshot)?;

    Ok(Prepared { env, layout, plan })
}

/// Probe the live host for `recipe`, honoring the configured job count.
pub fn host_snapshot(recipe: &dyn Recipe, config: &Config) -> HostSnapshot {
    let probe = SystemProbe::new(&config.opt);
    let snapshot = HostSnapshot::capture(&probe, recipe.formula(), &recipe.probes());
    match config.jobs {
        Some(jobs) => snapshot.with_cpu_count(jobs),
        None => snapshot,
    }
}

/// Result of an install run.
#[derive(Debug)]
pub struct InstallOutcome {
    pub layout: Layout,
    pub plan: Plan,
    pub report: Report,
    /// None for dry runs.
    pub receipt: Option<Receipt>,
    /// Present when the smoke test was requested.
    pub verification: Option<std::result::Result<VerifyReport, VerificationFailure>>,
}

/// Per-run build tree, removed on drop unless kept.
struct BuildDir {
    path: PathBuf,
    keep: bool,
}

impl BuildDir {
    fn create(parent: &Path, name: &str, version: &str, keep: bool) -> Result<Self> {
        let path = parent.join(format!("kegforge-{}-{}-{}", name, version, std::process::id()));
        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
        }
        std::fs::create_dir_all(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, keep })
    }
}

impl Drop for BuildDir {
    fn drop(&mut self) {
        if self.keep {
            output::detail(&format!("build tree kept at {}", self.path.display()));
        } else {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// Drives one install of one recipe.
pub struct Installer<'a> {
    recipe: &'a dyn Recipe,
    config: &'a Config,
    fetcher: Box<dyn Fetcher>,
    options: InstallOptions,
}

impl<'a> Installer<'a> {
    pub fn new(recipe: &'a dyn Recipe, config: &'a Config, fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            recipe,
            config,
            fetcher,
            options: InstallOptions::default(),
        }
    }

    pub fn options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn install(self, snapshot: &HostSnapshot) -> Result<InstallOutcome> {
        let Installer {
            recipe,
            config,
            fetcher,
            options,
        } = self;
        let formula = recipe.formula();

        let head_url = match (options.head, formula.head()) {
            (false, _) => None,
            (true, Some(url)) => Some(url.to_string()),
            (true, None) => return Err(Error::NoHead(formula.name().to_string())),
        };

        let Prepared { env, layout, plan } =
            prepare(recipe, snapshot, &config.cellar, options.head)?;
        output::action(&format!(
            "Installing {} {}",
            formula.name(),
            if options.head { HEAD_VERSION } else { formula.version() }
        ));
        for skipped in &plan.skipped {
            output::skip(&format!("skipping {} ({})", skipped.id, skipped.reason));
        }

        if !options.dry_run && layout.receipt().exists() {
            return Err(already_installed(formula.name(), &layout));
        }

        let version_dir = if options.head { HEAD_VERSION } else { formula.version() };
        let build = BuildDir::create(
            &config.build_dir,
            formula.name(),
            version_dir,
            options.keep_build,
        )?;
        let mut stager = Stager::new(fetcher, &config.cache, &build.path);

        if options.dry_run {
            let executor = Executor::new(
                Context::new(build.path.join("source"))
                    .dry_run(true)
                    .verbose(options.verbose),
            );
            let report = executor.execute(&plan, &env, &mut stager, formula)?;
            return Ok(InstallOutcome {
                layout,
                plan,
                report,
                receipt: None,
                verification: None,
            });
        }

        // Fetch and verify every archive the run will touch before any step.
        output::action("Fetching");
        let mut wanted: Vec<&Resource> = Vec::new();
        if head_url.is_none() {
            wanted.push(formula.source());
        }
        for name in plan.resources() {
            if let Some(resource) = formula.resource(name) {
                wanted.push(resource);
            }
        }
        stager.prefetch(wanted)?;

        let source_dir = match &head_url {
            Some(url) => clone_head(url, &build.path.join("source"))?,
            None => stager.stage(formula.source())?,
        };

        let _lock = acquire_keg_lock(&config.cellar, formula.name())?;
        // Another run may have finished this keg while we were fetching.
        if layout.receipt().exists() {
            return Err(already_installed(formula.name(), &layout));
        }
        if layout.prefix.exists() {
            output::warning(&format!(
                "removing incomplete keg at {}",
                layout.prefix.display()
            ));
            std::fs::remove_dir_all(&layout.prefix).map_err(|source| Error::Io {
                path: layout.prefix.clone(),
                source,
            })?;
        }

        output::action(&format!("Running {} steps", plan.steps.len()));
        let executor = Executor::new(Context::new(source_dir).verbose(options.verbose));
        let report = executor.execute(&plan, &env, &mut stager, formula)?;

        let files = layout.files().map_err(|source| Error::Io {
            path: layout.prefix.clone(),
            source,
        })?;
        let receipt = Receipt {
            name: formula.name().to_string(),
            version: version_dir.to_string(),
            source: head_url
                .clone()
                .unwrap_or_else(|| formula.source().url().to_string()),
            head: options.head,
            os: snapshot.os.to_string(),
            os_version: snapshot.os_version.as_ref().map(|v| v.to_string()),
            features: env.features().clone(),
            steps: report.completed.clone(),
            skipped: plan
                .skipped
                .iter()
                .map(|s| SkippedStep {
                    id: s.id.clone(),
                    reason: s.reason.clone(),
                })
                .collect(),
            warnings: report
                .warnings
                .iter()
                .map(|w| format!("{}: {}", w.step, w.message))
                .collect(),
            files,
            installed_at: receipt::now(),
        };
        receipt.write(&layout)?;
        output::success(&format!(
            "{} {} installed to {} ({} files)",
            formula.name(),
            version_dir,
            layout.prefix.display(),
            receipt.files.len()
        ));

        let verification = if options.test {
            output::action("Testing");
            Some(verify(&layout, &recipe.smoke_test()))
        } else {
            None
        };

        Ok(InstallOutcome {
            layout,
            plan,
            report,
            receipt: Some(receipt),
            verification,
        })
    }
}

/// Run the smoke test against the newest installed keg of `recipe`.
pub fn test_installed(recipe: &dyn Recipe, cellar: &Path) -> Result<VerifyReport> {
    let name = recipe.formula().name();
    let (layout, receipt) = receipt::installed(cellar, name)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotInstalled(name.to_string()))?;
    output::action(&format!("Testing {} {}", receipt.name, receipt.version));
    Ok(verify(&layout, &recipe.smoke_test())?)
}

/// Download and verify the source and every resource into the cache.
pub fn fetch_all(
    recipe: &dyn Recipe,
    config: &Config,
    fetcher: Box<dyn Fetcher>,
) -> Result<Vec<PathBuf>> {
    let formula = recipe.formula();
    let scratch = BuildDir::create(&config.build_dir, formula.name(), "fetch", false)?;
    let mut stager = Stager::new(fetcher, &config.cache, &scratch.path);

    let mut paths = Vec::new();
    for resource in std::iter::once(formula.source()).chain(formula.resources()) {
        paths.push(stager.fetch(resource)?);
    }
    Ok(paths)
}

fn already_installed(name: &str, layout: &Layout) -> Error {
    Error::AlreadyInstalled {
        name: name.to_string(),
        version: layout
            .prefix
            .file_name()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: layout.prefix.clone(),
    }
}

fn clone_head(url: &str, dest: &Path) -> Result<PathBuf> {
    output::sub_action(&format!("clone {}", url));
    let out = Command::new("git")
        .arg("clone")
        .arg(url)
        .arg(dest)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::Clone {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    if !out.status.success() {
        return Err(Error::Clone {
            url: url.to_string(),
            reason: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(dest.to_path_buf())
}
