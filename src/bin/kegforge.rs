//! kegforge CLI - build and install formulae from source
//!
//! Usage:
//!   kegforge install <formula>     Fetch, build and install into the cellar
//!   kegforge test <formula>        Run the smoke test against the installed keg
//!   kegforge plan <formula>        Show the steps an install would run on this host
//!   kegforge env <formula>         Show the composed build environment
//!   kegforge info <formula>        Show formula metadata and installed versions
//!   kegforge fetch <formula>       Download and verify every archive into the cache
//!   kegforge uninstall <formula>   Remove an installed keg

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use kegforge::executor::command_line;
use kegforge::plan::Action;
use kegforge::recipes::{self, Recipe};
use kegforge::{
    Config, Formula, HttpFetcher, InstallOptions, Installer, Layout, Overrides, install, output,
    receipt,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit status when installation succeeded but the smoke test did not.
const EXIT_VERIFICATION: u8 = 2;

#[derive(Parser)]
#[command(name = "kegforge")]
#[command(about = "Build, install and test formulae from source")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config dir>/kegforge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root for installed kegs
    #[arg(long, global = true, env = "KEGFORGE_CELLAR")]
    cellar: Option<PathBuf>,

    /// Directory of installed dependency prefixes
    #[arg(long, global = true, env = "KEGFORGE_OPT")]
    opt: Option<PathBuf>,

    /// Download cache
    #[arg(long, global = true, env = "KEGFORGE_CACHE")]
    cache: Option<PathBuf>,

    /// Parent directory for build trees
    #[arg(long, global = true, env = "KEGFORGE_BUILD_DIR")]
    build_dir: Option<PathBuf>,

    /// Parallel make jobs
    #[arg(short, long, global = true, env = "KEGFORGE_JOBS")]
    jobs: Option<usize>,

    /// HTTP timeout in seconds (clamped to 5-600)
    #[arg(long, global = true, env = "KEGFORGE_HTTP_TIMEOUT")]
    http_timeout: Option<u64>,

    /// Echo every command
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct Target {
    /// Formula name (e.g. git-curl-openssl)
    formula: String,

    /// Use this formula file instead of the bundled one
    #[arg(long = "formula-file")]
    formula_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, build and install a formula
    Install {
        #[command(flatten)]
        target: Target,

        /// Build from the head repository
        #[arg(long)]
        head: bool,

        /// Run the smoke test after installing
        #[arg(long)]
        test: bool,

        /// Show what would run without fetching or executing
        #[arg(long)]
        dry_run: bool,

        /// Keep the build tree
        #[arg(long)]
        keep_build: bool,
    },

    /// Run the smoke test against the installed keg
    Test {
        #[command(flatten)]
        target: Target,
    },

    /// Show the steps an install would run on this host
    Plan {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        head: bool,
    },

    /// Show the composed build environment
    Env {
        #[command(flatten)]
        target: Target,
    },

    /// Show formula metadata and installed versions
    Info {
        #[command(flatten)]
        target: Target,
    },

    /// Download and verify the source and all resources
    Fetch {
        #[command(flatten)]
        target: Target,
    },

    /// Remove an installed keg
    Uninstall {
        #[command(flatten)]
        target: Target,

        /// Version to remove (default: every installed version)
        #[arg(long)]
        version: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            output::error(&format!("{:#}", e));
            match e.downcast_ref::<kegforge::Error>() {
                Some(kegforge::Error::Verification(_)) => ExitCode::from(EXIT_VERIFICATION),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn load_recipe(target: &Target) -> Result<Box<dyn Recipe>> {
    let formula = match &target.formula_file {
        Some(path) => Some(
            Formula::from_file(path)
                .with_context(|| format!("Failed to load formula {}", path.display()))?,
        ),
        None => None,
    };
    match recipes::lookup(&target.formula, formula) {
        Some(recipe) => Ok(recipe
            .with_context(|| format!("Bundled formula for {} is invalid", target.formula))?),
        None => bail!(
            "No recipe named '{}' (available: {})",
            target.formula,
            recipes::NAMES.join(", ")
        ),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(
        cli.config.as_deref(),
        Overrides {
            cellar: cli.cellar,
            opt: cli.opt,
            cache: cli.cache,
            build_dir: cli.build_dir,
            jobs: cli.jobs,
            http_timeout_secs: cli.http_timeout,
        },
    )
    .context("Failed to load configuration")?;
    let verbose = cli.verbose;

    match cli.command {
        Commands::Install {
            target,
            head,
            test,
            dry_run,
            keep_build,
        } => {
            let recipe = load_recipe(&target)?;
            let snapshot = install::host_snapshot(recipe.as_ref(), &config);
            let outcome = Installer::new(
                recipe.as_ref(),
                &config,
                Box::new(HttpFetcher::new(config.http_timeout)),
            )
            .options(InstallOptions {
                head,
                test,
                dry_run,
                keep_build,
                verbose,
            })
            .install(&snapshot)
            .with_context(|| format!("Failed to install {}", recipe.formula().name()))?;

            for warning in &outcome.report.warnings {
                output::warning(&format!("{}: {}", warning.step, warning.message));
            }
            match outcome.verification {
                Some(Err(failure)) => {
                    output::error(&failure.to_string());
                    output::info(&format!(
                        "{} stays installed at {}",
                        recipe.formula().name(),
                        outcome.layout.prefix.display()
                    ));
                    return Ok(ExitCode::from(EXIT_VERIFICATION));
                }
                Some(Ok(report)) => {
                    output::success(&format!("{} checks passed", report.passed.len()));
                }
                None => {}
            }
        }

        Commands::Test { target } => {
            let recipe = load_recipe(&target)?;
            let report = install::test_installed(recipe.as_ref(), &config.cellar)?;
            output::success(&format!("{} checks passed", report.passed.len()));
        }

        Commands::Plan { target, head } => {
            let recipe = load_recipe(&target)?;
            let snapshot = install::host_snapshot(recipe.as_ref(), &config);
            let prepared = install::prepare(recipe.as_ref(), &snapshot, &config.cellar, head)?;

            output::action(&format!(
                "Plan for {} into {}",
                recipe.formula().name(),
                prepared.layout.prefix.display()
            ));
            let total = prepared.plan.steps.len();
            for (i, step) in prepared.plan.steps.iter().enumerate() {
                let kind = if step.required { "" } else { " (best-effort)" };
                output::step(i + 1, total, &format!("{}{} in {}", step.id, kind, step.workdir));
                for action in &step.actions {
                    match action {
                        Action::Run(inv) => output::detail(&command_line(inv)),
                        other => output::detail(&other.to_string()),
                    }
                }
            }
            for skipped in &prepared.plan.skipped {
                output::skip(&format!("skipping {} ({})", skipped.id, skipped.reason));
            }
        }

        Commands::Env { target } => {
            let recipe = load_recipe(&target)?;
            let snapshot = install::host_snapshot(recipe.as_ref(), &config);
            let prepared = install::prepare(recipe.as_ref(), &snapshot, &config.cellar, false)?;

            output::action("Build environment");
            for (key, value) in prepared.env.vars() {
                output::pair(key, value);
            }
            output::action("Features");
            for (name, enabled) in prepared.env.features() {
                output::pair(name, if *enabled { "on" } else { "off" });
            }
        }

        Commands::Info { target } => {
            let recipe = load_recipe(&target)?;
            let formula = recipe.formula();

            output::action(&format!("{} {}", formula.name(), formula.version()));
            if let Some(desc) = formula.desc() {
                output::info(desc);
            }
            if let Some(homepage) = formula.homepage() {
                output::pair("homepage", homepage);
            }
            if let Some(license) = formula.license() {
                output::pair("license", license);
            }
            output::pair("source", formula.source().url());
            if let Some(head) = formula.head() {
                output::pair("head", head);
            }
            output::pair("depends_on", &formula.dependencies().join(", "));
            for resource in formula.resources() {
                output::pair(&format!("resource.{}", resource.name()), resource.url());
            }

            let installed = receipt::installed(&config.cellar, formula.name())?;
            if installed.is_empty() {
                output::info("not installed");
            }
            for (layout, r) in installed {
                output::info(&format!(
                    "installed {} at {} ({} files, {} steps, {} skipped)",
                    r.version,
                    layout.prefix.display(),
                    r.files.len(),
                    r.steps.len(),
                    r.skipped.len()
                ));
            }
        }

        Commands::Fetch { target } => {
            let recipe = load_recipe(&target)?;
            let paths = install::fetch_all(
                recipe.as_ref(),
                &config,
                Box::new(HttpFetcher::new(config.http_timeout)),
            )?;
            for path in paths {
                output::detail(&path.display().to_string());
            }
            output::success("all archives verified");
        }

        Commands::Uninstall { target, version } => {
            let recipe = load_recipe(&target)?;
            let name = recipe.formula().name();
            let kegs: Vec<Layout> = match version {
                Some(v) => vec![Layout::new(&config.cellar, name, &v)],
                None => receipt::installed(&config.cellar, name)?
                    .into_iter()
                    .map(|(layout, _)| layout)
                    .collect(),
            };
            if kegs.is_empty() {
                bail!("{} is not installed", name);
            }
            for layout in kegs {
                let removed = receipt::uninstall(&layout, name)
                    .with_context(|| format!("Failed to uninstall {}", layout.prefix.display()))?;
                output::success(&format!("Uninstalled {} {}", removed.name, removed.version));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
