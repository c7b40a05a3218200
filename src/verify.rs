//! Post-install verification.
//!
//! A [`SmokeTest`] is a short list of checks run against the installed keg
//! inside a throwaway directory. `HOME` points at that directory, the keg's
//! `bin` comes first on `PATH`, and nothing else from the caller's
//! environment leaks in beyond `PATH` itself. A failed check is reported, not
//! rolled back: the keg stays as installed.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use thiserror::Error;

use crate::core::output;
use crate::executor::shell_quote;
use crate::layout::Layout;

/// One verification check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Run a program and expect an exit status.
    Run {
        program: String,
        args: Vec<String>,
        status: i32,
    },
    /// Create empty files in the test directory.
    Touch(Vec<String>),
    /// Trimmed stdout of a successful run equals `expected`.
    OutputEquals {
        program: String,
        args: Vec<String>,
        expected: String,
    },
    /// Merged stdout and stderr contains `needle`, with the given status.
    OutputContains {
        program: String,
        args: Vec<String>,
        needle: String,
        status: i32,
    },
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

impl Check {
    pub fn run(program: &str, args: &[&str]) -> Self {
        Self::Run {
            program: program.to_string(),
            args: owned(args),
            status: 0,
        }
    }

    pub fn touch(files: &[&str]) -> Self {
        Self::Touch(owned(files))
    }

    pub fn output_equals(program: &str, args: &[&str], expected: &str) -> Self {
        Self::OutputEquals {
            program: program.to_string(),
            args: owned(args),
            expected: expected.to_string(),
        }
    }

    pub fn output_contains(program: &str, args: &[&str], needle: &str, status: i32) -> Self {
        Self::OutputContains {
            program: program.to_string(),
            args: owned(args),
            needle: needle.to_string(),
            status,
        }
    }

    pub fn describe(&self) -> String {
        let line = |program: &str, args: &[String]| {
            std::iter::once(shell_quote(program))
                .chain(args.iter().map(shell_quote))
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            Self::Run { program, args, .. }
            | Self::OutputEquals { program, args, .. }
            | Self::OutputContains { program, args, .. } => line(program, args),
            Self::Touch(files) => format!("touch {}", files.join(" ")),
        }
    }
}

/// Checks plus extra environment for running them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmokeTest {
    pub checks: Vec<Check>,
    pub env: BTreeMap<String, String>,
}

impl SmokeTest {
    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("verification failed at check {check} ({description}): {reason}")]
pub struct VerificationFailure {
    /// 1-based index of the failing check; 0 for setup.
    pub check: usize,
    pub description: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub passed: Vec<String>,
}

/// Run `test` against the keg at `layout`.
pub fn verify(layout: &Layout, test: &SmokeTest) -> Result<VerifyReport, VerificationFailure> {
    let dir = tempfile::Builder::new()
        .prefix("kegforge-test-")
        .tempdir()
        .map_err(|e| VerificationFailure {
            check: 0,
            description: "create test directory".to_string(),
            reason: e.to_string(),
        })?;

    let path = search_path(&layout.bin());
    let mut report = VerifyReport::default();

    for (i, check) in test.checks.iter().enumerate() {
        let description = check.describe();
        output::sub_action(&description);
        let fail = |reason: String| VerificationFailure {
            check: i + 1,
            description: description.clone(),
            reason,
        };

        match check {
            Check::Touch(files) => {
                for f in files {
                    std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(dir.path().join(f))
                        .map_err(|e| fail(format!("cannot create {}: {}", f, e)))?;
                }
            }
            Check::Run {
                program,
                args,
                status,
            } => {
                let out =
                    spawn(layout, dir.path(), &path, &test.env, program, args).map_err(&fail)?;
                expect_status(&out, *status).map_err(&fail)?;
            }
            Check::OutputEquals {
                program,
                args,
                expected,
            } => {
                let out =
                    spawn(layout, dir.path(), &path, &test.env, program, args).map_err(&fail)?;
                expect_status(&out, 0).map_err(&fail)?;
                let actual = String::from_utf8_lossy(&out.stdout);
                let actual = actual.trim();
                if actual != expected {
                    return Err(fail(format!("expected {:?}, got {:?}", expected, actual)));
                }
            }
            Check::OutputContains {
                program,
                args,
                needle,
                status,
            } => {
                let out =
                    spawn(layout, dir.path(), &path, &test.env, program, args).map_err(&fail)?;
                expect_status(&out, *status).map_err(&fail)?;
                let merged = merged_output(&out);
                if !merged.contains(needle.as_str()) {
                    return Err(fail(format!("output does not contain {:?}:\n{}", needle, merged)));
                }
            }
        }

        report.passed.push(description);
    }

    Ok(report)
}

/// `<keg>/bin` ahead of the caller's `PATH`.
fn search_path(bin: &Path) -> OsString {
    let mut entries = vec![bin.to_path_buf()];
    if let Some(host) = std::env::var_os("PATH") {
        entries.extend(std::env::split_paths(&host));
    }
    std::env::join_paths(entries).unwrap_or_else(|_| bin.as_os_str().to_os_string())
}

/// Prefer the keg's own copy of `program`.
fn resolve(layout: &Layout, program: &str) -> PathBuf {
    let installed = layout.bin().join(program);
    if !program.contains('/') && installed.is_file() {
        installed
    } else {
        PathBuf::from(program)
    }
}

fn spawn(
    layout: &Layout,
    dir: &Path,
    path: &OsString,
    env: &BTreeMap<String, String>,
    program: &str,
    args: &[String],
) -> Result<Output, String> {
    Command::new(resolve(layout, program))
        .args(args)
        .current_dir(dir)
        .env_clear()
        .env("PATH", path)
        .env("HOME", dir)
        .env("TMPDIR", dir)
        .env("LANG", "C")
        .envs(env)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("cannot run {}: {}", program, e))
}

fn expect_status(out: &Output, expected: i32) -> Result<(), String> {
    match out.status.code() {
        Some(code) if code == expected => Ok(()),
        code => Err(format!(
            "expected exit status {}, got {}\n{}",
            expected,
            code.map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            merged_output(out)
        )),
    }
}

fn merged_output(out: &Output) -> String {
    let mut merged = String::from_utf8_lossy(&out.stdout).into_owned();
    merged.push_str(&String::from_utf8_lossy(&out.stderr));
    merged
}
