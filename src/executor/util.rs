//! Subprocess helpers for the executor.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::core::output;
use crate::env::BuildEnv;
use crate::plan::Invocation;

use super::context::Context;
use super::error::ActionError;

/// Lines of captured output kept in a failure message.
const FAILURE_TAIL_LINES: usize = 30;

/// Shell-quote a value for display.
pub fn shell_quote(s: impl std::fmt::Display) -> String {
    let s = s.to_string();
    if !s.is_empty()
        && s.chars().all(|c| {
            c.is_alphanumeric()
                || matches!(c, '_' | '-' | '.' | '/' | '=' | ':' | '@' | '+' | ',')
        })
    {
        s
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Render an invocation as a copy-pasteable command line.
pub fn command_line(inv: &Invocation) -> String {
    std::iter::once(shell_quote(&inv.program))
        .chain(inv.args.iter().map(shell_quote))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `inv` in `cwd` with exactly the variables of `env`.
pub fn run(ctx: &Context, cwd: &Path, env: &BuildEnv, inv: &Invocation) -> Result<(), ActionError> {
    let cmd = command_line(inv);

    if ctx.verbose || ctx.dry_run {
        output::command(ctx.dry_run, &format!("(cd {} && {})", shell_quote(cwd.display()), cmd));
    }
    if ctx.dry_run {
        return Ok(());
    }

    let pb = output::spinner(&cmd);
    let result = Command::new(&inv.program)
        .args(&inv.args)
        .current_dir(cwd)
        .env_clear()
        .envs(env.vars())
        .stdin(Stdio::null())
        .output();

    let out = match result {
        Ok(out) => out,
        Err(source) => {
            output::progress_fail(pb, "failed to start");
            return Err(ActionError::Spawn { cmd, source });
        }
    };

    if !out.status.success() {
        output::progress_fail(pb, "failed");
        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));
        return Err(ActionError::CommandFailed {
            cmd,
            code: out.status.code(),
            output: tail(&combined, FAILURE_TAIL_LINES),
        });
    }

    output::progress_done(pb);
    Ok(())
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
