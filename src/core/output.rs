//! Colored output and progress reporting
//!
//! Uses owo-colors for terminal colors and indicatif for spinners and
//! download bars. Every user-facing line the library prints goes through here.

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::time::Duration;

const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";
const TICK_INTERVAL_MS: u64 = 80;
const BYTES_TEMPLATE: &str = "     {spinner:.cyan} [{bar:30.cyan/dim}] {bytes}/{total_bytes} ({eta})";

/// Print an action header (blue, bold)
/// Example: "==> Installing git-curl-openssl 2.35.3"
pub fn action(message: &str) {
    println!("{} {}", "==>".blue().bold(), message.bold());
}

/// Print a numbered step header
/// Example: "(3/12) subtree"
pub fn step(current: usize, total: usize, id: &str) {
    println!("{} {}", format!("({}/{})", current, total).cyan(), id.bold());
}

/// Print a sub-action (cyan arrow)
/// Example: "  -> fetch man"
pub fn sub_action(message: &str) {
    println!("  {} {}", "->".cyan(), message);
}

/// Print a detail line (dimmed)
pub fn detail(message: &str) {
    println!("     {}", message.dimmed());
}

/// Echo a command about to run (verbose and dry-run modes)
pub fn command(dry_run: bool, cmd: &str) {
    let tag = if dry_run { "[dry-run]" } else { "[exec]" };
    println!("     {} {}", tag.dimmed(), cmd);
}

/// Print a success message (green)
pub fn success(message: &str) {
    println!("{} {}", "==>".green().bold(), message.green());
}

/// Print an info message (cyan)
pub fn info(message: &str) {
    println!("{} {}", "::".cyan(), message);
}

/// Print a warning message (yellow)
pub fn warning(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message.yellow());
}

/// Print an error message (red)
pub fn error(message: &str) {
    eprintln!("{} {}", "error:".red().bold(), message.red());
}

/// Print a skip message (dimmed)
/// Example: "==> skipping osxkeychain (requires macos)"
pub fn skip(message: &str) {
    println!("{} {}", "==>".dimmed(), message.dimmed());
}

/// Print a `key = value` pair, used by `env` and `info` listings
pub fn pair(key: &str, value: &str) {
    println!("  {} {}", format!("{key}=").cyan(), value);
}

/// Create a spinner with the standard styling
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("     {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_CHARS);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(TICK_INTERVAL_MS));
    pb
}

/// Switch a spinner to a byte progress bar once the content length is known
pub fn upgrade_to_bytes(pb: &ProgressBar, total_bytes: u64) {
    pb.set_length(total_bytes);
    let style = ProgressStyle::default_bar()
        .template(BYTES_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸━");
    pb.set_style(style);
}

/// Finish a progress bar with a failure message
pub fn progress_fail(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{}", message.red()));
}

/// Finish a progress bar and clear it
pub fn progress_done(pb: ProgressBar) {
    pb.finish_and_clear();
}
