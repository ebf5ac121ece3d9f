//! Console output helpers.
//!
//! Everything goes to stderr so stdout stays usable for command output
//! such as `machineconfig patch`.

use colored::Colorize;

/// Print a step indicator with message.
pub fn print_step(message: &str) {
    eprintln!("{} {}", "▶".cyan(), message.bold());
}

/// Print a success message.
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

/// Print an indented detail line.
pub fn print_detail(message: &str) {
    eprintln!("  {} {}", "→".cyan(), message);
}
