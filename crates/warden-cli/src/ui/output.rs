//! Formatted output utilities.

use console::style;

/// Print a success message with checkmark.
pub fn success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an error message with X.
pub fn error(msg: &str) {
    eprintln!("{} {}", style("✗").red().bold(), msg);
}

/// Print a warning message.
pub fn warning(msg: &str) {
    println!("{} {}", style("⚠").yellow().bold(), msg);
}

/// Print an info message.
pub fn info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Print a header/section title.
pub fn header(msg: &str) {
    println!("\n{}", style(msg).bold().underlined());
}

/// Print an allow/deny verdict.
pub fn verdict(allowed: bool, subject: &str) {
    if allowed {
        println!("{} {}", style("ALLOW").green().bold(), subject);
    } else {
        println!("{} {}", style("DENY").red().bold(), subject);
    }
}

/// Print a key-value pair.
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", style(key).bold(), value);
}

/// Print a dimmed line, for secondary detail.
pub fn dim(msg: &str) {
    println!("  {}", style(msg).dim());
}
