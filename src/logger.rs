//! Logging utilities with colored output.
//!
//! This module provides:
//! - `log!` macro for formatted terminal output with colored prefixes
//! - `debug!` macro, only printed when verbose mode is enabled
//! - `status_success`/`status_error` for timestamped request summaries in `serve`
//!
//! # Example
//!
//! ```ignore
//! log!("broker"; "{} connections", count);
//! debug!("dispatch"; "decoded {} instances", n);
//! ```

use crossterm::{
    execute,
    terminal::{Clear, ClearType},
};
use owo_colors::OwoColorize;
use std::{
    io::{Write, stdout},
    sync::atomic::{AtomicBool, Ordering},
};

/// Global verbose flag (set by --verbose CLI argument)
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Set verbose mode globally
pub fn set_verbose(v: bool) {
    VERBOSE.store(v, Ordering::SeqCst);
}

/// Check if verbose mode is enabled
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

// ============================================================================
// Log Macro
// ============================================================================

/// Log a message with a colored module prefix
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Log a debug message (only shown when --verbose is enabled)
///
/// # Usage
/// ```ignore
/// debug!("module"; "debug info: {}", value);
/// ```
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::log($module, &format!($($arg)*))
        }
    }};
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Log a message with a colored module prefix
#[inline]
pub fn log(module: &str, message: &str) {
    let module_lower = module.to_ascii_lowercase();
    let prefix = colorize_prefix(module, &module_lower);

    let mut stdout = stdout().lock();
    execute!(stdout, Clear(ClearType::UntilNewLine)).ok();
    writeln!(stdout, "{prefix} {message}").ok();
    stdout.flush().ok();
}

/// Apply color to a module prefix based on module type
#[inline]
fn colorize_prefix(module: &str, module_lower: &str) -> String {
    let prefix = format!("[{module}]");
    match module_lower {
        "serve" => prefix.bright_blue().bold().to_string(),
        "broker" => prefix.bright_green().bold().to_string(),
        "runtime" => prefix.bright_cyan().bold().to_string(),
        "error" => prefix.bright_red().bold().to_string(),
        _ => prefix.bright_yellow().bold().to_string(),
    }
}

// ============================================================================
// Status (timestamped request summaries)
// ============================================================================

/// Get current time formatted as HH:MM:SS (UTC)
fn now() -> String {
    chrono::Utc::now().format("%H:%M:%S").to_string()
}

/// One timestamped status entry; the detail, if any, follows on its own
/// lines.
fn status_line(symbol: &str, summary: &str, detail: &str) -> String {
    let timestamp = format!("[{}]", now()).dimmed().to_string();
    if detail.is_empty() {
        format!("{timestamp} {symbol} {summary}")
    } else {
        format!("{timestamp} {symbol} {summary}\n{detail}")
    }
}

fn write_status(line: &str) {
    let mut stdout = stdout().lock();
    writeln!(stdout, "{line}").ok();
    stdout.flush().ok();
}

/// Request summary for a successful call (green check).
///
/// ```ignore
/// status_success("counter.increment 3ms");
/// ```
pub fn status_success(message: &str) {
    write_status(&status_line(&"✓".green().to_string(), message, ""));
}

/// Request summary for a failed call (red cross) with optional detail.
pub fn status_error(summary: &str, detail: &str) {
    write_status(&status_line(&"✗".red().to_string(), summary, detail));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_layout() {
        let line = status_line("ok", "counter.increment 3ms", "");
        assert!(line.ends_with(" ok counter.increment 3ms"));
        assert_eq!(line.lines().count(), 1);

        let line = status_line("x", "counter.increment", "integrity check failed\nblob truncated");
        let lines: Vec<_> = line.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(" x counter.increment"));
        assert_eq!(lines[2], "blob truncated");
    }

    #[test]
    fn test_prefix_contains_module() {
        let prefix = colorize_prefix("broker", "broker");
        assert!(prefix.contains("[broker]"));
    }

    #[test]
    fn test_verbose_toggle() {
        set_verbose(true);
        assert!(is_verbose());
        set_verbose(false);
        assert!(!is_verbose());
    }
}
