//! Pretty-printing messages to the console

use colored::Colorize;

/// Pretty-print an error message to the console
pub fn error(message: &str) {
    let error_title = "error:".red().bold();
    eprintln!("{} {}", error_title, message);
}

/// Pretty-print a warning message to the console
pub fn warning(message: &str) {
    let warning_title = "warning:".yellow().bold();
    eprintln!("{} {}", warning_title, message);
}
