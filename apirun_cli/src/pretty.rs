//! Final user-facing output (status tables, confirmations). Everything
//! else logs through `log`; this is the one place `println!` belongs.

use colored::Colorize;

pub fn ok(line: &str) {
    println!("{} {}", "ok".green().bold(), line);
}

pub fn fail(line: &str) {
    println!("{} {}", "fail".red().bold(), line);
}

pub fn skip(line: &str) {
    println!("{} {}", "skip".yellow().bold(), line);
}

pub fn status_row(version: u64, label: &str) {
    println!("  {:>6}  {}", version.to_string().cyan(), label);
}

pub fn stage_row(name: &str, outcome: &str) {
    println!("  {:<20} {}", name, outcome);
}
