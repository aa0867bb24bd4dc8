//! Terminal output of `bari` commands.
//!
//! Run outcomes, generated files and builder statistics go to stdout;
//! errors and warnings go to stderr. Colors are used only where the stream
//! supports them.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use bari_lib::build::{BuilderStat, RunStatus};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const BUILT: &str = "✓";
  pub const FAILED: &str = "✗";
  pub const SKIPPED: &str = "⚠";
  pub const NOTE: &str = "•";
  pub const OUTPUT: &str = "→";
}

/// Rounds to milliseconds; humantime prints every unit down to nanoseconds otherwise.
pub fn format_elapsed(elapsed: Duration) -> String {
  humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64)).to_string()
}

/// One line summarising a finished run of `target`.
pub fn print_run_status(status: RunStatus, target: &str) {
  match status {
    RunStatus::Completed | RunStatus::NotRun => println!(
      "{} Built {target}",
      symbols::BUILT.if_supports_color(Stream::Stdout, |s| s.green())
    ),
    RunStatus::Cancelled => print_warning(&format!("Build of {target} cancelled by a graph transformation")),
    RunStatus::Cyclic => print_error(&format!("Build graph of {target} is cyclic, nothing was built")),
    RunStatus::Failed => print_error(&format!("Build of {target} failed")),
  }
}

pub fn print_done(message: &str) {
  println!(
    "{} {}",
    symbols::BUILT.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::FAILED.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::SKIPPED.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_note(message: &str) {
  println!(
    "{} {}",
    symbols::NOTE.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

/// A generated file, relative to the target directory.
pub fn print_output(path: &str) {
  println!(
    "  {} {}",
    symbols::OUTPUT.if_supports_color(Stream::Stdout, |s| s.green()),
    path
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// Per-builder timings, names aligned in one column.
pub fn print_builder_statistics(statistics: &[BuilderStat]) {
  println!();
  print_note("Builder statistics");
  let width = statistics.iter().map(|stat| stat.name.len()).max().unwrap_or(0);
  for stat in statistics {
    let name = format!("{:<width$}", stat.name);
    println!(
      "  {}  {} run(s), {}",
      name.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      stat.invocations,
      format_elapsed(stat.total)
    );
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn elapsed_is_rounded_to_milliseconds() {
    assert_eq!(format_elapsed(Duration::from_micros(50_400)), "50ms");
    assert_eq!(format_elapsed(Duration::from_millis(1500)), "1s 500ms");
    assert_eq!(format_elapsed(Duration::from_secs(65)), "1m 5s");
    assert_eq!(format_elapsed(Duration::ZERO), "0s");
  }
}
