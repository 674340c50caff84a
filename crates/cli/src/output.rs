//! Terminal output helpers: colored status lines, sizes and durations.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
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
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// Binary-unit size for file listings.
pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [(u64, &str); 2] = [(1024 * 1024, "MB"), (1024, "KB")];

  UNITS
    .iter()
    .find(|(size, _)| bytes >= *size)
    .map(|(size, unit)| format!("{:.1} {unit}", bytes as f64 / *size as f64))
    .unwrap_or_else(|| format!("{bytes} B"))
}

/// Compact duration: `850ms`, `1.50s`, `2m 5s`.
pub fn format_duration(duration: Duration) -> String {
  match duration.as_secs() {
    0 => format!("{}ms", duration.subsec_millis()),
    secs @ 1..60 => format!("{}.{:02}s", secs, duration.subsec_millis() / 10),
    secs => format!("{}m {}s", secs / 60, secs % 60),
  }
}

#[derive(Clone, Copy)]
enum Tone {
  Green,
  Red,
  Yellow,
  Blue,
}

/// Print `symbol message`, coloring the symbol (and, on stderr, the message)
/// when the stream supports it.
fn status(stream: Stream, tone: Tone, symbol: &str, message: &str) {
  let paint = |text: &str| -> String {
    match tone {
      Tone::Green => text.if_supports_color(stream, |s| s.green()).to_string(),
      Tone::Red => text.if_supports_color(stream, |s| s.red()).to_string(),
      Tone::Yellow => text.if_supports_color(stream, |s| s.yellow()).to_string(),
      Tone::Blue => text.if_supports_color(stream, |s| s.blue()).to_string(),
    }
  };
  match stream {
    Stream::Stderr => eprintln!("{} {}", paint(symbol), paint(message)),
    _ => println!("{} {}", paint(symbol), message),
  }
}

pub fn print_success(message: &str) {
  status(Stream::Stdout, Tone::Green, symbols::SUCCESS, message);
}

pub fn print_error(message: &str) {
  status(Stream::Stderr, Tone::Red, symbols::ERROR, message);
}

pub fn print_warning(message: &str) {
  status(Stream::Stderr, Tone::Yellow, symbols::WARNING, message);
}

pub fn print_info(message: &str) {
  status(Stream::Stdout, Tone::Blue, symbols::INFO, message);
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

pub fn print_file(path: &str, size: &str) {
  println!(
    "  {} {} {}",
    symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    path,
    size.if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize report")?);
  Ok(())
}
