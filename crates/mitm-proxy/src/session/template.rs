//! Dump file naming.
//!
//! A template is any path with `{timestamp}` (or the older `{isonow}`) where
//! the session start time goes. The time is rendered ISO-8601 style with `-`
//! and `:` swapped for `_` so the result is safe on every filesystem.

use chrono::NaiveDateTime;
use std::path::PathBuf;

/// Template used when none is configured.
pub const DEFAULT_TEMPLATE: &str = "packet_dump_{timestamp}.dat";

const PLACEHOLDERS: [&str; 2] = ["{timestamp}", "{isonow}"];

/// Filesystem-safe rendering of a session start time,
/// e.g. `2024_03_09T14_05_07.123456`.
pub fn timestamp(started: NaiveDateTime) -> String {
    started
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
        .replace(['-', ':'], "_")
}

/// Substitute the session start time into `template`.
pub fn render(template: &str, started: NaiveDateTime) -> PathBuf {
    let stamp = timestamp(started);
    let path = PLACEHOLDERS
        .iter()
        .fold(template.to_owned(), |acc, placeholder| acc.replace(placeholder, &stamp));
    PathBuf::from(path)
}
