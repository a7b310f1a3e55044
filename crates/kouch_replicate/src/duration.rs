//! Duration parsing and formatting for timeouts and retry messages.

use crate::error::{ReplicateError, ReplicateResult};
use std::time::Duration;

const NEGATIVE: &str = "negative timeout not permitted";

/// Parses a timeout value.
///
/// An empty string means unset. A bare number is taken as seconds and may be
/// fractional. Anything else is one or more `<number><unit>` terms, with units
/// `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`, for example `1h30m` or
/// `1.5s`.
pub fn parse_duration(input: &str) -> ReplicateResult<Option<Duration>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    if let Ok(secs) = input.parse::<f64>() {
        if secs < 0.0 || input.starts_with('-') {
            return Err(ReplicateError::usage(NEGATIVE));
        }
        return Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|_| invalid(input));
    }
    if input.starts_with('-') {
        return Err(ReplicateError::usage(NEGATIVE));
    }

    let mut rest = input.strip_prefix('+').unwrap_or(input);
    if rest.is_empty() {
        return Err(invalid(input));
    }
    let mut total = 0f64;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let value: f64 = rest[..num_len].parse().map_err(|_| invalid(input))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid(input)),
        };
        rest = &rest[unit_len..];
        total += value * scale;
    }
    Duration::try_from_secs_f64(total)
        .map(Some)
        .map_err(|_| invalid(input))
}

fn invalid(input: &str) -> ReplicateError {
    ReplicateError::usage(format!("invalid duration \"{input}\""))
}

/// Formats a duration for user messages: `1.50s`, `2m5s`, `3h10m`, `1d2h3m`.
pub fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.2}s");
    }
    let total = d.as_secs();
    let (mins, secs) = (total / 60, total % 60);
    if mins < 60 {
        return format!("{mins}m{secs}s");
    }
    let (hours, mins) = (mins / 60, mins % 60);
    if hours < 24 {
        return format!("{hours}h{mins}m");
    }
    let (days, hours) = (hours / 24, hours % 24);
    format!("{days}d{hours}h{mins}m")
}
