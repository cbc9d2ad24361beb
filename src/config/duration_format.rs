//! Duration parsing for configuration files.
//!
//! Durations are written in humantime form (`30s`, `1m 30s`, `500ms`) or
//! in `time.ParseDuration` form with fractional values (`1.5s`, `1h2.5m`).

use std::time::Duration;

/// Parse a duration string.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let text = s.trim();
    match humantime::parse_duration(text) {
        Ok(d) => Ok(d),
        Err(e) => parse_go_duration(text).ok_or_else(|| {
            format!("invalid duration '{}': {} (expected e.g. 30s, 1.5s, 1m, 500ms)", s, e)
        }),
    }
}

/// Go `time.ParseDuration` syntax: one or more `<decimal><unit>` terms.
fn parse_go_duration(text: &str) -> Option<Duration> {
    let mut rest = text;
    let mut seconds = 0f64;

    if rest.is_empty() {
        return None;
    }

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        rest = &rest[unit_len..];

        seconds += value * scale;
    }

    Duration::try_from_secs_f64(seconds).ok()
}

/// Parse an optional duration, falling back to `default` when the value is
/// absent, blank, unparsable or zero.
///
/// Returns the duration and, if the fallback was taken for a value that was
/// present, the rejected text.
pub fn parse_or_default(value: Option<&str>, default: Duration) -> (Duration, Option<String>) {
    match value.map(str::trim) {
        None | Some("") => (default, None),
        Some(text) => match parse_duration(text) {
            Ok(d) if !d.is_zero() => (d, None),
            _ => (default, Some(text.to_string())),
        },
    }
}
