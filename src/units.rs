//! Human-friendly units used on the command line and in query parameters.
//!
//! # Byte sizes
//!
//! Sizes accept an optional decimal fraction followed by an optional,
//! case-insensitive unit. Decimal units (`k`, `kb`, `m`, `mb`, ...) are powers
//! of 1000, binary units (`ki`, `kib`, `mi`, `mib`, ...) are powers of 1024:
//!
//! ```text
//! 2m, 2mb, 2M, 2MB  -> 2_000_000
//! 1.5GiB            -> 1_610_612_736
//! 512               -> 512
//! ```
//!
//! # Durations
//!
//! Durations follow `humantime` (`300ms`, `1h 2m 3s`, `2days`), extended with
//! fractional components (`1.5s`) and a bare `0`.

use std::time::Duration;

use thiserror::Error;

const KB: u64 = 1000;
const MB: u64 = KB * 1000;
const GB: u64 = MB * 1000;
const TB: u64 = GB * 1000;
const PB: u64 = TB * 1000;
const EB: u64 = PB * 1000;

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;
const TIB: u64 = 1 << 40;
const PIB: u64 = 1 << 50;
const EIB: u64 = 1 << 60;

/// Errors produced when parsing human-readable units.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("empty value")]
    Empty,

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("value out of range")]
    Overflow,
}

/// Parse a human-readable byte size such as `2GB`, `10 MiB` or `1,024`.
pub fn parse_bytes(input: &str) -> Result<u64, UnitError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(UnitError::Empty);
    }

    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let number: String = number.chars().filter(|c| *c != ',').collect();
    if number.is_empty() {
        return Err(UnitError::InvalidNumber(input.to_string()));
    }
    let value: f64 = number
        .parse()
        .map_err(|_| UnitError::InvalidNumber(number.clone()))?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" | "byte" | "bytes" => 1,
        "k" | "kb" => KB,
        "ki" | "kib" => KIB,
        "m" | "mb" => MB,
        "mi" | "mib" => MIB,
        "g" | "gb" => GB,
        "gi" | "gib" => GIB,
        "t" | "tb" => TB,
        "ti" | "tib" => TIB,
        "p" | "pb" => PB,
        "pi" | "pib" => PIB,
        "e" | "eb" => EB,
        "ei" | "eib" => EIB,
        other => return Err(UnitError::UnknownUnit(other.to_string())),
    };

    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes >= u64::MAX as f64 {
        return Err(UnitError::Overflow);
    }

    Ok(bytes as u64)
}

/// Format a byte count using decimal units, e.g. `2.0 GB`, `82 kB`, `7 B`.
pub fn format_bytes(bytes: u64) -> String {
    const SUFFIXES: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 10 {
        return format!("{bytes} B");
    }

    let mut exponent = 0usize;
    let mut scaled = bytes as f64;
    while scaled >= 1000.0 && exponent + 1 < SUFFIXES.len() {
        scaled /= 1000.0;
        exponent += 1;
    }

    let rounded = (scaled * 10.0 + 0.5).floor() / 10.0;
    let suffix = SUFFIXES.get(exponent).copied().unwrap_or("B");
    if rounded < 10.0 {
        format!("{rounded:.1} {suffix}")
    } else {
        format!("{rounded:.0} {suffix}")
    }
}

/// Parse a duration such as `200ms`, `1h30m` or `1.5s`.
///
/// Whole components go straight to [`humantime::parse_duration`]. A
/// fractional component (`1.5s`) is rewritten to whole nanoseconds first,
/// and a bare `0` means no delay.
pub fn parse_duration(input: &str) -> Result<Duration, UnitError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(UnitError::Empty);
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let whole = if input.contains('.') {
        expand_fractions(input)?
    } else {
        input.to_string()
    };
    humantime::parse_duration(&whole).map_err(|e| duration_error(input, e))
}

/// Rewrite every `<int>.<frac><unit>` component as `<nanos>ns`.
fn expand_fractions(input: &str) -> Result<String, UnitError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        if number.contains('.') {
            let value: f64 = number
                .parse()
                .map_err(|_| UnitError::InvalidNumber(number.to_string()))?;
            let scale = humantime::parse_duration(&format!("1{}", unit.trim()))
                .map_err(|e| duration_error(input, e))?;
            let nanos = value * scale.as_nanos() as f64;
            if !nanos.is_finite() || nanos >= u64::MAX as f64 {
                return Err(UnitError::Overflow);
            }
            out.push_str(&format!("{}ns ", nanos as u64));
        } else {
            out.push_str(number);
            out.push_str(unit);
        }
        rest = next;
    }

    Ok(out.trim_end().to_string())
}

fn duration_error(input: &str, error: humantime::DurationError) -> UnitError {
    match error {
        humantime::DurationError::Empty => UnitError::Empty,
        humantime::DurationError::NumberOverflow => UnitError::Overflow,
        humantime::DurationError::UnknownUnit { unit, .. } if unit.is_empty() => {
            UnitError::UnknownUnit(format!("missing unit in '{input}'"))
        }
        humantime::DurationError::UnknownUnit { unit, .. } => UnitError::UnknownUnit(unit),
        _ => UnitError::InvalidNumber(input.to_string()),
    }
}

/// Format a duration at millisecond precision, e.g. `1h 2m 3s 500ms`.
pub fn format_duration(duration: Duration) -> String {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    humantime::format_duration(Duration::from_millis(millis)).to_string()
}
