//! Parsing of textual time-field specs into sorted integer sets.
//!
//! Each field of a schedule spec is a comma-separated list of tokens:
//! `*` (the whole range), `A-B` (inclusive range), `A/S` or `*/S`
//! (arithmetic progression up to the field maximum), or a bare integer.
//! The result is deduplicated, sorted ascending, and bounds-checked.

use crate::error::{Error, Result};

/// Parse one bounded field spec into its sorted value set.
pub(crate) fn parse_field(spec: &str, min: i64, max: i64) -> Result<Vec<i64>> {
    let mut values = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token == "*" {
            values.extend(min..=max);
        } else if token.contains('-') {
            values.extend(parse_range(token)?);
        } else if token.contains('/') {
            values.extend(parse_step(token, min, max)?);
        } else if is_integer(token) {
            values.push(parse_int(token)?);
        } else {
            return Err(Error::UnsupportedToken(token.to_string()));
        }
    }
    values.sort_unstable();
    values.dedup();
    // A field set is never empty: every token form above yields at least
    // one value or has already errored.
    if values[0] < min {
        return Err(Error::BelowMinimum {
            value: values[0],
            min,
        });
    }
    let last = values[values.len() - 1];
    if last > max {
        return Err(Error::AboveMaximum { value: last, max });
    }
    Ok(values)
}

/// Parse a year field spec. An empty result is the any-year marker: `*`
/// anywhere in the list means the field is unrestricted. Steps are not
/// accepted, and concrete years are not range-limited.
pub(crate) fn parse_years(spec: &str) -> Result<Vec<i64>> {
    let mut values = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token == "*" {
            return Ok(Vec::new());
        } else if token.contains('-') {
            values.extend(parse_range(token)?);
        } else if is_integer(token) {
            values.push(parse_int(token)?);
        } else {
            return Err(Error::UnsupportedToken(token.to_string()));
        }
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn is_integer(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn parse_int(token: &str) -> Result<i64> {
    token
        .parse()
        .map_err(|_| Error::UnsupportedToken(token.to_string()))
}

/// `A-B`, both endpoints inclusive.
fn parse_range(token: &str) -> Result<Vec<i64>> {
    let (start, end) = token
        .split_once('-')
        .ok_or_else(|| Error::UnsupportedToken(token.to_string()))?;
    let start = parse_int(start.trim())?;
    let end = parse_int(end.trim())?;
    if start > end {
        return Err(Error::InvertedRange(token.to_string()));
    }
    Ok((start..=end).collect())
}

/// `A/S` or `*/S`: start at A (the field minimum when `*` or empty),
/// step by S up to and including the field maximum.
fn parse_step(token: &str, min: i64, max: i64) -> Result<Vec<i64>> {
    let (first, step) = token
        .split_once('/')
        .ok_or_else(|| Error::UnsupportedToken(token.to_string()))?;
    let first = match first.trim() {
        "*" | "" => min,
        text => parse_int(text)?,
    };
    if first > max {
        return Err(Error::StepStartAboveMax { start: first, max });
    }
    let step = parse_int(step.trim())?;
    if step < 1 {
        return Err(Error::BadStep(token.to_string()));
    }
    Ok((first..=max).step_by(step as usize).collect())
}
