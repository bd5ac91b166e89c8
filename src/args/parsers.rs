use std::time::Duration;

use crate::error::{AppError, AppResult, ValidationError};

/// Parses a duration argument with an explicit unit suffix: `500ms`, `30s`,
/// `5m` or `2h`.
///
/// # Errors
///
/// Fails on an empty value, a missing or unknown suffix, a non-numeric
/// amount, or an amount that overflows.
pub fn parse_duration_arg(raw: &str) -> AppResult<Duration> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(AppError::validation(ValidationError::DurationEmpty));
    }

    // "ms" must be tried before "m", and "s" last of the two.
    let (number, unit_ms) = if let Some(number) = value.strip_suffix("ms") {
        (number, 1u64)
    } else if let Some(number) = value.strip_suffix('s') {
        (number, 1_000)
    } else if let Some(number) = value.strip_suffix('m') {
        (number, 60_000)
    } else if let Some(number) = value.strip_suffix('h') {
        (number, 3_600_000)
    } else {
        return Err(AppError::validation(ValidationError::InvalidDurationFormat {
            value: value.to_owned(),
        }));
    };

    let amount: u64 = number.trim().parse().map_err(|source| {
        AppError::validation(ValidationError::InvalidDurationNumber {
            value: value.to_owned(),
            source,
        })
    })?;
    let millis = amount
        .checked_mul(unit_ms)
        .ok_or_else(|| AppError::validation(ValidationError::DurationOverflow))?;
    Ok(Duration::from_millis(millis))
}
