use chrono::NaiveDate;

use crate::error::TimeUnitsError;

/// Construct the CF-style units string for a time coordinate counting
/// whole days from `base`.
pub fn days_since_units(base: NaiveDate) -> String {
    format!("days since {}", base.format("%Y-%m-%d"))
}

/// Parse a `days since YYYY-MM-DD` units string back into its base date.
///
/// A trailing time-of-day (e.g. `days since 2000-01-01 00:00:00`) is
/// tolerated and ignored, since only whole-day offsets are stored.
pub fn parse_days_since_units(units: &str) -> Result<NaiveDate, TimeUnitsError> {
    let rest = units
        .strip_prefix("days since ")
        .ok_or_else(|| TimeUnitsError::UnsupportedUnits(units.to_string()))?;
    let date_part = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| TimeUnitsError::UnsupportedUnits(units.to_string()))?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| TimeUnitsError::UnsupportedUnits(units.to_string()))
}

/// The first day of `year`, or an error for years chrono cannot represent.
pub fn year_start(year: i32) -> Result<NaiveDate, TimeUnitsError> {
    NaiveDate::from_ymd_opt(year, 1, 1).ok_or(TimeUnitsError::YearOutOfRange(year))
}
