//! Common errors across the wue-dp-rs crate

/// Errors related to interpreting netCDF time coordinates
#[derive(Debug, thiserror::Error)]
pub enum TimeUnitsError {
    #[error("Time units '{0}' are not of the form 'days since YYYY-MM-DD'")]
    UnsupportedUnits(String),
    #[error("Year {0} is outside the range of representable dates")]
    YearOutOfRange(i32),
}
