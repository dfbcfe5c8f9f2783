use chrono::{Datelike, Duration, NaiveDate};
use error_stack::ResultExt;
use wue_dp_rs::{nc_utils::full_extents, utils};

use crate::config::{Config, TimeSpec};
use crate::constants::TIME_DIM_NAME;

#[derive(Debug, thiserror::Error)]
pub(crate) enum TimeAxisError {
    #[error("Year {0} is outside the range of representable dates")]
    InvalidYear(i32),
    #[error("Dimension '{0}' has no configured size")]
    MissingDimSize(String),
    #[error("Error creating dimension '{0}'")]
    CreateDim(String),
    #[error("Error writing the time coordinate variable")]
    WriteVar,
}

/// Create every configured dimension in the output file. The `time`
/// dimension is always unlimited; its extent is set when the coordinate
/// variable is written.
pub(crate) fn write_dimensions(
    ds: &mut netcdf::FileMut,
    config: &Config,
) -> error_stack::Result<(), TimeAxisError> {
    for (name, spec) in config.dimensions.iter() {
        if name == TIME_DIM_NAME || spec.unlimited {
            // Length 0 creates an unlimited dimension
            ds.add_dimension(name, 0)
                .change_context_lazy(|| TimeAxisError::CreateDim(name.clone()))?;
        } else {
            let size = spec
                .size
                .ok_or_else(|| TimeAxisError::MissingDimSize(name.clone()))?;
            ds.add_dimension(name, size)
                .change_context_lazy(|| TimeAxisError::CreateDim(name.clone()))?;
        }
        log::debug!("dimension '{name}' created");
    }
    Ok(())
}

/// Synthesize the canonical time coordinate and write it as `int32`.
///
/// The written length defines the extent of the unlimited `time`
/// dimension; every time-indexed variable created afterwards must match
/// it exactly. Returns that length.
pub(crate) fn write_time_axis(
    ds: &mut netcdf::FileMut,
    spec: &TimeSpec,
    config: &Config,
) -> error_stack::Result<usize, TimeAxisError> {
    let values = build_time_values(spec)?;
    let ntime = values.len();

    let mut var = ds
        .add_variable::<i32>(TIME_DIM_NAME, &[TIME_DIM_NAME])
        .change_context(TimeAxisError::WriteVar)?;
    var.put_values(&values, full_extents(&[ntime]))
        .change_context(TimeAxisError::WriteVar)?;

    if let TimeSpec::Calendar { start_year, .. } = spec {
        let base = utils::year_start(*start_year)
            .map_err(|_| TimeAxisError::InvalidYear(*start_year))?;
        var.put_attribute("units", utils::days_since_units(base))
            .change_context(TimeAxisError::WriteVar)?;
    }

    // Configured attributes are applied last so they win over the
    // synthesized units.
    if let Some(attrs) = config.variable_attributes.get(TIME_DIM_NAME) {
        for (attr, value) in attrs.iter() {
            var.put_attribute(attr, netcdf::AttributeValue::from(value))
                .change_context(TimeAxisError::WriteVar)?;
        }
    }

    Ok(ntime)
}

/// Generate the integer day-offset sequence described by `spec`.
pub(crate) fn build_time_values(spec: &TimeSpec) -> Result<Vec<i32>, TimeAxisError> {
    match spec {
        TimeSpec::Calendar {
            start_year,
            end_year,
            day_step,
            leap_day,
        } => calendar_values(*start_year, *end_year, *day_step, *leap_day),
        TimeSpec::Relative { years, day_step } => Ok(relative_values(*years, *day_step)),
    }
}

fn calendar_values(
    start_year: i32,
    end_year: i32,
    day_step: u32,
    leap_day: bool,
) -> Result<Vec<i32>, TimeAxisError> {
    let epoch = utils::year_start(start_year).map_err(|_| TimeAxisError::InvalidYear(start_year))?;

    let mut values = vec![];
    for year in start_year..=end_year {
        let first = utils::year_start(year).map_err(|_| TimeAxisError::InvalidYear(year))?;
        let ndays = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or(TimeAxisError::InvalidYear(year))?
            .ordinal();

        // Resample within the year: day 1 is always kept, then every
        // day_step-th day after it. Feb 29 is dropped after subsampling
        // when leap days are excluded.
        for ordinal in (1..=ndays).step_by(day_step as usize) {
            let date = first + Duration::days(ordinal as i64 - 1);
            if !leap_day && date.month() == 2 && date.day() == 29 {
                continue;
            }
            values.push((date - epoch).num_days() as i32);
        }
    }
    Ok(values)
}

fn relative_values(years: u32, day_step: u32) -> Vec<i32> {
    let mut values = vec![];
    for year in 0..years {
        for doy in (1..365).step_by(day_step as usize) {
            values.push(doy + 365 * year as i32);
        }
    }
    values
}
