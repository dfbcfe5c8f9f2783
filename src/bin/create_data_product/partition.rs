use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration};
use error_stack::ResultExt;
use itertools::Itertools;
use ndarray::Ix1;
use netcdf::{AttributeValue, Extents};
use wue_dp_rs::{nc_utils::NcArray, subset::Subsetter, utils};

use crate::constants::TIME_DIM_NAME;

#[derive(Debug, thiserror::Error)]
pub(crate) enum PartitionError {
    #[error("Error opening the finished product {}", .0.display())]
    Open(PathBuf),
    #[error("The product has no '{TIME_DIM_NAME}' coordinate variable")]
    NoTimeVariable,
    #[error("The '{TIME_DIM_NAME}' variable has no usable 'units' attribute")]
    BadTimeUnits,
    #[error("Could not write files for years {0:?}")]
    YearsFailed(Vec<i32>),
    #[error("An error occurred while {0}")]
    Context(String),
}

impl PartitionError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}

/// Split the finished product into one file per calendar year.
///
/// The time coordinate is interpreted as calendar dates through its
/// `units` attribute. Years are written independently: a failure on one
/// year is logged and the remaining years are still attempted, with the
/// failures surfaced at the end.
pub(crate) fn partition_by_year(
    product: &Path,
    out_dir: &Path,
) -> error_stack::Result<(), PartitionError> {
    let ds =
        netcdf::open(product).change_context_lazy(|| PartitionError::Open(product.to_path_buf()))?;

    let time_var = ds
        .variable(TIME_DIM_NAME)
        .ok_or(PartitionError::NoTimeVariable)?;
    let offsets = time_var
        .get::<i64, _>(Extents::All)
        .change_context_lazy(|| PartitionError::context("reading the time coordinate"))?
        .into_dimensionality::<Ix1>()
        .change_context_lazy(|| PartitionError::context("reading the time coordinate"))?;

    let units = time_var
        .attribute_value("units")
        .ok_or(PartitionError::BadTimeUnits)?
        .change_context(PartitionError::BadTimeUnits)?;
    let units: String = match units {
        AttributeValue::Str(u) => u,
        _ => return Err(PartitionError::BadTimeUnits.into()),
    };
    let base = utils::parse_days_since_units(&units).change_context(PartitionError::BadTimeUnits)?;

    let years: Vec<i32> = offsets
        .iter()
        .map(|&o| (base + Duration::days(o)).year())
        .collect();
    let distinct_years = years.iter().copied().unique().collect_vec();

    let mut failed = vec![];
    for year in distinct_years {
        let keep = years.iter().positions(|&y| y == year).collect_vec();
        let subsetter = Subsetter::from_indices(keep);
        match write_year_file(&ds, out_dir, year, &subsetter) {
            Ok(()) => log::info!("wrote {year}.nc ({} records)", subsetter.len()),
            Err(e) => {
                log::error!("failed to write the file for year {year}: {e:?}");
                failed.push(year);
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(PartitionError::YearsFailed(failed).into())
    }
}

fn write_year_file(
    ds: &netcdf::File,
    out_dir: &Path,
    year: i32,
    subsetter: &Subsetter,
) -> error_stack::Result<(), PartitionError> {
    let path = out_dir.join(format!("{year}.nc"));
    let mut yds = netcdf::create_with(&path, netcdf::Options::NETCDF4 | netcdf::Options::CLASSIC)
        .change_context_lazy(|| {
            PartitionError::context(format!("creating yearly file {}", path.display()))
        })?;

    for dim in ds.dimensions() {
        let len = if dim.name() == TIME_DIM_NAME || dim.is_unlimited() {
            0
        } else {
            dim.len()
        };
        yds.add_dimension(&dim.name(), len).change_context_lazy(|| {
            PartitionError::context(format!("creating dimension '{}'", dim.name()))
        })?;
    }

    for attr in ds.attributes() {
        let value = attr.value().change_context_lazy(|| {
            PartitionError::context(format!("reading global attribute '{}'", attr.name()))
        })?;
        yds.add_attribute(attr.name(), value).change_context_lazy(|| {
            PartitionError::context(format!("copying global attribute '{}'", attr.name()))
        })?;
    }

    for var in ds.variables() {
        let varname = var.name();
        let data = NcArray::get_from(&var).change_context_lazy(|| {
            PartitionError::context(format!("reading variable '{varname}'"))
        })?;

        let time_axis = var
            .dimensions()
            .iter()
            .position(|d| d.name() == TIME_DIM_NAME);
        let data = if let Some(axis) = time_axis {
            subsetter
                .subset_generic_array(&data, axis)
                .change_context_lazy(|| {
                    PartitionError::context(format!("subsetting variable '{varname}'"))
                })?
        } else {
            data
        };

        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let dim_refs = dims.iter().map(|d| d.as_str()).collect_vec();
        let mut yvar = data.put_to(&mut yds, &varname, &dim_refs).change_context_lazy(|| {
            PartitionError::context(format!("writing variable '{varname}'"))
        })?;

        for attr in var.attributes() {
            let attr_name = attr.name();
            if attr_name == "_FillValue" {
                // The fill value cannot be set after data has been written
                continue;
            }
            let value = attr.value().change_context_lazy(|| {
                PartitionError::context(format!(
                    "reading attribute '{attr_name}' of variable '{varname}'"
                ))
            })?;
            yvar.put_attribute(attr_name, value).change_context_lazy(|| {
                PartitionError::context(format!(
                    "copying attribute '{attr_name}' to variable '{varname}'"
                ))
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use wue_dp_rs::nc_utils::full_extents;

    use super::*;

    fn build_product(path: &Path) {
        let mut ds = netcdf::create(path).unwrap();
        ds.add_dimension(TIME_DIM_NAME, 0).unwrap();
        ds.add_dimension("lat", 2).unwrap();

        let mut time = ds.add_variable::<i32>(TIME_DIM_NAME, &[TIME_DIM_NAME]).unwrap();
        // Two records in 2001, one in 2002, one in 2003 (2001 and 2002
        // have 365 days each, so offsets 365 and 730 are the two
        // following New Year's days)
        time.put_values(&[0, 1, 365, 730], full_extents(&[4])).unwrap();
        time.put_attribute("units", "days since 2001-01-01").unwrap();

        let mut v = ds.add_variable::<f32>("v", &[TIME_DIM_NAME]).unwrap();
        v.put_values(&[10.0f32, 20.0, 30.0, 40.0], full_extents(&[4]))
            .unwrap();
        v.put_attribute("units", "K").unwrap();

        let mut lat = ds.add_variable::<f64>("lat", &["lat"]).unwrap();
        lat.put_values(&[1.0, 2.0], full_extents(&[2])).unwrap();

        ds.add_attribute("title", "test product").unwrap();
    }

    #[test]
    fn test_partition_splits_records_by_calendar_year() {
        let dir = tempfile::tempdir().unwrap();
        let product = dir.path().join("out.nc");
        build_product(&product);

        let split_dir = dir.path().join("years");
        std::fs::create_dir_all(&split_dir).unwrap();
        partition_by_year(&product, &split_dir).unwrap();

        let y2001 = netcdf::open(split_dir.join("2001.nc")).unwrap();
        let time = y2001
            .variable(TIME_DIM_NAME)
            .unwrap()
            .get::<i32, _>(Extents::All)
            .unwrap();
        assert_eq!(time.as_slice().unwrap(), &[0, 1]);
        let v = y2001
            .variable("v")
            .unwrap()
            .get::<f32, _>(Extents::All)
            .unwrap();
        assert_eq!(v.as_slice().unwrap(), &[10.0, 20.0]);
        // Non-time-indexed variables are duplicated unchanged
        let lat = y2001
            .variable("lat")
            .unwrap()
            .get::<f64, _>(Extents::All)
            .unwrap();
        assert_eq!(lat.as_slice().unwrap(), &[1.0, 2.0]);
        assert!(y2001.attribute("title").is_some());

        let y2002 = netcdf::open(split_dir.join("2002.nc")).unwrap();
        let time = y2002
            .variable(TIME_DIM_NAME)
            .unwrap()
            .get::<i32, _>(Extents::All)
            .unwrap();
        assert_eq!(time.as_slice().unwrap(), &[365]);
        let v = y2002
            .variable("v")
            .unwrap()
            .get::<f32, _>(Extents::All)
            .unwrap();
        assert_eq!(v.as_slice().unwrap(), &[30.0]);

        // Exactly the three years present are produced
        let mut entries: Vec<_> = std::fs::read_dir(&split_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["2001.nc", "2002.nc", "2003.nc"]);
    }

    #[test]
    fn test_partition_without_units_fails() {
        let dir = tempfile::tempdir().unwrap();
        let product = dir.path().join("out.nc");
        {
            let mut ds = netcdf::create(&product).unwrap();
            ds.add_dimension(TIME_DIM_NAME, 0).unwrap();
            let mut time = ds
                .add_variable::<i32>(TIME_DIM_NAME, &[TIME_DIM_NAME])
                .unwrap();
            time.put_values(&[0], full_extents(&[1])).unwrap();
        }

        let err = partition_by_year(&product, dir.path()).unwrap_err();
        assert!(matches!(
            err.current_context(),
            PartitionError::BadTimeUnits
        ));
    }
}
