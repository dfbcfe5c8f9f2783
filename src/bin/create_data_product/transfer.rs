use error_stack::ResultExt;
use itertools::Itertools;
use ndarray::ArrayD;
use netcdf::NcTypeDescriptor;
use wue_dp_rs::nc_utils::full_extents;

use crate::config::{Config, VarType};

#[derive(Debug, thiserror::Error)]
pub(crate) enum TransferError {
    #[error("No dtype or dimensions configured for destination variable '{0}'")]
    UnresolvedDestination(String),
    #[error("Variable '{varname}' data has {naxes} axes but {ndims} dimensions are configured")]
    RankMismatch {
        varname: String,
        ndims: usize,
        naxes: usize,
    },
    #[error("Dimension '{dimname}' does not exist in the output file (required by variable '{varname}')")]
    MissingDimension { dimname: String, varname: String },
    #[error("Dimension '{dimname}' has length {dim_len} in the output file, but the data for variable '{varname}' has length {data_len} on that axis")]
    DimLenMismatch {
        dimname: String,
        varname: String,
        dim_len: usize,
        data_len: usize,
    },
    #[error("An error occurred while {0}")]
    Context(String),
}

impl TransferError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}

/// Copy the selected variables of one group into the output dataset.
///
/// Source variables missing from the group are skipped with a warning;
/// a destination without a configured dtype and dimension list is fatal,
/// as is data that does not fit the declared dimensions. Only the
/// output dataset is mutated, and the creation order of variables
/// follows the selection order.
pub(crate) fn transfer_group(
    src: &crate::groups::GroupDataset,
    out: &mut netcdf::FileMut,
    config: &Config,
) -> error_stack::Result<(), TransferError> {
    let group = src.name();
    let selected = match config.variables.get(group) {
        Some(names) => names,
        None => return Ok(()),
    };

    for src_name in selected.iter() {
        if !src.has_variable(src_name) {
            log::warn!("Variable {src_name} not found in group '{group}', skipping");
            continue;
        }

        let dest_name = resolve_dest_name(out, group, src_name, config);

        let dtype = config
            .variable_dtype
            .get(&dest_name)
            .copied()
            .ok_or_else(|| TransferError::UnresolvedDestination(dest_name.clone()))?;
        let dims = config
            .variable_dimensions
            .get(&dest_name)
            .ok_or_else(|| TransferError::UnresolvedDestination(dest_name.clone()))?;

        let data = src.read(src_name).change_context_lazy(|| {
            TransferError::context(format!(
                "reading variable '{src_name}' from group '{group}'"
            ))
        })?;
        let mut data = data.into_f64();

        let factor = config.variable_factor.get(&dest_name).copied().unwrap_or(1.0);
        if factor != 1.0 {
            data.mapv_inplace(|v| v * factor);
        }

        check_dims(out, &dest_name, dims, data.shape())?;

        log::info!("writing variable {src_name} as {dest_name} ({dims:?}, {dtype})");
        let mut var = create_and_write(out, &dest_name, dtype, dims, config.fill_value, &data)?;

        var.put_attribute("missing_value", config.fill_value as f32)
            .change_context_lazy(|| {
                TransferError::context(format!(
                    "adding 'missing_value' attribute to variable '{dest_name}'"
                ))
            })?;
        if let Some(attrs) = config.variable_attributes.get(&dest_name) {
            for (attr, value) in attrs.iter() {
                var.put_attribute(attr, netcdf::AttributeValue::from(value))
                    .change_context_lazy(|| {
                        TransferError::context(format!(
                            "adding '{attr}' attribute to variable '{dest_name}'"
                        ))
                    })?;
            }
        }
    }

    Ok(())
}

/// Apply the rename map and the collision policy.
///
/// The group suffix is attached when the group is configured to always
/// carry it, or when the bare destination name is already taken by an
/// earlier group. Either way the result is traceable to its source.
fn resolve_dest_name(
    out: &netcdf::FileMut,
    group: &str,
    src_name: &str,
    config: &Config,
) -> String {
    let base = config
        .variable_names
        .get(src_name)
        .cloned()
        .unwrap_or_else(|| src_name.to_string());

    let always_suffix = config
        .collisions
        .suffix_groups
        .iter()
        .any(|g| g == group);

    if always_suffix || out.variable(&base).is_some() {
        format!("{base}_{group}")
    } else {
        base
    }
}

/// Verify the data fits the declared dimensions at their current
/// lengths. Since the time coordinate is written before any transfer,
/// this is what enforces that every time-indexed variable matches the
/// canonical axis exactly.
fn check_dims(
    out: &netcdf::FileMut,
    varname: &str,
    dims: &[String],
    shape: &[usize],
) -> Result<(), TransferError> {
    if dims.len() != shape.len() {
        return Err(TransferError::RankMismatch {
            varname: varname.to_string(),
            ndims: dims.len(),
            naxes: shape.len(),
        });
    }

    for (dimname, &data_len) in dims.iter().zip(shape.iter()) {
        let dim = out
            .dimension(dimname)
            .ok_or_else(|| TransferError::MissingDimension {
                dimname: dimname.clone(),
                varname: varname.to_string(),
            })?;
        // An unlimited dimension that nothing has been written along yet
        // takes its extent from the first write. The time dimension is
        // already extended by its coordinate variable, so time-indexed
        // data must match the canonical axis exactly.
        if dim.is_unlimited() && dim.len() == 0 {
            continue;
        }
        if dim.len() != data_len {
            return Err(TransferError::DimLenMismatch {
                dimname: dimname.clone(),
                varname: varname.to_string(),
                dim_len: dim.len(),
                data_len,
            });
        }
    }
    Ok(())
}

fn create_and_write<'f>(
    out: &'f mut netcdf::FileMut,
    name: &str,
    dtype: VarType,
    dims: &[String],
    fill: f64,
    data: &ArrayD<f64>,
) -> error_stack::Result<netcdf::VariableMut<'f>, TransferError> {
    let dim_refs = dims.iter().map(|d| d.as_str()).collect_vec();
    match dtype {
        VarType::I8 => write_cast(out, name, &dim_refs, fill as i8, data, |v| v as i8),
        VarType::I16 => write_cast(out, name, &dim_refs, fill as i16, data, |v| v as i16),
        VarType::I32 => write_cast(out, name, &dim_refs, fill as i32, data, |v| v as i32),
        VarType::F32 => write_cast(out, name, &dim_refs, fill as f32, data, |v| v as f32),
        VarType::F64 => write_cast(out, name, &dim_refs, fill, data, |v| v),
    }
}

fn write_cast<'f, T: NcTypeDescriptor + Copy>(
    out: &'f mut netcdf::FileMut,
    name: &str,
    dims: &[&str],
    fill: T,
    data: &ArrayD<f64>,
    cast: fn(f64) -> T,
) -> error_stack::Result<netcdf::VariableMut<'f>, TransferError> {
    let mut var = out.add_variable::<T>(name, dims).change_context_lazy(|| {
        TransferError::context(format!("creating variable '{name}'"))
    })?;
    var.set_fill_value(fill).change_context_lazy(|| {
        TransferError::context(format!("setting the fill value of variable '{name}'"))
    })?;

    let cast_data = data.mapv(cast);
    var.put(cast_data.view(), full_extents(cast_data.shape()))
        .change_context_lazy(|| TransferError::context(format!("writing variable '{name}'")))?;
    Ok(var)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use netcdf::Extents;
    use wue_dp_rs::nc_utils::full_extents;

    use super::*;
    use crate::config::Config;
    use crate::groups::GroupDataset;

    fn write_source_file(path: &Path, varname: &str, values: &[f64]) {
        let mut ds = netcdf::create(path).unwrap();
        ds.add_dimension("time", 0).unwrap();
        let mut var = ds.add_variable::<f64>(varname, &["time"]).unwrap();
        var.put_values(values, full_extents(&[values.len()]))
            .unwrap();
    }

    fn make_output(path: &Path, ntime: usize) -> netcdf::FileMut {
        let mut ds = netcdf::create(path).unwrap();
        ds.add_dimension("time", 0).unwrap();
        let mut var = ds.add_variable::<i32>("time", &["time"]).unwrap();
        let values: Vec<i32> = (0..ntime as i32).collect();
        var.put_values(&values, full_extents(&[ntime])).unwrap();
        ds
    }

    static TRANSFER_TOML: &str = r#"
        [paths]
        forcings = "unused"

        [dimensions.time]
        start_year = 2000
        end_year = 2000

        [variables]
        forcings = ["gpp", "not_there"]

        [variable_names]
        gpp = "GPP"

        [variable_dtype]
        GPP = "f32"

        [variable_dimensions]
        GPP = ["time"]

        [variable_factor]
        GPP = 2.0
    "#;

    #[test]
    fn test_transfer_scales_and_casts() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("forcings.nc");
        write_source_file(&src_path, "gpp", &[1.5, 2.5, 3.5]);

        let config = Config::from_toml_str(TRANSFER_TOML).unwrap();
        let src = GroupDataset::resolve("forcings", &src_path).unwrap();
        let mut out = make_output(&dir.path().join("out.nc"), 3);

        transfer_group(&src, &mut out, &config).unwrap();

        let var = out.variable("GPP").expect("GPP should have been created");
        let data = var.get::<f32, _>(Extents::All).unwrap();
        assert_eq!(data.as_slice().unwrap(), &[3.0, 5.0, 7.0]);
        assert!(var.attribute("missing_value").is_some());
        // The absent source variable is skipped, not copied
        assert!(out.variable("not_there").is_none());
    }

    #[test]
    fn test_missing_dtype_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("forcings.nc");
        write_source_file(&src_path, "et", &[1.0]);

        let toml_str = r#"
            [paths]
            forcings = "unused"

            [dimensions.time]
            start_year = 2000
            end_year = 2000

            [variables]
            forcings = ["et"]
        "#;
        let config = Config::from_toml_str(toml_str).unwrap();
        let src = GroupDataset::resolve("forcings", &src_path).unwrap();
        let mut out = make_output(&dir.path().join("out.nc"), 1);

        let err = transfer_group(&src, &mut out, &config).unwrap_err();
        assert!(matches!(
            err.current_context(),
            TransferError::UnresolvedDestination(v) if v == "et"
        ));
    }

    #[test]
    fn test_time_length_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("forcings.nc");
        write_source_file(&src_path, "gpp", &[1.0, 2.0]);

        let config = Config::from_toml_str(TRANSFER_TOML).unwrap();
        let src = GroupDataset::resolve("forcings", &src_path).unwrap();
        // Output time axis has 5 records, the source only 2
        let mut out = make_output(&dir.path().join("out.nc"), 5);

        let err = transfer_group(&src, &mut out, &config).unwrap_err();
        assert!(matches!(
            err.current_context(),
            TransferError::DimLenMismatch { dimname, .. } if dimname == "time"
        ));
    }

    #[test]
    fn test_collision_policy_suffixes_pft_and_keeps_both() {
        let dir = tempfile::tempdir().unwrap();
        let grid_path = dir.path().join("grid.nc");
        let pft_path = dir.path().join("pft.nc");
        write_source_file(&grid_path, "area", &[1.0]);
        write_source_file(&pft_path, "area", &[2.0]);

        let toml_str = r#"
            [paths]
            grid = "unused"
            pft = "unused"

            [dimensions.time]
            start_year = 2000
            end_year = 2000

            [variables]
            grid = ["area"]
            pft = ["area"]

            [variable_dtype]
            area = "f32"
            area_pft = "f32"

            [variable_dimensions]
            area = ["time"]
            area_pft = ["time"]
        "#;
        let config = Config::from_toml_str(toml_str).unwrap();
        let mut out = make_output(&dir.path().join("out.nc"), 1);

        let grid = GroupDataset::resolve("grid", &grid_path).unwrap();
        transfer_group(&grid, &mut out, &config).unwrap();
        let pft = GroupDataset::resolve("pft", &pft_path).unwrap();
        transfer_group(&pft, &mut out, &config).unwrap();

        let area = out
            .variable("area")
            .unwrap()
            .get::<f32, _>(Extents::All)
            .unwrap();
        let area_pft = out
            .variable("area_pft")
            .unwrap()
            .get::<f32, _>(Extents::All)
            .unwrap();
        assert_eq!(area.as_slice().unwrap(), &[1.0]);
        assert_eq!(area_pft.as_slice().unwrap(), &[2.0]);
    }

    #[test]
    fn test_collision_without_suffix_group_still_disambiguates() {
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("a.nc");
        let b_path = dir.path().join("b.nc");
        write_source_file(&a_path, "x", &[1.0]);
        write_source_file(&b_path, "x", &[2.0]);

        let toml_str = r#"
            [paths]
            a = "unused"
            b = "unused"

            [dimensions.time]
            start_year = 2000
            end_year = 2000

            [variables]
            a = ["x"]
            b = ["x"]

            [collisions]
            suffix_groups = []

            [variable_dtype]
            x = "f64"
            x_b = "f64"

            [variable_dimensions]
            x = ["time"]
            x_b = ["time"]
        "#;
        let config = Config::from_toml_str(toml_str).unwrap();
        let mut out = make_output(&dir.path().join("out.nc"), 1);

        let a = GroupDataset::resolve("a", &a_path).unwrap();
        transfer_group(&a, &mut out, &config).unwrap();
        let b = GroupDataset::resolve("b", &b_path).unwrap();
        transfer_group(&b, &mut out, &config).unwrap();

        assert!(out.variable("x").is_some());
        assert!(out.variable("x_b").is_some());
    }
}
