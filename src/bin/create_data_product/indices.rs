use error_stack::ResultExt;
use itertools::Itertools;
use ndarray::{ArrayD, Zip};
use netcdf::Extents;
use wue_dp_rs::nc_utils::full_extents;

use crate::config::Config;
use crate::constants::{WUE_PLAUSIBLE_MAX, WUE_PLAUSIBLE_MIN};

#[derive(Debug, thiserror::Error)]
pub(crate) enum IndexError {
    #[error("Variables '{0}' and '{1}' have different shapes")]
    ShapeMismatch(String, String),
    #[error("An error occurred while {0}")]
    Context(String),
}

impl IndexError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}

/// Compute the water-use-efficiency indices from variables already
/// written to the output dataset.
///
/// Each index is only computed when all of its inputs are present;
/// anything else is skipped with an info message. Must run after every
/// transfer has completed, since the inputs are read back from the
/// output file.
pub(crate) fn compute_indices(
    out: &mut netcdf::FileMut,
    config: &Config,
) -> error_stack::Result<(), IndexError> {
    // Ecosystem water-use efficiency
    if has_all(out, &["GPP", "ET"]) {
        let gpp = read_input(out, "GPP")?;
        let et = read_input(out, "ET")?;
        check_shapes("GPP", &gpp, "ET", &et)?;
        let ewue = plausibility_filter(masked_ratio(&gpp, &et));
        write_index(out, config, "EWUE", "GPP", ewue)?;
    } else {
        log::info!("Skipping EWUE: requires both GPP and ET in the output");
    }

    // Transpiration water-use efficiency
    if has_all(out, &["GPP", "Tr"]) {
        let gpp = read_input(out, "GPP")?;
        let tr = read_input(out, "Tr")?;
        check_shapes("GPP", &gpp, "Tr", &tr)?;
        let twue = plausibility_filter(masked_ratio(&gpp, &tr));
        write_index(out, config, "TWUE", "GPP", twue)?;
    } else {
        log::info!("Skipping TWUE: requires both GPP and Tr in the output");
    }

    // Inherent water-use efficiency, via the conductance-like ratio
    // gc = Tr/VPD
    if has_all(out, &["GPP", "Tr", "VPD"]) {
        let gpp = read_input(out, "GPP")?;
        let tr = read_input(out, "Tr")?;
        let vpd = read_input(out, "VPD")?;
        check_shapes("GPP", &gpp, "Tr", &tr)?;
        check_shapes("Tr", &tr, "VPD", &vpd)?;
        let gc = masked_ratio(&tr, &vpd);
        let iwue = plausibility_filter(masked_ratio(&gpp, &gc));
        write_index(out, config, "IWUE", "GPP", iwue)?;
    } else {
        log::info!("Skipping IWUE: requires GPP, Tr, and VPD in the output");
    }

    Ok(())
}

fn has_all(out: &netcdf::FileMut, varnames: &[&str]) -> bool {
    varnames.iter().all(|v| out.variable(v).is_some())
}

fn read_input(out: &netcdf::FileMut, varname: &str) -> error_stack::Result<ArrayD<f64>, IndexError> {
    out.variable(varname)
        .ok_or_else(|| IndexError::context(format!("finding variable '{varname}'")))?
        .get::<f64, _>(Extents::All)
        .change_context_lazy(|| IndexError::context(format!("reading variable '{varname}'")))
}

fn check_shapes(
    name_a: &str,
    a: &ArrayD<f64>,
    name_b: &str,
    b: &ArrayD<f64>,
) -> Result<(), IndexError> {
    if a.shape() != b.shape() {
        return Err(IndexError::ShapeMismatch(
            name_a.to_string(),
            name_b.to_string(),
        ));
    }
    Ok(())
}

/// Elementwise `num/den`, undefined (NaN) where the divisor is zero.
/// NaN divisors propagate to NaN results.
fn masked_ratio(num: &ArrayD<f64>, den: &ArrayD<f64>) -> ArrayD<f64> {
    Zip::from(num)
        .and(den)
        .map_collect(|&n, &d| if d != 0.0 { n / d } else { f64::NAN })
}

/// Keep only values strictly inside the plausible interval; everything
/// else (including NaN) becomes undefined.
fn plausibility_filter(arr: ArrayD<f64>) -> ArrayD<f64> {
    arr.mapv(|v| {
        if v > WUE_PLAUSIBLE_MIN && v < WUE_PLAUSIBLE_MAX {
            v
        } else {
            f64::NAN
        }
    })
}

/// Create the index variable with the dimensions of `dims_like`, write
/// the values as `f32`, and apply the same missing-value/attribute
/// treatment as transferred variables.
fn write_index(
    out: &mut netcdf::FileMut,
    config: &Config,
    index_name: &str,
    dims_like: &str,
    values: ArrayD<f64>,
) -> error_stack::Result<(), IndexError> {
    let dims: Vec<String> = out
        .variable(dims_like)
        .ok_or_else(|| IndexError::context(format!("finding variable '{dims_like}'")))?
        .dimensions()
        .iter()
        .map(|d| d.name())
        .collect();
    let dim_refs = dims.iter().map(|d| d.as_str()).collect_vec();

    log::info!("writing variable {index_name} ({dims:?}, f32)");
    let data = values.mapv(|v| v as f32);

    let mut var = out
        .add_variable::<f32>(index_name, &dim_refs)
        .change_context_lazy(|| {
            IndexError::context(format!("creating variable '{index_name}'"))
        })?;
    var.set_fill_value(config.fill_value as f32)
        .change_context_lazy(|| {
            IndexError::context(format!("setting the fill value of variable '{index_name}'"))
        })?;
    var.put(data.view(), full_extents(data.shape()))
        .change_context_lazy(|| IndexError::context(format!("writing variable '{index_name}'")))?;

    var.put_attribute("missing_value", config.fill_value as f32)
        .change_context_lazy(|| {
            IndexError::context(format!(
                "adding 'missing_value' attribute to variable '{index_name}'"
            ))
        })?;
    if let Some(attrs) = config.variable_attributes.get(index_name) {
        for (attr, value) in attrs.iter() {
            var.put_attribute(attr, netcdf::AttributeValue::from(value))
                .change_context_lazy(|| {
                    IndexError::context(format!(
                        "adding '{attr}' attribute to variable '{index_name}'"
                    ))
                })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use ndarray::Array1;

    use super::*;
    use crate::config::Config;

    fn arr(values: &[f64]) -> ArrayD<f64> {
        Array1::from_vec(values.to_vec()).into_dyn()
    }

    #[test]
    fn test_masked_ratio_zero_divisor() {
        let out = masked_ratio(&arr(&[10.0, 20.0, 0.0]), &arr(&[2.0, 0.0, 5.0]));
        assert_eq!(out[[0]], 5.0);
        assert!(out[[1]].is_nan());
        assert_eq!(out[[2]], 0.0);
    }

    #[test]
    fn test_masked_ratio_nan_divisor_propagates() {
        let out = masked_ratio(&arr(&[1.0]), &arr(&[f64::NAN]));
        assert!(out[[0]].is_nan());
    }

    #[test]
    fn test_plausibility_filter_is_strict_open_interval() {
        let out = plausibility_filter(arr(&[5.0, 0.0, -1.0, 30.0, 29.999, 1e-9, f64::NAN]));
        assert_eq!(out[[0]], 5.0);
        assert!(out[[1]].is_nan());
        assert!(out[[2]].is_nan());
        assert!(out[[3]].is_nan());
        assert_eq!(out[[4]], 29.999);
        assert_eq!(out[[5]], 1e-9);
        assert!(out[[6]].is_nan());
    }

    #[test]
    fn test_ewue_scenario() {
        // GPP = [10, 20, 0], ET = [2, 0, 5] -> EWUE = [5, NaN, NaN]
        let ewue = plausibility_filter(masked_ratio(
            &arr(&[10.0, 20.0, 0.0]),
            &arr(&[2.0, 0.0, 5.0]),
        ));
        assert_eq!(ewue[[0]], 5.0);
        assert!(ewue[[1]].is_nan());
        assert!(ewue[[2]].is_nan());
    }

    #[test]
    fn test_iwue_chain() {
        let gpp = arr(&[2.0, 2.0, 2.0]);
        let tr = arr(&[1.0, 0.0, 1.0]);
        let vpd = arr(&[0.5, 1.0, 0.0]);
        let gc = masked_ratio(&tr, &vpd);
        let iwue = plausibility_filter(masked_ratio(&gpp, &gc));
        // gc = [2, 0, NaN]; GPP/gc = [1, NaN, NaN]
        approx::assert_abs_diff_eq!(iwue[[0]], 1.0);
        assert!(iwue[[1]].is_nan());
        assert!(iwue[[2]].is_nan());
    }

    fn build_output_with(path: &Path, vars: &[(&str, &[f64])]) -> netcdf::FileMut {
        let mut ds = netcdf::create(path).unwrap();
        ds.add_dimension("time", 0).unwrap();
        for (name, values) in vars {
            let mut var = ds.add_variable::<f64>(name, &["time"]).unwrap();
            var.put_values(values, full_extents(&[values.len()]))
                .unwrap();
        }
        ds
    }

    static INDEX_TOML: &str = r#"
        [paths]

        [dimensions.time]
        start_year = 2000
        end_year = 2000

        [variable_attributes.EWUE]
        units = "gC kg-1 H2O"
    "#;

    #[test]
    fn test_compute_indices_writes_ewue_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = build_output_with(
            &dir.path().join("out.nc"),
            &[("GPP", &[10.0, 20.0, 0.0]), ("ET", &[2.0, 0.0, 5.0])],
        );
        let config = Config::from_toml_str(INDEX_TOML).unwrap();

        compute_indices(&mut out, &config).unwrap();

        let ewue = out
            .variable("EWUE")
            .expect("EWUE should have been created")
            .get::<f32, _>(Extents::All)
            .unwrap();
        approx::assert_abs_diff_eq!(ewue[[0]], 5.0);
        assert!(ewue[[1]].is_nan());
        assert!(ewue[[2]].is_nan());

        // Tr and VPD are absent, so the other indices are skipped
        assert!(out.variable("TWUE").is_none());
        assert!(out.variable("IWUE").is_none());
    }

    #[test]
    fn test_compute_indices_all_absent_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = build_output_with(&dir.path().join("out.nc"), &[("lat", &[1.0])]);
        let config = Config::from_toml_str(INDEX_TOML).unwrap();
        compute_indices(&mut out, &config).unwrap();
        assert!(out.variable("EWUE").is_none());
    }
}
