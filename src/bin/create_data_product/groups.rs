use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use wue_dp_rs::nc_utils::NcArray;

use crate::constants::DATA_FILE_EXTENSION;

#[derive(Debug, thiserror::Error)]
pub(crate) enum GroupError {
    #[error("No data files found for group '{0}'")]
    NoFiles(String),
    #[error("Error enumerating data files under {}", .0.display())]
    ListDir(PathBuf),
    #[error("Error opening data file {}", .0.display())]
    Open(PathBuf),
    #[error("Variable '{varname}' is missing from {}", .path.display())]
    MissingVariable { varname: String, path: PathBuf },
    #[error("An error occurred while {0}")]
    Context(String),
}

impl GroupError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}

/// One source group exposed as a single logical read-only dataset.
///
/// A group backed by several files is concatenated virtually: variables
/// laid out along the record (unlimited) dimension are read from every
/// file and joined, anything else comes from the first file alone.
#[derive(Debug)]
pub(crate) struct GroupDataset {
    name: String,
    files: Vec<netcdf::File>,
    paths: Vec<PathBuf>,
    record_dim: Option<String>,
}

impl GroupDataset {
    /// Locate and open the file(s) backing `group` at the configured path.
    ///
    /// A path naming a `.nc` file is opened directly; a directory is
    /// searched non-recursively for `*.nc` entries, which are then
    /// sorted lexically by filename. Concatenation order must not
    /// depend on filesystem listing order.
    pub(crate) fn resolve(group: &str, path: &Path) -> error_stack::Result<Self, GroupError> {
        let file_paths = find_group_files(path)?;
        if file_paths.is_empty() {
            return Err(GroupError::NoFiles(group.to_string()).into());
        }

        let mut files = Vec::with_capacity(file_paths.len());
        for p in file_paths.iter() {
            let f = netcdf::open(p).change_context_lazy(|| GroupError::Open(p.clone()))?;
            files.push(f);
        }

        let record_dim = files[0]
            .dimensions()
            .find(|d| d.is_unlimited())
            .map(|d| d.name());

        log::debug!(
            "group '{group}' resolved to {} file(s), record dimension {record_dim:?}",
            files.len()
        );

        Ok(Self {
            name: group.to_string(),
            files,
            paths: file_paths,
            record_dim,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn has_variable(&self, varname: &str) -> bool {
        self.files[0].variable(varname).is_some()
    }

    /// Read a variable's full data, concatenating across the backing
    /// files when the variable is laid out along the record dimension.
    pub(crate) fn read(&self, varname: &str) -> error_stack::Result<NcArray, GroupError> {
        let var = self.files[0].variable(varname).ok_or_else(|| {
            GroupError::MissingVariable {
                varname: varname.to_string(),
                path: self.paths[0].clone(),
            }
        })?;

        let axis = match self.record_axis(&var) {
            Some(axis) if self.files.len() > 1 => axis,
            _ => {
                return NcArray::get_from(&var).change_context_lazy(|| {
                    GroupError::context(format!(
                        "reading variable '{varname}' from {}",
                        self.paths[0].display()
                    ))
                });
            }
        };
        let mut parts = Vec::with_capacity(self.files.len());
        for (f, p) in self.files.iter().zip(self.paths.iter()) {
            let part_var = f.variable(varname).ok_or_else(|| GroupError::MissingVariable {
                varname: varname.to_string(),
                path: p.clone(),
            })?;
            let part = NcArray::get_from(&part_var).change_context_lazy(|| {
                GroupError::context(format!(
                    "reading variable '{varname}' from {}",
                    p.display()
                ))
            })?;
            parts.push(part);
        }

        NcArray::concat(parts, axis).change_context_lazy(|| {
            GroupError::context(format!(
                "concatenating variable '{varname}' across the files of group '{}'",
                self.name
            ))
        })
    }

    /// Position of the record dimension in this variable's dimension
    /// list, if the group has one and the variable uses it.
    fn record_axis(&self, var: &netcdf::Variable) -> Option<usize> {
        let record_dim = self.record_dim.as_deref()?;
        var.dimensions()
            .iter()
            .position(|d| d.name() == record_dim)
    }
}

fn find_group_files(path: &Path) -> Result<Vec<PathBuf>, GroupError> {
    if path.is_file() {
        let matches = path
            .extension()
            .map(|ext| ext == DATA_FILE_EXTENSION)
            .unwrap_or(false);
        if matches {
            return Ok(vec![path.to_path_buf()]);
        } else {
            return Ok(vec![]);
        }
    }

    if !path.is_dir() {
        return Ok(vec![]);
    }

    let pattern = format!("{}/*.{}", path.display(), DATA_FILE_EXTENSION);
    let entries =
        glob::glob(&pattern).map_err(|_| GroupError::ListDir(path.to_path_buf()))?;

    let mut files = vec![];
    for entry in entries {
        let entry = entry.map_err(|_| GroupError::ListDir(path.to_path_buf()))?;
        files.push(entry);
    }
    files.sort();

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wue_dp_rs::nc_utils::full_extents;

    fn write_record_file(path: &Path, values: &[f64]) {
        let mut ds = netcdf::create(path).unwrap();
        ds.add_dimension("time", 0).unwrap();
        let mut var = ds.add_variable::<f64>("v", &["time"]).unwrap();
        var.put_values(values, full_extents(&[values.len()])).unwrap();
    }

    #[test]
    fn test_find_files_sorts_lexically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["2001.nc", "2000.nc", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let found = find_group_files(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["2000.nc", "2001.nc"]);
    }

    #[test]
    fn test_single_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coords.nc");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(find_group_files(&path).unwrap(), vec![path]);
    }

    #[test]
    fn test_other_extension_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coords.csv");
        std::fs::write(&path, b"").unwrap();
        assert!(find_group_files(&path).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_empty_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = GroupDataset::resolve("forcings", dir.path()).unwrap_err();
        assert!(matches!(
            err.current_context(),
            GroupError::NoFiles(g) if g == "forcings"
        ));
    }

    #[test]
    fn test_multi_file_concatenation_in_lexical_order() {
        let dir = tempfile::tempdir().unwrap();
        // Written out of order on purpose; reads must still come back
        // 2000 then 2001.
        write_record_file(&dir.path().join("2001.nc"), &[30.0, 40.0, 50.0]);
        write_record_file(&dir.path().join("2000.nc"), &[10.0, 20.0]);

        let group = GroupDataset::resolve("forcings", dir.path()).unwrap();
        assert!(group.has_variable("v"));

        let data = group.read("v").unwrap().into_f64();
        assert_eq!(data.shape(), &[5]);
        assert_eq!(
            data.as_slice().unwrap(),
            &[10.0, 20.0, 30.0, 40.0, 50.0]
        );
    }

    #[test]
    fn test_non_record_variable_reads_first_file() {
        let dir = tempfile::tempdir().unwrap();
        for (name, lat) in [("a.nc", 1.5), ("b.nc", 9.9)] {
            let mut ds = netcdf::create(dir.path().join(name)).unwrap();
            ds.add_dimension("time", 0).unwrap();
            ds.add_dimension("lat", 1).unwrap();
            let mut var = ds.add_variable::<f64>("lat", &["lat"]).unwrap();
            var.put_values(&[lat], full_extents(&[1])).unwrap();
        }

        let group = GroupDataset::resolve("coords", dir.path()).unwrap();
        let data = group.read("lat").unwrap().into_f64();
        assert_eq!(data.as_slice().unwrap(), &[1.5]);
    }
}
