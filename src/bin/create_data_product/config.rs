//! The data product assembler is driven entirely by one TOML document
//! describing where the source groups live and how their variables map
//! onto the output schema. The document has a required core (`paths`,
//! `dimensions`) and a set of optional mapping tables that default to
//! empty when omitted.
//!
//! # Paths
//!
//! Each source group names either a single data file or a directory
//! that will be searched (non-recursively) for `*.nc` files:
//!
//! ```toml
//! [paths]
//! coords = "/data/coords/coords.nc"
//! forcings = "/data/forcings"
//! ```
//!
//! When a directory contains several files they are opened as one
//! logical dataset, concatenated along the record dimension in lexical
//! filename order.
//!
//! # Dimensions
//!
//! Every output dimension must be declared. Fixed dimensions need a
//! `size`; the `time` dimension is always unlimited and instead carries
//! the description of the time axis to synthesize:
//!
//! ```toml
//! [dimensions.lat]
//! size = 360
//!
//! [dimensions.time]
//! unlimited = true
//! start_year = 2000
//! end_year = 2002
//! day_step = 1
//! leap_day = false
//! ```
//!
//! The older relative form (`years = 3`, `day_step = 1`) is still
//! accepted; it produces the fixed-365-day grid that earlier products
//! were generated with.
//!
//! # Variable selection and mapping
//!
//! `variables` lists, per group, the source variables to copy, in the
//! order they should appear in the output. The remaining tables are
//! keyed by the *destination* name (after renaming and any collision
//! suffix): `variable_names` renames, `variable_factor` rescales,
//! `variable_dtype` and `variable_dimensions` are required for every
//! destination variable, and `variable_attributes` sets attributes.
//!
//! ```toml
//! [variables]
//! coords = ["lat", "lon"]
//! forcings = ["gpp"]
//!
//! [variable_names]
//! gpp = "GPP"
//!
//! [variable_dtype]
//! lat = "f64"
//! lon = "f64"
//! GPP = "f32"
//!
//! [variable_dimensions]
//! lat = ["lat"]
//! lon = ["lon"]
//! GPP = ["time", "lat", "lon"]
//!
//! [variable_factor]
//! GPP = 86400.0
//!
//! [variable_attributes.GPP]
//! units = "gC m-2 d-1"
//! long_name = "gross primary production"
//! ```
//!
//! Because the product is written in the classic data model, the
//! accepted destination dtypes are `i8`, `i16`, `i32`, `f32`, and `f64`.
//!
//! # Collisions
//!
//! Two groups may legitimately select variables that map to the same
//! destination name. On a collision, or always for groups listed in
//! `collisions.suffix_groups` (default `["pft"]`), the group name is
//! appended to keep the destination unique and traceable:
//!
//! ```toml
//! [collisions]
//! suffix_groups = ["pft"]
//! ```
//!
//! # Other settings
//!
//! `groups` fixes the processing order explicitly (default: the key
//! order of the `variables` table), `fill_value` sets the fill for
//! created variables (default NaN), and `global_attributes` are copied
//! onto the output file verbatim.
use std::{io::Read, path::{Path, PathBuf}};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::constants::TIME_DIM_NAME;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("Error reading configuration file {}: {err}", .path.display())]
    Read { path: PathBuf, err: String },
    #[error("Configuration file is empty or invalid: {0}")]
    Parse(String),
    #[error("Configuration is missing required section '{0}'")]
    MissingSection(String),
    #[error("No path configured for group '{0}'")]
    MissingGroupPath(String),
    #[error("Dimension '{0}' must either have a size or be unlimited")]
    MissingDimSize(String),
    #[error("Dimension 'time' must give either start_year/end_year or years, plus an optional day_step")]
    BadTimeSpec,
    #[error("Time axis years {0}..{1} are not an increasing range")]
    BadYearRange(i32, i32),
}

/// Configuration for one assembly run.
///
/// Users should see the [module level documentation](crate::config) for
/// the file format; the structure level documentation here is for
/// developers. Normally built with [`Config::from_toml_file`], which
/// parses and then validates the cross-section invariants (the time
/// dimension resolves, every group has a path, fixed dimensions have
/// sizes).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Where each group's data lives: a single `.nc` file or a directory.
    pub(crate) paths: IndexMap<String, PathBuf>,

    /// Output dimensions, including the synthesized `time` axis.
    pub(crate) dimensions: IndexMap<String, DimensionSpec>,

    /// Source variables to copy, per group, in output order.
    #[serde(default)]
    pub(crate) variables: IndexMap<String, Vec<String>>,

    /// Explicit group processing order; defaults to the key order of
    /// `variables` when empty.
    #[serde(default)]
    pub(crate) groups: Vec<String>,

    /// Source name to destination name renames.
    #[serde(default)]
    pub(crate) variable_names: IndexMap<String, String>,

    /// Attributes to set on each destination variable.
    #[serde(default)]
    pub(crate) variable_attributes: IndexMap<String, IndexMap<String, AttrValue>>,

    /// Multiplicative scale applied while copying; 1.0 when absent.
    #[serde(default)]
    pub(crate) variable_factor: IndexMap<String, f64>,

    /// Storage type of each destination variable.
    #[serde(default)]
    pub(crate) variable_dtype: IndexMap<String, VarType>,

    /// Dimension names of each destination variable.
    #[serde(default)]
    pub(crate) variable_dimensions: IndexMap<String, Vec<String>>,

    /// Attributes copied onto the output file itself.
    #[serde(default)]
    pub(crate) global_attributes: IndexMap<String, AttrValue>,

    /// Destination-name collision handling.
    #[serde(default)]
    pub(crate) collisions: CollisionConfig,

    /// Fill value for created variables.
    #[serde(default = "default_fill_value")]
    pub(crate) fill_value: f64,
}

impl Config {
    pub(crate) fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn from_toml_file(p: &Path) -> Result<Self, ConfigError> {
        let mut f = std::fs::File::open(p).map_err(|e| ConfigError::Read {
            path: p.to_path_buf(),
            err: e.to_string(),
        })?;
        let mut buf = String::new();
        f.read_to_string(&mut buf).map_err(|e| ConfigError::Read {
            path: p.to_path_buf(),
            err: e.to_string(),
        })?;
        Self::from_toml_str(&buf)
    }

    /// The groups to process, in order.
    pub(crate) fn group_order(&self) -> Vec<&str> {
        if !self.groups.is_empty() {
            self.groups.iter().map(|g| g.as_str()).collect()
        } else {
            self.variables.keys().map(|g| g.as_str()).collect()
        }
    }

    pub(crate) fn group_path(&self, group: &str) -> Result<&Path, ConfigError> {
        self.paths
            .get(group)
            .map(|p| p.as_path())
            .ok_or_else(|| ConfigError::MissingGroupPath(group.to_string()))
    }

    /// Resolve the `time` dimension entry into a concrete axis description.
    pub(crate) fn time_spec(&self) -> Result<TimeSpec, ConfigError> {
        let dim = self
            .dimensions
            .get(TIME_DIM_NAME)
            .ok_or_else(|| ConfigError::MissingSection(format!("dimensions.{TIME_DIM_NAME}")))?;
        dim.time_spec()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.time_spec()?;
        for group in self.group_order() {
            if !self.paths.contains_key(group) {
                return Err(ConfigError::MissingGroupPath(group.to_string()));
            }
        }
        for (name, spec) in self.dimensions.iter() {
            if name != TIME_DIM_NAME && !spec.unlimited && spec.size.is_none() {
                return Err(ConfigError::MissingDimSize(name.clone()));
            }
        }
        Ok(())
    }
}

/// One entry of the `dimensions` table. Fixed dimensions use `size`
/// and/or `unlimited`; the `time` entry uses the year fields instead.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DimensionSpec {
    #[serde(default)]
    pub(crate) size: Option<usize>,
    #[serde(default)]
    pub(crate) unlimited: bool,
    #[serde(default)]
    pub(crate) start_year: Option<i32>,
    #[serde(default)]
    pub(crate) end_year: Option<i32>,
    #[serde(default)]
    pub(crate) years: Option<u32>,
    #[serde(default)]
    pub(crate) day_step: Option<u32>,
    #[serde(default)]
    pub(crate) leap_day: Option<bool>,
}

impl DimensionSpec {
    fn time_spec(&self) -> Result<TimeSpec, ConfigError> {
        let day_step = match self.day_step {
            Some(0) => return Err(ConfigError::BadTimeSpec),
            Some(step) => step,
            None => 1,
        };

        match (self.start_year, self.end_year, self.years) {
            (Some(start_year), Some(end_year), None) => {
                if end_year < start_year {
                    return Err(ConfigError::BadYearRange(start_year, end_year));
                }
                Ok(TimeSpec::Calendar {
                    start_year,
                    end_year,
                    day_step,
                    leap_day: self.leap_day.unwrap_or(true),
                })
            }
            (None, None, Some(years)) => Ok(TimeSpec::Relative { years, day_step }),
            _ => Err(ConfigError::BadTimeSpec),
        }
    }
}

/// The resolved description of the canonical time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeSpec {
    /// Real calendar days from `start_year`-01-01 through
    /// `end_year`-12-31, resampled per year at `day_step`.
    Calendar {
        start_year: i32,
        end_year: i32,
        day_step: u32,
        leap_day: bool,
    },
    /// The original fixed-365-day grid: day-of-year values 1..365
    /// stepped by `day_step`, offset by 365 per year.
    Relative { years: u32, day_step: u32 },
}

/// Storage types creatable in the classic data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub(crate) enum VarType {
    #[serde(rename = "i8", alias = "byte")]
    I8,
    #[serde(rename = "i16", alias = "short")]
    I16,
    #[serde(rename = "i32", alias = "int", alias = "int32")]
    I32,
    #[serde(rename = "f32", alias = "float", alias = "float32")]
    F32,
    #[serde(rename = "f64", alias = "double", alias = "float64")]
    F64,
}

impl std::fmt::Display for VarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarType::I8 => write!(f, "i8"),
            VarType::I16 => write!(f, "i16"),
            VarType::I32 => write!(f, "i32"),
            VarType::F32 => write!(f, "f32"),
            VarType::F64 => write!(f, "f64"),
        }
    }
}

/// A scalar attribute value as written in the TOML document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl From<&AttrValue> for netcdf::AttributeValue {
    fn from(value: &AttrValue) -> Self {
        match value {
            AttrValue::Str(s) => netcdf::AttributeValue::Str(s.clone()),
            // The classic data model has no 64-bit attribute type
            AttrValue::Int(i) => match i32::try_from(*i) {
                Ok(i) => netcdf::AttributeValue::Int(i),
                Err(_) => netcdf::AttributeValue::Double(*i as f64),
            },
            AttrValue::Float(f) => netcdf::AttributeValue::Double(*f),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CollisionConfig {
    /// Groups whose variables always get the `_{group}` suffix, on top
    /// of the unconditional suffixing on an actual name collision.
    #[serde(default = "default_suffix_groups")]
    pub(crate) suffix_groups: Vec<String>,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            suffix_groups: default_suffix_groups(),
        }
    }
}

fn default_suffix_groups() -> Vec<String> {
    vec!["pft".to_string()]
}

fn default_fill_value() -> f64 {
    f64::NAN
}
