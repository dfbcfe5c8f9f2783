/// Name of the record dimension shared by all time-indexed variables.
pub(crate) const TIME_DIM_NAME: &str = "time";

/// File extension recognized when enumerating group data files.
pub(crate) const DATA_FILE_EXTENSION: &str = "nc";

/// Open interval of physically plausible water-use-efficiency ratios;
/// values at or outside these bounds are treated as missing.
pub(crate) const WUE_PLAUSIBLE_MIN: f64 = 0.0;
pub(crate) const WUE_PLAUSIBLE_MAX: f64 = 30.0;
