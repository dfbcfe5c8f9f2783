pub mod error;
pub mod logging;
pub mod nc_utils;
pub mod subset;
pub mod utils;
