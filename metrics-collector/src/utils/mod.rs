//! Utility functions for day arithmetic and file persistence.

pub mod dates;
pub mod fs;

pub use dates::{days_between, format_day, normalize_period, parse_day, DAY_FORMAT};
pub use fs::{backup_path, path_lock, write_atomic};
