//! Loader-supplied metadata: build date, linker version, import slots.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Build date in `yyyymmdd` form, e.g. `20100803`.
///
/// Comparisons against the empirical thresholds in [`crate::facts::Thresholds`]
/// are plain integer comparisons on this value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BuildDate(u32);

impl BuildDate {
    pub const fn new(yyyymmdd: u32) -> Self {
        Self(yyyymmdd)
    }

    /// Derive the date from a PE header `TimeDateStamp` (Unix seconds, UTC).
    pub fn from_timestamp(secs: i64) -> Option<Self> {
        let date = DateTime::from_timestamp(secs, 0)?.date_naive();
        Some(Self::from_date(date))
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.year() as u32 * 10000 + date.month() * 100 + date.day())
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn as_date(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt((self.0 / 10000) as i32, (self.0 / 100) % 100, self.0 % 100)
    }
}

impl fmt::Display for BuildDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Major/minor linker version from the optional header (e.g. VC14.29 → `14.29`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LinkerVersion {
    pub major: u8,
    pub minor: u8,
}

impl LinkerVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// The `major.minor` string used to tell toolchains apart.
    pub fn full(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for LinkerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One import address table slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub module: String,
    pub function: String,
    /// VIRTUAL address of the IAT slot
    pub address: u32,
}

impl Import {
    pub fn matches(&self, function: &str, module: Option<&str>) -> bool {
        self.function == function
            && module.is_none_or(|m| self.module.eq_ignore_ascii_case(m))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub build_date: BuildDate,
    pub linker: LinkerVersion,
    /// Base name of the loaded file, used in reports
    pub file_name: String,
    /// PHYSICAL offset of the resource directory, if the image has one
    pub resource_dir: Option<u32>,
}
