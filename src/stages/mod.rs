//! Pipeline stages.
//!
//! Each stage completes fully before the next starts: fetch fills the raw
//! tree, format produces normalized hourly and daily files per year, derived
//! variables are computed from the materialized hourly files, and merge
//! reconciles everything with the persistent archive.

pub mod derived;
pub mod fetch;
pub mod format;
pub mod merge;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::catalog::{Area, Catalog};
use crate::config::DATASET_NAME;
use crate::grid::codec::FILE_EXT;
use crate::grid::Grid;

/// Stage directory for raw store downloads. The hourly and daily stage
/// directories share their names with [`Frequency`].
pub const STAGE_RAW: &str = "raw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Hour,
    Day,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Hour => "hour",
            Frequency::Day => "day",
        }
    }

    /// Timestamp tag used in file names at this frequency.
    pub fn tag(&self, stamp: NaiveDateTime) -> String {
        match self {
            Frequency::Hour => stamp.format("%Y%m%d%H").to_string(),
            Frequency::Day => stamp.format("%Y%m%d").to_string(),
        }
    }
}

/// Canonical file name, e.g. `ERA5_tas_day_europe_20220101-20221231.json.gz`.
/// The date range is always recomputed from the data the file actually holds.
pub fn data_file_name(
    cvar: &str,
    frequency: Frequency,
    area_name: &str,
    first: NaiveDateTime,
    last: NaiveDateTime,
) -> String {
    format!(
        "{}_{}_{}_{}_{}-{}.{}",
        DATASET_NAME,
        cvar,
        frequency.as_str(),
        area_name,
        frequency.tag(first),
        frequency.tag(last),
        FILE_EXT
    )
}

/// Calendar year encoded in a data file name (first four digits of the
/// trailing date-range segment).
pub fn year_of(file_name: &str) -> Option<i32> {
    let segment = file_name.rsplit('_').next()?;
    segment.get(..4)?.parse().ok()
}

/// Files in a directory grouped by the year their names encode, names sorted
/// within each year. A missing directory is an empty result, not an error.
pub fn files_by_year(dir: &Path) -> std::io::Result<BTreeMap<i32, Vec<PathBuf>>> {
    let mut by_year: BTreeMap<i32, Vec<PathBuf>> = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(by_year);
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(year) = year_of(name) {
            by_year.entry(year).or_default().push(path);
        }
    }
    Ok(by_year)
}

/// Attaches the catalog metadata and the global attributes to a grid.
pub fn decorate(grid: &mut Grid, catalog: &Catalog, base: &str, area: &Area) {
    for (key, value) in catalog.attrs(base) {
        grid.attrs.insert(key, value);
    }
    grid.attrs
        .insert("title".to_string(), "reanalysis-era5".to_string());
    grid.attrs
        .insert("Conventions".to_string(), "CF-1.6".to_string());
    grid.attrs.insert(
        "source".to_string(),
        "https://cds.climate.copernicus.eu".to_string(),
    );
    if area.name.starts_with("box") {
        grid.attrs.insert(
            "comment_area".to_string(),
            "The area in the file name shifts longitudes by +180 and latitudes by +90 so the name carries only positive values; the coordinates themselves live in -180/180 and -90/90.".to_string(),
        );
    }
}

// -- Tests -------------------------------------------------------------------
