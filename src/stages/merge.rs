//! Merge stage.
//!
//! Reconciles the freshly produced per-year files with the persistent
//! archive. New values win over archived ones wherever both are defined, the
//! archived series fills everything else, and the merged file is renamed to
//! the date range it actually spans before the superseded file is removed.
//! An archive file that exists but cannot be read is treated as corruption
//! and aborts the run; silently overwriting it could destroy data no longer
//! available upstream.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::error::DataError;
use crate::grid::codec::{self, Encoding};
use crate::grid::Grid;
use crate::stages::{data_file_name, files_by_year, Frequency};

pub fn run(config: &RunConfig) -> Result<()> {
    for cvar in &config.cvars {
        merge_frequency(config, cvar, Frequency::Day)?;
        if config.keep_hourly {
            merge_frequency(config, cvar, Frequency::Hour)?;
        }
    }
    Ok(())
}

fn merge_frequency(config: &RunConfig, cvar: &str, frequency: Frequency) -> Result<()> {
    let stage_dir = config.stage_dir(frequency.as_str(), cvar);
    let new_by_year = files_by_year(&stage_dir)?;
    if new_by_year.is_empty() {
        // Daily extremes produce no hourly series, and a variable may have
        // yielded nothing at all this run.
        return Ok(());
    }

    let archive_dir = config.archive_dir(frequency, cvar);
    fs::create_dir_all(&archive_dir)
        .with_context(|| format!("cannot create {}", archive_dir.display()))?;
    let old_by_year = files_by_year(&archive_dir)?;

    for (year, new_files) in new_by_year {
        let new_path = &new_files[0];
        let old_files = old_by_year.get(&year).map(Vec::as_slice).unwrap_or(&[]);

        if old_files.is_empty() {
            let file_name = new_path.file_name().unwrap_or_default();
            let target = archive_dir.join(file_name);
            // Copy via a temp name so the archive never holds a half-written
            // file, the same discipline the codec writer follows.
            let staging = target.with_extension("tmp");
            fs::copy(new_path, &staging)
                .and_then(|_| fs::rename(&staging, &target))
                .with_context(|| format!("cannot publish {}", new_path.display()))?;
            info!("{cvar} {} {year}: new archive file", frequency.as_str());
            continue;
        }

        let mut merged = read_one(new_path)?;
        for old_path in old_files {
            let archived = read_archived(old_path)?;
            merged = merged.combine_first(&archived)?;
        }

        let first = merged.first_time().ok_or(DataError::Empty)?;
        let last = merged.last_time().ok_or(DataError::Empty)?;
        let merged_path =
            archive_dir.join(data_file_name(cvar, frequency, &config.area.name, first, last));
        codec::write(&merged, &merged_path, &Encoding::for_grid(&merged))
            .with_context(|| format!("cannot write {}", merged_path.display()))?;

        // Remove superseded files only after the merged one is in place.
        for old_path in old_files {
            if *old_path != merged_path {
                if let Err(error) = fs::remove_file(old_path) {
                    warn!("cannot remove superseded {}: {error}", old_path.display());
                }
            }
        }
        info!(
            "{cvar} {} {year}: merged {} steps",
            frequency.as_str(),
            merged.time.len()
        );
    }
    Ok(())
}

fn read_one(path: &Path) -> Result<Grid, DataError> {
    Ok(codec::read(path)?.remove(0))
}

/// Reads an archive file, reporting failure as corruption rather than a
/// malformed input.
fn read_archived(path: &Path) -> Result<Grid, DataError> {
    read_one(path).map_err(|error| match error {
        DataError::Malformed { path, reason } => DataError::CorruptArchive { path, reason },
        other => other,
    })
}

// -- Tests -------------------------------------------------------------------
