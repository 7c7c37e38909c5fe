//! Format stage.
//!
//! Turns the raw per-partition downloads into one clean hourly file and one
//! daily-mean file per variable and calendar year: experiment versions are
//! collapsed, partitions concatenated, spatial axes normalized, partial edge
//! days trimmed, the variable renamed to its catalog identifier and any
//! declared unit rescale applied.

use std::fs;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::RunConfig;
use crate::error::DataError;
use crate::grid::codec::{self, Encoding};
use crate::grid::{Grid, Reducer};
use crate::resolver::ResolvedRequest;
use crate::stages::{data_file_name, decorate, files_by_year, Frequency, STAGE_RAW};

/// Collapses experiment versions of one window into a single grid. The list
/// comes version-sorted from the reader, so the primary version leads and its
/// values win wherever both are defined.
fn fold_versions(mut grids: Vec<Grid>) -> Result<Grid, DataError> {
    let mut merged = if grids.is_empty() {
        return Err(DataError::Empty);
    } else {
        grids.remove(0)
    };
    for secondary in grids {
        merged = merged.combine_first(&secondary)?;
    }
    merged.version = None;
    Ok(merged)
}

pub fn run(config: &RunConfig, catalog: &Catalog, resolved: &ResolvedRequest) -> Result<()> {
    for (id, base, _) in resolved.download_ids() {
        let var = catalog
            .get(&base)
            .with_context(|| format!("variable '{base}' vanished from the catalog"))?;

        let raw_dir = config.stage_dir(STAGE_RAW, &id);
        let by_year = files_by_year(&raw_dir)
            .with_context(|| format!("cannot list {}", raw_dir.display()))?;
        if by_year.is_empty() {
            warn!("{id}: no raw data fetched, nothing to format");
            continue;
        }

        let hour_dir = config.stage_dir(Frequency::Hour.as_str(), &id);
        let day_dir = config.stage_dir(Frequency::Day.as_str(), &id);
        fs::create_dir_all(&hour_dir)?;
        fs::create_dir_all(&day_dir)?;

        for (year, files) in by_year {
            let mut parts = Vec::with_capacity(files.len());
            for file in &files {
                match codec::read(file).and_then(fold_versions) {
                    Ok(grid) => parts.push(grid),
                    Err(error) => warn!("{}: {error}, skipping file", file.display()),
                }
            }
            if parts.is_empty() {
                warn!("{id} {year}: every raw file was unreadable");
                continue;
            }

            let mut hourly = Grid::concat_time(&parts)?.rename(&id);
            hourly.normalize_axes();
            let Some(mut hourly) = hourly.trim_partial_days() else {
                warn!("{id} {year}: only partial days fetched, nothing kept");
                continue;
            };
            if let Some(factor) = var.scale {
                hourly.scale(factor);
            }
            decorate(&mut hourly, catalog, &base, &config.area);

            write_stage_file(&hourly, config, &id, Frequency::Hour)?;
            let daily = hourly.to_daily(Reducer::Mean)?;
            write_stage_file(&daily, config, &id, Frequency::Day)?;
            info!("{id} {year}: {} hours formatted", hourly.time.len());
        }
    }
    Ok(())
}

/// Writes a grid into its stage directory, the file name recomputed from the
/// time axis it actually carries.
pub fn write_stage_file(
    grid: &Grid,
    config: &RunConfig,
    id: &str,
    frequency: Frequency,
) -> Result<()> {
    let first = grid.first_time().ok_or(DataError::Empty)?;
    let last = grid.last_time().ok_or(DataError::Empty)?;
    let path = config
        .stage_dir(frequency.as_str(), id)
        .join(data_file_name(id, frequency, &config.area.name, first, last));
    codec::write(grid, &path, &Encoding::for_grid(grid))
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}

// -- Tests -------------------------------------------------------------------
