//! Run configuration.
//!
//! All user input is validated here, once, before any network or disk
//! activity. The resulting config is immutable and passed by reference into
//! every stage. It also owns the temporary working tree, which is removed
//! recursively when the run ends.

use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use tempfile::TempDir;
use tracing::info;

use crate::catalog::{Area, Catalog};
use crate::cli::Cli;
use crate::error::InputError;
use crate::stages::Frequency;

pub const DATASET_NAME: &str = "ERA5";

pub struct RunConfig {
    /// Inclusive requested period.
    pub period: (NaiveDate, NaiveDate),
    /// Requested variable identifiers, validated against the catalog.
    pub cvars: Vec<String>,
    pub area: Area,
    /// Root of the persistent archive tree, `<output-dir>/ERA5`.
    pub archive_root: PathBuf,
    pub keep_hourly: bool,
    tmp: TempDir,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli, catalog: &Catalog) -> Result<RunConfig, InputError> {
        let period = parse_period(&cli.period, Utc::now().date_naive())?;

        let cvars: Vec<String> = cli
            .cvar
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if cvars.is_empty() {
            return Err(InputError::NoVariables);
        }
        for cvar in &cvars {
            if !catalog.is_available(cvar) {
                return Err(InputError::UnknownVariable(cvar.clone()));
            }
        }

        let area = Area::parse(&cli.area)?;

        if !cli.output_dir.is_dir() {
            return Err(InputError::MissingOutputDir(cli.output_dir.clone()));
        }
        let archive_root = cli.output_dir.join(DATASET_NAME);

        let tmp = make_tmp_dir(cli.tmp.as_deref())?;

        Ok(RunConfig {
            period,
            cvars,
            area,
            archive_root,
            keep_hourly: cli.keep_hourly,
            tmp,
        })
    }

    /// Per-stage, per-variable working directory, e.g. `<tmp>/raw/tas`.
    pub fn stage_dir(&self, stage: &str, cvar: &str) -> PathBuf {
        self.tmp.path().join(stage).join(cvar)
    }

    /// Final archive directory for one variable and frequency.
    pub fn archive_dir(&self, frequency: Frequency, cvar: &str) -> PathBuf {
        self.archive_root
            .join(&self.area.name)
            .join(frequency.as_str())
            .join(cvar)
    }

    pub fn log_parameters(&self) {
        info!("Input parameters:");
        info!("   * period     : {} / {}", self.period.0, self.period.1);
        info!("   * cvars      : {}", self.cvars.join(","));
        info!(
            "   * area       : {} ({},{},{},{})",
            self.area.name, self.area.lon_min, self.area.lon_max, self.area.lat_min, self.area.lat_max
        );
        info!("   * output     : {}", self.archive_root.display());
        info!("   * tmp        : {}", self.tmp.path().display());
        info!("   * keep_hourly: {}", self.keep_hourly);
    }

    #[cfg(test)]
    pub(crate) fn for_tests(archive_root: &std::path::Path, keep_hourly: bool) -> RunConfig {
        RunConfig {
            period: (
                NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
            ),
            cvars: vec![],
            area: Area::named("europe").unwrap(),
            archive_root: archive_root.to_path_buf(),
            keep_hourly,
            tmp: TempDir::new().unwrap(),
        }
    }
}

fn make_tmp_dir(base: Option<&std::path::Path>) -> Result<TempDir, InputError> {
    let prefix = format!("CDSUPDATE_{}_", Utc::now().format("%Y%m%d-%H%M%S"));
    let builder_result = match base {
        Some(base) => {
            if !base.is_dir() {
                return Err(InputError::MissingTmpDir(base.to_path_buf()));
            }
            tempfile::Builder::new().prefix(&prefix).tempdir_in(base)
        }
        None => tempfile::Builder::new().prefix(&prefix).tempdir(),
    };
    builder_result.map_err(InputError::TmpDir)
}

/// Parses `t0` or `t0/t1`; a missing `t1` defaults to the current UTC date.
fn parse_period(spec: &str, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), InputError> {
    let invalid = || InputError::InvalidPeriod(spec.to_string());
    let mut parts = spec.split('/');

    let start = NaiveDate::parse_from_str(parts.next().ok_or_else(invalid)?, "%Y-%m-%d")
        .map_err(|_| invalid())?;
    let end = match parts.next() {
        Some(part) => NaiveDate::parse_from_str(part, "%Y-%m-%d").map_err(|_| invalid())?,
        None => today,
    };
    if parts.next().is_some() {
        return Err(invalid());
    }
    if start > end {
        return Err(InputError::PeriodOrder(start, end));
    }
    Ok((start, end))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn should_parse_full_period() {
        let period = parse_period("2022-06-25/2022-07-05", date(2023, 1, 1)).unwrap();
        assert_eq!(period, (date(2022, 6, 25), date(2022, 7, 5)));
    }

    #[test]
    fn should_default_period_end_to_today() {
        let period = parse_period("2022-06-25", date(2022, 7, 10)).unwrap();
        assert_eq!(period, (date(2022, 6, 25), date(2022, 7, 10)));
    }

    #[test]
    fn should_reject_malformed_period() {
        assert!(matches!(
            parse_period("2022-25-06", date(2023, 1, 1)),
            Err(InputError::InvalidPeriod(_))
        ));
        assert!(matches!(
            parse_period("yesterday", date(2023, 1, 1)),
            Err(InputError::InvalidPeriod(_))
        ));
        assert!(matches!(
            parse_period("2022-01-01/2022-01-02/2022-01-03", date(2023, 1, 1)),
            Err(InputError::InvalidPeriod(_))
        ));
    }

    #[test]
    fn should_reject_reversed_period() {
        assert!(matches!(
            parse_period("2022-07-05/2022-06-25", date(2023, 1, 1)),
            Err(InputError::PeriodOrder(_, _))
        ));
    }

    #[test]
    fn should_lay_out_archive_directories() {
        let tmp = TempDir::new().unwrap();
        let config = RunConfig::for_tests(tmp.path(), false);

        let dir = config.archive_dir(Frequency::Day, "tas");
        assert!(dir.ends_with("europe/day/tas"));
    }
}
