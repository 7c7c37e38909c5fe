//! Command line interface.

use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use indicatif::ProgressBar;
use tracing_subscriber::EnvFilter;

use crate::error::InputError;

#[derive(Parser, Debug)]
#[command(version, about = "Download ERA5 reanalysis data and keep a local archive up to date", long_about = None)]
pub struct Cli {
    /// Period to update, 'YYYY-MM-DD' or 'YYYY-MM-DD/YYYY-MM-DD'.
    /// A missing end date means the current UTC date.
    #[arg(long, value_name = "PERIOD")]
    pub period: String,

    /// Comma separated climate variables, e.g. 'tas,hurs,zg500'
    #[arg(long, value_name = "VARS")]
    pub cvar: String,

    /// A named area, explicit 'lon_min,lon_max,lat_min,lat_max' bounds,
    /// or 'name,lon_min,lon_max,lat_min,lat_max'
    #[arg(long, value_name = "AREA", allow_hyphen_values = true)]
    pub area: String,

    /// Also keep the hourly series in the output archive
    #[arg(long)]
    pub keep_hourly: bool,

    /// Directory the archive tree is written under
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Base directory for the temporary working tree
    #[arg(long, value_name = "DIR")]
    pub tmp: Option<PathBuf>,

    /// Log level and optional log file, e.g. '--log info run.log'.
    /// Bare '--log' means 'info' on the console.
    #[arg(long, num_args = 0..=2, value_name = "LEVEL|FILE")]
    pub log: Option<Vec<String>>,
}

/// Installs the global tracing subscriber from the `--log` arguments.
pub fn init_logging(spec: Option<&[String]>) -> Result<(), InputError> {
    let (level, file) = interpret_log_spec(spec)?;
    let filter = EnvFilter::new(level.to_string().to_lowercase());

    match file {
        Some(path) => {
            let file = File::create(&path).map_err(|_| InputError::LogFile(path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
    }
    Ok(())
}

/// `None` (flag absent) logs warnings only; a bare `--log` raises to info.
/// One argument is a level if it parses as one, otherwise a log file.
fn interpret_log_spec(
    spec: Option<&[String]>,
) -> Result<(tracing::Level, Option<PathBuf>), InputError> {
    let Some(args) = spec else {
        return Ok((tracing::Level::WARN, None));
    };
    match args {
        [] => Ok((tracing::Level::INFO, None)),
        [first] => match tracing::Level::from_str(first) {
            Ok(level) => Ok((level, None)),
            Err(_) => Ok((tracing::Level::INFO, Some(PathBuf::from(first)))),
        },
        [first, second] => {
            let level = tracing::Level::from_str(first)
                .map_err(|_| InputError::InvalidLogLevel(first.clone()))?;
            Ok((level, Some(PathBuf::from(second))))
        }
        _ => unreachable!("clap caps --log at two arguments"),
    }
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn should_default_to_warn_without_flag() {
        let (level, file) = interpret_log_spec(None).unwrap();
        assert_eq!(level, tracing::Level::WARN);
        assert!(file.is_none());
    }

    #[test]
    fn should_raise_to_info_with_bare_flag() {
        let (level, file) = interpret_log_spec(Some(&[])).unwrap();
        assert_eq!(level, tracing::Level::INFO);
        assert!(file.is_none());
    }

    #[test]
    fn should_treat_single_argument_as_level_or_file() {
        let (level, file) = interpret_log_spec(Some(&strings(&["debug"]))).unwrap();
        assert_eq!(level, tracing::Level::DEBUG);
        assert!(file.is_none());

        let (level, file) = interpret_log_spec(Some(&strings(&["run.log"]))).unwrap();
        assert_eq!(level, tracing::Level::INFO);
        assert_eq!(file, Some(PathBuf::from("run.log")));
    }

    #[test]
    fn should_reject_invalid_explicit_level() {
        let result = interpret_log_spec(Some(&strings(&["loud", "run.log"])));
        assert!(matches!(result, Err(InputError::InvalidLogLevel(_))));
    }

    #[test]
    fn should_parse_cli_arguments() {
        let cli = Cli::parse_from([
            "cdsupdate",
            "--period",
            "2022-06-25/2022-07-05",
            "--cvar",
            "tas,hurs",
            "--area",
            "europe",
            "--output-dir",
            "/tmp",
            "--keep-hourly",
        ]);

        assert_eq!(cli.period, "2022-06-25/2022-07-05");
        assert_eq!(cli.cvar, "tas,hurs");
        assert!(cli.keep_hourly);
        assert!(cli.log.is_none());
    }
}
