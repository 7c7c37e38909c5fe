//! Derived-variable stage.
//!
//! Computes the non-downloadable catalog variables from the hourly files the
//! format stage materialized. The compute list arrives in dependency order,
//! so a variable that feeds another (hurs into heatIndex) is always on disk
//! before its dependent is evaluated. Daily extremes (tasmin, tasmax,
//! sfcWindmax) reduce their base variable per calendar day and exist only at
//! daily frequency; every other derived variable is an hourly pointwise
//! formula and gets both an hourly and a daily-mean file.

use std::fs;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::catalog::{Catalog, Variable};
use crate::config::RunConfig;
use crate::grid::codec;
use crate::grid::{Grid, Reducer};
use crate::resolver::ResolvedRequest;
use crate::stages::format::write_stage_file;
use crate::stages::{decorate, files_by_year, Frequency};

// ECMWF saturation vapour pressure constants (IFS documentation, part IV).
const RDRY: f64 = 287.0597;
const RVAP: f64 = 461.5250;
const A1: f64 = 611.21;
const A3: f64 = 17.502;
const A4: f64 = 32.19;
const T0: f64 = 273.16;

/// Wind speed from the two horizontal components, m/s.
pub fn wind_speed(u: f64, v: f64) -> f64 {
    u.hypot(v)
}

/// Relative humidity in percent from dew point and air temperature, both in
/// Kelvin, clamped to [0, 100] so rounding noise near saturation cannot
/// produce impossible values.
pub fn relative_humidity(dew_point: f64, temperature: f64) -> f64 {
    let vapour = |t: f64| 6.1078 * (17.1 * (t - 273.15) / (235.0 + t - 273.15)).exp();
    (100.0 * vapour(dew_point) / vapour(temperature)).clamp(0.0, 100.0)
}

/// Specific humidity in kg/kg from dew point (K) and surface pressure (Pa).
pub fn specific_humidity(dew_point: f64, pressure: f64) -> f64 {
    let ratio = RDRY / RVAP;
    let vapour = A1 * (A3 * (dew_point - T0) / (dew_point - A4)).exp();
    ratio * vapour / (pressure - (1.0 - ratio) * vapour)
}

/// NOAA heat index in Kelvin from air temperature (K) and relative humidity
/// (percent). The regression is only defined for warm conditions; below 20
/// Celsius the result is NaN. Humidity is rounded to the nearest percent
/// before entering the polynomial.
pub fn heat_index(temperature: f64, humidity: f64) -> f64 {
    let t = temperature - 273.15;
    if !(t > 20.0) {
        return f64::NAN;
    }
    let h = humidity.round();

    const C0: f64 = -8.784695;
    const C1: f64 = 1.61139411;
    const C2: f64 = 2.338549;
    const C3: f64 = -0.14611605;
    const C4: f64 = -1.2308094e-2;
    const C5: f64 = -1.6424828e-2;
    const C6: f64 = 2.211732e-3;
    const C7: f64 = 7.2546e-4;
    const C8: f64 = -3.582e-6;

    let index = C0
        + C1 * t
        + C2 * h
        + C3 * t * h
        + C4 * t * t
        + C5 * h * h
        + C6 * t * t * h
        + C7 * t * h * h
        + C8 * t * t * h * h;
    index + 273.15
}

/// A derived variable named `<dep>min` or `<dep>max` over a single dependency
/// is a daily extreme of that dependency.
fn extreme_reducer(var: &Variable) -> Option<Reducer> {
    let [dep] = var.deps else { return None };
    if var.name == format!("{dep}min") {
        Some(Reducer::Min)
    } else if var.name == format!("{dep}max") {
        Some(Reducer::Max)
    } else {
        None
    }
}

fn formula(name: &str) -> Option<fn(f64, f64) -> f64> {
    match name {
        "sfcWind" => Some(wind_speed),
        "hurs" => Some(relative_humidity),
        "huss" => Some(specific_humidity),
        "heatIndex" => Some(heat_index),
        _ => None,
    }
}

/// Reads the single hourly file a dependency produced for one year.
fn read_year(config: &RunConfig, dep: &str, year: i32) -> Result<Option<Grid>> {
    let dir = config.stage_dir(Frequency::Hour.as_str(), dep);
    let by_year = files_by_year(&dir)?;
    let Some(files) = by_year.get(&year) else {
        return Ok(None);
    };
    let grids = codec::read(&files[0])
        .with_context(|| format!("cannot read {}", files[0].display()))?;
    Ok(grids.into_iter().next())
}

pub fn run(config: &RunConfig, catalog: &Catalog, resolved: &ResolvedRequest) -> Result<()> {
    for id in &resolved.compute {
        let var = match catalog.get(id) {
            Some(var) => var,
            None => bail!("no catalog entry for computed variable '{id}'"),
        };

        // Years for which the first dependency produced data drive the loop;
        // a year any other dependency is missing gets skipped with a warning.
        let lead = var.deps[0];
        let lead_dir = config.stage_dir(Frequency::Hour.as_str(), lead);
        let years: Vec<i32> = files_by_year(&lead_dir)?.into_keys().collect();
        if years.is_empty() {
            warn!("{id}: dependency {lead} produced no hourly data");
            continue;
        }

        if let Some(reducer) = extreme_reducer(var) {
            fs::create_dir_all(config.stage_dir(Frequency::Day.as_str(), id))?;
            for year in years {
                let Some(hourly) = read_year(config, lead, year)? else {
                    continue;
                };
                let mut daily = hourly.to_daily(reducer)?.rename(id.clone());
                daily.attrs.clear();
                decorate(&mut daily, catalog, id, &config.area);
                write_stage_file(&daily, config, id, Frequency::Day)?;
                info!("{id} {year}: {} days computed", daily.time.len());
            }
            continue;
        }

        let Some(f) = formula(id) else {
            bail!("no formula for computed variable '{id}'");
        };
        fs::create_dir_all(config.stage_dir(Frequency::Hour.as_str(), id))?;
        fs::create_dir_all(config.stage_dir(Frequency::Day.as_str(), id))?;
        for year in years {
            let Some(first) = read_year(config, var.deps[0], year)? else {
                continue;
            };
            let Some(second) = read_year(config, var.deps[1], year)? else {
                warn!("{id} {year}: dependency {} missing, skipping year", var.deps[1]);
                continue;
            };

            // Fetch holes can leave one dependency covering fewer hours than
            // the other; the derived series is evaluated on the overlap.
            let steps = first.time.len().max(second.time.len());
            let Some((first, second)) = first.align_time(&second) else {
                warn!("{id} {year}: dependencies share no timestamps, skipping year");
                continue;
            };
            if first.time.len() < steps {
                warn!(
                    "{id} {year}: dependencies only overlap on {} of {} hours",
                    first.time.len(),
                    steps
                );
            }

            let mut hourly = first.zip_with(&second, id.clone(), f)?;
            hourly.attrs.clear();
            decorate(&mut hourly, catalog, id, &config.area);
            write_stage_file(&hourly, config, id, Frequency::Hour)?;
            let daily = hourly.to_daily(Reducer::Mean)?;
            write_stage_file(&daily, config, id, Frequency::Day)?;
            info!("{id} {year}: {} hours computed", hourly.time.len());
        }
    }
    Ok(())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use chrono::{NaiveDate, NaiveDateTime};
    use float_cmp::assert_approx_eq;
    use ndarray::Array3;
    use tempfile::TempDir;

    use super::*;
    use crate::grid::codec::Encoding;

    #[test]
    fn should_compute_wind_speed() {
        assert_approx_eq!(f64, wind_speed(3.0, 4.0), 5.0);
        assert_approx_eq!(f64, wind_speed(0.0, -2.5), 2.5);
    }

    #[test]
    fn should_saturate_relative_humidity_at_dew_point() {
        // Dew point equal to the temperature means saturation.
        assert_approx_eq!(f64, relative_humidity(293.15, 293.15), 100.0);

        // A lower dew point means drier air.
        let rh = relative_humidity(283.15, 293.15);
        assert!(rh > 45.0 && rh < 60.0, "rh = {rh}");

        // Numerically super-saturated input is clamped.
        assert_approx_eq!(f64, relative_humidity(294.15, 293.15), 100.0);
    }

    #[test]
    fn should_compute_plausible_specific_humidity() {
        // 10 C dew point at standard pressure: roughly 7.6 g/kg.
        let q = specific_humidity(283.15, 101325.0);
        assert!(q > 0.007 && q < 0.008, "q = {q}");
    }

    #[test]
    fn should_compute_heat_index_for_warm_humid_air() {
        // 32 C at 70 % humidity sits near 40.4 C on the NOAA chart.
        let hi = heat_index(305.15, 70.0);
        assert!(hi > 313.4 && hi < 314.0, "hi = {hi}");
    }

    #[test]
    fn should_leave_heat_index_undefined_below_threshold() {
        assert!(heat_index(290.15, 80.0).is_nan());
        assert!(heat_index(293.15, 80.0).is_nan());
    }

    fn hour(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn hourly_grid(name: &str, values: impl Fn(u32) -> f64) -> Grid {
        let time: Vec<NaiveDateTime> = (0..24).map(|h| hour(1, h)).collect();
        let data = Array3::from_shape_vec((24, 1, 1), (0..24).map(values).collect()).unwrap();
        Grid::new(name, time, vec![50.0], vec![10.0], data).unwrap()
    }

    fn stage_hourly(config: &RunConfig, id: &str, grid: &Grid) {
        let dir = config.stage_dir(Frequency::Hour.as_str(), id);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("ERA5_{id}_hour_europe_2022010100-2022010123.json.gz"));
        codec::write(grid, &path, &Encoding::for_grid(grid)).unwrap();
    }

    fn resolved_for(compute: &[&str]) -> ResolvedRequest {
        ResolvedRequest {
            download: vec![],
            levels: vec![],
            compute: compute.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn should_materialise_wind_speed_at_both_frequencies() {
        let archive = TempDir::new().unwrap();
        let config = RunConfig::for_tests(archive.path(), false);
        let catalog = Catalog::new();

        stage_hourly(&config, "uas", &hourly_grid("uas", |_| 3.0));
        stage_hourly(&config, "vas", &hourly_grid("vas", |_| 4.0));

        run(&config, &catalog, &resolved_for(&["sfcWind"])).unwrap();

        let hourly = codec::read(
            &config
                .stage_dir("hour", "sfcWind")
                .join("ERA5_sfcWind_hour_europe_2022010100-2022010123.json.gz"),
        )
        .unwrap()
        .remove(0);
        assert_eq!(hourly.name, "sfcWind");
        assert_approx_eq!(f64, hourly.values[[0, 0, 0]], 5.0);
        assert_eq!(hourly.attrs.get("units"), Some(&"m s-1".to_string()));

        let daily = codec::read(
            &config
                .stage_dir("day", "sfcWind")
                .join("ERA5_sfcWind_day_europe_20220101-20220101.json.gz"),
        )
        .unwrap()
        .remove(0);
        assert_approx_eq!(f64, daily.values[[0, 0, 0]], 5.0);
    }

    #[test]
    fn should_reduce_daily_extremes_without_hourly_output() {
        let archive = TempDir::new().unwrap();
        let config = RunConfig::for_tests(archive.path(), false);
        let catalog = Catalog::new();

        stage_hourly(&config, "tas", &hourly_grid("tas", |h| 270.0 + h as f64));

        run(&config, &catalog, &resolved_for(&["tasmax", "tasmin"])).unwrap();

        let max = codec::read(
            &config
                .stage_dir("day", "tasmax")
                .join("ERA5_tasmax_day_europe_20220101-20220101.json.gz"),
        )
        .unwrap()
        .remove(0);
        assert_approx_eq!(f64, max.values[[0, 0, 0]], 293.0);
        assert_eq!(
            max.attrs.get("long_name"),
            Some(&"Daily Maximum Near-Surface Air Temperature".to_string())
        );

        let min = codec::read(
            &config
                .stage_dir("day", "tasmin")
                .join("ERA5_tasmin_day_europe_20220101-20220101.json.gz"),
        )
        .unwrap()
        .remove(0);
        assert_approx_eq!(f64, min.values[[0, 0, 0]], 270.0);
        assert!(!config.stage_dir("hour", "tasmax").exists());
    }

    #[test]
    fn should_compute_over_the_overlap_when_one_dependency_has_holes() {
        let archive = TempDir::new().unwrap();
        let config = RunConfig::for_tests(archive.path(), false);
        let catalog = Catalog::new();

        // uas covers two days, a failed partition left vas with only one.
        let two_days = {
            let time: Vec<NaiveDateTime> = (0..48).map(|h| hour(1 + h / 24, h % 24)).collect();
            let data = Array3::from_elem((48, 1, 1), 3.0);
            Grid::new("uas", time, vec![50.0], vec![10.0], data).unwrap()
        };
        let dir = config.stage_dir(Frequency::Hour.as_str(), "uas");
        fs::create_dir_all(&dir).unwrap();
        codec::write(
            &two_days,
            &dir.join("ERA5_uas_hour_europe_2022010100-2022010223.json.gz"),
            &Encoding::for_grid(&two_days),
        )
        .unwrap();
        stage_hourly(&config, "vas", &hourly_grid("vas", |_| 4.0));

        run(&config, &catalog, &resolved_for(&["sfcWind"])).unwrap();

        let hourly = codec::read(
            &config
                .stage_dir("hour", "sfcWind")
                .join("ERA5_sfcWind_hour_europe_2022010100-2022010123.json.gz"),
        )
        .unwrap()
        .remove(0);
        assert_eq!(hourly.time.len(), 24);
        assert_approx_eq!(f64, hourly.values[[0, 0, 0]], 5.0);
    }

    #[test]
    fn should_skip_year_with_missing_dependency() {
        let archive = TempDir::new().unwrap();
        let config = RunConfig::for_tests(archive.path(), false);
        let catalog = Catalog::new();

        stage_hourly(&config, "uas", &hourly_grid("uas", |_| 3.0));
        // vas never fetched

        run(&config, &catalog, &resolved_for(&["sfcWind"])).unwrap();

        let by_year = files_by_year(&config.stage_dir("hour", "sfcWind")).unwrap();
        assert!(by_year.is_empty());
    }
}
