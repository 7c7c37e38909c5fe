//! Static catalog of climate variables and named areas.
//!
//! Variables are identified by an AMIP-style short code, with two further
//! naming schemes attached: the name used by the upstream store API (CDS) and
//! the name carried inside the files the store serves (ERA5). A variable with
//! an empty dependency list is directly downloadable; anything else is
//! computed locally after its dependencies have been fetched.
//!
//! Identifiers may embed a pressure level as a digit run, e.g. `zg500` is the
//! variable `zg` on the 500 hPa level. The split is purely lexical.

use std::collections::{BTreeMap, HashMap};

use crate::error::InputError;

/// Pressure levels served by the upstream store, in hPa.
pub const PRESSURE_LEVELS: [&str; 37] = [
    "1", "2", "3", "5", "7", "10", "20", "30", "50", "70", "100", "125", "150", "175", "200",
    "225", "250", "300", "350", "400", "450", "500", "550", "600", "650", "700", "750", "775",
    "800", "825", "850", "875", "900", "925", "950", "975", "1000",
];

/// Level sentinel for surface variables.
pub const SINGLE_LEVEL: &str = "single";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelType {
    Single,
    Pressure,
}

impl LevelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelType::Single => "single",
            LevelType::Pressure => "pressure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    /// Internal (AMIP) short code.
    pub name: &'static str,
    /// Name inside files served by the upstream store. Empty for computed variables.
    pub era5_name: &'static str,
    /// Name used in upstream store requests. Empty for computed variables.
    pub cds_name: &'static str,
    pub level_type: LevelType,
    /// Measurement height for surface variables, e.g. "2m".
    pub height: &'static str,
    /// Base names this variable is computed from. Empty means downloadable.
    pub deps: &'static [&'static str],
    pub standard_name: &'static str,
    pub long_name: &'static str,
    pub units: &'static str,
    pub comment: &'static str,
    /// Unit rescale applied after download, e.g. geopotential to height.
    pub scale: Option<f64>,
}

/// Standard gravity, used to rescale geopotential to geopotential height.
pub const STANDARD_GRAVITY: f64 = 9.80665;

static TABLE: &[Variable] = &[
    Variable {
        name: "tas",
        era5_name: "t2m",
        cds_name: "2m_temperature",
        level_type: LevelType::Single,
        height: "2m",
        deps: &[],
        standard_name: "air_temperature",
        long_name: "Near-Surface Air Temperature",
        units: "K",
        comment: "Hourly temperature at 2m above the surface",
        scale: None,
    },
    Variable {
        name: "tasmin",
        era5_name: "",
        cds_name: "",
        level_type: LevelType::Single,
        height: "2m",
        deps: &["tas"],
        standard_name: "air_temperature",
        long_name: "Daily Minimum Near-Surface Air Temperature",
        units: "K",
        comment: "Computed as the daily minimum of hourly values",
        scale: None,
    },
    Variable {
        name: "tasmax",
        era5_name: "",
        cds_name: "",
        level_type: LevelType::Single,
        height: "2m",
        deps: &["tas"],
        standard_name: "air_temperature",
        long_name: "Daily Maximum Near-Surface Air Temperature",
        units: "K",
        comment: "Computed as the daily maximum of hourly values",
        scale: None,
    },
    Variable {
        name: "dptas",
        era5_name: "d2m",
        cds_name: "2m_dewpoint_temperature",
        level_type: LevelType::Single,
        height: "2m",
        deps: &[],
        standard_name: "dew_point_temperature",
        long_name: "Near-Surface Dew Point Temperature",
        units: "K",
        comment: "Hourly dew point temperature at 2m above the surface",
        scale: None,
    },
    Variable {
        name: "ps",
        era5_name: "sp",
        cds_name: "surface_pressure",
        level_type: LevelType::Single,
        height: "0m",
        deps: &[],
        standard_name: "surface_air_pressure",
        long_name: "Surface Air Pressure",
        units: "Pa",
        comment: "",
        scale: None,
    },
    Variable {
        name: "psl",
        era5_name: "msl",
        cds_name: "mean_sea_level_pressure",
        level_type: LevelType::Single,
        height: "0m",
        deps: &[],
        standard_name: "air_pressure_at_sea_level",
        long_name: "Sea Level Pressure",
        units: "Pa",
        comment: "",
        scale: None,
    },
    Variable {
        name: "uas",
        era5_name: "u10",
        cds_name: "10m_u_component_of_wind",
        level_type: LevelType::Single,
        height: "10m",
        deps: &[],
        standard_name: "eastward_wind",
        long_name: "Eastward Near-Surface Wind",
        units: "m s-1",
        comment: "",
        scale: None,
    },
    Variable {
        name: "vas",
        era5_name: "v10",
        cds_name: "10m_v_component_of_wind",
        level_type: LevelType::Single,
        height: "10m",
        deps: &[],
        standard_name: "northward_wind",
        long_name: "Northward Near-Surface Wind",
        units: "m s-1",
        comment: "",
        scale: None,
    },
    Variable {
        name: "sfcWind",
        era5_name: "",
        cds_name: "",
        level_type: LevelType::Single,
        height: "10m",
        deps: &["uas", "vas"],
        standard_name: "wind_speed",
        long_name: "Near-Surface Wind Speed",
        units: "m s-1",
        comment: "Computed as sqrt(uas^2 + vas^2)",
        scale: None,
    },
    Variable {
        name: "sfcWindmax",
        era5_name: "",
        cds_name: "",
        level_type: LevelType::Single,
        height: "10m",
        deps: &["sfcWind"],
        standard_name: "wind_speed",
        long_name: "Daily Maximum Near-Surface Wind Speed",
        units: "m s-1",
        comment: "Computed as the daily maximum of hourly values",
        scale: None,
    },
    Variable {
        name: "hurs",
        era5_name: "",
        cds_name: "",
        level_type: LevelType::Single,
        height: "2m",
        deps: &["dptas", "tas"],
        standard_name: "relative_humidity",
        long_name: "Near-Surface Relative Humidity",
        units: "%",
        comment: "Computed from dew point and air temperature",
        scale: None,
    },
    Variable {
        name: "huss",
        era5_name: "",
        cds_name: "",
        level_type: LevelType::Single,
        height: "2m",
        deps: &["dptas", "ps"],
        standard_name: "specific_humidity",
        long_name: "Near-Surface Specific Humidity",
        units: "kg kg-1",
        comment: "Computed from dew point and surface pressure",
        scale: None,
    },
    Variable {
        name: "heatIndex",
        era5_name: "",
        cds_name: "",
        level_type: LevelType::Single,
        height: "2m",
        deps: &["tas", "hurs"],
        standard_name: "air_temperature",
        long_name: "NOAA Heat Index",
        units: "K",
        comment: "NOAA regression, undefined where the temperature is below 20 Celsius",
        scale: None,
    },
    Variable {
        name: "pr",
        era5_name: "tp",
        cds_name: "total_precipitation",
        level_type: LevelType::Single,
        height: "0m",
        deps: &[],
        standard_name: "precipitation_amount",
        long_name: "Total Precipitation",
        units: "m",
        comment: "",
        scale: None,
    },
    Variable {
        name: "prsn",
        era5_name: "sf",
        cds_name: "snowfall",
        level_type: LevelType::Single,
        height: "0m",
        deps: &[],
        standard_name: "snowfall_amount",
        long_name: "Snowfall",
        units: "m",
        comment: "",
        scale: None,
    },
    Variable {
        name: "rsds",
        era5_name: "ssrd",
        cds_name: "surface_solar_radiation_downwards",
        level_type: LevelType::Single,
        height: "0m",
        deps: &[],
        standard_name: "surface_downwelling_shortwave_flux_in_air",
        long_name: "Surface Downwelling Shortwave Radiation",
        units: "J m-2",
        comment: "",
        scale: None,
    },
    Variable {
        name: "rlds",
        era5_name: "strd",
        cds_name: "surface_thermal_radiation_downwards",
        level_type: LevelType::Single,
        height: "0m",
        deps: &[],
        standard_name: "surface_downwelling_longwave_flux_in_air",
        long_name: "Surface Downwelling Longwave Radiation",
        units: "J m-2",
        comment: "",
        scale: None,
    },
    Variable {
        name: "zg",
        era5_name: "z",
        cds_name: "geopotential",
        level_type: LevelType::Pressure,
        height: "",
        deps: &[],
        standard_name: "geopotential_height",
        long_name: "Geopotential Height",
        units: "m",
        comment: "Geopotential divided by the standard gravity",
        scale: Some(1.0 / STANDARD_GRAVITY),
    },
    Variable {
        name: "ta",
        era5_name: "t",
        cds_name: "temperature",
        level_type: LevelType::Pressure,
        height: "",
        deps: &[],
        standard_name: "air_temperature",
        long_name: "Air Temperature",
        units: "K",
        comment: "",
        scale: None,
    },
    Variable {
        name: "hus",
        era5_name: "q",
        cds_name: "specific_humidity",
        level_type: LevelType::Pressure,
        height: "",
        deps: &[],
        standard_name: "specific_humidity",
        long_name: "Specific Humidity",
        units: "kg kg-1",
        comment: "",
        scale: None,
    },
    Variable {
        name: "ua",
        era5_name: "u",
        cds_name: "u_component_of_wind",
        level_type: LevelType::Pressure,
        height: "",
        deps: &[],
        standard_name: "eastward_wind",
        long_name: "Eastward Wind",
        units: "m s-1",
        comment: "",
        scale: None,
    },
    Variable {
        name: "va",
        era5_name: "v",
        cds_name: "v_component_of_wind",
        level_type: LevelType::Pressure,
        height: "",
        deps: &[],
        standard_name: "northward_wind",
        long_name: "Northward Wind",
        units: "m s-1",
        comment: "",
        scale: None,
    },
];

pub struct Catalog {
    by_name: HashMap<&'static str, &'static Variable>,
}

impl Catalog {
    pub fn new() -> Self {
        let by_name = TABLE.iter().map(|v| (v.name, v)).collect();
        Catalog { by_name }
    }

    /// Number of variables in the backing table, used to bound dependency expansion.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Splits an identifier into (base name, level) at the first maximal digit
    /// run, e.g. "zg500" -> ("zg", "500"). No digits means the surface level.
    pub fn split_level(identifier: &str) -> (String, String) {
        let bytes = identifier.as_bytes();
        let Some(start) = bytes.iter().position(|b| b.is_ascii_digit()) else {
            return (identifier.to_string(), SINGLE_LEVEL.to_string());
        };
        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map(|n| start + n)
            .unwrap_or(bytes.len());

        let base = format!("{}{}", &identifier[..start], &identifier[end..]);
        (base, identifier[start..end].to_string())
    }

    pub fn get(&self, base: &str) -> Option<&'static Variable> {
        self.by_name.get(base).copied()
    }

    /// True if the base name is known and the embedded level, if any, is a
    /// valid pressure level.
    pub fn is_available(&self, identifier: &str) -> bool {
        let (base, level) = Self::split_level(identifier);
        if !self.by_name.contains_key(base.as_str()) {
            return false;
        }
        level == SINGLE_LEVEL || PRESSURE_LEVELS.contains(&level.as_str())
    }

    /// Resolves an identifier to its catalog entry and level.
    pub fn resolve(&self, identifier: &str) -> Result<(&'static Variable, String), InputError> {
        let (base, level) = Self::split_level(identifier);
        if !self.is_available(identifier) {
            return Err(InputError::UnknownVariable(identifier.to_string()));
        }
        Ok((self.by_name[base.as_str()], level))
    }

    /// True if the base name is a catalog leaf, i.e. fetched from the store.
    pub fn is_downloadable(&self, base: &str) -> bool {
        self.get(base).map(|v| v.deps.is_empty()).unwrap_or(false)
    }

    /// Per-variable metadata attached to every written file.
    pub fn attrs(&self, base: &str) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        if let Some(var) = self.get(base) {
            attrs.insert("standard_name".to_string(), var.standard_name.to_string());
            attrs.insert("long_name".to_string(), var.long_name.to_string());
            attrs.insert("units".to_string(), var.units.to_string());
            attrs.insert("comment".to_string(), var.comment.to_string());
            attrs.insert("CDS_name".to_string(), var.cds_name.to_string());
            attrs.insert("ERA5_name".to_string(), var.era5_name.to_string());
            if !var.height.is_empty() {
                attrs.insert("height".to_string(), var.height.to_string());
            }
        }
        attrs
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Spatial selection, either a named catalog entry or explicit bounds.
#[derive(Debug, Clone)]
pub struct Area {
    pub name: String,
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

static NAMED_AREAS: &[(&str, [f64; 4])] = &[
    ("world", [-180.0, 180.0, -90.0, 90.0]),
    ("europe", [-25.0, 40.0, 34.0, 72.0]),
    ("northatlantic", [-80.0, 50.0, 5.0, 70.0]),
    ("northamerica", [-150.0, -60.0, 30.0, 80.0]),
];

impl Area {
    pub fn named(name: &str) -> Option<Area> {
        NAMED_AREAS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(n, b)| Area {
                name: n.to_string(),
                lon_min: b[0],
                lon_max: b[1],
                lat_min: b[2],
                lat_max: b[3],
            })
    }

    /// Parses `name`, `lon_min,lon_max,lat_min,lat_max` or `name,bounds`.
    pub fn parse(spec: &str) -> Result<Area, InputError> {
        let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
        match parts.len() {
            1 => Self::named(parts[0]).ok_or_else(|| InputError::UnknownArea(spec.to_string())),
            4 => {
                let bounds = Self::parse_bounds(&parts, spec)?;
                Ok(Area {
                    name: box_name(&bounds),
                    lon_min: bounds[0],
                    lon_max: bounds[1],
                    lat_min: bounds[2],
                    lat_max: bounds[3],
                })
            }
            5 => {
                let bounds = Self::parse_bounds(&parts[1..], spec)?;
                Ok(Area {
                    name: parts[0].to_string(),
                    lon_min: bounds[0],
                    lon_max: bounds[1],
                    lat_min: bounds[2],
                    lat_max: bounds[3],
                })
            }
            _ => Err(InputError::InvalidArea(spec.to_string())),
        }
    }

    fn parse_bounds(parts: &[&str], spec: &str) -> Result<[f64; 4], InputError> {
        let mut bounds = [0.0; 4];
        for (slot, part) in bounds.iter_mut().zip(parts) {
            *slot = part
                .parse()
                .map_err(|_| InputError::InvalidArea(spec.to_string()))?;
        }
        Ok(bounds)
    }

    /// Bounding box in the order the upstream store expects: north, west, south, east.
    pub fn cds_bounds(&self) -> [f64; 4] {
        [self.lat_max, self.lon_min, self.lat_min, self.lon_max]
    }
}

/// Generated name for anonymous bounds. Longitudes are shifted to 0/360 and
/// latitudes to 0/180 so the name carries no minus signs.
fn box_name(bounds: &[f64; 4]) -> String {
    format!(
        "box-{}-{}-{}-{}",
        fmt_coord(bounds[0] + 180.0),
        fmt_coord(bounds[1] + 180.0),
        fmt_coord(bounds[2] + 90.0),
        fmt_coord(bounds[3] + 90.0),
    )
}

fn fmt_coord(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn should_split_level_suffix() {
        assert_eq!(
            Catalog::split_level("zg500"),
            ("zg".to_string(), "500".to_string())
        );
        assert_eq!(
            Catalog::split_level("tas"),
            ("tas".to_string(), "single".to_string())
        );
    }

    #[test]
    fn should_resolve_pressure_variable() {
        let catalog = Catalog::new();
        let (var, level) = catalog.resolve("zg500").unwrap();

        assert_eq!(var.name, "zg");
        assert_eq!(level, "500");
        assert_eq!(var.level_type, LevelType::Pressure);
    }

    #[test]
    fn should_resolve_surface_variable() {
        let catalog = Catalog::new();
        let (var, level) = catalog.resolve("tas").unwrap();

        assert_eq!(var.name, "tas");
        assert_eq!(level, "single");
    }

    #[test]
    fn should_reject_unknown_variable() {
        let catalog = Catalog::new();
        assert!(catalog.resolve("banana").is_err());
    }

    #[test]
    fn should_reject_invalid_pressure_level() {
        let catalog = Catalog::new();

        // 123 hPa is not a level the store serves
        assert!(!catalog.is_available("zg123"));
        assert!(catalog.is_available("zg500"));
        assert!(catalog.is_available("tas"));
    }

    #[test]
    fn should_classify_downloadable_variables() {
        let catalog = Catalog::new();

        assert!(catalog.is_downloadable("tas"));
        assert!(!catalog.is_downloadable("sfcWind"));
        assert!(!catalog.is_downloadable("nope"));
    }

    #[test]
    fn should_attach_measurement_height_to_surface_metadata() {
        let catalog = Catalog::new();

        assert_eq!(catalog.attrs("tas").get("height"), Some(&"2m".to_string()));
        assert_eq!(catalog.attrs("uas").get("height"), Some(&"10m".to_string()));
        // Pressure-level variables carry no fixed height.
        assert!(!catalog.attrs("zg").contains_key("height"));
    }

    #[test]
    fn should_parse_named_area() {
        let area = Area::parse("europe").unwrap();

        assert_eq!(area.name, "europe");
        assert_eq!(area.cds_bounds(), [72.0, -25.0, 34.0, 40.0]);
    }

    #[test]
    fn should_parse_explicit_bounds() {
        let area = Area::parse("-10,10,40,60").unwrap();

        assert_eq!(area.name, "box-170-190-130-150");
        assert_eq!(area.lon_min, -10.0);
        assert_eq!(area.lat_max, 60.0);
    }

    #[test]
    fn should_parse_named_bounds() {
        let area = Area::parse("alps,5,15,43,48").unwrap();

        assert_eq!(area.name, "alps");
        assert_eq!(area.lon_max, 15.0);
    }

    #[test]
    fn should_reject_malformed_area() {
        assert!(Area::parse("nowhere").is_err());
        assert!(Area::parse("1,2,3").is_err());
        assert!(Area::parse("1,2,3,abc").is_err());
    }
}
