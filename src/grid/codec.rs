//! On-disk gridded-array format.
//!
//! A file is a gzip-compressed JSON document holding one or more labeled
//! grids (several when the upstream store ships multiple experiment versions
//! of the same window). Undefined cells are stored as nulls since JSON has
//! no NaN. Writes go to a temp name first and are renamed into place, so a
//! file either exists completely or not at all.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use super::Grid;
use crate::error::DataError;

/// Extension of every gridded file, raw, intermediate and archived.
pub const FILE_EXT: &str = "json.gz";

/// Storage hints passed to the writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoding {
    pub complevel: u32,
    /// Preferred chunk shape (time, lat, lon).
    pub chunks: [usize; 3],
}

impl Encoding {
    pub fn for_grid(grid: &Grid) -> Encoding {
        Encoding {
            complevel: 5,
            chunks: [1, grid.lat.len(), grid.lon.len()],
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Document {
    encoding: Encoding,
    grids: Vec<StoredGrid>,
}

#[derive(Serialize, Deserialize)]
struct StoredGrid {
    name: String,
    #[serde(default)]
    version: Option<u32>,
    time: Vec<NaiveDateTime>,
    lat: Vec<f64>,
    lon: Vec<f64>,
    /// Row-major (time, lat, lon); None encodes NaN.
    data: Vec<Option<f64>>,
    #[serde(default)]
    attrs: std::collections::BTreeMap<String, String>,
}

impl StoredGrid {
    fn from_grid(grid: &Grid) -> StoredGrid {
        StoredGrid {
            name: grid.name.clone(),
            version: grid.version,
            time: grid.time.clone(),
            lat: grid.lat.clone(),
            lon: grid.lon.clone(),
            data: grid
                .values
                .iter()
                .map(|&v| if v.is_nan() { None } else { Some(v) })
                .collect(),
            attrs: grid.attrs.clone(),
        }
    }

    fn into_grid(self, path: &Path) -> Result<Grid, DataError> {
        let shape = (self.time.len(), self.lat.len(), self.lon.len());
        let data: Vec<f64> = self.data.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        let values = Array3::from_shape_vec(shape, data).map_err(|e| DataError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut grid = Grid::new(self.name, self.time, self.lat, self.lon, values)?;
        grid.version = self.version;
        grid.attrs = self.attrs;
        Ok(grid)
    }
}

/// Reads every grid in a file, primary experiment version first.
pub fn read(path: &Path) -> Result<Vec<Grid>, DataError> {
    let file = File::open(path).map_err(|e| DataError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let document: Document =
        serde_json::from_reader(decoder).map_err(|e| DataError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut grids = document
        .grids
        .into_iter()
        .map(|stored| stored.into_grid(path))
        .collect::<Result<Vec<Grid>, DataError>>()?;
    grids.sort_by_key(|g| g.version.unwrap_or(0));
    if grids.is_empty() {
        return Err(DataError::Malformed {
            path: path.to_path_buf(),
            reason: "document holds no grids".to_string(),
        });
    }
    Ok(grids)
}

/// Writes one grid as a complete document.
pub fn write(grid: &Grid, path: &Path, encoding: &Encoding) -> Result<(), DataError> {
    let document = Document {
        encoding: encoding.clone(),
        grids: vec![StoredGrid::from_grid(grid)],
    };

    let tmp_path = path.with_extension("tmp");
    let write_err = |e: std::io::Error| DataError::Write {
        path: path.to_path_buf(),
        source: e,
    };

    let file = File::create(&tmp_path).map_err(write_err)?;
    let mut encoder = GzEncoder::new(
        BufWriter::new(file),
        Compression::new(encoding.complevel.min(9)),
    );
    serde_json::to_writer(&mut encoder, &document).map_err(|e| DataError::Write {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    encoder.finish().map_err(write_err)?;
    fs::rename(&tmp_path, path).map_err(write_err)?;
    Ok(())
}

// -- Tests -------------------------------------------------------------------
