//! In-memory labeled gridded array, dimensions (time, lat, lon).
//!
//! Undefined values are NaN. Reductions skip NaN, so a day with a few
//! undefined hours still aggregates from the defined ones.

pub mod codec;

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{Array2, Array3, Axis};

use crate::error::DataError;

#[derive(Debug, Clone)]
pub struct Grid {
    pub name: String,
    /// Experiment version of the upstream store, if the file carried one.
    pub version: Option<u32>,
    pub time: Vec<NaiveDateTime>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    /// Shape (time, lat, lon).
    pub values: Array3<f64>,
    pub attrs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Min,
    Max,
}

impl Reducer {
    fn reduce(&self, values: impl Iterator<Item = f64>) -> f64 {
        let defined: Vec<f64> = values.filter(|v| !v.is_nan()).collect();
        if defined.is_empty() {
            return f64::NAN;
        }
        match self {
            Reducer::Mean => defined.iter().sum::<f64>() / defined.len() as f64,
            Reducer::Min => defined.iter().copied().fold(f64::INFINITY, f64::min),
            Reducer::Max => defined.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

impl Grid {
    pub fn new(
        name: impl Into<String>,
        time: Vec<NaiveDateTime>,
        lat: Vec<f64>,
        lon: Vec<f64>,
        values: Array3<f64>,
    ) -> Result<Grid, DataError> {
        if values.shape() != [time.len(), lat.len(), lon.len()] {
            return Err(DataError::GridMismatch(format!(
                "values shape {:?} does not match axes ({}, {}, {})",
                values.shape(),
                time.len(),
                lat.len(),
                lon.len()
            )));
        }
        Ok(Grid {
            name: name.into(),
            version: None,
            time,
            lat,
            lon,
            values,
            attrs: BTreeMap::new(),
        })
    }

    pub fn rename(mut self, name: impl Into<String>) -> Grid {
        self.name = name.into();
        self
    }

    pub fn first_time(&self) -> Option<NaiveDateTime> {
        self.time.first().copied()
    }

    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.time.last().copied()
    }

    fn same_axes(&self, other: &Grid) -> bool {
        self.lat == other.lat && self.lon == other.lon
    }

    /// Rebuilds a grid from (timestamp, horizontal slab) rows.
    fn from_rows(
        template: &Grid,
        rows: BTreeMap<NaiveDateTime, Array2<f64>>,
    ) -> Result<Grid, DataError> {
        if rows.is_empty() {
            return Err(DataError::Empty);
        }
        let (nlat, nlon) = (template.lat.len(), template.lon.len());
        let mut time = Vec::with_capacity(rows.len());
        let mut values = Array3::zeros((rows.len(), nlat, nlon));
        for (i, (stamp, slab)) in rows.into_iter().enumerate() {
            time.push(stamp);
            values.index_axis_mut(Axis(0), i).assign(&slab);
        }
        let mut grid = Grid::new(
            template.name.clone(),
            time,
            template.lat.clone(),
            template.lon.clone(),
            values,
        )?;
        grid.attrs = template.attrs.clone();
        Ok(grid)
    }

    /// Concatenates partition grids along time, sorted by timestamp. The first
    /// occurrence wins when partitions overlap.
    pub fn concat_time(parts: &[Grid]) -> Result<Grid, DataError> {
        let first = parts.first().ok_or(DataError::Empty)?;
        let mut rows: BTreeMap<NaiveDateTime, Array2<f64>> = BTreeMap::new();
        for part in parts {
            if !first.same_axes(part) {
                return Err(DataError::GridMismatch(format!(
                    "cannot concatenate '{}', spatial axes differ",
                    part.name
                )));
            }
            for (i, stamp) in part.time.iter().enumerate() {
                rows.entry(*stamp)
                    .or_insert_with(|| part.values.index_axis(Axis(0), i).to_owned());
            }
        }
        Grid::from_rows(first, rows)
    }

    /// Combines two grids over the union of their timestamps, values from
    /// `self` taking precedence. Name and attributes come from `self`.
    pub fn combine_first(&self, fallback: &Grid) -> Result<Grid, DataError> {
        if !self.same_axes(fallback) {
            return Err(DataError::GridMismatch(format!(
                "cannot combine '{}' with '{}', spatial axes differ",
                self.name, fallback.name
            )));
        }
        let mut rows: BTreeMap<NaiveDateTime, Array2<f64>> = BTreeMap::new();
        for (i, stamp) in fallback.time.iter().enumerate() {
            rows.insert(*stamp, fallback.values.index_axis(Axis(0), i).to_owned());
        }
        for (i, stamp) in self.time.iter().enumerate() {
            rows.insert(*stamp, self.values.index_axis(Axis(0), i).to_owned());
        }
        Grid::from_rows(self, rows)
    }

    /// Renormalizes the spatial axes: longitudes remapped to [-180, 180) and
    /// both axes sorted ascending, with values reordered to match.
    pub fn normalize_axes(&mut self) {
        for lon in &mut self.lon {
            *lon = (*lon + 180.0).rem_euclid(360.0) - 180.0;
        }
        let lat_order = argsort(&self.lat);
        let lon_order = argsort(&self.lon);
        self.lat = lat_order.iter().map(|&i| self.lat[i]).collect();
        self.lon = lon_order.iter().map(|&i| self.lon[i]).collect();
        self.values = self
            .values
            .select(Axis(1), &lat_order)
            .select(Axis(2), &lon_order);
    }

    /// Drops a leading or trailing calendar day that does not carry the full
    /// 24-hour set of timestamps. Returns None when nothing is left.
    pub fn trim_partial_days(&self) -> Option<Grid> {
        let mut by_day: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (i, stamp) in self.time.iter().enumerate() {
            by_day.entry(stamp.date()).or_default().push(i);
        }

        let first_day = *by_day.keys().next()?;
        let last_day = *by_day.keys().next_back()?;
        let mut keep: Vec<usize> = Vec::with_capacity(self.time.len());
        for (day, indices) in &by_day {
            let partial = indices.len() < 24;
            if partial && (*day == first_day || *day == last_day) {
                continue;
            }
            keep.extend(indices.iter().copied());
        }
        if keep.is_empty() {
            return None;
        }

        let mut grid = self.clone();
        grid.time = keep.iter().map(|&i| self.time[i]).collect();
        grid.values = self.values.select(Axis(0), &keep);
        Some(grid)
    }

    /// In-place multiplication, used for declared unit rescaling.
    pub fn scale(&mut self, factor: f64) {
        self.values.mapv_inplace(|v| v * factor);
    }

    /// Aggregates hourly values to one value per calendar day. The time axis
    /// of the result is a proper midnight date axis, not an ordinal index.
    pub fn to_daily(&self, reducer: Reducer) -> Result<Grid, DataError> {
        let mut by_day: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (i, stamp) in self.time.iter().enumerate() {
            by_day.entry(stamp.date()).or_default().push(i);
        }
        if by_day.is_empty() {
            return Err(DataError::Empty);
        }

        let (nlat, nlon) = (self.lat.len(), self.lon.len());
        let mut time = Vec::with_capacity(by_day.len());
        let mut values = Array3::zeros((by_day.len(), nlat, nlon));
        for (d, (day, indices)) in by_day.iter().enumerate() {
            time.push(day.and_hms_opt(0, 0, 0).unwrap());
            for la in 0..nlat {
                for lo in 0..nlon {
                    let cell = reducer.reduce(indices.iter().map(|&i| self.values[[i, la, lo]]));
                    values[[d, la, lo]] = cell;
                }
            }
        }

        let mut grid = Grid::new(self.name.clone(), time, self.lat.clone(), self.lon.clone(), values)?;
        grid.attrs = self.attrs.clone();
        Ok(grid)
    }

    /// Keeps only the time steps whose timestamps appear in `stamps`,
    /// preserving order. Returns None when nothing remains.
    fn restrict_time(&self, stamps: &std::collections::BTreeSet<NaiveDateTime>) -> Option<Grid> {
        let keep: Vec<usize> = self
            .time
            .iter()
            .enumerate()
            .filter(|(_, stamp)| stamps.contains(stamp))
            .map(|(i, _)| i)
            .collect();
        if keep.is_empty() {
            return None;
        }
        if keep.len() == self.time.len() {
            return Some(self.clone());
        }
        let mut grid = self.clone();
        grid.time = keep.iter().map(|&i| self.time[i]).collect();
        grid.values = self.values.select(Axis(0), &keep);
        Some(grid)
    }

    /// Restricts both grids to the timestamps they share. A download hole in
    /// one input must not poison the overlap the other still covers. Returns
    /// None when the time axes are disjoint.
    pub fn align_time(&self, other: &Grid) -> Option<(Grid, Grid)> {
        let stamps: std::collections::BTreeSet<NaiveDateTime> =
            other.time.iter().copied().collect();
        let left = self.restrict_time(&stamps)?;
        let stamps: std::collections::BTreeSet<NaiveDateTime> =
            left.time.iter().copied().collect();
        let right = other.restrict_time(&stamps)?;
        Some((left, right))
    }

    /// Elementwise combination of two grids with identical axes.
    pub fn zip_with(
        &self,
        other: &Grid,
        name: impl Into<String>,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Grid, DataError> {
        if !self.same_axes(other) || self.time != other.time {
            return Err(DataError::GridMismatch(format!(
                "cannot zip '{}' with '{}', axes differ",
                self.name, other.name
            )));
        }
        let mut values = self.values.clone();
        values.zip_mut_with(&other.values, |a, &b| *a = f(*a, b));
        let mut grid = Grid::new(
            name,
            self.time.clone(),
            self.lat.clone(),
            self.lon.clone(),
            values,
        )?;
        grid.attrs = self.attrs.clone();
        Ok(grid)
    }

}

fn argsort(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    order
}

// -- Tests -------------------------------------------------------------------
