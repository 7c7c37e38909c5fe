//! Fetch stage.
//!
//! Downloads every (variable, partition) pair into the raw tree. A failed
//! partition is logged and skipped, never fatal: recent days routinely lag on
//! the store side and turn up in the next run. Any partial file a failed
//! download leaves behind is removed so later stages only ever see complete
//! files.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Datelike;
use tracing::{info, warn};

use crate::catalog::{Catalog, LevelType, SINGLE_LEVEL};
use crate::cds::{CdsRequest, DataStore};
use crate::cli::create_spinner;
use crate::config::{RunConfig, DATASET_NAME};
use crate::grid::codec::FILE_EXT;
use crate::planner::Partition;
use crate::resolver::ResolvedRequest;
use crate::stages::STAGE_RAW;

/// Store catalog holding a level type. Years before 1959 are served from the
/// preliminary back extension instead of the main catalog.
fn store_catalog(level_type: LevelType, year: i32) -> String {
    let suffix = if year < 1959 {
        "-preliminary-back-extension"
    } else {
        ""
    };
    format!("reanalysis-era5-{}-levels{}", level_type.as_str(), suffix)
}

fn raw_file_name(id: &str, area_name: &str, partition: &Partition) -> String {
    format!(
        "{}_{}_hour_{}_{}.{}",
        DATASET_NAME,
        id,
        area_name,
        partition.file_tag(),
        FILE_EXT
    )
}

fn build_request(config: &RunConfig, cds_name: &str, level: &str, partition: &Partition) -> CdsRequest {
    CdsRequest {
        product_type: "reanalysis".to_string(),
        format: "json".to_string(),
        area: config.area.cds_bounds(),
        year: partition.selector.year.clone(),
        month: partition.selector.month.clone(),
        day: partition.selector.day.clone(),
        time: partition.selector.time.clone(),
        variable: cds_name.to_string(),
        pressure_level: (level != SINGLE_LEVEL).then(|| level.to_string()),
    }
}

/// Downloads all partitions for every downloadable variable in the plan.
pub async fn run<S: DataStore>(
    config: &RunConfig,
    catalog: &Catalog,
    store: &S,
    resolved: &ResolvedRequest,
    partitions: &[Partition],
) -> Result<()> {
    for (id, base, level) in resolved.download_ids() {
        let var = catalog
            .get(&base)
            .with_context(|| format!("variable '{base}' vanished from the catalog"))?;

        let raw_dir = config.stage_dir(STAGE_RAW, &id);
        fs::create_dir_all(&raw_dir)
            .with_context(|| format!("cannot create {}", raw_dir.display()))?;

        let bar = create_spinner(format!("Downloading {id}..."));
        let mut fetched = 0usize;
        for partition in partitions {
            let catalog_name = store_catalog(var.level_type, partition.start.year());
            let request = build_request(config, var.cds_name, &level, partition);
            let target: PathBuf = raw_dir.join(raw_file_name(&id, &config.area.name, partition));

            match store.retrieve(&catalog_name, &request, &target).await {
                Ok(()) => fetched += 1,
                Err(error) => {
                    warn!(
                        "{id} {}: {error}, skipping this partition",
                        partition.file_tag()
                    );
                    if target.exists() {
                        let _ = fs::remove_file(&target);
                    }
                }
            }
        }
        bar.finish_with_message(format!(
            "Downloaded {id}: {fetched}/{} partitions",
            partitions.len()
        ));
        info!("{id}: {fetched}/{} partitions fetched", partitions.len());
    }
    Ok(())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use std::io::Write;
    use std::path::Path;
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use ndarray::Array3;

    use super::*;
    use crate::error::FetchError;
    use crate::grid::codec::{self, Encoding};
    use crate::grid::Grid;
    use crate::planner;

    /// Writes a minimal valid grid file, or plants a partial file and fails
    /// for partitions whose tag is listed in `fail_tags`.
    struct MockStore {
        fail_tags: Vec<String>,
        requests: Mutex<Vec<(String, CdsRequest)>>,
    }

    impl MockStore {
        fn new(fail_tags: &[&str]) -> MockStore {
            MockStore {
                fail_tags: fail_tags.iter().map(|s| s.to_string()).collect(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl DataStore for MockStore {
        async fn retrieve(
            &self,
            catalog: &str,
            request: &CdsRequest,
            target: &Path,
        ) -> Result<(), FetchError> {
            self.requests
                .lock()
                .unwrap()
                .push((catalog.to_string(), request.clone()));

            let tag = format!("{}{}", request.year, request.month[0]);
            if self.fail_tags.iter().any(|f| f == &tag) {
                let mut partial = std::fs::File::create(target)?;
                partial.write_all(b"truncated")?;
                return Err(FetchError::TaskFailed(
                    "mock".to_string(),
                    "data unavailable".to_string(),
                ));
            }

            let time = vec![NaiveDate::from_ymd_opt(2022, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()];
            let values = Array3::from_elem((1, 1, 1), 280.0);
            let grid = Grid::new("t2m", time, vec![50.0], vec![0.0], values).unwrap();
            codec::write(&grid, target, &Encoding::for_grid(&grid))
                .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
            Ok(())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn should_fetch_each_partition_into_the_raw_tree() {
        let archive = tempfile::TempDir::new().unwrap();
        let config = RunConfig::for_tests(archive.path(), false);
        let catalog = Catalog::new();
        let store = MockStore::new(&[]);
        let resolved = crate::resolver::resolve_request(&catalog, &["tas".to_string()]).unwrap();
        let partitions = planner::plan(date(2015, 1, 7), date(2015, 3, 17), date(2020, 1, 1));

        run(&config, &catalog, &store, &resolved, &partitions)
            .await
            .unwrap();

        let raw_dir = config.stage_dir(STAGE_RAW, "tas");
        let files: Vec<_> = std::fs::read_dir(&raw_dir).unwrap().collect();
        assert_eq!(files.len(), 3);

        let requests = store.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].0, "reanalysis-era5-single-levels");
        assert_eq!(requests[0].1.variable, "2m_temperature");
        assert!(requests[0].1.pressure_level.is_none());
    }

    #[tokio::test]
    async fn should_remove_partial_file_when_a_partition_fails() {
        let archive = tempfile::TempDir::new().unwrap();
        let config = RunConfig::for_tests(archive.path(), false);
        let catalog = Catalog::new();
        // February fails, January and March still land.
        let store = MockStore::new(&["201502"]);
        let resolved = crate::resolver::resolve_request(&catalog, &["tas".to_string()]).unwrap();
        let partitions = planner::plan(date(2015, 1, 7), date(2015, 3, 17), date(2020, 1, 1));

        run(&config, &catalog, &store, &resolved, &partitions)
            .await
            .unwrap();

        let raw_dir = config.stage_dir(STAGE_RAW, "tas");
        let files: Vec<_> = std::fs::read_dir(&raw_dir).unwrap().collect();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn should_route_pressure_variables_and_old_years() {
        let archive = tempfile::TempDir::new().unwrap();
        let config = RunConfig::for_tests(archive.path(), false);
        let catalog = Catalog::new();
        let store = MockStore::new(&[]);
        let resolved = crate::resolver::resolve_request(&catalog, &["zg500".to_string()]).unwrap();
        let partitions = planner::plan(date(1950, 3, 1), date(1950, 3, 31), date(2020, 1, 1));

        run(&config, &catalog, &store, &resolved, &partitions)
            .await
            .unwrap();

        let requests = store.requests.lock().unwrap();
        assert_eq!(
            requests[0].0,
            "reanalysis-era5-pressure-levels-preliminary-back-extension"
        );
        assert_eq!(requests[0].1.pressure_level, Some("500".to_string()));
        assert!(config.stage_dir(STAGE_RAW, "zg500").is_dir());
    }
}
