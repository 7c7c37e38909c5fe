//! Expands a requested variable list through the dependency graph.
//!
//! The expansion is an iterative fixed point: every round appends the
//! dependencies of each variable in the working set, re-inserting duplicates
//! at the end so a shared dependency sinks below everything that needs it.
//! Reversing the final order therefore puts dependencies before dependents.
//! The round count is capped at the catalog size; an acyclic graph always
//! stabilises within that bound, so exceeding it means a cycle in the table.

use crate::catalog::{Catalog, SINGLE_LEVEL};
use crate::error::CatalogError;

/// Work plan derived from the user request. `download` and `levels` are
/// aligned; `compute` keeps the original identifiers in dependency order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub download: Vec<String>,
    pub levels: Vec<String>,
    pub compute: Vec<String>,
}

impl ResolvedRequest {
    /// Downloadable (identifier, base, level) triples. The identifier keys the
    /// working directories, e.g. base "zg" at level "500" is "zg500".
    pub fn download_ids(&self) -> Vec<(String, String, String)> {
        self.download
            .iter()
            .zip(&self.levels)
            .map(|(base, level)| {
                let id = if level == SINGLE_LEVEL {
                    base.clone()
                } else {
                    format!("{base}{level}")
                };
                (id, base.clone(), level.clone())
            })
            .collect()
    }
}

pub fn resolve_request(
    catalog: &Catalog,
    request: &[String],
) -> Result<ResolvedRequest, CatalogError> {
    let expanded = expand(
        request,
        |base| catalog.get(base).map(|v| v.deps).unwrap_or(&[]),
        catalog.len(),
    )?;

    let mut download = Vec::new();
    let mut levels = Vec::new();
    let mut compute = Vec::new();
    for identifier in expanded.iter().rev() {
        let (base, level) = Catalog::split_level(identifier);
        if catalog.is_downloadable(&base) {
            if !download.contains(&base) {
                download.push(base);
                levels.push(level);
            }
        } else {
            compute.push(identifier.clone());
        }
    }

    Ok(ResolvedRequest {
        download,
        levels,
        compute,
    })
}

fn expand(
    request: &[String],
    deps_of: impl Fn(&str) -> &'static [&'static str],
    graph_size: usize,
) -> Result<Vec<String>, CatalogError> {
    let mut working: Vec<String> = request.to_vec();
    let max_rounds = graph_size.max(request.len()) + 1;

    for _ in 0..max_rounds {
        let snapshot = working.clone();
        for identifier in &snapshot {
            let (base, _) = Catalog::split_level(identifier);
            // Reverse keeps the declared sibling order once the list is flipped.
            for dep in deps_of(&base).iter().rev() {
                if let Some(pos) = working.iter().position(|c| c == dep) {
                    working.remove(pos);
                }
                working.push(dep.to_string());
            }
        }
        if working == snapshot {
            return Ok(working);
        }
    }

    Err(CatalogError::DependencyCycle(request.join(",")))
}

// -- Tests -------------------------------------------------------------------
