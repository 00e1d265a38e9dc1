//! Loads the offered catalog from a JSON file at startup.
//!
//! The file holds one catalog object or an array of them, each with its
//! resources, artifacts (inline `value` or `accessUrl`) and contract
//! offers. Loading is idempotent: catalogs and resources are matched by
//! their identifiers and refreshed in place.

use dsc_db::DbPool;
use dsc_negotiation::{register_catalog, NegotiationError, OfferedCatalog};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading the bootstrap catalog.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Many(Vec<OfferedCatalog>),
    One(OfferedCatalog),
}

/// Parses the bootstrap file at `path`.
pub fn read_catalogs(path: &Path) -> Result<Vec<OfferedCatalog>, BootstrapError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| BootstrapError::Read {
        path: display.clone(),
        source,
    })?;
    let file: CatalogFile =
        serde_json::from_str(&raw).map_err(|source| BootstrapError::Parse {
            path: display,
            source,
        })?;
    Ok(match file {
        CatalogFile::Many(catalogs) => catalogs,
        CatalogFile::One(catalog) => vec![catalog],
    })
}

/// Registers every catalog in the file at `path` as offered by
/// `publisher`. Returns the number of resources written.
///
/// Blocking; call it before the server starts or from a blocking task.
pub fn load_catalogs(pool: &DbPool, path: &Path, publisher: &str) -> Result<usize, BootstrapError> {
    let catalogs = read_catalogs(path)?;
    let mut conn = pool.get()?;

    let mut resources = 0;
    for catalog in &catalogs {
        let written = register_catalog(&mut conn, catalog, publisher)?;
        tracing::info!(catalog = %catalog.id, resources = written, "catalog registered");
        resources += written;
    }
    Ok(resources)
}
