//! Persistence of the tenant registry to a flat JSON file.

use super::model::TenantRecord;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access tenants file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid tenants JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<TenantRecord>),
    One(TenantRecord),
}

/// Parse either a JSON array of tenant records or a single record object.
pub fn parse_records(data: &[u8]) -> Result<Vec<TenantRecord>, serde_json::Error> {
    match serde_json::from_slice::<OneOrMany>(data) {
        Ok(OneOrMany::Many(records)) => Ok(records),
        Ok(OneOrMany::One(record)) => Ok(vec![record]),
        // Re-parse as a list so the error points at the real problem
        Err(_) => serde_json::from_slice::<Vec<TenantRecord>>(data),
    }
}

#[derive(Debug, Clone)]
pub struct TenantStore {
    path: PathBuf,
}

impl TenantStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Vec<TenantRecord>, StoreError> {
        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(parse_records(&data)?)
    }

    /// Write all records as a pretty-printed JSON array. The file is written
    /// to a sibling temp file first and renamed into place.
    pub async fn save(&self, records: &[TenantRecord]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        tokio::fs::write(&tmp, &data).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}
