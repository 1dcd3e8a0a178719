//! Append-only delimited store
//!
//! Every append is its own scoped write: open in append mode, write one
//! line, close. A failure on one record never touches the others.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crate::logic::error::StoreError;
use crate::logic::features::RawRecord;

#[derive(Debug, Clone)]
pub struct StoreWriter {
    path: PathBuf,
}

impl StoreWriter {
    pub fn new(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("Failed to create store directory {}: {}", parent.display(), e);
            }
        }
        Self { path }
    }

    #[cfg(test)]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one raw record as a delimited row
    pub fn append(&self, record: &RawRecord) -> Result<(), StoreError> {
        self.append_row(&record.to_row())
    }

    /// Append one pre-rendered row
    pub fn append_row(&self, row: &str) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.error(source))?;

        writeln!(file, "{}", row).map_err(|source| self.error(source))?;
        file.flush().map_err(|source| self.error(source))
    }

    fn error(&self, source: std::io::Error) -> StoreError {
        StoreError {
            path: self.path.clone(),
            source,
        }
    }
}
