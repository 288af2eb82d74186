//! Cache of parsed FASTA indexes.
//!
//! Bases requests reopen the FASTA each time, but parsing the `.fai` is
//! the expensive part and the result is immutable for a given file
//! version. Keys carry the catalog version tag, so replacing a file
//! naturally retires its cached entry; values sit behind `Arc` so
//! eviction never invalidates a borrowed index.

use std::path::Path;
use std::sync::Arc;

use moka::sync::Cache;
use noodles::fasta::fai;

use crate::backends::references;
use crate::{Error, Result};

const CACHE_CAPACITY: u64 = 256;

#[derive(Clone)]
pub struct IndexCache {
    fai_indexes: Cache<String, Arc<fai::Index>>,
}

impl IndexCache {
    pub fn new() -> IndexCache {
        IndexCache {
            fai_indexes: Cache::new(CACHE_CAPACITY),
        }
    }

    pub fn fai_index(&self, id: &str, version: &str, fasta: &Path) -> Result<Arc<fai::Index>> {
        self.fai_indexes
            .try_get_with(format!("{}@{}", id, version), || {
                references::read_index(fasta).map(Arc::new)
            })
            .map_err(flatten)
    }
}

impl Default for IndexCache {
    fn default() -> IndexCache {
        IndexCache::new()
    }
}

// moka wraps the loader error in an Arc; unwrap to our own error type.
fn flatten(error: Arc<Error>) -> Error {
    match Arc::try_unwrap(error) {
        Ok(error) => error,
        Err(shared) => Error::Internal(shared.to_string()),
    }
}
