//! Detection results shared across the jobs of one batch.
//!
//! Every job in a batch runs over the same images, and detection does not
//! depend on the preprocessing variant, so each image is detected once per
//! worker process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::pipeline::DetectionOutput;

/// Identity of an input file: where it is, how big, and when it last
/// changed. A rewritten file gets a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: PathBuf,
    len: u64,
    modified: Option<SystemTime>,
}

impl CacheKey {
    pub fn for_path(path: &Path) -> std::io::Result<Self> {
        let path = std::fs::canonicalize(path)?;
        let metadata = std::fs::metadata(&path)?;
        Ok(Self {
            path,
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

#[derive(Default)]
pub struct DetectionCache {
    entries: Mutex<HashMap<CacheKey, Arc<DetectionOutput>>>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<DetectionOutput>> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, output: Arc<DetectionOutput>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, output);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
