//! In-memory [`Fetcher`] serving a canned set of URIs; used by the test
//! suites in place of a live remote.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tempfile::TempDir;

use arbor::checksum::Digest;

use super::{Error, Fetcher};
use crate::Cancel;

pub struct MemoryFetcher {
    objects: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
    bytes: AtomicU64,
    tmp: TempDir,
}

impl MemoryFetcher {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            objects: HashMap::new(),
            requests: Mutex::new(Vec::new()),
            bytes: AtomicU64::new(0),
            tmp: TempDir::new()?,
        })
    }

    pub fn insert(&mut self, uri: impl Into<String>, bytes: Vec<u8>) {
        self.objects.insert(uri.into(), bytes);
    }

    pub fn remove(&mut self, uri: &str) {
        self.objects.remove(uri);
    }

    /// Every URI requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, uri: &str, cancel: &Cancel) -> Result<Vec<u8>, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(uri.to_owned());

        let bytes = self.objects.get(uri).cloned().ok_or(Error::NotFound {
            uri: uri.to_owned(),
        })?;
        self.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(bytes)
    }

    fn fetch_partial(&self, uri: &str, cancel: &Cancel) -> Result<PathBuf, Error> {
        let bytes = self.fetch(uri, cancel)?;
        let path = self
            .tmp
            .path()
            .join(format!("fetch-{}", Digest::digest(uri.as_bytes())));
        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn bytes_transferred(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}
