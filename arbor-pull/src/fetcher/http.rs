use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::blocking::{Client, Response};
use reqwest::header::RANGE;
use reqwest::StatusCode;

use arbor::checksum::Digest;

use super::{Error, Fetcher, TransportOptions};
use crate::Cancel;

const CHUNK_SIZE: usize = 8192;

/// Blocking HTTP transport. Partial downloads live under `tmp_dir`, keyed by
/// a digest of the URI, and survive a failed attempt so a later pull can
/// resume them with a range request.
pub struct HttpFetcher {
    client: Client,
    tmp_dir: PathBuf,
    bytes: AtomicU64,
}

impl HttpFetcher {
    pub fn new(tmp_dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let tmp_dir = tmp_dir.into();
        fs::create_dir_all(&tmp_dir)?;
        Ok(Self {
            client: Client::new(),
            tmp_dir,
            bytes: AtomicU64::new(0),
        })
    }

    fn partial_path(&self, uri: &str) -> PathBuf {
        self.tmp_dir
            .join(format!("fetch-{}", Digest::digest(uri.as_bytes())))
    }

    fn get(&self, uri: &str, resume_from: Option<u64>) -> Result<Response, Error> {
        let mut request = self.client.get(uri);
        if let Some(offset) = resume_from {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().map_err(|err| Error::Request {
            uri: uri.to_owned(),
            err: Box::new(err),
        })?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound {
                uri: uri.to_owned(),
            }),
            status if status.is_success() => Ok(response),
            status => Err(Error::Request {
                uri: uri.to_owned(),
                err: format!("unexpected status {status}").into(),
            }),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn configure(&mut self, options: TransportOptions) -> Result<(), Error> {
        self.client = Client::builder()
            .danger_accept_invalid_certs(options.tls_permissive)
            .build()
            .map_err(|err| Error::Setup(Box::new(err)))?;
        Ok(())
    }

    fn fetch(&self, uri: &str, cancel: &Cancel) -> Result<Vec<u8>, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut response = self.get(uri, None)?;
        let mut out = Vec::new();
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let n = response.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            self.bytes.fetch_add(n as u64, Ordering::Relaxed);
        }
        Ok(out)
    }

    fn fetch_partial(&self, uri: &str, cancel: &Cancel) -> Result<PathBuf, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let path = self.partial_path(uri);
        let offset = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let mut response = self.get(uri, (offset > 0).then_some(offset))?;

        // Only append when the server honored the range request.
        let mut file = if response.status() == StatusCode::PARTIAL_CONTENT {
            OpenOptions::new().append(true).open(&path)?
        } else {
            File::create(&path)?
        };
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            // On failure the partial file stays behind for the next attempt.
            let n = response.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            file.write_all(&chunk[..n])?;
            self.bytes.fetch_add(n as u64, Ordering::Relaxed);
        }
        Ok(path)
    }

    fn bytes_transferred(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}
