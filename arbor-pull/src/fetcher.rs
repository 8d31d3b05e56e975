//! The transport seam used by the pull engine: plain HTTP GET machinery with
//! partial-download resume, plus an in-memory double for tests.

pub mod http;
pub mod memory;

use std::path::PathBuf;

use thiserror::Error;

use crate::Cancel;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{uri}: not found")]
    NotFound { uri: String },
    #[error("fetch of {uri} failed: {err}")]
    Request {
        uri: String,
        #[source]
        err: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("transport setup failed: {0}")]
    Setup(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation cancelled")]
    Cancelled,
}

/// Options read from the remote configuration and applied to the transport
/// before any request is issued.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportOptions {
    /// Accept TLS certificates that fail verification.
    pub tls_permissive: bool,
}

/// HTTP GET machinery driven by the pull engine. URIs are absolute; the
/// engine joins them from the remote's base URI.
pub trait Fetcher {
    /// Apply transport options. Called once, before any request.
    fn configure(&mut self, options: TransportOptions) -> Result<(), Error> {
        let _ = options;
        Ok(())
    }

    /// Fetch a URI into memory.
    fn fetch(&self, uri: &str, cancel: &Cancel) -> Result<Vec<u8>, Error>;

    /// Fetch a URI to a temporary file owned by the transport, resuming a
    /// partial download left behind by an earlier attempt. The caller
    /// removes the file once it is done with it.
    fn fetch_partial(&self, uri: &str, cancel: &Cancel) -> Result<PathBuf, Error>;

    /// Total bytes received over this transport.
    fn bytes_transferred(&self) -> u64;
}
