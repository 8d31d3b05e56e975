//! The engine side of the pipeline: pops fetch work, drives the transport,
//! verifies digests, writes objects, feeds new metadata back to the scan
//! worker, and runs the idle handshake that decides when the pull is done.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel as chan;

use arbor::checksum::Digest;
use arbor::content::FileEnvelope;
use arbor::object::{self, Metadata, ObjectName, ObjectType};
use arbor::store::{DetachedMetadata, ObjectStore, RepoMode};

use crate::fetcher::{self, Fetcher};
use crate::msg::{FetchMsg, ScanMsg};
use crate::progress::{Progress, Snapshot};
use crate::{Cancel, Error};

/// Removes a fetch temp file on every path out of a completion.
struct TempFile(PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

pub(crate) struct PullEngine<'a, S, F> {
    store: &'a S,
    fetcher: &'a F,
    base_uri: &'a str,
    remote_mode: RepoMode,
    cancel: Cancel,
    scan_tx: chan::Sender<ScanMsg>,
    fetch_tx: chan::Sender<FetchMsg>,
    fetch_rx: chan::Receiver<FetchMsg>,
    errors: chan::Receiver<Error>,
    progress: &'a Progress,

    scan_idle: bool,
    idle_serial: u32,
    n_outstanding_metadata_fetches: u32,
    n_outstanding_metadata_writes: u32,
    n_outstanding_content_fetches: u32,
    n_outstanding_content_writes: u32,
    n_requested_metadata: u32,
    n_requested_content: u32,
    n_fetched_metadata: u32,
    n_fetched_content: u32,
    caught_error: Option<Error>,
}

impl<'a, S: ObjectStore, F: Fetcher> PullEngine<'a, S, F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a S,
        fetcher: &'a F,
        base_uri: &'a str,
        remote_mode: RepoMode,
        cancel: Cancel,
        scan_tx: chan::Sender<ScanMsg>,
        fetch_tx: chan::Sender<FetchMsg>,
        fetch_rx: chan::Receiver<FetchMsg>,
        errors: chan::Receiver<Error>,
        progress: &'a Progress,
    ) -> Self {
        Self {
            store,
            fetcher,
            base_uri,
            remote_mode,
            cancel,
            scan_tx,
            fetch_tx,
            fetch_rx,
            errors,
            progress,
            scan_idle: false,
            idle_serial: 0,
            n_outstanding_metadata_fetches: 0,
            n_outstanding_metadata_writes: 0,
            n_outstanding_content_fetches: 0,
            n_outstanding_content_writes: 0,
            n_requested_metadata: 0,
            n_requested_content: 0,
            n_fetched_metadata: 0,
            n_fetched_content: 0,
            caught_error: None,
        }
    }

    pub fn fetched(&self) -> (u32, u32) {
        (self.n_fetched_metadata, self.n_fetched_content)
    }

    /// Run the pipeline until the idle handshake completes with nothing
    /// outstanding, or until the first error is latched.
    pub fn run(&mut self) -> Result<(), Error> {
        let fetch_rx = self.fetch_rx.clone();
        let errors = self.errors.clone();
        let ticker = chan::tick(Duration::from_secs(1));

        // Prime the handshake.
        self.idle_serial = 1;
        self.scan_tx.send(ScanMsg::MainIdle(1)).ok();

        loop {
            chan::select! {
                recv(fetch_rx) -> msg => match msg {
                    Ok(FetchMsg::Quit) => break,
                    Ok(msg) => {
                        if let Err(err) = self.handle(msg) {
                            self.latch(err);
                        }
                    }
                    // All senders gone; nothing further can arrive.
                    Err(_) => break,
                },
                recv(errors) -> err => match err {
                    Ok(err) => self.latch(err),
                    // The worker exited; the scope join surfaces its panic.
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.progress.render(&self.snapshot()),
            }

            if self.cancel.is_cancelled() {
                self.latch(Error::Cancelled);
            }
            if self.caught_error.is_some() || self.is_done() {
                break;
            }
        }

        match self.caught_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// First error wins; later ones are dropped.
    fn latch(&mut self, err: Error) {
        if self.caught_error.is_none() {
            log::debug!(target: "pull", "latched error: {err}");
            self.caught_error = Some(err);
        }
    }

    fn is_done(&self) -> bool {
        self.scan_idle
            && self.n_outstanding_metadata_fetches == 0
            && self.n_outstanding_content_fetches == 0
            && self.n_outstanding_metadata_writes == 0
            && self.n_outstanding_content_writes == 0
            && self.fetch_rx.is_empty()
            && self.scan_tx.is_empty()
    }

    fn handle(&mut self, msg: FetchMsg) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match msg {
            FetchMsg::Fetch(name) => self.fetch_object(name, false),
            FetchMsg::FetchDetachedMeta(name) => self.fetch_object(name, true),
            FetchMsg::MainIdle(serial) => {
                // Our own token came back around with no work in between.
                if serial == self.idle_serial {
                    debug_assert!(!self.scan_idle);
                    log::debug!(target: "pull", "metadata scan is idle");
                    self.scan_idle = true;
                }
                Ok(())
            }
            FetchMsg::ScanIdle => {
                if !self.scan_idle {
                    // Work crossed in flight; re-probe with a fresh serial.
                    self.idle_serial += 1;
                    log::debug!(target: "pull", "probing scan worker, serial {}", self.idle_serial);
                    self.scan_tx
                        .send(ScanMsg::MainIdle(self.idle_serial))
                        .ok();
                }
                Ok(())
            }
            FetchMsg::Quit => Ok(()),
        }
    }

    fn fetch_object(&mut self, name: ObjectName, detached_meta: bool) -> Result<(), Error> {
        let uri = if detached_meta {
            format!(
                "{}/objects/{}.meta",
                self.base_uri,
                object::loose_path(&name.checksum, ObjectType::Commit, self.remote_mode)
            )
        } else {
            format!(
                "{}/{}",
                self.base_uri,
                object::relative_object_path(&name.checksum, name.objtype, self.remote_mode)
            )
        };

        if name.objtype.is_metadata() {
            self.n_outstanding_metadata_fetches += 1;
            self.n_requested_metadata += 1;
        } else {
            self.n_outstanding_content_fetches += 1;
            self.n_requested_content += 1;
        }

        log::debug!(target: "pull", "fetching {name} from {uri}");
        let fetched = self.fetcher.fetch_partial(&uri, &self.cancel);
        if name.objtype.is_metadata() {
            self.complete_metadata_fetch(name, detached_meta, fetched)
        } else {
            self.complete_content_fetch(name, fetched)
        }
    }

    fn complete_metadata_fetch(
        &mut self,
        name: ObjectName,
        detached_meta: bool,
        fetched: Result<PathBuf, fetcher::Error>,
    ) -> Result<(), Error> {
        self.n_outstanding_metadata_fetches -= 1;
        let temp = match fetched {
            Ok(path) => TempFile(path),
            Err(fetcher::Error::NotFound { .. }) if detached_meta => {
                // There isn't any detached metadata, just fetch the commit.
                self.n_fetched_metadata += 1;
                self.fetch_tx.send(FetchMsg::Fetch(name)).ok();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        log::debug!(target: "pull", "fetch of {name} complete");
        let bytes = fs::read(&temp.0)?;

        if detached_meta {
            let metadata: DetachedMetadata =
                serde_json::from_slice(&bytes).map_err(|err| Error::DetachedMetadata {
                    checksum: name.checksum,
                    err,
                })?;
            self.store
                .write_detached_commit_metadata(&name.checksum, &metadata)?;
            self.n_fetched_metadata += 1;
            self.fetch_tx.send(FetchMsg::Fetch(name)).ok();
            return Ok(());
        }

        let metadata = Metadata::parse(name.objtype, &bytes)?;
        let actual = metadata.digest();
        if actual != name.checksum {
            return Err(Error::Corrupted {
                objtype: name.objtype,
                expected: name.checksum,
                actual,
            });
        }

        self.n_outstanding_metadata_writes += 1;
        let written = self.store.write_metadata(&metadata);
        self.complete_metadata_write(name, written)
    }

    fn complete_metadata_write(
        &mut self,
        name: ObjectName,
        written: Result<Digest, arbor::store::Error>,
    ) -> Result<(), Error> {
        // Decrement before any error can latch, so termination never hangs
        // on a failed write.
        self.n_outstanding_metadata_writes -= 1;
        let actual = written?;
        if actual != name.checksum {
            return Err(Error::Corrupted {
                objtype: name.objtype,
                expected: name.checksum,
                actual,
            });
        }
        log::debug!(target: "pull", "write of {name} complete");

        self.scan_idle = false;
        self.scan_tx.send(ScanMsg::Scan(name)).ok();
        self.n_fetched_metadata += 1;
        Ok(())
    }

    fn complete_content_fetch(
        &mut self,
        name: ObjectName,
        fetched: Result<PathBuf, fetcher::Error>,
    ) -> Result<(), Error> {
        self.n_outstanding_content_fetches -= 1;
        let temp = TempFile(fetched?);
        log::debug!(target: "pull", "fetch of {name} complete");

        let bytes = fs::read(&temp.0)?;
        let envelope = FileEnvelope::parse(&bytes)?;
        let stream = envelope.to_bytes();
        let actual = Digest::digest(&stream);
        if actual != name.checksum {
            return Err(Error::Corrupted {
                objtype: ObjectType::File,
                expected: name.checksum,
                actual,
            });
        }

        self.n_outstanding_content_writes += 1;
        let written = self.store.write_content(&stream);
        self.complete_content_write(name, written)
    }

    fn complete_content_write(
        &mut self,
        name: ObjectName,
        written: Result<Digest, arbor::store::Error>,
    ) -> Result<(), Error> {
        self.n_outstanding_content_writes -= 1;
        let actual = written?;
        if actual != name.checksum {
            return Err(Error::Corrupted {
                objtype: ObjectType::File,
                expected: name.checksum,
                actual,
            });
        }
        log::debug!(target: "pull", "write of {name} complete");
        self.n_fetched_content += 1;
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            metadata_fetches: self.n_outstanding_metadata_fetches,
            content_fetches: self.n_outstanding_content_fetches,
            metadata_writes: self.n_outstanding_metadata_writes,
            content_writes: self.n_outstanding_content_writes,
            requested_metadata: self.n_requested_metadata,
            requested_content: self.n_requested_content,
            fetched_metadata: self.n_fetched_metadata,
            fetched_content: self.n_fetched_content,
            scan_idle: self.scan_idle,
            bytes_transferred: self.fetcher.bytes_transferred(),
        }
    }
}
