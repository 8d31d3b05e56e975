//! Pull engine for arbor repositories.
//!
//! A pull resolves refs against a remote repository served over HTTP, then
//! runs a two-thread pipeline: the engine thread fetches objects, verifies
//! their digests and writes them to the local store, while the scan worker
//! traverses arriving metadata against the store to discover what else is
//! missing. The threads exchange typed messages over two queues and decide
//! that no work remains with a serial idle handshake. Ref updates apply
//! inside a store transaction committed only on success; a failed pull
//! leaves written objects behind so the next pull resumes.

pub mod fetcher;
pub mod msg;

mod discovery;
mod engine;
mod progress;
mod scan;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as chan;
use thiserror::Error;

use arbor::checksum::{self, Digest};
use arbor::content;
use arbor::keyfile;
use arbor::object::{self, ObjectName, ObjectType};
use arbor::refs::{RefError, RefName};
use arbor::store::{self, ObjectStore};

pub use fetcher::{Fetcher, TransportOptions};

use msg::ScanMsg;

/// Capacity of the scan queue. The fetch queue is unbounded so the scan
/// worker never blocks mid-drain; with both queues bounded, a full-queue
/// cycle between the two threads could deadlock.
const SCAN_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] keyfile::Error),
    #[error("failed to parse url {0:?}")]
    InvalidUrl(String),
    #[error("can't pull from archives with mode {0:?}")]
    UnsupportedMode(String),
    #[error(transparent)]
    Fetch(fetcher::Error),
    #[error("invalid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid ref summary file; missing ' ' in line")]
    MalformedSummary,
    #[error(transparent)]
    Checksum(#[from] checksum::ParseError),
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Filename(#[from] object::FilenameError),
    #[error(transparent)]
    Metadata(#[from] object::ParseError),
    #[error(transparent)]
    Content(#[from] content::ParseError),
    #[error("malformed detached metadata for commit {checksum}: {err}")]
    DetachedMetadata {
        checksum: Digest,
        #[source]
        err: serde_json::Error,
    },
    #[error("corrupted {objtype} object; checksum expected='{expected}' actual='{actual}'")]
    Corrupted {
        objtype: ObjectType,
        expected: Digest,
        actual: Digest,
    },
    #[error("exceeded maximum recursion")]
    Recursion,
    #[error("static delta descriptors are not supported")]
    StaticDelta,
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<fetcher::Error> for Error {
    fn from(err: fetcher::Error) -> Self {
        match err {
            fetcher::Error::Cancelled => Self::Cancelled,
            err => Self::Fetch(err),
        }
    }
}

/// Cooperative cancellation flag shared by everything a pull touches.
#[derive(Clone, Debug, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A pull handle pairing a local store with a transport.
pub struct Handle<S, F> {
    store: S,
    fetcher: F,
    cancel: Cancel,
}

impl<S, F> Handle<S, F> {
    pub fn new(store: S, fetcher: F) -> Self {
        Self {
            store,
            fetcher,
            cancel: Cancel::default(),
        }
    }

    /// The cancellation token observed by in-flight pulls.
    pub fn cancel(&self) -> Cancel {
        self.cancel.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

/// Result of a successful pull.
#[derive(Clone, Debug)]
pub struct PullResult {
    /// Refs updated under the remote's namespace.
    pub refs: Vec<(RefName, Digest)>,
    pub n_fetched_metadata: u32,
    pub n_fetched_content: u32,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
}

/// Releases the store transaction unless it was committed.
struct Transaction<'a, S: ObjectStore> {
    store: &'a S,
    done: bool,
}

impl<'a, S: ObjectStore> Transaction<'a, S> {
    fn begin(store: &'a S) -> Result<(Self, bool), store::Error> {
        let resuming = store.transaction_begin()?;
        Ok((Self { store, done: false }, resuming))
    }

    fn commit(mut self) -> Result<(), store::Error> {
        self.store.transaction_commit()?;
        self.done = true;
        Ok(())
    }
}

impl<S: ObjectStore> Drop for Transaction<'_, S> {
    fn drop(&mut self) {
        if !self.done {
            self.store.transaction_abort();
        }
    }
}

/// Synchronize the local store with `remote`.
///
/// With an explicit list, each entry is either a commit digest or a ref name
/// to resolve against the remote. Without one, the remote's configured
/// branches are pulled, or failing that everything its ref summary
/// advertises. On success the resolved refs are recorded under
/// `<remote>/<ref>` and the transaction is committed; on failure the
/// transaction is released and already-written objects remain for a later
/// pull to resume from.
pub fn pull<S, F>(
    handle: &mut Handle<S, F>,
    remote: &str,
    refs_to_fetch: Option<&[String]>,
) -> Result<PullResult, Error>
where
    S: ObjectStore + Sync,
    F: Fetcher + Sync,
{
    let start = Instant::now();
    let cancel = handle.cancel.clone();
    let n_scanned = Arc::new(AtomicU32::new(0));
    let progress = progress::Progress::new(n_scanned.clone());

    let discovery = discovery::discover(
        &handle.store,
        &mut handle.fetcher,
        remote,
        refs_to_fetch,
        &progress,
        &cancel,
    )?;

    let (txn, resuming) = Transaction::begin(&handle.store)?;
    if resuming {
        log::info!(target: "pull", "previous transaction left objects behind, re-walking stored metadata");
    }

    let store = &handle.store;
    let fetcher = &handle.fetcher;
    let (n_fetched_metadata, n_fetched_content) = thread::scope(|scope| {
        let (scan_tx, scan_rx) = chan::bounded::<ScanMsg>(SCAN_QUEUE_CAPACITY);
        let (fetch_tx, fetch_rx) = chan::unbounded();
        let (err_tx, err_rx) = chan::unbounded();

        let worker = scan::ScanWorker::new(
            store,
            scan_rx,
            fetch_tx.clone(),
            err_tx,
            cancel.clone(),
            resuming,
            discovery.gpg_verify,
            n_scanned,
        );
        thread::Builder::new()
            .name("scan".into())
            .spawn_scoped(scope, move || worker.run())
            .map_err(Error::Io)?;

        for checksum in &discovery.commits {
            scan_tx
                .send(ScanMsg::Scan(ObjectName::new(*checksum, ObjectType::Commit)))
                .ok();
        }
        for checksum in discovery.refs.values() {
            scan_tx
                .send(ScanMsg::Scan(ObjectName::new(*checksum, ObjectType::Commit)))
                .ok();
        }

        let mut engine = engine::PullEngine::new(
            store,
            fetcher,
            &discovery.base_uri,
            discovery.remote_mode,
            cancel.clone(),
            scan_tx.clone(),
            fetch_tx,
            fetch_rx,
            err_rx,
            &progress,
        );
        let outcome = engine.run();

        // Shut the worker down on every exit path; the scope joins it.
        scan_tx.send(ScanMsg::Quit).ok();
        outcome.map(|()| engine.fetched())
    })?;

    progress.finish();

    let mut refs = Vec::new();
    for (name, checksum) in &discovery.refs {
        let remote_ref = format!("{remote}/{name}");
        match handle.store.resolve_rev(&remote_ref, true)? {
            Some(previous) if previous == *checksum => {
                println!("remote {remote_ref} is unchanged from {previous}");
            }
            _ => {
                handle
                    .store
                    .transaction_set_ref(Some(remote), name, checksum)?;
                println!("remote {remote_ref} is now {checksum}");
                refs.push((name.clone(), *checksum));
            }
        }
    }
    txn.commit()?;

    let bytes_transferred = handle.fetcher.bytes_transferred();
    let elapsed = start.elapsed();
    if bytes_transferred > 0 {
        let (amount, unit) = if bytes_transferred < 1024 {
            (bytes_transferred, "B")
        } else {
            (bytes_transferred / 1024, "KiB")
        };
        println!(
            "{n_fetched_metadata} metadata, {n_fetched_content} content objects fetched; \
             {amount} {unit} transferred in {} seconds",
            elapsed.as_secs()
        );
    }

    Ok(PullResult {
        refs,
        n_fetched_metadata,
        n_fetched_content,
        bytes_transferred,
        elapsed,
    })
}
