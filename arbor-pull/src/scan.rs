//! The metadata scan worker. It owns all read access to the local store
//! during a pull, along with the requested/scanned bookkeeping tables, so
//! the engine thread never blocks on store reads. Missing objects are
//! reported to the engine as fetch work; stored metadata is traversed to
//! discover children.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel as chan;

use arbor::checksum::Digest;
use arbor::object::{validate_filename, ObjectName, ObjectType, MAX_RECURSION};
use arbor::store::ObjectStore;

use crate::msg::{FetchMsg, ScanMsg};
use crate::{Cancel, Error};

pub(crate) struct ScanWorker<'a, S> {
    store: &'a S,
    scan_rx: chan::Receiver<ScanMsg>,
    fetch_tx: chan::Sender<FetchMsg>,
    errors: chan::Sender<Error>,
    cancel: Cancel,
    resuming: bool,
    gpg_verify: bool,
    scanned_metadata: HashSet<ObjectName>,
    requested_metadata: HashSet<Digest>,
    requested_content: HashSet<Digest>,
    n_scanned: Arc<AtomicU32>,
}

impl<'a, S: ObjectStore> ScanWorker<'a, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a S,
        scan_rx: chan::Receiver<ScanMsg>,
        fetch_tx: chan::Sender<FetchMsg>,
        errors: chan::Sender<Error>,
        cancel: Cancel,
        resuming: bool,
        gpg_verify: bool,
        n_scanned: Arc<AtomicU32>,
    ) -> Self {
        Self {
            store,
            scan_rx,
            fetch_tx,
            errors,
            cancel,
            resuming,
            gpg_verify,
            scanned_metadata: HashSet::new(),
            requested_metadata: HashSet::new(),
            requested_content: HashSet::new(),
            n_scanned,
        }
    }

    /// Worker loop. Each wakeup drains the scan queue, holding only the
    /// newest `MainIdle` token; after the drain the token (if any) is
    /// forwarded to the fetch queue, followed by `ScanIdle`. Any fetch the
    /// drain emitted precedes the forwarded token in queue order, which is
    /// what makes the idle handshake sound.
    pub fn run(mut self) {
        'wait: loop {
            let Ok(first) = self.scan_rx.recv() else {
                break;
            };
            let mut next = Some(first);
            let mut last_idle = None;

            while let Some(msg) = next {
                match msg {
                    ScanMsg::Scan(name) => {
                        if let Err(err) = self.scan(name) {
                            // Leave the rest of the queue for the next
                            // wakeup; the engine quits via the error latch.
                            log::debug!(target: "scan", "scan of {name} failed: {err}");
                            self.errors.send(err).ok();
                            continue 'wait;
                        }
                    }
                    ScanMsg::MainIdle(serial) => last_idle = Some(serial),
                    ScanMsg::Quit => break 'wait,
                }
                next = self.scan_rx.try_recv().ok();
            }

            if let Some(serial) = last_idle {
                if self.fetch_tx.send(FetchMsg::MainIdle(serial)).is_err() {
                    break;
                }
            }
            if self.fetch_tx.send(FetchMsg::ScanIdle).is_err() {
                break;
            }
        }
    }

    fn scan(&mut self, name: ObjectName) -> Result<(), Error> {
        self.scan_object(name, 0)
    }

    /// Idempotent per object: a name already scanned is a no-op, and a
    /// missing object is requested at most once per pull.
    fn scan_object(&mut self, name: ObjectName, depth: u32) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.scanned_metadata.contains(&name) {
            return Ok(());
        }

        let is_requested = self.requested_metadata.contains(&name.checksum);
        let is_stored = self.store.has_object(name.objtype, &name.checksum)?;

        if !is_stored && !is_requested {
            self.requested_metadata.insert(name.checksum);
            let msg = match name.objtype {
                ObjectType::Commit => FetchMsg::FetchDetachedMeta(name),
                _ => FetchMsg::Fetch(name),
            };
            log::debug!(target: "scan", "requesting fetch of {name}");
            self.fetch_tx.send(msg).ok();
        } else if is_stored {
            // When resuming we can't trust a previous pull to have visited
            // the children of stored metadata, so re-walk it.
            if self.resuming || is_requested {
                self.traverse(name, depth)?;
            }
            self.scanned_metadata.insert(name);
            self.n_scanned.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn traverse(&mut self, name: ObjectName, depth: u32) -> Result<(), Error> {
        match name.objtype {
            ObjectType::Commit => self.traverse_commit(&name.checksum, depth),
            ObjectType::DirTree => self.traverse_dirtree(&name.checksum, depth),
            ObjectType::DirMeta => Ok(()),
            // Content objects never enter the metadata scan.
            ObjectType::File => unreachable!("content object {name} in metadata scan"),
        }
    }

    fn traverse_commit(&mut self, checksum: &Digest, depth: u32) -> Result<(), Error> {
        if depth > MAX_RECURSION {
            return Err(Error::Recursion);
        }
        if self.gpg_verify {
            self.store.verify_commit(checksum)?;
        }
        let commit = self.store.load_commit(checksum)?;
        self.scan_object(
            ObjectName::new(commit.tree_contents, ObjectType::DirTree),
            depth + 1,
        )?;
        self.scan_object(
            ObjectName::new(commit.tree_meta, ObjectType::DirMeta),
            depth + 1,
        )
    }

    fn traverse_dirtree(&mut self, checksum: &Digest, depth: u32) -> Result<(), Error> {
        if depth > MAX_RECURSION {
            return Err(Error::Recursion);
        }
        let tree = self.store.load_dirtree(checksum)?;

        for entry in &tree.files {
            validate_filename(&entry.name)?;
            let is_stored = self.store.has_object(ObjectType::File, &entry.checksum)?;
            if !is_stored && !self.requested_content.contains(&entry.checksum) {
                self.requested_content.insert(entry.checksum);
                let name = ObjectName::new(entry.checksum, ObjectType::File);
                log::debug!(target: "scan", "requesting fetch of {name}");
                self.fetch_tx.send(FetchMsg::Fetch(name)).ok();
            }
        }
        for entry in &tree.dirs {
            validate_filename(&entry.name)?;
            self.scan_object(ObjectName::new(entry.tree, ObjectType::DirTree), depth + 1)?;
            self.scan_object(ObjectName::new(entry.meta, ObjectType::DirMeta), depth + 1)?;
        }
        Ok(())
    }
}
