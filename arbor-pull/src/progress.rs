//! One-line console status, rendered on the engine's 1 Hz tick while the
//! pipeline runs and directly around blocking discovery fetches.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytesize::ByteSize;

/// Counter snapshot taken by the engine on every tick.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Snapshot {
    pub metadata_fetches: u32,
    pub content_fetches: u32,
    pub metadata_writes: u32,
    pub content_writes: u32,
    pub requested_metadata: u32,
    pub requested_content: u32,
    pub fetched_metadata: u32,
    pub fetched_content: u32,
    pub scan_idle: bool,
    pub bytes_transferred: u64,
}

pub(crate) struct Progress {
    console: bool,
    n_scanned: Arc<AtomicU32>,
}

impl Progress {
    pub fn new(n_scanned: Arc<AtomicU32>) -> Self {
        Self {
            console: io::stderr().is_terminal(),
            n_scanned,
        }
    }

    /// Status while a blocking discovery fetch is in flight.
    pub fn requesting(&self, uri: &str) {
        self.line(&format!("Requesting {uri}"));
    }

    pub fn render(&self, s: &Snapshot) {
        if !self.console {
            return;
        }
        let outstanding_fetches = s.metadata_fetches + s.content_fetches;
        let outstanding_writes = s.metadata_writes + s.content_writes;

        let status = if outstanding_fetches > 0 {
            let fetched = s.fetched_metadata + s.fetched_content;
            let requested = s.requested_metadata + s.requested_content;
            let percent = if requested == 0 {
                0
            } else {
                fetched as u64 * 100 / requested as u64
            };
            format!(
                "Receiving objects: {percent}% ({fetched}/{requested}) {}",
                ByteSize::b(s.bytes_transferred)
            )
        } else if outstanding_writes > 0 {
            format!("Writing objects: {outstanding_writes}")
        } else if !s.scan_idle {
            format!(
                "Scanning metadata: {}",
                self.n_scanned.load(Ordering::Relaxed)
            )
        } else {
            "Idle".to_owned()
        };
        self.line(&status);
    }

    /// Terminate the status line before normal output resumes.
    pub fn finish(&self) {
        if self.console {
            let mut err = io::stderr();
            let _ = writeln!(err);
        }
    }

    fn line(&self, status: &str) {
        if !self.console {
            return;
        }
        let mut err = io::stderr();
        let _ = write!(err, "\r\x1b[K{status}");
        let _ = err.flush();
    }
}
