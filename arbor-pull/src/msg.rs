//! Messages exchanged between the engine thread and the scan worker. The two
//! queues are the only synchronization between the threads: the engine feeds
//! `ScanMsg` to the worker, the worker (and the engine itself) feed
//! `FetchMsg` back. The `MainIdle`/`ScanIdle` pair implements the idle
//! handshake that decides when no work remains.

use arbor::object::ObjectName;

/// Messages consumed by the scan worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMsg {
    /// Traverse a metadata object, scheduling fetches for whatever is
    /// missing locally.
    Scan(ObjectName),
    /// The engine believes it has no more fetch work to emit. The worker
    /// echoes the newest token back through the fetch queue once its own
    /// queue is drained.
    MainIdle(u32),
    /// Stop the worker loop.
    Quit,
}

/// Messages consumed by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchMsg {
    /// Fetch, verify and write one object.
    Fetch(ObjectName),
    /// Fetch the detached metadata of a commit, then the commit itself.
    FetchDetachedMeta(ObjectName),
    /// The engine's own idle token, echoed back by the worker.
    MainIdle(u32),
    /// The worker has drained its queue.
    ScanIdle,
    /// Stop the engine loop.
    Quit,
}
