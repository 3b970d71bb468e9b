use thiserror::Error;

/// Errors surfaced by the vector engine. `DimensionMismatch` and `CountMismatch`
/// are programmer errors, surfaced synchronously to the calling handler.
/// `Decode` wraps an index-kernel failure during insertion; it is also
/// surfaced to the caller rather than swallowed, since it means the batch
/// was not stored. Checkpoint/load I/O failures are a separate, lower
/// severity: they're reported through `worker_store::StoreError` and
/// logged at the call site in `worker-engine`, not raised here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("doc id count mismatch: {doc_ids} doc_ids for {vectors} vectors")]
    CountMismatch { doc_ids: usize, vectors: usize },

    #[error("failed to decode vector payload: {0}")]
    Decode(String),
}

/// Fatal conditions that abort the process before the session state machine starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not commit {requested_gb} GiB of RAM: only {allocated_gb} GiB allocated")]
    InsufficientMemory { requested_gb: u64, allocated_gb: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Transport/session-level failures. All of these trigger the 5s backoff
/// and a return to `Offline`; none of them are fatal to the process.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("coordinator rejected registration: {0}")]
    HandshakeRejected(String),

    #[error("no coordinator endpoint in {0:?} accepted a connection")]
    NoEndpointReachable(Vec<String>),
}
