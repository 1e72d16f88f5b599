//! Error types and the fatal-abort path.
//!
//! Per the error handling design: invariant violations and transport
//! failures are not recoverable inside a running SPMD job. A rank that
//! hits one must abort the whole job rather than unwind, since a single
//! divergent rank leaves its peers blocked forever at the next collective.

use thiserror::Error;

/// Errors that can occur while configuring a solve. These happen before
/// any rank has entered a collective, so they are ordinary recoverable
/// `Result`s.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("theta must satisfy 0 < theta <= 1, got {0}")]
    InvalidTheta(f64),
    #[error("ncrit must be >= 1, got {0}")]
    InvalidNcrit(usize),
    #[error("nspawn must be >= 1, got {0}")]
    InvalidNspawn(usize),
    #[error("images must be < 10, got {0}")]
    InvalidImages(usize),
}

/// Errors raised once a solve is underway. [`FmmError::Invariant`] and
/// [`FmmError::Transport`] are always routed through [`abort_rank`] rather
/// than returned to a caller that could plausibly recover.
#[derive(Debug, Error)]
pub enum FmmError {
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Log a fatal error tagged with the rank number and abort the process.
///
/// This never returns. It intentionally calls [`std::process::abort`]
/// rather than panicking: a panic unwinds, which can run `Drop` impls that
/// attempt further collectives on a communicator whose peers have already
/// diverged. An abort guarantees the whole job dies rather than deadlocking.
pub fn abort_rank(rank: i32, err: &FmmError) -> ! {
    tracing::error!(rank, %err, "fatal error, aborting job");
    eprintln!("[rank {rank}] fatal: {err}");
    std::process::abort();
}
