//! Error taxonomy (spec.md §7). One variant per kind; propagation is the
//! same policy rqbit's `error.rs` uses: a single flat enum, `#[source]`
//! wired up where a lower-level error exists, no exceptions anywhere.

use peertalk_protocol::FrameError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    #[error("operation not valid in peer's current state")]
    InvalidState,

    #[error("invalid state transition")]
    InvalidTransition,

    #[error("peer or endpoint not found")]
    NotFound,

    #[error("transport capability not supported on this platform")]
    NotSupported,

    #[error("no free peer or endpoint slot")]
    PoolExhausted,

    #[error("send queue at blocking pressure")]
    WouldBlock,

    #[error("send queue at warning pressure")]
    Resource,

    #[error("payload exceeds slot or message max ({len} > {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error("transport reported a non-recoverable error: {0:#}")]
    Network(#[source] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect or close did not complete within policy")]
    Timeout,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type Result<T> = core::result::Result<T, Error>;
