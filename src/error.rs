use std::io;
use std::result;

use thiserror::Error;

use crate::key::Key;

pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by nodes and users.
///
/// `UnreachablePeer` is only returned by single-peer operations such as `ping`. Lookups absorb
/// it and move on to the next candidate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("key {0:?} not found")]
    NotFound(Key),

    #[error("user `{0}` not found")]
    UserNotFound(String),

    #[error("peer {0} is unreachable")]
    UnreachablePeer(String),

    #[error("message delivery to {0} failed")]
    DeliveryFailed(String),

    #[error("node has been shut down")]
    InvalidState,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}
