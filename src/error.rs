//! Error
//!
//! This module provides the errors shared by the transport, the server
//! dispatcher and the client proxy, built with [`thiserror`].
//!
use std::io;
use thiserror::Error;

use crate::protocol::OperationTag;

/// Result use the [`LibraryError`] as error.
pub type Result<T> = std::result::Result<T, LibraryError>;

/// LibraryError is the error type of every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum LibraryError {
    /// I/O fault on the underlying stream.
    #[error("transport error {0}")]
    TransportError(#[from] io::Error),

    /// The peer closed the stream.
    #[error("channel closed by peer")]
    ChannelClosed,

    /// Bytes or envelope that cannot be interpreted.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Failure reported by the business layer, carried as an `ERROR` reply.
    #[error("{0}")]
    ServiceError(String),

    /// A reply whose tag is not one the pending call can accept.
    #[error("unexpected reply tagged {0}")]
    UnexpectedReply(OperationTag),

    /// A call other than login was issued without a live connection.
    #[error("not connected")]
    NotConnected,

    /// No reply arrived within the configured timeout.
    #[error("timed out waiting for reply")]
    ReplyTimeout,

    #[error("serde error {0}")]
    /// Catalog seed files that fail to parse
    SerdeError(#[from] serde_json::Error),
}

impl LibraryError {
    /// Whether this error means the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LibraryError::TransportError(_)
                | LibraryError::ChannelClosed
                | LibraryError::MalformedMessage(_)
                | LibraryError::UnexpectedReply(_)
                | LibraryError::ReplyTimeout
        )
    }
}
