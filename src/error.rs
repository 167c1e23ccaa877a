//! Errors produced by the connection/channel engine.

use amq_protocol::frame::{GenError, ParserError};
use thiserror::Error;
use tokio::task::JoinError;

/// Error raised synchronously from configuration and id-allocation entry points.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("channel id {0} is already in use")]
    DuplicateChannelId(u16),

    #[error("channel id space (1..65535) is exhausted")]
    ChannelIdSpaceExhausted,

    #[error("remote address list must not be empty")]
    NoRemoteAddress,

    #[error("invalid option combination: {0}")]
    InvalidOptions(&'static str),
}

/// Error in the byte <-> frame boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("frame is malformed: {0}")]
    MalformedFrame(String),

    #[error("frame exceeds negotiated frame_max")]
    MaxFrameSizeExceeded,
}

impl From<ParserError> for TransportError {
    fn from(err: ParserError) -> Self {
        TransportError::MalformedFrame(err.to_string())
    }
}

impl From<GenError> for TransportError {
    fn from(err: GenError) -> Self {
        match err {
            GenError::BufferTooSmall(_) => TransportError::MaxFrameSizeExceeded,
            other => TransportError::MalformedFrame(other.to_string()),
        }
    }
}

/// Error raised while performing the Connection.Start/Tune/Open handshake.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected frame during handshake: {0}")]
    UnexpectedFrame(String),

    #[error("connection closed by broker during handshake: {0}")]
    RejectedByBroker(String),

    #[error("socket closed before handshake completed")]
    UnexpectedEof,
}

/// Error surfaced for a single channel; never tears down the connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("channel closed by broker: {0}")]
    ClosedByBroker(String),

    #[error("protocol violation on channel: {0}")]
    ProtocolViolation(String),

    #[error("channel id {0} not found")]
    NotFound(u16),
}

/// Top level error returned from the public `Connection`/`Channel` API.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("connection event loop panicked: {0}")]
    JoinError(#[from] JoinError),

    #[error("connection is already stopped")]
    AlreadyStopped,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::AlreadyStopped
    }
}
