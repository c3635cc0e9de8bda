//! Client error types.

use std::io;

use thiserror::Error;

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] mqlink_core::Error),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection refused: {}", mqlink_core::ConnectReturnCode(*.0))]
    ConnectionRefused(u8),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("In-flight queue is full")]
    QueueFull,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<mqlink_core::EncodeError> for ClientError {
    fn from(e: mqlink_core::EncodeError) -> Self {
        ClientError::Codec(e.into())
    }
}

impl From<mqlink_core::ProtocolError> for ClientError {
    fn from(e: mqlink_core::ProtocolError) -> Self {
        ClientError::Codec(e.into())
    }
}

impl ClientError {
    /// True when a background loop hitting this error must tear the connection down.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            ClientError::Codec(e) => e.is_connection_fatal(),
            ClientError::QueueFull
            | ClientError::NotConnected
            | ClientError::InvalidState(_)
            | ClientError::Config(_) => false,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
