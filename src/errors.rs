//! Error taxonomy for the replication bridge.
//!
//! Mirrors the error classes the bridge needs to distinguish at the call
//! site: configuration mistakes caught before any connection opens,
//! schema/payload problems in the data itself, and transport failures that
//! are either locally recoverable or fatal.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("payload error: {0}")]
    Payload(String),

    #[error("postgres connection error: {0}")]
    Connection(String),

    #[error("postgres protocol error: {0}")]
    Protocol(String),

    #[error("replication slot \"{0}\" still in use after {1} retries")]
    SlotAcquireExhausted(String, u32),

    #[error("sink backed off too many times")]
    BackoffExhausted,

    #[error("sink error: {0}")]
    Sink(String),

    #[error("record of {0} bytes exceeds the {1} byte limit")]
    OversizedRecord(usize, usize),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    CString(#[from] std::ffi::NulError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn schema<S: Into<String>>(msg: S) -> Self {
        Self::Schema(msg.into())
    }

    pub fn payload<S: Into<String>>(msg: S) -> Self {
        Self::Payload(msg.into())
    }

    pub fn sink<S: Into<String>>(msg: S) -> Self {
        Self::Sink(msg.into())
    }

    /// True for the one transport failure the supervisor recovers from by
    /// restarting the session: Aurora-style connection drops (spec.md 4.6).
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::Connection(msg) | Self::Protocol(msg) => {
                msg.contains("server closed the connection unexpectedly")
            }
            _ => false,
        }
    }
}
