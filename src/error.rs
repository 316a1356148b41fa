use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(
        "the serial interface {dev} is not available, is the device plugged in or busy? ({source})"
    )]
    Unavailable {
        dev: String,
        #[source]
        source: serialport::Error,
    },
    #[error("unable to send the command, the serial interface is closed or has been removed")]
    Disconnected,
    #[error("serial i/o: {0}")]
    Io(#[from] io::Error),
    #[error("the command {0} is not registered")]
    NotRegistered(String),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("invalid expected output for {command}: {source}")]
    InvalidPattern {
        command: String,
        #[source]
        source: regex::Error,
    },
    #[error("catalog: {0}")]
    Catalog(String),
    #[error("send pipeline is not running")]
    WorkerStopped,
}

impl GatewayError {
    /// True for rejections caused by the request itself rather than the device or process.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotRegistered(_) | Self::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
