use thiserror::Error as ThisError;

pub type OpaqueError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure the engine can report for a device.
///
/// The `Display` form of each variant is the message appended to the device log.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("Invalid MAC address")]
    InvalidMacFormat,
    #[error("Invalid port")]
    InvalidPort,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Probe setup failed: {0}")]
    ProbeSetupFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
