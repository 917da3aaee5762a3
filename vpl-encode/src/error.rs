use std::time::Duration;

use crate::{format::FourCc, status::Status, surface::AllocationError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot create session, no implementation meets the selection criteria: {0}")]
    SessionCreation(Status),
    #[error("{op} failed: {status}")]
    Sdk { op: &'static str, status: Status },
    #[error("Surface allocation failed: {0}")]
    Allocation(#[from] AllocationError),
    #[error("Unsupported FourCC {0:?}, no frame load rule")]
    UnsupportedFormat(FourCc),
    #[error("Color conversion failed: {0}")]
    Conversion(String),
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot parse configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Device lost ({0})")]
    DeviceLost(Status),
    #[error("Incompatible video parameters")]
    IncompatibleVideoParam,
    #[error("Sync operation did not complete within {0:?}")]
    SyncTimeout(Duration),
    #[error("No free surface after waiting {0:?}")]
    NoFreeSurface(Duration),
    #[error("Encode thread panicked")]
    EncodeThreadPanicked,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Translates an SDK status into the crate error taxonomy.
///
/// Warnings are accepted, the caller decides whether to log them.
pub fn check_error(op: &'static str, status: Status) -> Result<()> {
    match status {
        s if !s.is_error() => Ok(()),
        Status::DEVICE_LOST | Status::DEVICE_FAILED | Status::GPU_HANG => {
            Err(Error::DeviceLost(status))
        }
        Status::INCOMPATIBLE_VIDEO_PARAM => Err(Error::IncompatibleVideoParam),
        status => Err(Error::Sdk { op, status }),
    }
}
