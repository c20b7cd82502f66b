//! Error taxonomy for the acquisition core.
//!
//! Hardware faults never show up here: drivers degrade them to sentinel
//! values (see [`crate::sensors::MISSING`]). Everything in [`StationError`] is
//! either a setup problem, a sensor implementation bug, a storage failure or a
//! misuse of the scheduler.

use thiserror::Error;

use crate::sensors::DType;

pub type StationResult<T> = std::result::Result<T, StationError>;

#[derive(Error, Debug)]
pub enum StationError {
    /// Fatal at setup; the sensor or measurement never enters service.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A driver returned a value whose type differs from its declared dtype.
    #[error("field '{field}' has type {found}, declared {expected}")]
    Type {
        field: String,
        expected: DType,
        found: String,
    },

    /// A driver omitted a field it declared.
    #[error("field '{0}' declared but missing from reading")]
    MissingField(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("scheduling error: {0}")]
    Scheduling(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Type,
    MissingField,
    Storage,
    Scheduling,
}

impl StationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StationError::Configuration(_) => ErrorKind::Configuration,
            StationError::Type { .. } => ErrorKind::Type,
            StationError::MissingField(_) => ErrorKind::MissingField,
            StationError::Storage(_) => ErrorKind::Storage,
            StationError::Scheduling(_) => ErrorKind::Scheduling,
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        StationError::Configuration(msg.into())
    }

    pub(crate) fn storage(msg: impl Into<String>) -> Self {
        StationError::Storage(msg.into())
    }

    pub(crate) fn scheduling(msg: impl Into<String>) -> Self {
        StationError::Scheduling(msg.into())
    }
}

impl From<rusqlite::Error> for StationError {
    fn from(err: rusqlite::Error) -> Self {
        StationError::Storage(err.to_string())
    }
}
