//! Validation errors raised by entity constructors

use thiserror::Error;

/// A face value outside of the range a face mask can represent
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("face {face} is out of range, expected a value in [1, 31]")]
pub struct RangeError {
    pub face: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntityError {
    /// A field holds a value the firmware cannot represent
    #[error("invalid entity field `{field}`: {reason}")]
    InvalidEntity { field: &'static str, reason: String },
    #[error(transparent)]
    Range(#[from] RangeError),
}

impl EntityError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidEntity {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            Self::InvalidEntity { field, .. } => field,
            Self::Range(_) => "faces",
        }
    }
}

pub(crate) fn check_duration_ms(field: &'static str, duration_ms: u32) -> Result<(), EntityError> {
    if duration_ms > u16::MAX as u32 {
        return Err(EntityError::invalid(
            field,
            format!("{} ms exceeds the maximum of {} ms", duration_ms, u16::MAX),
        ));
    }
    Ok(())
}

pub(crate) fn check_brightness(field: &'static str, value: f32) -> Result<(), EntityError> {
    if !value.is_finite() || value < 0.0 {
        return Err(EntityError::invalid(
            field,
            format!("{} is not a non-negative number", value),
        ));
    }
    Ok(())
}

/// Failure reading or writing a JSON file on disk
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
