// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the goal detector

use crate::backends::camera::BackendError;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Frame source errors (V4L2, file replay, synthetic)
    Camera(BackendError),
    /// IR illuminator errors
    Illuminator(IlluminatorError),
    /// Image processing errors
    Imaging(ImagingError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Errors raised while driving the IR LED
#[derive(Debug, Clone)]
pub enum IlluminatorError {
    /// No LED with the requested name exists
    NotFound(String),
    /// The LED exists but its brightness file is not writable
    PermissionDenied(String),
    /// Writing the LED state failed
    WriteFailed(String),
}

/// Errors raised by the per-pixel image operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagingError {
    /// Two images (or an image and its mask) differ in size
    DimensionMismatch {
        expected: (u32, u32),
        found: (u32, u32),
    },
    /// An operation parameter is out of range
    InvalidParameter(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Illuminator(e) => write!(f, "Illuminator error: {}", e),
            AppError::Imaging(e) => write!(f, "Imaging error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for IlluminatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IlluminatorError::NotFound(name) => write!(f, "LED not found: {}", name),
            IlluminatorError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            IlluminatorError::WriteFailed(msg) => write!(f, "Failed to set LED: {}", msg),
        }
    }
}

impl fmt::Display for ImagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagingError::DimensionMismatch { expected, found } => write!(
                f,
                "Image size mismatch: expected {}x{}, found {}x{}",
                expected.0, expected.1, found.0, found.1
            ),
            ImagingError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for IlluminatorError {}
impl std::error::Error for ImagingError {}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Camera(err)
    }
}

impl From<IlluminatorError> for AppError {
    fn from(err: IlluminatorError) -> Self {
        AppError::Illuminator(err)
    }
}

impl From<ImagingError> for AppError {
    fn from(err: ImagingError) -> Self {
        AppError::Imaging(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<std::io::Error> for IlluminatorError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => IlluminatorError::PermissionDenied(err.to_string()),
            std::io::ErrorKind::NotFound => IlluminatorError::NotFound(err.to_string()),
            _ => IlluminatorError::WriteFailed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_illuminator_kind() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            IlluminatorError::from(denied),
            IlluminatorError::PermissionDenied(_)
        ));

        let other = std::io::Error::other("bus fault");
        assert!(matches!(
            IlluminatorError::from(other),
            IlluminatorError::WriteFailed(_)
        ));
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = ImagingError::DimensionMismatch {
            expected: (240, 160),
            found: (160, 120),
        };
        assert_eq!(
            err.to_string(),
            "Image size mismatch: expected 240x160, found 160x120"
        );
    }
}
