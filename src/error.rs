use thiserror::Error;

/// Root error type for the dome signal path.
///
/// Only construction and configuration can fail. Processing an empty block or
/// addressing a source index that does not exist are defined no-ops, not errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomeError {
    /// Dome geometry rejected at construction or update time.
    #[error("invalid dome geometry: radius={radius}, height={height} (both must be finite and > 0)")]
    InvalidGeometry { radius: f64, height: f64 },

    /// A numeric argument outside its accepted domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration failed to parse or validate.
    #[error("config error: {0}")]
    Config(String),

    /// Global tracing subscriber could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

pub type DomeResult<T> = Result<T, DomeError>;

/// Reject non-finite or non-positive geometry.
pub(crate) fn check_geometry(radius: f64, height: f64) -> DomeResult<()> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if valid(radius) && valid(height) {
        Ok(())
    } else {
        Err(DomeError::InvalidGeometry { radius, height })
    }
}
