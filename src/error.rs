use thiserror::Error;

/// Rejected scene constants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("volume stack needs room for at least one entry and its terminator")]
    ZeroVolumeStackSize,
    #[error("closure capacity {requested} exceeds the maximum of {max}")]
    ClosureCapacity { requested: usize, max: usize },
    #[error("volume step rate must be positive, got {0}")]
    NonPositiveStepRate(f64),
    #[error("shadow rays need to record at least one intersection")]
    ZeroShadowIntersections,
    #[error("{field} must not be negative, got {value}")]
    NegativeThreshold { field: &'static str, value: f64 },
    #[error("volume ray marching needs at least one step")]
    ZeroMaxSteps,
}
