pub mod identity;
pub mod payment;
pub mod pii;

/// Boxed error type used across repository and adapter boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
