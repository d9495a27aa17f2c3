//! Error types for the onboarding engine.
//!
//! Validation failures are deliberately *not* errors; they are data
//! (`validator::ValidationErrors`) returned to the caller for per-field
//! display. The enums here cover the failures that can actually abort or
//! degrade a workflow action.

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Session gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Side effect failed: {0}")]
    SideEffect(#[from] SideEffectError),

    #[error("Analytics error: {0}")]
    Analytics(#[from] AnalyticsError),

    #[error("Invalid engine state: {0}")]
    InvalidState(String),
}

/// Session persistence errors.
///
/// "No session exists" is never an error: gateway calls return
/// `Option`/`bool` for that, keeping "absent" distinct from "unreachable".
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Persistence backend unreachable: {0}")]
    Unavailable(String),

    #[error("Session {id} not found")]
    NotFound { id: Uuid },

    #[error("Session {id} is not expired; use load instead of recover")]
    NotExpired { id: Uuid },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures from the side-effecting collaborator calls made on step
/// advancement (entity creation, role update, completion marking).
#[derive(Debug, thiserror::Error)]
pub enum SideEffectError {
    #[error("Failed to create {entity}: {reason}")]
    CreateFailed { entity: &'static str, reason: String },

    #[error("Failed to update user role: {0}")]
    RoleUpdate(String),

    #[error("Failed to mark onboarding complete: {0}")]
    Completion(String),

    #[error("Directory backend unavailable: {0}")]
    Unavailable(String),
}

/// Analytics sink failures. Never surfaced to the user; logged only.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Analytics sink rejected event: {0}")]
    Sink(String),

    #[error("Analytics sink timed out")]
    Timeout,
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
