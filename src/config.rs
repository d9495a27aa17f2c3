//! Configuration types.

use std::time::Duration;

/// Engine configuration.
///
/// One orchestrator serves both the bare wizard and the full
/// persistence+analytics flow; the toggles here replace what used to be
/// two divergent implementations.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whether step analytics events are emitted.
    pub enable_analytics: bool,
    /// Whether in-progress sessions are persisted and recoverable.
    pub enable_session_persistence: bool,
    /// Sliding expiration window applied to a persisted session.
    pub session_ttl: Duration,
    /// Quiet period after an answer edit before an auto-save fires.
    pub autosave_debounce: Duration,
    /// Bounded buffer size for the fire-and-forget analytics channel.
    pub analytics_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_analytics: true,
            enable_session_persistence: true,
            session_ttl: Duration::from_secs(24 * 60 * 60), // 24 hours
            autosave_debounce: Duration::from_secs(2),
            analytics_buffer: 256,
        }
    }
}
