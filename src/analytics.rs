//! Analytics emitter: fire-and-forget step telemetry.
//!
//! `emit()` never blocks, never fails, drops on a full buffer. A slow or
//! dead analytics backend can therefore never serialize against the
//! Next/Back/Save critical path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::catalog::OnboardingStep;
use crate::error::AnalyticsError;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StepStarted,
    StepCompleted,
    ValidationError,
    SessionAbandoned,
}

/// A step-level analytics event.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub step: OnboardingStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AnalyticsEvent {
    fn new(kind: EventKind, step: OnboardingStep, session_id: Option<Uuid>) -> Self {
        Self {
            kind,
            step,
            session_id,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn step_started(step: OnboardingStep, session_id: Option<Uuid>) -> Self {
        Self::new(EventKind::StepStarted, step, session_id)
    }

    pub fn step_completed(
        step: OnboardingStep,
        session_id: Option<Uuid>,
        elapsed_ms: i64,
    ) -> Self {
        let mut event = Self::new(EventKind::StepCompleted, step, session_id);
        event.metadata = Some(serde_json::json!({ "elapsed_ms": elapsed_ms }));
        event
    }

    /// Field names only; entered values may carry institution PII.
    pub fn validation_error(
        step: OnboardingStep,
        session_id: Option<Uuid>,
        failed_fields: &[String],
    ) -> Self {
        let mut event = Self::new(EventKind::ValidationError, step, session_id);
        event.metadata = Some(serde_json::json!({ "fields": failed_fields }));
        event
    }

    pub fn session_abandoned(
        step: OnboardingStep,
        session_id: Option<Uuid>,
        reason: &str,
    ) -> Self {
        let mut event = Self::new(EventKind::SessionAbandoned, step, session_id);
        event.metadata = Some(serde_json::json!({ "reason": reason }));
        event
    }
}

/// The analytics backend. No response is awaited beyond the drain task's
/// own error logging.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError>;
}

/// Sink that discards everything. Handy default when analytics is off.
pub struct NullSink;

#[async_trait]
impl AnalyticsSink for NullSink {
    async fn record(&self, _event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        Ok(())
    }
}

/// Emitted/dropped counters for monitoring the channel's health.
#[derive(Debug, Default)]
struct EmitterStats {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

/// Fire-and-forget event emitter backed by a bounded channel and a
/// background drain task.
pub struct AnalyticsEmitter {
    tx: mpsc::Sender<AnalyticsEvent>,
    stats: EmitterStats,
    drain: JoinHandle<()>,
}

impl AnalyticsEmitter {
    pub fn new(sink: Arc<dyn AnalyticsSink>, buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AnalyticsEvent>(buffer.max(1));
        let drain = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.record(event).await {
                    // Fully silent toward the user; logged only.
                    tracing::debug!("Analytics sink failure: {}", e);
                }
            }
        });
        Self {
            tx,
            stats: EmitterStats::default(),
            drain,
        }
    }

    /// Emit an event. Never blocks; drops (and counts) on a full buffer.
    pub fn emit(&self, event: AnalyticsEvent) {
        self.stats.emitted.fetch_add(1, Ordering::Relaxed);
        if self.tx.try_send(event).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `(emitted, dropped)` counters.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.emitted.load(Ordering::Relaxed),
            self.stats.dropped.load(Ordering::Relaxed),
        )
    }
}

impl Drop for AnalyticsEmitter {
    fn drop(&mut self) {
        self.drain.abort();
    }
}
