//! Auto-save scheduler: best-effort background persistence.
//!
//! Answer edits are debounced so typing never produces a write per
//! keystroke; step transitions flush immediately so a dropped connection
//! mid-edit loses at most the current step's partial edits. Gateway
//! failures are swallowed and logged; auto-save must never throw.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::gateway::SessionGateway;
use crate::session::SessionState;

/// Channel capacity for mutation notices. Small on purpose: only the
/// latest snapshot matters, and a dropped notice is at worst a slightly
/// later save.
const NOTICE_BUFFER: usize = 32;

enum Notice {
    /// Latest state after a mutation. `flush` forces an immediate write.
    Snapshot { state: SessionState, flush: bool },
    /// Discard any pending write (reset/abandon in progress).
    Cancel,
}

/// Handle to the background auto-save task.
pub struct AutoSaveHandle {
    tx: mpsc::Sender<Notice>,
    task: JoinHandle<()>,
}

impl AutoSaveHandle {
    /// Spawn the saver task against `gateway` with the given debounce.
    pub fn spawn(gateway: Arc<SessionGateway>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel(NOTICE_BUFFER);
        let task = tokio::spawn(run(gateway, rx, debounce));
        Self { tx, task }
    }

    /// An answer changed; save after the quiet period.
    pub fn notify_edit(&self, state: SessionState) {
        if self
            .tx
            .try_send(Notice::Snapshot { state, flush: false })
            .is_err()
        {
            tracing::debug!("Auto-save notice dropped (buffer full or task stopped)");
        }
    }

    /// The step changed; save unconditionally, right now.
    ///
    /// Unlike edits, a flush is never lost to backpressure: on a full
    /// buffer it is re-sent from a background task once capacity frees.
    pub fn notify_step(&self, state: SessionState) {
        match self.tx.try_send(Notice::Snapshot { state, flush: true }) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(notice).await;
                });
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Auto-save flush dropped (task stopped)");
            }
        }
    }

    /// Drop any pending write without persisting it.
    pub fn cancel_pending(&self) {
        let _ = self.tx.try_send(Notice::Cancel);
    }

    /// Stop the task. Pending writes are discarded, not flushed: the
    /// caller is abandoning or completing the session and a stale write
    /// landing afterwards would resurrect it.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for AutoSaveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(gateway: Arc<SessionGateway>, mut rx: mpsc::Receiver<Notice>, debounce: Duration) {
    let mut pending: Option<SessionState> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            notice = rx.recv() => match notice {
                Some(Notice::Snapshot { state, flush }) => {
                    if flush {
                        persist(&gateway, &state).await;
                        pending = None;
                        deadline = None;
                    } else {
                        // Re-arm: rapid successive edits collapse into one
                        // write of the latest snapshot.
                        pending = Some(state);
                        deadline = Some(Instant::now() + debounce);
                        tracing::debug!("Auto-save scheduled");
                    }
                }
                Some(Notice::Cancel) => {
                    pending = None;
                    deadline = None;
                }
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(state) = pending.take() {
                    persist(&gateway, &state).await;
                }
                deadline = None;
            }
        }
    }
}

async fn persist(gateway: &SessionGateway, state: &SessionState) {
    match gateway.save(state).await {
        Ok(session_id) => {
            tracing::debug!(%session_id, step = %state.current_step, "Auto-saved session");
        }
        Err(e) => {
            // In-memory state is untouched; the next notice retries.
            tracing::warn!("Auto-save failed: {}", e);
        }
    }
}
