//! Session persistence gateway: sliding-TTL save/load/abandon plus the
//! expiration and recovery contract.
//!
//! The backend trait is the seam to the remote store; the gateway owns
//! the TTL math and tracks the active session's identity so expiry can be
//! answered without a round trip.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as TtlDuration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::session::{Session, SessionState};

/// Remote store for serialized sessions, keyed by session id within the
/// current identity. "Does not exist" is an `Option`/`bool`, never an
/// error; `Err` means the collaborator was unreachable.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Create or replace the stored session. Last write wins.
    async fn upsert(&self, session: &Session) -> Result<(), GatewayError>;

    /// Fetch the most recent non-deleted session for the current identity.
    async fn fetch(&self) -> Result<Option<Session>, GatewayError>;

    /// Delete the session. Returns whether anything was deleted. A deleted
    /// id must reject (no-op) any subsequently arriving upsert.
    async fn delete(&self, session_id: Uuid) -> Result<bool, GatewayError>;
}

/// Cached identity/expiry of the session last seen server-side.
#[derive(Debug, Clone, Copy)]
struct SessionMeta {
    id: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Client-side gateway over a [`SessionBackend`].
///
/// Abandons are counted in an epoch; every write re-checks the epoch
/// after its upsert returns, so a save that was already in flight when
/// the session was abandoned is rolled back instead of resurrecting it.
pub struct SessionGateway {
    backend: Arc<dyn SessionBackend>,
    ttl: TtlDuration,
    meta: RwLock<Option<SessionMeta>>,
    abandons: AtomicU64,
}

impl SessionGateway {
    pub fn new(backend: Arc<dyn SessionBackend>, ttl: Duration) -> Self {
        let ttl = TtlDuration::from_std(ttl).unwrap_or_else(|_| TtlDuration::hours(24));
        Self {
            backend,
            ttl,
            meta: RwLock::new(None),
            abandons: AtomicU64::new(0),
        }
    }

    /// Upsert the current state; slides `expires_at` to `now + TTL`.
    ///
    /// Idempotent under retry: the same state saves under the same session
    /// id, and the backend upsert replaces rather than duplicates.
    pub async fn save(&self, state: &SessionState) -> Result<Uuid, GatewayError> {
        let epoch = self.abandons.load(Ordering::SeqCst);
        let now = Utc::now();
        let (id, created_at) = match *self.meta.read().await {
            Some(meta) => (meta.id, meta.created_at),
            None => (Uuid::new_v4(), now),
        };
        let expires_at = now + self.ttl;

        let session = state.snapshot(id, created_at, expires_at);
        self.backend.upsert(&session).await?;

        {
            let mut meta = self.meta.write().await;
            if self.abandons.load(Ordering::SeqCst) == epoch {
                *meta = Some(SessionMeta {
                    id,
                    created_at,
                    expires_at,
                });
                return Ok(id);
            }
        }

        // An abandon landed while this write was in flight; take the
        // write back out so the discarded session cannot come back.
        let _ = self.backend.delete(id).await;
        tracing::debug!(session_id = %id, "Discarding save that raced an abandon");
        Ok(id)
    }

    /// Fetch the resumable session, if any.
    ///
    /// Returns `Ok(None)` both when no session exists and when one exists
    /// but has expired; the two cases are told apart via [`is_expired`]
    /// (an expired session stays reachable through [`recover`]).
    ///
    /// [`is_expired`]: Self::is_expired
    /// [`recover`]: Self::recover
    pub async fn load(&self) -> Result<Option<Session>, GatewayError> {
        match self.backend.fetch().await? {
            None => {
                *self.meta.write().await = None;
                Ok(None)
            }
            Some(session) => {
                *self.meta.write().await = Some(SessionMeta {
                    id: session.session_id,
                    created_at: session.created_at,
                    expires_at: session.expires_at,
                });
                if session.is_expired_at(Utc::now()) {
                    Ok(None)
                } else {
                    Ok(Some(session))
                }
            }
        }
    }

    /// Delete the persisted session (explicit "Start Fresh" or cleanup
    /// after confirmed completion).
    pub async fn abandon(&self, session_id: Uuid) -> Result<bool, GatewayError> {
        {
            let mut meta = self.meta.write().await;
            self.abandons.fetch_add(1, Ordering::SeqCst);
            if meta.map(|m| m.id) == Some(session_id) {
                *meta = None;
            }
        }
        self.backend.delete(session_id).await
    }

    /// Abandon whatever session exists for this identity, including one
    /// whose very first save is still in flight (no id cached yet). The
    /// epoch bump makes such a save roll itself back when it lands; a
    /// write that already landed without being cached is found by fetch.
    pub async fn discard(&self) -> Result<bool, GatewayError> {
        let cached = {
            let mut meta = self.meta.write().await;
            self.abandons.fetch_add(1, Ordering::SeqCst);
            meta.take().map(|m| m.id)
        };
        let id = match cached {
            Some(id) => Some(id),
            None => self.backend.fetch().await?.map(|s| s.session_id),
        };
        match id {
            Some(id) => self.backend.delete(id).await,
            None => Ok(false),
        }
    }

    /// Seconds-resolution countdown to expiry, clamped at zero. `None`
    /// when no session is known.
    pub async fn time_until_expiry(&self) -> Option<Duration> {
        let meta = (*self.meta.read().await)?;
        Some((meta.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// True when a session still exists server-side but its clock ran
    /// out, as distinct from "never existed".
    pub async fn is_expired(&self) -> bool {
        match *self.meta.read().await {
            Some(meta) => Utc::now() > meta.expires_at,
            None => false,
        }
    }

    /// Whether the countdown has entered the warning window. Advisory
    /// only; nothing is gated on this.
    pub async fn expiry_warning(&self, threshold: Duration) -> bool {
        match self.time_until_expiry().await {
            Some(remaining) => remaining > Duration::ZERO && remaining <= threshold,
            None => false,
        }
    }

    /// Re-issue `expires_at = now + TTL` without touching stored answers.
    /// Returns `false` when no such session exists. Safe to call rapidly;
    /// last write wins.
    pub async fn extend(&self, session_id: Uuid) -> Result<bool, GatewayError> {
        let epoch = self.abandons.load(Ordering::SeqCst);
        let Some(mut session) = self.backend.fetch().await? else {
            return Ok(false);
        };
        if session.session_id != session_id {
            return Ok(false);
        }

        session.expires_at = Utc::now() + self.ttl;
        self.backend.upsert(&session).await?;
        {
            let mut meta = self.meta.write().await;
            if self.abandons.load(Ordering::SeqCst) == epoch {
                *meta = Some(SessionMeta {
                    id: session.session_id,
                    created_at: session.created_at,
                    expires_at: session.expires_at,
                });
                return Ok(true);
            }
        }
        let _ = self.backend.delete(session_id).await;
        Ok(false)
    }

    /// Recover an *expired* session: reissue a fresh TTL and return the
    /// stored snapshot so the client resumes exactly where it left off.
    pub async fn recover(&self, session_id: Uuid) -> Result<Session, GatewayError> {
        let epoch = self.abandons.load(Ordering::SeqCst);
        let Some(mut session) = self.backend.fetch().await? else {
            return Err(GatewayError::NotFound { id: session_id });
        };
        if session.session_id != session_id {
            return Err(GatewayError::NotFound { id: session_id });
        }
        if !session.is_expired_at(Utc::now()) {
            return Err(GatewayError::NotExpired { id: session_id });
        }

        session.expires_at = Utc::now() + self.ttl;
        self.backend.upsert(&session).await?;
        {
            let mut meta = self.meta.write().await;
            if self.abandons.load(Ordering::SeqCst) == epoch {
                *meta = Some(SessionMeta {
                    id: session.session_id,
                    created_at: session.created_at,
                    expires_at: session.expires_at,
                });
                tracing::info!(session_id = %session.session_id, "Recovered expired onboarding session");
                return Ok(session);
            }
        }
        let _ = self.backend.delete(session_id).await;
        Err(GatewayError::NotFound { id: session_id })
    }

    /// Id of the session last seen server-side, expired or not.
    pub async fn session_id(&self) -> Option<Uuid> {
        self.meta.read().await.map(|m| m.id)
    }
}

/// In-memory [`SessionBackend`] for tests and persistence-free embedding.
///
/// Deleted session ids are tombstoned so a late auto-save cannot
/// resurrect an abandoned session.
#[derive(Default)]
pub struct InMemoryBackend {
    inner: RwLock<InMemoryInner>,
    upserts: AtomicU64,
    latency: Duration,
}

#[derive(Default)]
struct InMemoryInner {
    session: Option<Session>,
    tombstones: HashSet<Uuid>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose upserts take `latency` to land. Lets tests hold a
    /// write in flight while something else happens.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    /// Pre-populate the store (e.g. with an already-expired session).
    pub async fn seed(&self, session: Session) {
        self.inner.write().await.session = Some(session);
    }

    /// The currently stored session, if any.
    pub async fn stored(&self) -> Option<Session> {
        self.inner.read().await.session.clone()
    }

    /// Number of upserts that actually landed (tombstoned writes excluded).
    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionBackend for InMemoryBackend {
    async fn upsert(&self, session: &Session) -> Result<(), GatewayError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut inner = self.inner.write().await;
        if inner.tombstones.contains(&session.session_id) {
            tracing::debug!(session_id = %session.session_id, "Dropping write for abandoned session");
            return Ok(());
        }
        inner.session = Some(session.clone());
        self.upserts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Session>, GatewayError> {
        Ok(self.inner.read().await.session.clone())
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool, GatewayError> {
        let mut inner = self.inner.write().await;
        inner.tombstones.insert(session_id);
        let existed = inner
            .session
            .as_ref()
            .map(|s| s.session_id == session_id)
            .unwrap_or(false);
        if existed {
            inner.session = None;
        }
        Ok(existed)
    }
}
