//! Session state: the in-memory source of truth the UI renders from,
//! plus the persisted snapshot shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::answers::{AnswerPatch, AnswerSet};
use crate::catalog::{OnboardingStep, Role};
use crate::router;

/// Mutable wizard state owned by the orchestrator. Explicitly constructed
/// and passed by reference; there is no ambient/global store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub current_step: OnboardingStep,
    pub answers: AnswerSet,
    /// Steps advanced past, in the order the user took them. Append-only
    /// during a session; cleared only by reset.
    pub completed_steps: Vec<OnboardingStep>,
    /// Steps skipped without validation. Disjoint from `completed_steps`.
    pub skipped_steps: Vec<OnboardingStep>,
}

impl SessionState {
    pub fn new(first_step: OnboardingStep, answers: AnswerSet) -> Self {
        Self {
            current_step: first_step,
            answers,
            completed_steps: Vec::new(),
            skipped_steps: Vec::new(),
        }
    }

    pub fn set_step(&mut self, step: OnboardingStep) {
        self.current_step = step;
    }

    /// Apply a partial answer update; returns changed field names.
    pub fn merge_answers(&mut self, patch: AnswerPatch) -> Vec<&'static str> {
        self.answers.merge(patch)
    }

    /// Record a step as completed. Keeps the two logs disjoint and
    /// dedupes re-completion after back-navigation.
    pub fn complete_step(&mut self, step: OnboardingStep) {
        self.skipped_steps.retain(|s| *s != step);
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
    }

    /// Record a step as skipped.
    pub fn skip_step(&mut self, step: OnboardingStep) {
        if !self.completed_steps.contains(&step) && !self.skipped_steps.contains(&step) {
            self.skipped_steps.push(step);
        }
    }

    /// Wipe everything back to `first_step`. The caller is responsible for
    /// abandoning any persisted session so no stale recoverable state
    /// remains.
    pub fn reset(&mut self, first_step: OnboardingStep) {
        self.current_step = first_step;
        self.answers = AnswerSet::default();
        self.completed_steps.clear();
        self.skipped_steps.clear();
    }

    /// Progress through the wizard as a percentage, weighting steps by
    /// their catalog `progress_weight` over the role's forward path.
    pub fn progress_percent(&self) -> u8 {
        if self.current_step.is_terminal() {
            return 100;
        }

        let path = router::forward_path(self.role());
        let total: u32 = path.iter().map(|s| s.info().progress_weight).sum();
        if total == 0 {
            return 0;
        }

        let done: u32 = self
            .completed_steps
            .iter()
            .chain(self.skipped_steps.iter())
            .copied()
            .filter(|s| path.contains(s))
            .map(|s| s.info().progress_weight)
            .sum();

        ((done * 100 / total).min(100)) as u8
    }

    pub fn role(&self) -> Option<Role> {
        self.answers.role
    }

    /// Persisted snapshot of this state.
    pub fn snapshot(
        &self,
        session_id: Uuid,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Session {
        Session {
            session_id,
            current_step: self.current_step,
            answers: self.answers.clone(),
            completed_steps: self.completed_steps.clone(),
            skipped_steps: self.skipped_steps.clone(),
            created_at,
            expires_at,
        }
    }

    /// Rebuild in-memory state from a persisted session (resume path).
    pub fn from_session(session: &Session) -> Self {
        Self {
            current_step: session.current_step,
            answers: session.answers.clone(),
            completed_steps: session.completed_steps.clone(),
            skipped_steps: session.skipped_steps.clone(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(OnboardingStep::Welcome, AnswerSet::default())
    }
}

/// A persisted, expiring snapshot of in-progress onboarding.
///
/// The remote store owns the authoritative copy; the client holds this
/// one. Invariant: `expires_at > created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub current_step: OnboardingStep,
    pub answers: AnswerSet,
    pub completed_steps: Vec<OnboardingStep>,
    pub skipped_steps: Vec<OnboardingStep>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session has passed its expiration clock.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
