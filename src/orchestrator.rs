//! Workflow orchestrator: owns the wizard state machine and wires the
//! validator, router, persistence gateway, auto-saver, and analytics
//! emitter together.
//!
//! One orchestrator, parameterized by [`EngineConfig`], serves both the
//! bare wizard and the persistence+analytics flow. It owns its
//! [`SessionState`] outright; consumers read it by reference.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::analytics::{AnalyticsEmitter, AnalyticsEvent, AnalyticsSink};
use crate::answers::AnswerPatch;
use crate::autosave::AutoSaveHandle;
use crate::catalog::{OnboardingStep, StepInfo};
use crate::collaborators::{DirectoryBackend, IdentityProfile};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::gateway::{SessionBackend, SessionGateway};
use crate::router;
use crate::session::SessionState;
use crate::validator::{self, AvailableOptions, ValidationErrors};

/// Result of a "Next" attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// Validation and side effects passed; the wizard moved on.
    Advanced { to: OnboardingStep },
    /// Validation rejected the current answers; no transition.
    Blocked { errors: ValidationErrors },
    /// The terminal step was reached (or already held).
    Completed,
}

pub struct Orchestrator {
    config: EngineConfig,
    identity: IdentityProfile,
    directory: Arc<dyn DirectoryBackend>,
    gateway: Option<Arc<SessionGateway>>,
    autosave: Option<AutoSaveHandle>,
    analytics: Option<AnalyticsEmitter>,
    state: SessionState,
    errors: ValidationErrors,
    options: AvailableOptions,
    session_id: Option<Uuid>,
    step_entered_at: DateTime<Utc>,
    /// Dismissible persistence warning for the UI; persistence failures
    /// never roll back in-memory state.
    warning: Option<String>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        identity: IdentityProfile,
        directory: Arc<dyn DirectoryBackend>,
        session_backend: Option<Arc<dyn SessionBackend>>,
        analytics_sink: Option<Arc<dyn AnalyticsSink>>,
    ) -> Self {
        let gateway = match session_backend {
            Some(backend) if config.enable_session_persistence => {
                Some(Arc::new(SessionGateway::new(backend, config.session_ttl)))
            }
            _ => None,
        };
        let autosave = gateway
            .as_ref()
            .map(|gw| AutoSaveHandle::spawn(Arc::clone(gw), config.autosave_debounce));
        let analytics = match analytics_sink {
            Some(sink) if config.enable_analytics => {
                Some(AnalyticsEmitter::new(sink, config.analytics_buffer))
            }
            _ => None,
        };

        Self {
            config,
            identity,
            directory,
            gateway,
            autosave,
            analytics,
            state: SessionState::default(),
            errors: ValidationErrors::default(),
            options: AvailableOptions::default(),
            session_id: None,
            step_entered_at: Utc::now(),
            warning: None,
        }
    }

    /// Initialize on mount: resume a persisted session when one exists,
    /// otherwise start fresh from the identity's pre-provisioned answers.
    pub async fn start(&mut self) -> Result<OnboardingStep> {
        if let Some(gw) = self.gateway.clone() {
            match gw.load().await {
                Ok(Some(session)) => {
                    self.state = SessionState::from_session(&session);
                    self.session_id = Some(session.session_id);
                    self.step_entered_at = Utc::now();
                    self.refresh_options_for(self.state.current_step).await;
                    self.emit(AnalyticsEvent::step_started(
                        self.state.current_step,
                        self.session_id,
                    ));
                    tracing::info!(
                        session_id = %session.session_id,
                        step = %session.current_step,
                        "Resumed onboarding session"
                    );
                    return Ok(self.state.current_step);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Failed to load onboarding session: {}", e);
                    self.warning = Some(format!("Could not restore saved progress: {e}"));
                }
            }
        }

        // Fresh start from caller-supplied defaults.
        let mut state = SessionState::default();
        state.merge_answers(AnswerPatch {
            role: self.identity.role,
            school_id: self.identity.school_id.clone(),
            program_id: self.identity.program_id.clone(),
            ..Default::default()
        });

        // A fully provisioned identity is never re-asked anything.
        if state.answers.is_fully_provisioned() {
            state.set_step(OnboardingStep::Complete);
        }

        self.state = state;
        self.step_entered_at = Utc::now();
        if !self.state.current_step.is_terminal() {
            self.refresh_options_for(self.state.current_step).await;
            self.emit(AnalyticsEvent::step_started(
                self.state.current_step,
                self.session_id,
            ));
        }
        Ok(self.state.current_step)
    }

    /// Apply a partial answer update from user input. Clears stale
    /// validation errors on the changed fields and schedules an auto-save.
    pub fn update_answers(&mut self, patch: AnswerPatch) {
        let changed = self.state.merge_answers(patch);
        for field in &changed {
            self.errors.clear_field(field);
        }
        if !changed.is_empty() {
            if let Some(autosave) = &self.autosave {
                autosave.notify_edit(self.state.clone());
            }
        }
    }

    /// Attempt to advance past the current step.
    ///
    /// Validation failures come back as [`AdvanceOutcome::Blocked`]; a
    /// failed side effect (entity creation, role update, completion
    /// marking) is an `Err` with the step and answers left intact so the
    /// user can retry without re-entering anything.
    pub async fn handle_next(&mut self) -> Result<AdvanceOutcome> {
        let current = self.state.current_step;
        if current.is_terminal() {
            return Ok(AdvanceOutcome::Completed);
        }

        let errors = validator::validate(current, &self.state.answers, &self.options);
        if !errors.is_empty() {
            self.errors = errors.clone();
            self.emit(AnalyticsEvent::validation_error(
                current,
                self.session_id,
                &errors.fields(),
            ));
            return Ok(AdvanceOutcome::Blocked { errors });
        }
        self.errors.clear();

        self.run_side_effect(current).await?;

        let elapsed_ms = (Utc::now() - self.step_entered_at).num_milliseconds();
        self.emit(AnalyticsEvent::step_completed(
            current,
            self.session_id,
            elapsed_ms,
        ));
        self.state.complete_step(current);

        let next = router::next_step(self.state.role(), &self.state.answers, current);
        if next.is_terminal() {
            // Completion side effect first; the session is cleaned up only
            // after it is confirmed, so a failure leaves it recoverable.
            self.directory
                .mark_onboarding_complete(&self.identity.user_id)
                .await
                .map_err(EngineError::SideEffect)?;
            self.state.set_step(next);
            self.finish_session().await;
            tracing::info!(user_id = %self.identity.user_id, "Onboarding complete");
            return Ok(AdvanceOutcome::Completed);
        }

        self.state.set_step(next);
        self.step_entered_at = Utc::now();
        if let Some(autosave) = &self.autosave {
            // Unconditional save on every step transition.
            autosave.notify_step(self.state.clone());
        }
        self.refresh_options_for(next).await;
        self.sync_session_id().await;
        self.emit(AnalyticsEvent::step_started(next, self.session_id));
        Ok(AdvanceOutcome::Advanced { to: next })
    }

    /// Pure back-navigation: no validation, no side effects.
    pub fn handle_back(&mut self) -> Option<OnboardingStep> {
        let prev = router::previous_step(
            self.state.current_step,
            self.state.role(),
            &self.state.completed_steps,
        )?;
        self.state.set_step(prev);
        self.step_entered_at = Utc::now();
        self.errors.clear();
        if let Some(autosave) = &self.autosave {
            autosave.notify_step(self.state.clone());
        }
        Some(prev)
    }

    /// Skip the current step without validation. Only the welcome screen
    /// is skippable; anywhere else this is a no-op. A skip that lands on
    /// the terminal step (resumed session with fully provisioned answers)
    /// goes through the same completion path as [`handle_next`].
    ///
    /// [`handle_next`]: Self::handle_next
    pub async fn handle_skip(&mut self) -> Result<Option<OnboardingStep>> {
        let current = self.state.current_step;
        if current != OnboardingStep::Welcome {
            return Ok(None);
        }

        self.state.skip_step(current);
        let next = router::next_step(self.state.role(), &self.state.answers, current);
        if next.is_terminal() {
            self.directory
                .mark_onboarding_complete(&self.identity.user_id)
                .await
                .map_err(EngineError::SideEffect)?;
            self.state.set_step(next);
            self.finish_session().await;
            tracing::info!(user_id = %self.identity.user_id, "Onboarding complete");
            return Ok(Some(next));
        }

        self.state.set_step(next);
        self.step_entered_at = Utc::now();
        if let Some(autosave) = &self.autosave {
            autosave.notify_step(self.state.clone());
        }
        self.refresh_options_for(next).await;
        self.emit(AnalyticsEvent::step_started(next, self.session_id));
        Ok(Some(next))
    }

    /// Explicit "Save": persist the current snapshot through the gateway.
    /// Returns whether the save landed; failure only raises a warning.
    pub async fn handle_save(&mut self) -> bool {
        let Some(gw) = self.gateway.clone() else {
            return false;
        };
        match gw.save(&self.state).await {
            Ok(session_id) => {
                self.session_id = Some(session_id);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to save onboarding session: {}", e);
                self.warning = Some(format!("Progress could not be saved: {e}"));
                false
            }
        }
    }

    /// "Start Fresh": abandon the persisted session and wipe local state.
    pub async fn handle_reset(&mut self) {
        self.emit(AnalyticsEvent::session_abandoned(
            self.state.current_step,
            self.session_id,
            "reset",
        ));

        if let Some(autosave) = &self.autosave {
            // A pending debounced write must not land after abandonment.
            autosave.cancel_pending();
        }
        if let Some(gw) = self.gateway.clone() {
            // discard, not abandon-by-id: a first save may still be in
            // flight with no id cached yet, and it must not land either.
            if let Err(e) = gw.discard().await {
                tracing::warn!("Failed to abandon onboarding session: {}", e);
                self.warning = Some(format!("Saved progress could not be cleared: {e}"));
            }
        }

        self.state.reset(OnboardingStep::Welcome);
        self.errors.clear();
        self.session_id = None;
        self.step_entered_at = Utc::now();
        self.emit(AnalyticsEvent::step_started(
            OnboardingStep::Welcome,
            self.session_id,
        ));
    }

    /// Re-issue the session TTL (user clicked "keep working").
    pub async fn extend_session(&mut self) -> bool {
        let Some(gw) = self.gateway.clone() else {
            return false;
        };
        let Some(id) = gw.session_id().await else {
            return false;
        };
        match gw.extend(id).await {
            Ok(extended) => extended,
            Err(e) => {
                tracing::warn!("Failed to extend onboarding session: {}", e);
                self.warning = Some(format!("Session could not be extended: {e}"));
                false
            }
        }
    }

    /// Recover an expired session and resume where it left off. Returns
    /// `false` when there is nothing expired to recover.
    pub async fn recover_session(&mut self) -> Result<bool> {
        let Some(gw) = self.gateway.clone() else {
            return Ok(false);
        };
        if !gw.is_expired().await {
            return Ok(false);
        }
        let Some(id) = gw.session_id().await else {
            return Ok(false);
        };

        let session = gw.recover(id).await?;
        self.state = SessionState::from_session(&session);
        self.session_id = Some(session.session_id);
        self.errors.clear();
        self.step_entered_at = Utc::now();
        self.refresh_options_for(self.state.current_step).await;
        self.emit(AnalyticsEvent::step_started(
            self.state.current_step,
            self.session_id,
        ));
        Ok(true)
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn current_step(&self) -> OnboardingStep {
        self.state.current_step
    }

    pub fn step_info(&self) -> StepInfo {
        self.state.current_step.info()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn validation_errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn options(&self) -> &AvailableOptions {
        &self.options
    }

    pub fn progress_percent(&self) -> u8 {
        self.state.progress_percent()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Take (and clear) the pending persistence warning, if any.
    pub fn take_warning(&mut self) -> Option<String> {
        self.warning.take()
    }

    /// Advisory countdown for the expiry banner.
    pub async fn time_until_expiry(&self) -> Option<std::time::Duration> {
        match &self.gateway {
            Some(gw) => gw.time_until_expiry().await,
            None => None,
        }
    }

    pub async fn session_expired(&self) -> bool {
        match &self.gateway {
            Some(gw) => gw.is_expired().await,
            None => false,
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Step-specific side effect, run before the transition. Creation
    /// calls are guarded on the folded-back id so a retry after a
    /// completion failure cannot create duplicates.
    async fn run_side_effect(&mut self, step: OnboardingStep) -> Result<()> {
        match step {
            OnboardingStep::RoleSelection => {
                let Some(role) = self.state.answers.role else {
                    return Err(EngineError::InvalidState(
                        "role passed validation but is unset".to_string(),
                    ));
                };
                self.directory
                    .update_user_role(&self.identity.user_id, role)
                    .await?;
            }
            OnboardingStep::SchoolSetup if self.state.answers.school_id.is_none() => {
                let name = self.required_answer(self.state.answers.school_name.clone(), "school_name")?;
                let address = self.state.answers.school_address.clone();
                let id = self
                    .directory
                    .create_school(&name, address.as_deref())
                    .await?;
                self.state.answers.school_id = Some(id);
            }
            OnboardingStep::ProgramSetup if self.state.answers.program_id.is_none() => {
                let school_id =
                    self.required_answer(self.state.answers.school_id.clone(), "school_id")?;
                let name =
                    self.required_answer(self.state.answers.program_name.clone(), "program_name")?;
                let program_type =
                    self.required_answer(self.state.answers.program_type.clone(), "program_type")?;
                let duration = self
                    .required_answer(
                        self.state.answers.program_duration_months.clone(),
                        "program_duration_months",
                    )?
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| {
                        EngineError::InvalidState(
                            "program duration passed validation but does not parse".to_string(),
                        )
                    })?;
                let id = self
                    .directory
                    .create_program(&school_id, &name, &program_type, duration)
                    .await?;
                self.state.answers.program_id = Some(id);
            }
            OnboardingStep::ClinicalSiteSetup if self.state.answers.site_id.is_none() => {
                let school_id =
                    self.required_answer(self.state.answers.school_id.clone(), "school_id")?;
                let name = self.required_answer(self.state.answers.site_name.clone(), "site_name")?;
                let address =
                    self.required_answer(self.state.answers.site_address.clone(), "site_address")?;
                let id = self
                    .directory
                    .create_clinical_site(&school_id, &name, &address)
                    .await?;
                self.state.answers.site_id = Some(id);
            }
            _ => {}
        }
        Ok(())
    }

    fn required_answer(&self, value: Option<String>, field: &str) -> Result<String> {
        value.ok_or_else(|| {
            EngineError::InvalidState(format!("{field} passed validation but is unset"))
        })
    }

    /// Fetch option lists for selection steps. Failures keep the previous
    /// lists and raise a dismissible warning; validation itself stays pure.
    async fn refresh_options_for(&mut self, step: OnboardingStep) {
        let result = match step {
            OnboardingStep::SchoolSelection | OnboardingStep::AffiliationSetup => {
                match self.directory.list_schools().await {
                    Ok(schools) => {
                        self.options.schools = schools;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            OnboardingStep::ProgramSelection => {
                let Some(school_id) = self.state.answers.school_id.clone() else {
                    return;
                };
                match self.directory.list_programs(&school_id).await {
                    Ok(programs) => {
                        self.options.programs = programs;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            _ => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!(step = %step, "Failed to refresh option lists: {}", e);
            self.warning = Some(format!("Available options could not be loaded: {e}"));
        }
    }

    /// Pick up a session id established by a background auto-save.
    async fn sync_session_id(&mut self) {
        if self.session_id.is_none() {
            if let Some(gw) = &self.gateway {
                self.session_id = gw.session_id().await;
            }
        }
    }

    /// Stop auto-save and delete the persisted session after confirmed
    /// completion.
    async fn finish_session(&mut self) {
        if let Some(autosave) = self.autosave.take() {
            autosave.cancel_pending();
            autosave.shutdown();
        }
        if let Some(gw) = self.gateway.clone() {
            if let Err(e) = gw.discard().await {
                tracing::warn!("Failed to clean up session after completion: {}", e);
            }
        }
    }

    fn emit(&self, event: AnalyticsEvent) {
        if let Some(emitter) = &self.analytics {
            emitter.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Role;
    use crate::collaborators::InMemoryDirectory;
    use crate::gateway::InMemoryBackend;
    use crate::validator::SchoolChoice;

    fn identity(role: Option<Role>) -> IdentityProfile {
        IdentityProfile {
            user_id: "u1".to_string(),
            role,
            school_id: None,
            program_id: None,
        }
    }

    async fn seeded_directory() -> Arc<InMemoryDirectory> {
        let dir = Arc::new(InMemoryDirectory::new());
        dir.seed(
            vec![SchoolChoice {
                id: "S1".to_string(),
                name: "Mercy College".to_string(),
            }],
            vec![crate::validator::ProgramChoice {
                id: "P1".to_string(),
                name: "Nursing".to_string(),
                school_id: "S1".to_string(),
            }],
        )
        .await;
        dir
    }

    fn bare(directory: Arc<InMemoryDirectory>, role: Option<Role>) -> Orchestrator {
        let config = EngineConfig {
            enable_analytics: false,
            enable_session_persistence: false,
            ..Default::default()
        };
        Orchestrator::new(config, identity(role), directory, None, None)
    }

    #[tokio::test]
    async fn fresh_start_begins_at_welcome() {
        let dir = seeded_directory().await;
        let mut orch = bare(dir, None);
        assert_eq!(orch.start().await.unwrap(), OnboardingStep::Welcome);
        assert_eq!(orch.progress_percent(), 0);
    }

    #[tokio::test]
    async fn fully_provisioned_identity_routes_straight_to_complete() {
        let dir = seeded_directory().await;
        let config = EngineConfig {
            enable_analytics: false,
            enable_session_persistence: false,
            ..Default::default()
        };
        let mut orch = Orchestrator::new(
            config,
            IdentityProfile {
                user_id: "u1".to_string(),
                role: Some(Role::Student),
                school_id: Some("S1".to_string()),
                program_id: Some("P1".to_string()),
            },
            dir,
            None,
            None,
        );
        assert_eq!(orch.start().await.unwrap(), OnboardingStep::Complete);
        assert_eq!(orch.progress_percent(), 100);
    }

    #[tokio::test]
    async fn welcome_without_role_goes_to_role_selection() {
        let dir = seeded_directory().await;
        let mut orch = bare(dir, None);
        orch.start().await.unwrap();

        let outcome = orch.handle_next().await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced {
                to: OnboardingStep::RoleSelection
            }
        );
    }

    #[tokio::test]
    async fn validation_failure_blocks_and_records_errors() {
        let dir = seeded_directory().await;
        let mut orch = bare(dir, None);
        orch.start().await.unwrap();
        orch.handle_next().await.unwrap(); // -> role selection

        let outcome = orch.handle_next().await.unwrap();
        match outcome {
            AdvanceOutcome::Blocked { errors } => {
                assert!(errors.get("role").is_some());
            }
            other => panic!("expected Blocked, got {other:?}"),
        }
        assert_eq!(orch.current_step(), OnboardingStep::RoleSelection);
        assert!(!orch.validation_errors().is_empty());
    }

    #[tokio::test]
    async fn changing_an_answer_clears_its_error() {
        let dir = seeded_directory().await;
        let mut orch = bare(dir, None);
        orch.start().await.unwrap();
        orch.handle_next().await.unwrap();
        orch.handle_next().await.unwrap(); // blocked, role error recorded

        orch.update_answers(AnswerPatch::role(Role::Student));
        assert!(orch.validation_errors().is_empty());
    }

    #[tokio::test]
    async fn student_walks_school_then_program() {
        let dir = seeded_directory().await;
        let mut orch = bare(dir.clone(), None);
        orch.start().await.unwrap();
        orch.handle_next().await.unwrap();
        orch.update_answers(AnswerPatch::role(Role::Student));
        orch.handle_next().await.unwrap();
        assert_eq!(orch.current_step(), OnboardingStep::SchoolSelection);
        // Role side effect persisted
        assert_eq!(dir.role_of("u1").await, Some(Role::Student));

        orch.update_answers(AnswerPatch::school_id("S1"));
        orch.handle_next().await.unwrap();
        assert_eq!(orch.current_step(), OnboardingStep::ProgramSelection);

        orch.update_answers(AnswerPatch::program_id("P1"));
        let outcome = orch.handle_next().await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Completed);
        assert_eq!(orch.current_step(), OnboardingStep::Complete);
        assert!(dir.onboarding_completed());
    }

    #[tokio::test]
    async fn super_admin_completes_from_welcome() {
        let dir = seeded_directory().await;
        let mut orch = bare(dir.clone(), Some(Role::SuperAdmin));
        orch.start().await.unwrap();

        let outcome = orch.handle_next().await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Completed);
        assert!(dir.onboarding_completed());
    }

    #[tokio::test]
    async fn school_admin_setup_folds_back_created_ids() {
        let dir = seeded_directory().await;
        let mut orch = bare(dir.clone(), Some(Role::SchoolAdmin));
        orch.start().await.unwrap();
        orch.handle_next().await.unwrap(); // welcome -> school setup
        assert_eq!(orch.current_step(), OnboardingStep::SchoolSetup);

        orch.update_answers(AnswerPatch {
            school_name: Some("Lakeside University".to_string()),
            ..Default::default()
        });
        orch.handle_next().await.unwrap();
        assert_eq!(orch.current_step(), OnboardingStep::ProgramSetup);
        assert!(orch.state().answers.school_id.is_some());

        orch.update_answers(AnswerPatch {
            program_name: Some("Physician Assistant".to_string()),
            program_type: Some("MPAS".to_string()),
            program_duration_months: Some("27".to_string()),
            ..Default::default()
        });
        orch.handle_next().await.unwrap();
        assert_eq!(orch.current_step(), OnboardingStep::ClinicalSiteSetup);
        assert!(orch.state().answers.program_id.is_some());

        orch.update_answers(AnswerPatch {
            site_name: Some("Lakeside General".to_string()),
            site_address: Some("1 Hospital Way".to_string()),
            ..Default::default()
        });
        let outcome = orch.handle_next().await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Completed);
        assert!(orch.state().answers.site_id.is_some());
        assert_eq!(dir.site_count().await, 1);
        assert!(dir.onboarding_completed());
    }

    #[tokio::test]
    async fn back_retraces_the_path_taken() {
        let dir = seeded_directory().await;
        let mut orch = bare(dir, None);
        orch.start().await.unwrap();
        orch.handle_next().await.unwrap();
        orch.update_answers(AnswerPatch::role(Role::Student));
        orch.handle_next().await.unwrap();
        assert_eq!(orch.current_step(), OnboardingStep::SchoolSelection);

        assert_eq!(orch.handle_back(), Some(OnboardingStep::RoleSelection));
        assert_eq!(orch.handle_back(), Some(OnboardingStep::Welcome));
        assert_eq!(orch.handle_back(), None);
    }

    #[tokio::test]
    async fn skip_only_applies_to_welcome() {
        let dir = seeded_directory().await;
        let mut orch = bare(dir, None);
        orch.start().await.unwrap();

        assert_eq!(
            orch.handle_skip().await.unwrap(),
            Some(OnboardingStep::RoleSelection)
        );
        assert_eq!(
            orch.state().skipped_steps,
            vec![OnboardingStep::Welcome]
        );
        // Not skippable anywhere else
        assert_eq!(orch.handle_skip().await.unwrap(), None);
    }

    #[tokio::test]
    async fn skip_into_terminal_runs_completion() {
        let dir = seeded_directory().await;
        let backend = Arc::new(InMemoryBackend::new());

        // A persisted session parked at welcome with everything answered.
        let mut state = SessionState::default();
        state.merge_answers(AnswerPatch {
            role: Some(Role::Student),
            school_id: Some("S1".to_string()),
            program_id: Some("P1".to_string()),
            ..Default::default()
        });
        let now = Utc::now();
        backend
            .seed(state.snapshot(
                uuid::Uuid::new_v4(),
                now,
                now + chrono::Duration::hours(24),
            ))
            .await;

        let config = EngineConfig {
            enable_analytics: false,
            ..Default::default()
        };
        let mut orch = Orchestrator::new(
            config,
            identity(None),
            dir.clone(),
            Some(backend.clone()),
            None,
        );
        assert_eq!(orch.start().await.unwrap(), OnboardingStep::Welcome);

        let step = orch.handle_skip().await.unwrap();
        assert_eq!(step, Some(OnboardingStep::Complete));
        assert!(dir.onboarding_completed());
        // Cleanup ran, same as a completion through handle_next.
        assert!(backend.stored().await.is_none());
    }

    #[tokio::test]
    async fn reset_during_inflight_autosave_leaves_no_session() {
        let dir = seeded_directory().await;
        let backend = Arc::new(InMemoryBackend::with_latency(
            std::time::Duration::from_millis(80),
        ));
        let config = EngineConfig {
            enable_analytics: false,
            autosave_debounce: std::time::Duration::from_millis(10),
            ..Default::default()
        };
        let mut orch = Orchestrator::new(
            config,
            identity(None),
            dir,
            Some(backend.clone()),
            None,
        );
        orch.start().await.unwrap();

        orch.update_answers(AnswerPatch::role(Role::Student));
        // Let the debounce fire so the auto-save is inside the slow
        // backend write when the reset arrives.
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        orch.handle_reset().await;
        assert_eq!(orch.current_step(), OnboardingStep::Welcome);

        // Once the in-flight write settles it is rolled back, not kept.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(backend.stored().await.is_none());
    }

    #[tokio::test]
    async fn side_effect_failure_keeps_step_and_answers() {
        struct FlakyDirectory {
            inner: Arc<InMemoryDirectory>,
            fail_role_update: std::sync::atomic::AtomicBool,
        }

        #[async_trait::async_trait]
        impl DirectoryBackend for FlakyDirectory {
            async fn list_schools(
                &self,
            ) -> std::result::Result<Vec<SchoolChoice>, crate::error::SideEffectError> {
                self.inner.list_schools().await
            }
            async fn list_programs(
                &self,
                school_id: &str,
            ) -> std::result::Result<Vec<crate::validator::ProgramChoice>, crate::error::SideEffectError>
            {
                self.inner.list_programs(school_id).await
            }
            async fn create_school(
                &self,
                name: &str,
                address: Option<&str>,
            ) -> std::result::Result<String, crate::error::SideEffectError> {
                self.inner.create_school(name, address).await
            }
            async fn create_program(
                &self,
                school_id: &str,
                name: &str,
                program_type: &str,
                duration_months: u32,
            ) -> std::result::Result<String, crate::error::SideEffectError> {
                self.inner
                    .create_program(school_id, name, program_type, duration_months)
                    .await
            }
            async fn create_clinical_site(
                &self,
                school_id: &str,
                name: &str,
                address: &str,
            ) -> std::result::Result<String, crate::error::SideEffectError> {
                self.inner.create_clinical_site(school_id, name, address).await
            }
            async fn update_user_role(
                &self,
                user_id: &str,
                role: Role,
            ) -> std::result::Result<(), crate::error::SideEffectError> {
                if self.fail_role_update.load(std::sync::atomic::Ordering::Relaxed) {
                    return Err(crate::error::SideEffectError::RoleUpdate(
                        "directory offline".to_string(),
                    ));
                }
                self.inner.update_user_role(user_id, role).await
            }
            async fn mark_onboarding_complete(
                &self,
                user_id: &str,
            ) -> std::result::Result<(), crate::error::SideEffectError> {
                self.inner.mark_onboarding_complete(user_id).await
            }
        }

        let flaky = Arc::new(FlakyDirectory {
            inner: seeded_directory().await,
            fail_role_update: std::sync::atomic::AtomicBool::new(true),
        });
        let config = EngineConfig {
            enable_analytics: false,
            enable_session_persistence: false,
            ..Default::default()
        };
        let mut orch = Orchestrator::new(config, identity(None), flaky.clone(), None, None);
        orch.start().await.unwrap();
        orch.handle_next().await.unwrap();
        orch.update_answers(AnswerPatch::role(Role::Student));

        let err = orch.handle_next().await.unwrap_err();
        assert!(matches!(err, EngineError::SideEffect(_)));
        // No transition; answers retained for retry.
        assert_eq!(orch.current_step(), OnboardingStep::RoleSelection);
        assert_eq!(orch.state().answers.role, Some(Role::Student));

        // Retry succeeds once the backend recovers.
        flaky
            .fail_role_update
            .store(false, std::sync::atomic::Ordering::Relaxed);
        let outcome = orch.handle_next().await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced {
                to: OnboardingStep::SchoolSelection
            }
        );
    }

    #[tokio::test]
    async fn reset_abandons_persisted_session() {
        let dir = seeded_directory().await;
        let backend = Arc::new(InMemoryBackend::new());
        let config = EngineConfig {
            enable_analytics: false,
            ..Default::default()
        };
        let mut orch = Orchestrator::new(
            config,
            identity(None),
            dir,
            Some(backend.clone()),
            None,
        );
        orch.start().await.unwrap();
        orch.handle_next().await.unwrap();
        orch.update_answers(AnswerPatch::role(Role::Student));
        // Let the step-transition auto-save drain before the explicit save.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(orch.handle_save().await);
        assert!(backend.stored().await.is_some());

        orch.handle_reset().await;
        assert_eq!(orch.current_step(), OnboardingStep::Welcome);
        assert!(orch.state().answers.role.is_none());
        assert!(backend.stored().await.is_none());
    }

    #[tokio::test]
    async fn resume_restores_persisted_state() {
        let dir = seeded_directory().await;
        let backend = Arc::new(InMemoryBackend::new());
        let config = EngineConfig {
            enable_analytics: false,
            ..Default::default()
        };

        {
            let mut orch = Orchestrator::new(
                config.clone(),
                identity(None),
                dir.clone(),
                Some(backend.clone()),
                None,
            );
            orch.start().await.unwrap();
            orch.handle_next().await.unwrap();
            orch.update_answers(AnswerPatch::role(Role::Student));
            orch.handle_next().await.unwrap();
            // Let queued auto-saves drain so the explicit save is last.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            assert!(orch.handle_save().await);
        }

        let mut resumed = Orchestrator::new(
            config,
            identity(None),
            dir,
            Some(backend),
            None,
        );
        let step = resumed.start().await.unwrap();
        assert_eq!(step, OnboardingStep::SchoolSelection);
        assert_eq!(resumed.state().answers.role, Some(Role::Student));
        assert_eq!(
            resumed.state().completed_steps,
            vec![OnboardingStep::Welcome, OnboardingStep::RoleSelection]
        );
    }

    #[tokio::test]
    async fn completion_cleans_up_the_session() {
        let dir = seeded_directory().await;
        let backend = Arc::new(InMemoryBackend::new());
        let config = EngineConfig {
            enable_analytics: false,
            ..Default::default()
        };
        let mut orch = Orchestrator::new(
            config,
            IdentityProfile {
                user_id: "u1".to_string(),
                role: Some(Role::SuperAdmin),
                school_id: None,
                program_id: None,
            },
            dir,
            Some(backend.clone()),
            None,
        );
        orch.start().await.unwrap();
        assert!(orch.handle_save().await);
        assert!(backend.stored().await.is_some());

        let outcome = orch.handle_next().await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Completed);
        // Cleanup happens only after confirmed completion.
        assert!(backend.stored().await.is_none());
    }
}
