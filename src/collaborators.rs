//! External collaborator contracts: identity input and the directory
//! backend the orchestrator's side effects go through.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::catalog::Role;
use crate::error::SideEffectError;
use crate::validator::{ProgramChoice, SchoolChoice};

/// Read-only identity input supplied by the caller at startup. The engine
/// never mutates it directly; role changes go through
/// [`DirectoryBackend::update_user_role`].
#[derive(Debug, Clone, Default)]
pub struct IdentityProfile {
    pub user_id: String,
    /// Pre-provisioned role, if the identity already has one.
    pub role: Option<Role>,
    pub school_id: Option<String>,
    pub program_id: Option<String>,
}

/// Backend for domain entities and user updates.
///
/// Creation calls return the generated id, which the orchestrator folds
/// back into the answer set. `mark_onboarding_complete` must be
/// idempotent; completion may be retried after a partial failure.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    // ── Option lists (for selection-step validation) ────────────────

    async fn list_schools(&self) -> Result<Vec<SchoolChoice>, SideEffectError>;

    async fn list_programs(&self, school_id: &str) -> Result<Vec<ProgramChoice>, SideEffectError>;

    // ── Entity creation ─────────────────────────────────────────────

    async fn create_school(
        &self,
        name: &str,
        address: Option<&str>,
    ) -> Result<String, SideEffectError>;

    async fn create_program(
        &self,
        school_id: &str,
        name: &str,
        program_type: &str,
        duration_months: u32,
    ) -> Result<String, SideEffectError>;

    async fn create_clinical_site(
        &self,
        school_id: &str,
        name: &str,
        address: &str,
    ) -> Result<String, SideEffectError>;

    // ── User updates ────────────────────────────────────────────────

    async fn update_user_role(&self, user_id: &str, role: Role) -> Result<(), SideEffectError>;

    async fn mark_onboarding_complete(&self, user_id: &str) -> Result<(), SideEffectError>;
}

/// In-memory [`DirectoryBackend`] for tests and demos.
#[derive(Default)]
pub struct InMemoryDirectory {
    inner: RwLock<DirectoryInner>,
    completed: AtomicBool,
}

#[derive(Default)]
struct DirectoryInner {
    schools: Vec<SchoolChoice>,
    programs: Vec<ProgramChoice>,
    sites: Vec<(String, String)>,
    roles: Vec<(String, Role)>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate selectable schools and programs.
    pub async fn seed(&self, schools: Vec<SchoolChoice>, programs: Vec<ProgramChoice>) {
        let mut inner = self.inner.write().await;
        inner.schools = schools;
        inner.programs = programs;
    }

    pub fn onboarding_completed(&self) -> bool {
        self.completed.load(Ordering::Relaxed)
    }

    pub async fn school_count(&self) -> usize {
        self.inner.read().await.schools.len()
    }

    pub async fn site_count(&self) -> usize {
        self.inner.read().await.sites.len()
    }

    pub async fn role_of(&self, user_id: &str) -> Option<Role> {
        self.inner
            .read()
            .await
            .roles
            .iter()
            .rev()
            .find(|(id, _)| id == user_id)
            .map(|(_, role)| *role)
    }
}

#[async_trait]
impl DirectoryBackend for InMemoryDirectory {
    async fn list_schools(&self) -> Result<Vec<SchoolChoice>, SideEffectError> {
        Ok(self.inner.read().await.schools.clone())
    }

    async fn list_programs(&self, school_id: &str) -> Result<Vec<ProgramChoice>, SideEffectError> {
        Ok(self
            .inner
            .read()
            .await
            .programs
            .iter()
            .filter(|p| p.school_id == school_id)
            .cloned()
            .collect())
    }

    async fn create_school(
        &self,
        name: &str,
        _address: Option<&str>,
    ) -> Result<String, SideEffectError> {
        let id = Uuid::new_v4().to_string();
        self.inner.write().await.schools.push(SchoolChoice {
            id: id.clone(),
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn create_program(
        &self,
        school_id: &str,
        name: &str,
        _program_type: &str,
        _duration_months: u32,
    ) -> Result<String, SideEffectError> {
        let id = Uuid::new_v4().to_string();
        self.inner.write().await.programs.push(ProgramChoice {
            id: id.clone(),
            name: name.to_string(),
            school_id: school_id.to_string(),
        });
        Ok(id)
    }

    async fn create_clinical_site(
        &self,
        _school_id: &str,
        name: &str,
        address: &str,
    ) -> Result<String, SideEffectError> {
        let id = Uuid::new_v4().to_string();
        self.inner
            .write()
            .await
            .sites
            .push((name.to_string(), address.to_string()));
        Ok(id)
    }

    async fn update_user_role(&self, user_id: &str, role: Role) -> Result<(), SideEffectError> {
        self.inner
            .write()
            .await
            .roles
            .push((user_id.to_string(), role));
        Ok(())
    }

    async fn mark_onboarding_complete(&self, _user_id: &str) -> Result<(), SideEffectError> {
        // Idempotent by construction.
        self.completed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
