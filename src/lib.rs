//! Onboarding workflow engine for the clinical-education admin portal.
//!
//! A library-level state machine: the presentation layer renders whatever
//! step the [`orchestrator::Orchestrator`] says is current, and every
//! Next/Back/Save/Reset action funnels through it. Persistence, analytics,
//! and domain-entity creation are trait seams supplied by the embedder.

pub mod analytics;
pub mod answers;
pub mod autosave;
pub mod catalog;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod router;
pub mod session;
pub mod validator;
