//! Step catalog: the fixed set of wizard steps and user roles.

use serde::{Deserialize, Serialize};

/// One screen/state in the onboarding wizard.
///
/// The catalog is closed and ordered; which steps a given user actually
/// visits is decided by the router, not by catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnboardingStep {
    Welcome,
    RoleSelection,
    SchoolSelection,
    ProgramSelection,
    SchoolSetup,
    ProgramSetup,
    ClinicalSiteSetup,
    AffiliationSetup,
    Complete,
}

/// Static metadata for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    pub title: &'static str,
    pub description: &'static str,
    /// Relative contribution to the progress bar.
    pub progress_weight: u32,
}

impl OnboardingStep {
    /// Every step, in catalog order.
    pub const ALL: [OnboardingStep; 9] = [
        Self::Welcome,
        Self::RoleSelection,
        Self::SchoolSelection,
        Self::ProgramSelection,
        Self::SchoolSetup,
        Self::ProgramSetup,
        Self::ClinicalSiteSetup,
        Self::AffiliationSetup,
        Self::Complete,
    ];

    /// Static catalog record for this step. Total by construction;
    /// a missing entry would be a programming error, not a runtime case.
    pub fn info(&self) -> StepInfo {
        match self {
            Self::Welcome => StepInfo {
                title: "Welcome",
                description: "Introduction to the clinical-education portal",
                progress_weight: 5,
            },
            Self::RoleSelection => StepInfo {
                title: "Select your role",
                description: "Tell us how you will use the portal",
                progress_weight: 10,
            },
            Self::SchoolSelection => StepInfo {
                title: "Select your school",
                description: "Choose the institution you belong to",
                progress_weight: 15,
            },
            Self::ProgramSelection => StepInfo {
                title: "Select your program",
                description: "Choose your program within the school",
                progress_weight: 15,
            },
            Self::SchoolSetup => StepInfo {
                title: "Set up your school",
                description: "Create your institution's profile",
                progress_weight: 20,
            },
            Self::ProgramSetup => StepInfo {
                title: "Set up a program",
                description: "Create the first program for your school",
                progress_weight: 20,
            },
            Self::ClinicalSiteSetup => StepInfo {
                title: "Add a clinical site",
                description: "Register a site where rotations take place",
                progress_weight: 15,
            },
            Self::AffiliationSetup => StepInfo {
                title: "Set up your affiliation",
                description: "Link your account to the school you precept for",
                progress_weight: 25,
            },
            Self::Complete => StepInfo {
                title: "All set",
                description: "Onboarding is complete",
                progress_weight: 0,
            },
        }
    }

    /// Whether this step is terminal (onboarding is done).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Welcome => "welcome",
            Self::RoleSelection => "role-selection",
            Self::SchoolSelection => "school-selection",
            Self::ProgramSelection => "program-selection",
            Self::SchoolSetup => "school-setup",
            Self::ProgramSetup => "program-setup",
            Self::ClinicalSiteSetup => "clinical-site-setup",
            Self::AffiliationSetup => "affiliation-setup",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// A user's role in the portal. Closed enum so the router's branching is
/// checked for exhaustiveness when a role is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Administrator of a single institution.
    SchoolAdmin,
    /// Learner enrolled (or enrolling) in a program.
    Student,
    /// Clinical preceptor supervising rotations.
    Preceptor,
    /// Clinical supervisor.
    Supervisor,
    /// Top-level system administrator; needs no institutional setup.
    SuperAdmin,
}

impl Role {
    /// Parse a role string from an external identity source.
    ///
    /// Unrecognized strings yield `None`; the engine never stores a role
    /// outside the closed set.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "school_admin" => Some(Self::SchoolAdmin),
            "student" => Some(Self::Student),
            "preceptor" => Some(Self::Preceptor),
            "supervisor" => Some(Self::Supervisor),
            "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    /// Whether this is one of the clinical-supervisory roles.
    pub fn is_clinical(&self) -> bool {
        matches!(self, Self::Preceptor | Self::Supervisor)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SchoolAdmin => "school_admin",
            Self::Student => "student",
            Self::Preceptor => "preceptor",
            Self::Supervisor => "supervisor",
            Self::SuperAdmin => "super_admin",
        };
        write!(f, "{s}")
    }
}
