//! Step router: the branching policy.
//!
//! Pure functions over `(role, answers, current step)`. The decision table
//! lives here and nowhere else; the orchestrator never second-guesses it.

use crate::answers::AnswerSet;
use crate::catalog::{OnboardingStep, Role};

/// Compute the next step after `current`.
///
/// Precedence: the fully-provisioned short-circuit first, then the
/// role-keyed decision table. A missing role always routes to role
/// selection before anything institutional.
pub fn next_step(
    role: Option<Role>,
    answers: &AnswerSet,
    current: OnboardingStep,
) -> OnboardingStep {
    use OnboardingStep::*;

    // Already terminal, nothing further.
    if current == Complete {
        return Complete;
    }

    // Evaluated on entry only: a user arriving already provisioned
    // (role + school + program, e.g. out-of-band) is never re-asked
    // anything. Mid-session, the role rules below decide: an admin who
    // just created their program still owes a clinical site.
    if current == Welcome && answers.is_fully_provisioned() {
        return Complete;
    }

    let Some(role) = role else {
        return RoleSelection;
    };

    match role {
        Role::SchoolAdmin => {
            if answers.school_id.is_none() {
                SchoolSetup
            } else if answers.program_id.is_none() {
                ProgramSetup
            } else if answers.site_id.is_none() {
                ClinicalSiteSetup
            } else {
                Complete
            }
        }
        Role::Student => {
            if answers.school_id.is_none() {
                SchoolSelection
            } else if answers.program_id.is_none() {
                ProgramSelection
            } else {
                Complete
            }
        }
        Role::Preceptor | Role::Supervisor => {
            if answers.affiliation_school_id.is_none() {
                AffiliationSetup
            } else {
                Complete
            }
        }
        Role::SuperAdmin => Complete,
    }
}

/// Compute the step "Back" returns to.
///
/// This is the inverse of the forward path actually taken this session,
/// reconstructed from the completed-step log, not "catalog index minus
/// one". `Welcome` has no predecessor and `Complete` does not offer Back.
pub fn previous_step(
    current: OnboardingStep,
    role: Option<Role>,
    completed: &[OnboardingStep],
) -> Option<OnboardingStep> {
    use OnboardingStep::*;

    if matches!(current, Welcome | Complete) {
        return None;
    }

    // If the current step was itself reached by completing earlier steps,
    // walk the log: the predecessor is the entry before `current`, or the
    // last entry when `current` hasn't been completed yet.
    if let Some(pos) = completed.iter().position(|s| *s == current) {
        if pos > 0 {
            return Some(completed[pos - 1]);
        }
    } else if let Some(last) = completed.last() {
        return Some(*last);
    }

    // Empty (or exhausted) log: resumed session or direct construction.
    // Fall back to the static predecessor.
    match current {
        RoleSelection => Some(Welcome),
        _ if role.is_some() => Some(RoleSelection),
        _ => Some(Welcome),
    }
}

/// The full forward path a user with `role` walks, ignoring answers.
/// Used for progress-percentage denominators.
pub fn forward_path(role: Option<Role>) -> &'static [OnboardingStep] {
    use OnboardingStep::*;

    match role {
        Some(Role::SchoolAdmin) => &[
            Welcome,
            RoleSelection,
            SchoolSetup,
            ProgramSetup,
            ClinicalSiteSetup,
            Complete,
        ],
        Some(Role::Student) | None => &[
            Welcome,
            RoleSelection,
            SchoolSelection,
            ProgramSelection,
            Complete,
        ],
        Some(Role::Preceptor) | Some(Role::Supervisor) => {
            &[Welcome, RoleSelection, AffiliationSetup, Complete]
        }
        Some(Role::SuperAdmin) => &[Welcome, RoleSelection, Complete],
    }
}
