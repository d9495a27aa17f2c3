//! Answer set: the fixed field map accumulated across wizard steps.

use serde::{Deserialize, Serialize};

use crate::catalog::Role;

/// Logical field names, used for validation errors and analytics payloads.
pub mod fields {
    pub const ROLE: &str = "role";
    pub const SCHOOL_ID: &str = "school_id";
    pub const PROGRAM_ID: &str = "program_id";
    pub const SITE_ID: &str = "site_id";
    pub const SCHOOL_NAME: &str = "school_name";
    pub const SCHOOL_ADDRESS: &str = "school_address";
    pub const PROGRAM_NAME: &str = "program_name";
    pub const PROGRAM_TYPE: &str = "program_type";
    pub const PROGRAM_DURATION_MONTHS: &str = "program_duration_months";
    pub const SITE_NAME: &str = "site_name";
    pub const SITE_ADDRESS: &str = "site_address";
    pub const AFFILIATION_SCHOOL_ID: &str = "affiliation_school_id";
}

/// Answers collected so far. The key set is closed; arbitrary fields
/// cannot exist, which is half of the validator's "unknown keys are
/// rejected" contract; the other half is value checking.
///
/// `program_duration_months` stays a raw string until validation: "must
/// be a positive integer" is a validation rule, so the pre-validation
/// state has to be representable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    /// Id of the clinical site created during setup, folded back from the
    /// directory backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_duration_months: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliation_school_id: Option<String>,
}

impl AnswerSet {
    /// A user with role, school, and program all set needs no further
    /// onboarding questions; the router short-circuits straight to the
    /// terminal step.
    pub fn is_fully_provisioned(&self) -> bool {
        self.role.is_some() && self.school_id.is_some() && self.program_id.is_some()
    }

    /// Apply a partial update. Returns the names of the fields that were
    /// actually present in the patch, so the caller can clear any stale
    /// validation errors on them.
    pub fn merge(&mut self, patch: AnswerPatch) -> Vec<&'static str> {
        let mut changed = Vec::new();

        macro_rules! apply {
            ($field:ident, $name:expr) => {
                if let Some(value) = patch.$field {
                    self.$field = Some(value);
                    changed.push($name);
                }
            };
        }

        apply!(role, fields::ROLE);
        apply!(school_id, fields::SCHOOL_ID);
        apply!(program_id, fields::PROGRAM_ID);
        apply!(site_id, fields::SITE_ID);
        apply!(school_name, fields::SCHOOL_NAME);
        apply!(school_address, fields::SCHOOL_ADDRESS);
        apply!(program_name, fields::PROGRAM_NAME);
        apply!(program_type, fields::PROGRAM_TYPE);
        apply!(program_duration_months, fields::PROGRAM_DURATION_MONTHS);
        apply!(site_name, fields::SITE_NAME);
        apply!(site_address, fields::SITE_ADDRESS);
        apply!(affiliation_school_id, fields::AFFILIATION_SCHOOL_ID);

        changed
    }
}

/// A partial update to an [`AnswerSet`]. Only `Some` fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerPatch {
    pub role: Option<Role>,
    pub school_id: Option<String>,
    pub program_id: Option<String>,
    pub site_id: Option<String>,
    pub school_name: Option<String>,
    pub school_address: Option<String>,
    pub program_name: Option<String>,
    pub program_type: Option<String>,
    pub program_duration_months: Option<String>,
    pub site_name: Option<String>,
    pub site_address: Option<String>,
    pub affiliation_school_id: Option<String>,
}

impl AnswerPatch {
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }

    pub fn school_id(id: impl Into<String>) -> Self {
        Self {
            school_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn program_id(id: impl Into<String>) -> Self {
        Self {
            program_id: Some(id.into()),
            ..Default::default()
        }
    }
}
