//! Step validator: pure per-step field rules.
//!
//! No I/O ever happens here; the option lists a selection step checks
//! against are fetched elsewhere and passed in, so `validate` is safe to
//! call on every keystroke.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::answers::{fields, AnswerSet};
use crate::catalog::OnboardingStep;

/// A selectable school, as listed by the directory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolChoice {
    pub id: String,
    pub name: String,
}

/// A selectable program. `school_id` is the parent institution; a program
/// choice is only valid when its parent matches the selected school.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramChoice {
    pub id: String,
    pub name: String,
    pub school_id: String,
}

/// The currently available, role/parent-filtered option lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailableOptions {
    pub schools: Vec<SchoolChoice>,
    pub programs: Vec<ProgramChoice>,
}

impl AvailableOptions {
    fn has_school(&self, id: &str) -> bool {
        self.schools.iter().any(|s| s.id == id)
    }

    fn has_program_in_school(&self, program_id: &str, school_id: &str) -> bool {
        self.programs
            .iter()
            .any(|p| p.id == program_id && p.school_id == school_id)
    }
}

/// Field-level validation errors, keyed by field name.
///
/// Recomputed fresh on every call and never persisted. An empty set is
/// the one and only green light for advancement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn insert(&mut self, field: &str, message: impl Into<String>) {
        self.errors.insert(field.to_string(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    /// Drop the error for one field; called when that field's answer
    /// changes.
    pub fn clear_field(&mut self, field: &str) {
        self.errors.remove(field);
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    /// Field names with errors, sorted.
    pub fn fields(&self) -> Vec<String> {
        self.errors.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn is_blank(value: Option<&String>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

/// Validate `step` against the current answers and option lists.
pub fn validate(
    step: OnboardingStep,
    answers: &AnswerSet,
    options: &AvailableOptions,
) -> ValidationErrors {
    let mut errors = ValidationErrors::default();

    match step {
        // Informational / terminal screens have no fields.
        OnboardingStep::Welcome | OnboardingStep::Complete => {}

        OnboardingStep::RoleSelection => {
            // Role is a closed enum; present means valid.
            if answers.role.is_none() {
                errors.insert(fields::ROLE, "Select a role to continue");
            }
        }

        OnboardingStep::SchoolSelection => match answers.school_id.as_deref() {
            None | Some("") => {
                errors.insert(fields::SCHOOL_ID, "Select a school");
            }
            Some(id) if !options.has_school(id) => {
                errors.insert(fields::SCHOOL_ID, "Selected school is not available");
            }
            Some(_) => {}
        },

        OnboardingStep::ProgramSelection => match answers.program_id.as_deref() {
            None | Some("") => {
                errors.insert(fields::PROGRAM_ID, "Select a program");
            }
            Some(program_id) => {
                let parent_ok = answers
                    .school_id
                    .as_deref()
                    .map(|school_id| options.has_program_in_school(program_id, school_id))
                    .unwrap_or(false);
                if !parent_ok {
                    errors.insert(
                        fields::PROGRAM_ID,
                        "Selected program does not belong to your school",
                    );
                }
            }
        },

        OnboardingStep::SchoolSetup => {
            // Address is optional.
            if is_blank(answers.school_name.as_ref()) {
                errors.insert(fields::SCHOOL_NAME, "Institution name is required");
            }
        }

        OnboardingStep::ProgramSetup => {
            if is_blank(answers.program_name.as_ref()) {
                errors.insert(fields::PROGRAM_NAME, "Program name is required");
            }
            if is_blank(answers.program_type.as_ref()) {
                errors.insert(fields::PROGRAM_TYPE, "Program type is required");
            }
            match answers
                .program_duration_months
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
            {
                None => {
                    errors.insert(
                        fields::PROGRAM_DURATION_MONTHS,
                        "Program duration is required",
                    );
                }
                Some(raw) => match raw.parse::<u32>() {
                    Ok(n) if n > 0 => {}
                    _ => {
                        errors.insert(
                            fields::PROGRAM_DURATION_MONTHS,
                            "Duration must be a positive whole number of months",
                        );
                    }
                },
            }
        }

        OnboardingStep::ClinicalSiteSetup => {
            if is_blank(answers.site_name.as_ref()) {
                errors.insert(fields::SITE_NAME, "Site name is required");
            }
            if is_blank(answers.site_address.as_ref()) {
                errors.insert(fields::SITE_ADDRESS, "Site address is required");
            }
        }

        OnboardingStep::AffiliationSetup => match answers.affiliation_school_id.as_deref() {
            None | Some("") => {
                errors.insert(fields::AFFILIATION_SCHOOL_ID, "Select a school to affiliate with");
            }
            Some(id) if !options.has_school(id) => {
                errors.insert(
                    fields::AFFILIATION_SCHOOL_ID,
                    "Selected school is not available",
                );
            }
            Some(_) => {}
        },
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Role;

    fn options() -> AvailableOptions {
        AvailableOptions {
            schools: vec![
                SchoolChoice {
                    id: "S1".to_string(),
                    name: "Mercy College".to_string(),
                },
                SchoolChoice {
                    id: "S2".to_string(),
                    name: "Lakeside University".to_string(),
                },
            ],
            programs: vec![
                ProgramChoice {
                    id: "P1".to_string(),
                    name: "Nursing".to_string(),
                    school_id: "S1".to_string(),
                },
                ProgramChoice {
                    id: "P2".to_string(),
                    name: "Physician Assistant".to_string(),
                    school_id: "S2".to_string(),
                },
            ],
        }
    }

    #[test]
    fn welcome_and_complete_never_error() {
        let answers = AnswerSet::default();
        assert!(validate(OnboardingStep::Welcome, &answers, &options()).is_empty());
        assert!(validate(OnboardingStep::Complete, &answers, &options()).is_empty());
    }

    #[test]
    fn role_selection_requires_role() {
        let mut answers = AnswerSet::default();
        let errors = validate(OnboardingStep::RoleSelection, &answers, &options());
        assert_eq!(errors.fields(), vec!["role"]);

        answers.role = Some(Role::Student);
        assert!(validate(OnboardingStep::RoleSelection, &answers, &options()).is_empty());
    }

    #[test]
    fn school_selection_requires_listed_school() {
        let mut answers = AnswerSet::default();
        assert!(!validate(OnboardingStep::SchoolSelection, &answers, &options()).is_empty());

        answers.school_id = Some("S99".to_string());
        let errors = validate(OnboardingStep::SchoolSelection, &answers, &options());
        assert!(errors.get("school_id").unwrap().contains("not available"));

        answers.school_id = Some("S1".to_string());
        assert!(validate(OnboardingStep::SchoolSelection, &answers, &options()).is_empty());
    }

    #[test]
    fn program_must_belong_to_selected_school() {
        let answers = AnswerSet {
            school_id: Some("S1".to_string()),
            program_id: Some("P2".to_string()), // belongs to S2
            ..Default::default()
        };
        let errors = validate(OnboardingStep::ProgramSelection, &answers, &options());
        assert_eq!(errors.len(), 1);
        assert!(errors.get("program_id").is_some());

        let good = AnswerSet {
            school_id: Some("S1".to_string()),
            program_id: Some("P1".to_string()),
            ..Default::default()
        };
        assert!(validate(OnboardingStep::ProgramSelection, &good, &options()).is_empty());
    }

    #[test]
    fn school_setup_address_is_optional() {
        let answers = AnswerSet {
            school_name: Some("Mercy College".to_string()),
            ..Default::default()
        };
        assert!(validate(OnboardingStep::SchoolSetup, &answers, &options()).is_empty());

        let blank = AnswerSet {
            school_name: Some("   ".to_string()),
            ..Default::default()
        };
        let errors = validate(OnboardingStep::SchoolSetup, &blank, &options());
        assert_eq!(errors.fields(), vec!["school_name"]);
    }

    #[test]
    fn program_setup_missing_name_is_exactly_one_error() {
        let answers = AnswerSet {
            program_name: Some(String::new()),
            program_type: Some("MD".to_string()),
            program_duration_months: Some("48".to_string()),
            ..Default::default()
        };
        let errors = validate(OnboardingStep::ProgramSetup, &answers, &options());
        assert_eq!(errors.len(), 1);
        assert!(errors.get("program_name").is_some());
    }

    #[test]
    fn program_duration_must_be_positive_integer() {
        for bad in ["0", "-3", "abc", "2.5", ""] {
            let answers = AnswerSet {
                program_name: Some("Nursing".to_string()),
                program_type: Some("BSN".to_string()),
                program_duration_months: Some(bad.to_string()),
                ..Default::default()
            };
            let errors = validate(OnboardingStep::ProgramSetup, &answers, &options());
            assert!(
                errors.get("program_duration_months").is_some(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn clinical_site_requires_name_and_address() {
        let errors = validate(
            OnboardingStep::ClinicalSiteSetup,
            &AnswerSet::default(),
            &options(),
        );
        assert_eq!(errors.fields(), vec!["site_address", "site_name"]);
    }

    #[test]
    fn affiliation_requires_listed_school() {
        let answers = AnswerSet {
            affiliation_school_id: Some("S2".to_string()),
            ..Default::default()
        };
        assert!(validate(OnboardingStep::AffiliationSetup, &answers, &options()).is_empty());
    }

    #[test]
    fn clear_field_drops_single_error() {
        let mut errors = validate(
            OnboardingStep::ClinicalSiteSetup,
            &AnswerSet::default(),
            &options(),
        );
        errors.clear_field("site_name");
        assert_eq!(errors.fields(), vec!["site_address"]);
    }

    #[test]
    fn validation_is_repeatable() {
        let answers = AnswerSet::default();
        let a = validate(OnboardingStep::ProgramSetup, &answers, &options());
        let b = validate(OnboardingStep::ProgramSetup, &answers, &options());
        assert_eq!(a, b);
    }
}
