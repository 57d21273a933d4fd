//! Transition requirement types and input checks.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The kind of input a transition can demand before it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    Comment,
    Attachment,
    Feedback,
}

impl RequirementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comment => "comment",
            Self::Attachment => "attachment",
            Self::Feedback => "feedback",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "comment" => Ok(Self::Comment),
            "attachment" => Ok(Self::Attachment),
            "feedback" => Ok(Self::Feedback),
            _ => Err(CoreError::Validation(format!(
                "Invalid requirement_type: '{s}'. Must be one of: comment, attachment, feedback"
            ))),
        }
    }

    /// Message used when the requirement row carries no custom text.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Comment => "A comment is required for this transition",
            Self::Attachment => "At least one attachment is required for this transition",
            Self::Feedback => "A feedback rating is required for this transition",
        }
    }
}

impl std::fmt::Display for RequirementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller-supplied inputs a requirement is checked against.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuppliedInputs<'a> {
    pub comment: Option<&'a str>,
    pub attachment_count: usize,
    pub feedback_rating: Option<i16>,
}

impl SuppliedInputs<'_> {
    /// Whether the inputs satisfy a requirement of the given type.
    pub fn satisfies(&self, requirement: RequirementType) -> bool {
        match requirement {
            RequirementType::Comment => self.comment.is_some_and(|c| !c.trim().is_empty()),
            RequirementType::Attachment => self.attachment_count > 0,
            RequirementType::Feedback => self.feedback_rating.is_some_and(|r| r > 0),
        }
    }
}

/// One configured requirement, borrowed from its storage row.
#[derive(Debug, Clone, Copy)]
pub struct RequirementCheck<'a> {
    pub requirement_type: &'a str,
    pub is_mandatory: bool,
    pub error_message: Option<&'a str>,
}

/// Check requirements in declaration order.
///
/// The first unmet mandatory requirement fails with its configured message
/// (or the type's default). Advisory requirements are evaluated and their
/// unmet types returned, but never block.
pub fn check_requirements(
    requirements: &[RequirementCheck<'_>],
    inputs: &SuppliedInputs<'_>,
) -> Result<Vec<RequirementType>, CoreError> {
    let mut advisory_unmet = Vec::new();

    for requirement in requirements {
        let kind = RequirementType::from_str(requirement.requirement_type)?;
        if inputs.satisfies(kind) {
            continue;
        }
        if requirement.is_mandatory {
            let message = requirement
                .error_message
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| kind.default_message());
            return Err(CoreError::RequirementNotMet(message.to_string()));
        }
        advisory_unmet.push(kind);
    }

    Ok(advisory_unmet)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn mandatory<'a>(kind: &'a str, message: Option<&'a str>) -> RequirementCheck<'a> {
        RequirementCheck {
            requirement_type: kind,
            is_mandatory: true,
            error_message: message,
        }
    }

    #[test]
    fn whitespace_comment_does_not_satisfy() {
        let inputs = SuppliedInputs {
            comment: Some("   "),
            ..Default::default()
        };
        assert!(!inputs.satisfies(RequirementType::Comment));
    }

    #[test]
    fn zero_rating_does_not_satisfy_feedback() {
        let inputs = SuppliedInputs {
            feedback_rating: Some(0),
            ..Default::default()
        };
        assert!(!inputs.satisfies(RequirementType::Feedback));
    }

    #[test]
    fn configured_message_is_returned() {
        let reqs = [mandatory("comment", Some("Explain what you did"))];
        let result = check_requirements(&reqs, &SuppliedInputs::default());
        assert_matches!(result, Err(CoreError::RequirementNotMet(m)) if m == "Explain what you did");
    }

    #[test]
    fn default_message_when_none_configured() {
        let reqs = [mandatory("attachment", None)];
        let result = check_requirements(&reqs, &SuppliedInputs::default());
        assert_matches!(
            result,
            Err(CoreError::RequirementNotMet(m)) if m == RequirementType::Attachment.default_message()
        );
    }

    #[test]
    fn first_violation_in_declaration_order_wins() {
        let reqs = [
            mandatory("feedback", Some("rate it")),
            mandatory("comment", Some("say something")),
        ];
        let result = check_requirements(&reqs, &SuppliedInputs::default());
        assert_matches!(result, Err(CoreError::RequirementNotMet(m)) if m == "rate it");
    }

    #[test]
    fn advisory_requirements_never_block() {
        let reqs = [RequirementCheck {
            requirement_type: "attachment",
            is_mandatory: false,
            error_message: None,
        }];
        let unmet = check_requirements(&reqs, &SuppliedInputs::default()).unwrap();
        assert_eq!(unmet, vec![RequirementType::Attachment]);
    }

    #[test]
    fn satisfied_inputs_pass() {
        let reqs = [mandatory("comment", None), mandatory("feedback", None)];
        let inputs = SuppliedInputs {
            comment: Some("started"),
            attachment_count: 0,
            feedback_rating: Some(4),
        };
        assert!(check_requirements(&reqs, &inputs).unwrap().is_empty());
    }

    #[test]
    fn unknown_requirement_type_is_a_validation_error() {
        let reqs = [mandatory("signature", None)];
        assert_matches!(
            check_requirements(&reqs, &SuppliedInputs::default()),
            Err(CoreError::Validation(_))
        );
    }
}
