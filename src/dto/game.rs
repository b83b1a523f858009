use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{
        format_system_time,
        validation::{validate_nickname, validate_pin},
    },
    store::models::{QuizEntity, SessionEntity, SessionStatus},
};

/// Credentials a participant presents to enter a session.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    /// 6-digit session pin shown on the host screen.
    pub pin: String,
    /// Display name, unique within the session.
    pub nickname: String,
}

impl Validate for JoinRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_pin(&self.pin) {
            errors.add("pin", e);
        }

        if let Err(e) = validate_nickname(&self.nickname) {
            errors.add("nickname", e);
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Read-only projection of a session exposed to the hosting UI.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Session id.
    pub id: Uuid,
    /// Join pin players type in.
    pub pin: String,
    /// Title of the quiz being played.
    pub quiz_title: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Number of questions the session serves.
    pub question_count: usize,
    /// RFC3339 creation timestamp.
    pub created_at: String,
}

impl SessionSummary {
    /// Build the projection from the session row and its quiz.
    pub fn new(session: &SessionEntity, quiz: &QuizEntity, question_count: usize) -> Self {
        Self {
            id: session.id,
            pin: session.pin.clone(),
            quiz_title: quiz.title.clone(),
            status: session.status,
            question_count,
            created_at: format_system_time(session.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_request_validation_reports_both_fields() {
        let request = JoinRequest {
            pin: "12".into(),
            nickname: "".into(),
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("pin"));
        assert!(errors.field_errors().contains_key("nickname"));
    }

    #[test]
    fn join_request_accepts_valid_input() {
        let request = JoinRequest {
            pin: "314159".into(),
            nickname: "grace".into(),
        };
        assert!(request.validate().is_ok());
    }
}
