// Error types returned by the transaction engines.

use thiserror::Error;

use crate::model::{EntrantId, FantasyTeamId};

/// Coarse classification reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    AuthorizationDenied,
    Conflict,
    Storage,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not authorized: {0}")]
    AuthorizationDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("draft is complete")]
    DraftComplete,

    #[error("it is not {actor}'s turn; team {on_clock} is on the clock")]
    WrongTurn {
        actor: String,
        on_clock: FantasyTeamId,
    },

    #[error("entrant {0} has already been taken")]
    AlreadyTaken(EntrantId),

    #[error("entrant {0} is not eligible for this draft")]
    NotEligible(EntrantId),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidState(_)
            | EngineError::DraftComplete
            | EngineError::NotEligible(_) => ErrorKind::InvalidState,
            EngineError::AuthorizationDenied(_) | EngineError::WrongTurn { .. } => {
                ErrorKind::AuthorizationDenied
            }
            EngineError::Conflict(_) | EngineError::AlreadyTaken(_) => ErrorKind::Conflict,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_rejections_map_to_kinds() {
        assert_eq!(EngineError::DraftComplete.kind(), ErrorKind::InvalidState);
        assert_eq!(
            EngineError::NotEligible(EntrantId(1)).kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            EngineError::WrongTurn {
                actor: "team 1".into(),
                on_clock: FantasyTeamId(2)
            }
            .kind(),
            ErrorKind::AuthorizationDenied
        );
        assert_eq!(
            EngineError::AlreadyTaken(EntrantId(118)).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = EngineError::not_found("draft", 7);
        assert_eq!(err.to_string(), "draft 7 not found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
