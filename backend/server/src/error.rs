use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Voting closed")]
    VotingClosed,

    #[error("Item not found")]
    ItemNotFound,

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("No active vote")]
    NoActiveVote,

    #[error("Conflict, please retry")]
    Conflict,

    #[error("Participant not found")]
    ParticipantNotFound,

    #[error("Participant already exists")]
    DuplicateParticipant,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage failure: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => LedgerError::Conflict,
            other => LedgerError::Storage(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Ledger(err) => match err {
                LedgerError::Unauthorized => StatusCode::UNAUTHORIZED,
                LedgerError::Forbidden | LedgerError::VotingClosed => StatusCode::FORBIDDEN,
                LedgerError::ItemNotFound
                | LedgerError::NoActiveVote
                | LedgerError::ParticipantNotFound => StatusCode::NOT_FOUND,
                LedgerError::InvalidSelection(_) | LedgerError::InvalidInput(_) => {
                    StatusCode::BAD_REQUEST
                }
                LedgerError::Conflict | LedgerError::DuplicateParticipant => StatusCode::CONFLICT,
                LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
