use rusqlite::ErrorCode;
use rusqlite::ffi;
use thiserror::Error;

use crate::storage::models::{DestinationId, VideoId};

#[derive(Debug, Error)]
pub enum ReelError {
    #[error("Duplicate content: {0}")]
    DuplicateContent(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No undelivered content left for destination {0}")]
    NoContentAvailable(DestinationId),

    #[error("Video {video_id} was already delivered to {destination}")]
    DuplicateDelivery {
        destination: DestinationId,
        video_id: VideoId,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Operation canceled: {0}")]
    Canceled(String),

    #[error("Migration {name} failed at `{statement}`: {reason}")]
    MigrationFailed {
        name: String,
        statement: String,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReelError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReelError::MigrationFailed { .. })
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            ReelError::StoreUnavailable(_) | ReelError::Pool(_) | ReelError::Canceled(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReelError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Violation {
    Unique,
    ForeignKey,
}

pub(crate) fn constraint_violation(err: &rusqlite::Error) -> Option<Violation> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            match e.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    Some(Violation::Unique)
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Some(Violation::ForeignKey),
                _ => None,
            }
        }
        _ => None,
    }
}

pub(crate) fn is_interrupted(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted
    )
}

// An interrupted statement means a deadline fired, not that the store is gone.
impl From<rusqlite::Error> for ReelError {
    fn from(err: rusqlite::Error) -> Self {
        if is_interrupted(&err) {
            ReelError::Canceled(err.to_string())
        } else {
            ReelError::StoreUnavailable(err)
        }
    }
}
