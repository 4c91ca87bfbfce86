use std::sync::Arc;

use thiserror::Error;

use crate::models::RelationshipStatus;

pub type Result<T> = std::result::Result<T, TrackError>;

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("cannot move relationship from {from} to {to}")]
    InvalidTransition {
        from: RelationshipStatus,
        to: RelationshipStatus,
    },

    #[error("supervisor already has {limit} active EITs")]
    AtCapacity { limit: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("email dispatch failed: {0}")]
    Mail(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Shared(Arc<TrackError>),
}

impl TrackError {
    pub fn validation(message: impl Into<String>) -> Self {
        TrackError::Validation(message.into())
    }

    /// Text safe to show to an end user. Backend detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            TrackError::Validation(message) => message.clone(),
            TrackError::NotFound(what) => format!("{what} not found."),
            TrackError::InvalidTransition { .. } => {
                "This request has already been handled.".to_string()
            }
            TrackError::AtCapacity { limit } => {
                format!("You have reached your limit of {limit} active EITs.")
            }
            TrackError::Shared(inner) => inner.user_message(),
            _ => "Something went wrong, please try again.".to_string(),
        }
    }
}

impl From<Arc<TrackError>> for TrackError {
    fn from(error: Arc<TrackError>) -> Self {
        TrackError::Shared(error)
    }
}
