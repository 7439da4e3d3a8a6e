//! Error types for led-duel

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, DuelError>;

#[derive(Error, Debug)]
pub enum DuelError {
    #[error("Sequence length {length} outside allowed range {min}..={max}")]
    InvalidSequenceLength { length: usize, min: usize, max: usize },

    #[error("Invalid sequence symbol: {0:?}")]
    InvalidSymbol(char),

    #[error("Difficulty {difficulty} outside allowed range {min}..={max}")]
    InvalidDifficulty { difficulty: u8, min: u8, max: u8 },

    #[error("A player cannot challenge themselves")]
    SelfChallenge,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Challenge {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Challenge {id} is already completed")]
    AlreadyCompleted { id: String },

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DuelError {
    /// Whether retrying the whole read-modify-write may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DuelError::Conflict(_))
    }

    /// Whether the error was raised before any state was touched because
    /// the caller's input was rejected
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DuelError::InvalidSequenceLength { .. }
                | DuelError::InvalidSymbol(_)
                | DuelError::InvalidDifficulty { .. }
                | DuelError::SelfChallenge
                | DuelError::Validation(_)
        )
    }
}

impl From<serde_json::Error> for DuelError {
    fn from(err: serde_json::Error) -> Self {
        DuelError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for DuelError {
    fn from(err: sled::Error) -> Self {
        DuelError::Database(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for DuelError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        DuelError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for DuelError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        DuelError::Serialization(err.to_string())
    }
}
