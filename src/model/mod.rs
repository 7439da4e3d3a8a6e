//! Data model shared by the services and the device
//!
//! All records serialize to camelCase so documents written by the firmware
//! and by this crate are interchangeable.

pub mod challenge;
pub mod deck;
pub mod sequence;
pub mod user;

pub use challenge::{
    Challenge, ChallengeDocument, ChallengeId, ChallengeState, ChallengeStatus, Difficulty,
    Outcome, CHALLENGE_COLLECTION, DEFAULT_DIFFICULTY, MAX_DIFFICULTY, MIN_DIFFICULTY,
};
pub use deck::{
    CaptureState, CaptureStatus, DeckEntry, SpeciesId, CAPTURE_COLLECTION, DECK_COLLECTION,
    MAX_CAPTURE_ATTEMPTS,
};
pub use sequence::{Sequence, Symbol, MAX_SEQUENCE_LENGTH, MIN_SEQUENCE_LENGTH};
pub use user::{UserId, UserProfile, USER_COLLECTION};
