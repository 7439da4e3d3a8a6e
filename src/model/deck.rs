//! Collected creatures and capture attempts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::user::UserId;

pub const DECK_COLLECTION: &str = "deck";
pub const CAPTURE_COLLECTION: &str = "captures";

/// Failed attempts allowed before the creature flees
pub const MAX_CAPTURE_ATTEMPTS: u8 = 3;

/// Catalog identifier of a species (one evolution tier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeciesId(pub u32);

impl fmt::Display for SpeciesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Composite key shared by deck entries and capture trackers
pub fn owner_species_key(owner: &UserId, species: SpeciesId) -> String {
    format!("{}_{}", owner, species)
}

/// One owned creature; at most one per species per owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckEntry {
    pub id: String,
    pub owner_id: UserId,
    pub species_id: SpeciesId,
    pub name: String,
    #[serde(default)]
    pub experience: u64,
    pub captured_at: DateTime<Utc>,
}

impl DeckEntry {
    pub fn new(owner_id: UserId, species_id: SpeciesId, name: impl Into<String>) -> Self {
        Self {
            id: owner_species_key(&owner_id, species_id),
            owner_id,
            species_id,
            name: name.into(),
            experience: 0,
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    #[default]
    Idle,
    Captured,
    Fled,
}

/// Attempt tracker for one wild creature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatus {
    pub id: String,
    pub owner_id: UserId,
    pub species_id: SpeciesId,
    #[serde(default)]
    pub attempts: u8,
    #[serde(default)]
    pub status: CaptureState,
}

impl CaptureStatus {
    pub fn new(owner_id: UserId, species_id: SpeciesId) -> Self {
        Self {
            id: owner_species_key(&owner_id, species_id),
            owner_id,
            species_id,
            attempts: 0,
            status: CaptureState::Idle,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != CaptureState::Idle
    }

    pub fn attempts_left(&self) -> u8 {
        MAX_CAPTURE_ATTEMPTS.saturating_sub(self.attempts)
    }

    /// Register one attempt; no-op once captured or fled
    pub fn record(&mut self, succeeded: bool) -> CaptureState {
        if self.is_settled() {
            return self.status;
        }
        self.attempts += 1;
        if succeeded {
            self.status = CaptureState::Captured;
        } else if self.attempts >= MAX_CAPTURE_ATTEMPTS {
            self.status = CaptureState::Fled;
        }
        self.status
    }
}
