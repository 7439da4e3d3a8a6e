//! Experience planning for collected creatures
//!
//! A creature evolves when its accumulated experience reaches the base
//! experience of the next species in its chain. Experience past the
//! threshold carries over to the evolved form. Planning is pure; the deck
//! service turns a plan into store writes.

use serde::{Deserialize, Serialize};

use crate::model::SpeciesId;

/// Next species in an evolution chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextTier {
    pub species: SpeciesId,
    pub name: String,
    /// Experience required to evolve; `None` when the catalog does not know it
    pub threshold: Option<u64>,
    /// The owner already holds this species
    pub already_owned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExperiencePlan {
    /// Last form of the chain; experience just accumulates
    FinalTier { experience: u64 },
    /// Threshold not reached (or unknown)
    Accumulate { experience: u64 },
    /// Threshold reached but the next form is already in the deck
    Suppressed { experience: u64 },
    /// Replace the current entry with the next form
    Evolve {
        next: SpeciesId,
        name: String,
        carried: u64,
    },
}

impl ExperiencePlan {
    pub fn evolves(&self) -> bool {
        matches!(self, ExperiencePlan::Evolve { .. })
    }
}

pub fn plan_experience(current: u64, gained: u64, next_tier: Option<&NextTier>) -> ExperiencePlan {
    let total = current.saturating_add(gained);

    let Some(next) = next_tier else {
        return ExperiencePlan::FinalTier { experience: total };
    };

    match next.threshold {
        Some(threshold) if total >= threshold => {
            if next.already_owned {
                ExperiencePlan::Suppressed { experience: total }
            } else {
                ExperiencePlan::Evolve {
                    next: next.species,
                    name: next.name.clone(),
                    carried: total - threshold,
                }
            }
        }
        _ => ExperiencePlan::Accumulate { experience: total },
    }
}
