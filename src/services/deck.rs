//! Creature collection: capture and evolution
//!
//! Evolution replaces the current entry with the next form in one atomic
//! batch (create the new entry if absent, delete the old one if unchanged),
//! so an owner never holds both forms, or neither, mid-transition.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::{DuelEvent, EventBus};
use crate::catalog::SpeciesCatalog;
use crate::error::{DuelError, Result};
use crate::model::deck::owner_species_key;
use crate::model::{
    CaptureState, CaptureStatus, DeckEntry, SpeciesId, UserId, CAPTURE_COLLECTION,
    DECK_COLLECTION,
};
use crate::progression::{plan_experience, ExperiencePlan, NextTier};
use crate::store::{
    to_document, watch_query, with_retries, DocumentStore, Precondition, Query, Snapshot,
    Subscription, WriteBatch,
};

const OWNER_FIELD: &str = "ownerId";

/// Result of [`DeckService::add_experience`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperienceOutcome {
    pub plan: ExperiencePlan,
    /// The entry as stored after the update (the evolved form on evolution)
    pub entry: DeckEntry,
}

/// Result of [`DeckService::attempt_capture`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureOutcome {
    pub status: CaptureStatus,
    /// False when the creature was already captured or had fled
    pub recorded: bool,
    pub entry_created: bool,
}

/// Result of [`DeckService::import_entries`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    /// Entries as stored under the importing owner
    pub imported: Vec<DeckEntry>,
    /// Species the owner already held (or listed twice); left untouched
    pub skipped: Vec<SpeciesId>,
}

pub struct DeckService {
    store: Arc<dyn DocumentStore>,
    catalog: Arc<dyn SpeciesCatalog>,
    events: Arc<EventBus>,
    transaction_attempts: u32,
}

impl DeckService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        catalog: Arc<dyn SpeciesCatalog>,
        events: Arc<EventBus>,
        transaction_attempts: u32,
    ) -> Self {
        Self {
            store,
            catalog,
            events,
            transaction_attempts,
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub async fn deck(&self, owner: &UserId) -> Result<Vec<DeckEntry>> {
        let docs = self
            .store
            .query_eq(DECK_COLLECTION, OWNER_FIELD, &json!(owner.as_str()))
            .await?;
        docs.iter().map(|doc| doc.decode()).collect()
    }

    pub async fn entry(&self, owner: &UserId, species: SpeciesId) -> Result<Option<DeckEntry>> {
        Ok(self.versioned_entry(owner, species).await?.map(|(_, e)| e))
    }

    async fn versioned_entry(
        &self,
        owner: &UserId,
        species: SpeciesId,
    ) -> Result<Option<(u64, DeckEntry)>> {
        let key = owner_species_key(owner, species);
        match self.store.get_document(DECK_COLLECTION, &key).await? {
            Some(snapshot) => Ok(Some((snapshot.version, snapshot.decode()?))),
            None => Ok(None),
        }
    }

    async fn capture_status(
        &self,
        owner: &UserId,
        species: SpeciesId,
    ) -> Result<Option<(u64, CaptureStatus)>> {
        let key = owner_species_key(owner, species);
        match self.store.get_document(CAPTURE_COLLECTION, &key).await? {
            Some(snapshot) => Ok(Some((snapshot.version, snapshot.decode()?))),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Add experience to an owned creature, evolving it when it reaches the
    /// next form's threshold
    pub async fn add_experience(
        &self,
        owner: &UserId,
        species: SpeciesId,
        gained: u64,
    ) -> Result<ExperienceOutcome> {
        let outcome = with_retries(self.transaction_attempts, "add_experience", || async move {
            self.add_experience_once(owner, species, gained).await
        })
        .await?;

        if let ExperiencePlan::Evolve { next, .. } = &outcome.plan {
            info!(owner = %owner, from = %species, to = %next, carried = outcome.entry.experience, "Creature evolved");
            self.events.emit(DuelEvent::CreatureEvolved {
                owner: owner.clone(),
                from: species,
                to: *next,
            });
        } else {
            debug!(owner = %owner, species = %species, plan = ?outcome.plan, "Experience added");
        }
        Ok(outcome)
    }

    async fn add_experience_once(
        &self,
        owner: &UserId,
        species: SpeciesId,
        gained: u64,
    ) -> Result<ExperienceOutcome> {
        let (version, mut entry) = self
            .versioned_entry(owner, species)
            .await?
            .ok_or_else(|| DuelError::NotFound(format!("deck entry {}", owner_species_key(owner, species))))?;

        let next_tier = match self.catalog.evolution(species).await? {
            Some(evolution) => Some(NextTier {
                already_owned: self.versioned_entry(owner, evolution.species).await?.is_some(),
                species: evolution.species,
                name: evolution.name,
                threshold: evolution.threshold,
            }),
            None => None,
        };

        let plan = plan_experience(entry.experience, gained, next_tier.as_ref());
        let batch = match &plan {
            ExperiencePlan::FinalTier { experience }
            | ExperiencePlan::Accumulate { experience }
            | ExperiencePlan::Suppressed { experience } => {
                if matches!(plan, ExperiencePlan::Suppressed { .. }) {
                    warn!(owner = %owner, species = %species, "Evolution suppressed, next form already owned");
                }
                entry.experience = *experience;
                WriteBatch::new().set(
                    DECK_COLLECTION,
                    &entry.id,
                    to_document(&entry)?,
                    Precondition::Version(version),
                )
            }
            ExperiencePlan::Evolve {
                next,
                name,
                carried,
            } => {
                let old_id = entry.id.clone();
                let mut evolved = DeckEntry::new(owner.clone(), *next, name.clone());
                evolved.experience = *carried;
                evolved.captured_at = entry.captured_at;
                let batch = WriteBatch::new()
                    .set(
                        DECK_COLLECTION,
                        &evolved.id,
                        to_document(&evolved)?,
                        Precondition::Missing,
                    )
                    .delete(DECK_COLLECTION, &old_id, Precondition::Version(version));
                entry = evolved;
                batch
            }
        };

        self.store.commit(batch).await?;
        Ok(ExperienceOutcome { plan, entry })
    }

    /// Record one capture attempt for a wild creature. The caller rolls the
    /// dice; attempts after capture or flight, or on a species already in the
    /// deck, change nothing.
    pub async fn attempt_capture(
        &self,
        owner: &UserId,
        species: SpeciesId,
        succeeded: bool,
    ) -> Result<CaptureOutcome> {
        let known = self
            .catalog
            .species(species)
            .await?
            .ok_or_else(|| DuelError::NotFound(format!("species {species}")))?;

        let outcome = with_retries(self.transaction_attempts, "attempt_capture", || {
            let name = known.name.clone();
            async move {
                let (version, mut status) = match self.capture_status(owner, species).await? {
                    Some((v, s)) => (Some(v), s),
                    None => (None, CaptureStatus::new(owner.clone(), species)),
                };
                // Already collected, directly or through evolution
                if status.is_settled() || self.versioned_entry(owner, species).await?.is_some() {
                    return Ok(CaptureOutcome {
                        status,
                        recorded: false,
                        entry_created: false,
                    });
                }

                let state = status.record(succeeded);
                let precondition = version.map_or(Precondition::Missing, Precondition::Version);
                let mut batch = WriteBatch::new().set(
                    CAPTURE_COLLECTION,
                    &status.id,
                    to_document(&status)?,
                    precondition,
                );

                let entry_created = state == CaptureState::Captured;
                if entry_created {
                    let entry = DeckEntry::new(owner.clone(), species, name);
                    batch = batch.set(
                        DECK_COLLECTION,
                        &entry.id,
                        to_document(&entry)?,
                        Precondition::Missing,
                    );
                }

                self.store.commit(batch).await?;
                Ok::<_, DuelError>(CaptureOutcome {
                    status,
                    recorded: true,
                    entry_created,
                })
            }
        })
        .await?;

        if outcome.recorded {
            info!(
                owner = %owner,
                species = %species,
                attempts = outcome.status.attempts,
                status = ?outcome.status.status,
                "Capture attempt recorded"
            );
            self.events.emit(DuelEvent::CaptureAttempted {
                owner: owner.clone(),
                species,
                status: outcome.status.status,
            });
        } else {
            debug!(owner = %owner, species = %species, "Capture already settled");
        }
        Ok(outcome)
    }

    // =========================================================================
    // Exchange
    // =========================================================================

    /// Remove the selected creatures from the owner's deck and hand them
    /// back for transfer. Either every entry is removed or none is.
    pub async fn export_entries(
        &self,
        owner: &UserId,
        species: &[SpeciesId],
    ) -> Result<Vec<DeckEntry>> {
        let mut selected = species.to_vec();
        selected.sort();
        selected.dedup();
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        let entries = with_retries(self.transaction_attempts, "export_entries", || {
            let selected = &selected;
            async move {
                let mut batch = WriteBatch::new();
                let mut entries = Vec::with_capacity(selected.len());
                for &species in selected {
                    let key = owner_species_key(owner, species);
                    let (version, entry) = self
                        .versioned_entry(owner, species)
                        .await?
                        .ok_or_else(|| DuelError::NotFound(format!("deck entry {key}")))?;
                    batch = batch.delete(DECK_COLLECTION, &entry.id, Precondition::Version(version));
                    entries.push(entry);
                }
                self.store.commit(batch).await?;
                Ok::<_, DuelError>(entries)
            }
        })
        .await?;

        info!(owner = %owner, count = entries.len(), "Deck entries exported");
        self.events.emit(DuelEvent::DeckExported {
            owner: owner.clone(),
            species: entries.iter().map(|e| e.species_id).collect(),
        });
        Ok(entries)
    }

    /// Add exported creatures to the owner's deck. Entries are re-keyed to
    /// the owner; species already held are skipped so the deck keeps one
    /// entry per species.
    pub async fn import_entries(
        &self,
        owner: &UserId,
        entries: Vec<DeckEntry>,
    ) -> Result<ImportOutcome> {
        for entry in &entries {
            if self.catalog.species(entry.species_id).await?.is_none() {
                return Err(DuelError::NotFound(format!("species {}", entry.species_id)));
            }
        }

        let outcome = with_retries(self.transaction_attempts, "import_entries", || {
            let entries = &entries;
            async move {
                let mut batch = WriteBatch::new();
                let mut imported: Vec<DeckEntry> = Vec::new();
                let mut skipped = Vec::new();
                for entry in entries {
                    let species = entry.species_id;
                    if imported.iter().any(|e| e.species_id == species)
                        || self.versioned_entry(owner, species).await?.is_some()
                    {
                        skipped.push(species);
                        continue;
                    }
                    let rekeyed = DeckEntry {
                        id: owner_species_key(owner, species),
                        owner_id: owner.clone(),
                        ..entry.clone()
                    };
                    batch = batch.set(
                        DECK_COLLECTION,
                        &rekeyed.id,
                        to_document(&rekeyed)?,
                        Precondition::Missing,
                    );
                    imported.push(rekeyed);
                }
                self.store.commit(batch).await?;
                Ok::<_, DuelError>(ImportOutcome { imported, skipped })
            }
        })
        .await?;

        if !outcome.skipped.is_empty() {
            warn!(owner = %owner, skipped = ?outcome.skipped, "Import skipped species already in the deck");
        }
        info!(owner = %owner, count = outcome.imported.len(), "Deck entries imported");
        self.events.emit(DuelEvent::DeckImported {
            owner: owner.clone(),
            species: outcome.imported.iter().map(|e| e.species_id).collect(),
        });
        Ok(outcome)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub fn subscribe<F>(&self, owner: &UserId, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<DeckEntry>) + Send + 'static,
    {
        let query = Query::Eq {
            field: OWNER_FIELD.to_string(),
            value: json!(owner.as_str()),
        };
        watch_query(
            self.store.clone(),
            DECK_COLLECTION,
            query,
            move |docs: Vec<Snapshot>| {
                match docs.iter().map(|doc| doc.decode()).collect::<Result<Vec<DeckEntry>>>() {
                    Ok(entries) => callback(entries),
                    Err(e) => tracing::error!(error = %e, "Undecodable deck entry"),
                }
            },
        )
    }
}
