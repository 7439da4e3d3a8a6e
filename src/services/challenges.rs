//! Challenge lifecycle
//!
//! A challenge moves `pending -> accepted -> completed` inside the
//! recipient's challenge document. Every read-modify-write of that document
//! is an optimistic transaction: read with its version, compute, commit with
//! a version precondition, and start over on conflict.
//!
//! Completion settles the duel: the updated challenge list and both players'
//! point totals are committed in one batch, so the transfer is zero-sum and
//! never half-applied.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::events::{DuelEvent, EventBus};
use crate::auth::Session;
use crate::error::{DuelError, Result};
use crate::model::challenge::{filter_completed, filter_open};
use crate::model::{
    Challenge, ChallengeDocument, ChallengeId, ChallengeStatus, Difficulty, Outcome, Sequence,
    UserId, UserProfile, CHALLENGE_COLLECTION, USER_COLLECTION,
};
use crate::scoring::{self, DuelStakes, PotentialPoints};
use crate::store::{
    to_document, watch_document, with_retries, DocumentStore, Precondition, Subscription,
    WriteBatch,
};

/// Display name used when the challenger's profile cannot be found
pub const UNKNOWN_PLAYER: &str = "Unknown";

/// Outcome reported by the device after a challenge is played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceReport {
    pub steps_completed: u32,
    pub total_steps: u32,
}

/// Settlement applied by [`ChallengeService::complete`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReceipt {
    pub challenge_id: ChallengeId,
    pub points: i64,
    pub challenger_points: i64,
    pub success: bool,
    pub ratio: f64,
    /// Totals after the transfer
    pub recipient_total: i64,
    pub challenger_total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResult {
    pub steps_completed: u32,
    pub total_steps: u32,
    pub success: bool,
    pub challenger_points: i64,
}

/// Challenge decorated for display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedChallenge {
    /// Position within the filtered list it was taken from
    pub index: usize,
    #[serde(flatten)]
    pub challenge: Challenge,
    pub challenger_pseudo: String,
    pub challenger_name: String,
    pub sequence_length: usize,
    pub potential_points: DuelStakes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ChallengeResult>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChallengeSettings {
    pub transaction_attempts: u32,
    pub device_queue_size: usize,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            transaction_attempts: 5,
            device_queue_size: 5,
        }
    }
}

pub struct ChallengeService {
    store: Arc<dyn DocumentStore>,
    events: Arc<EventBus>,
    settings: ChallengeSettings,
}

impl ChallengeService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        events: Arc<EventBus>,
        settings: ChallengeSettings,
    ) -> Self {
        Self {
            store,
            events,
            settings,
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Current document and its version (`None` when it does not exist yet)
    async fn load(&self, recipient: &UserId) -> Result<(Option<u64>, ChallengeDocument)> {
        match self
            .store
            .get_document(CHALLENGE_COLLECTION, recipient.as_str())
            .await?
        {
            Some(snapshot) => Ok((Some(snapshot.version), snapshot.decode()?)),
            None => Ok((None, ChallengeDocument::default())),
        }
    }

    async fn profile(&self, user: &UserId) -> Result<Option<(u64, UserProfile)>> {
        match self.store.get_document(USER_COLLECTION, user.as_str()).await? {
            Some(snapshot) => Ok(Some((snapshot.version, snapshot.decode()?))),
            None => Ok(None),
        }
    }

    /// Every challenge addressed to `user`, in insertion order
    pub async fn challenges(&self, user: &UserId) -> Result<Vec<Challenge>> {
        let (_, doc) = self.load(user).await?;
        debug!(user = %user, count = doc.challenges.len(), "Loaded challenges");
        Ok(doc.challenges)
    }

    /// Pending and accepted challenges
    pub async fn pending(&self, user: &UserId) -> Result<Vec<Challenge>> {
        Ok(self.load(user).await?.1.open())
    }

    pub async fn completed(&self, user: &UserId) -> Result<Vec<Challenge>> {
        Ok(self.load(user).await?.1.completed())
    }

    /// Accepted challenges the device may play next, oldest first
    pub async fn device_queue(&self, user: &UserId) -> Result<Vec<Challenge>> {
        let (_, doc) = self.load(user).await?;
        Ok(doc
            .with_status(ChallengeStatus::Accepted)
            .into_iter()
            .take(self.settings.device_queue_size)
            .cloned()
            .collect())
    }

    pub async fn enriched_pending(&self, user: &UserId) -> Result<Vec<EnrichedChallenge>> {
        let challenges = self.pending(user).await?;
        self.enrich(challenges).await
    }

    pub async fn enriched_completed(&self, user: &UserId) -> Result<Vec<EnrichedChallenge>> {
        let challenges = self.completed(user).await?;
        self.enrich(challenges).await
    }

    async fn enrich(&self, challenges: Vec<Challenge>) -> Result<Vec<EnrichedChallenge>> {
        let mut profiles: HashMap<UserId, Option<UserProfile>> = HashMap::new();
        let mut enriched = Vec::with_capacity(challenges.len());

        for (index, challenge) in challenges.into_iter().enumerate() {
            if !profiles.contains_key(&challenge.challenger) {
                let profile = self.profile(&challenge.challenger).await?.map(|(_, p)| p);
                profiles.insert(challenge.challenger.clone(), profile);
            }
            let challenger = profiles.get(&challenge.challenger).and_then(|p| p.as_ref());

            let challenger_pseudo = challenger
                .map(|p| p.pseudonyme.clone())
                .filter(|pseudo| !pseudo.is_empty())
                .unwrap_or_else(|| UNKNOWN_PLAYER.to_string());
            let challenger_name = challenger
                .map(|p| format!("{} {}", p.first_name, p.last_name))
                .unwrap_or_else(|| UNKNOWN_PLAYER.to_string());

            let result = challenge.outcome().map(|outcome| ChallengeResult {
                steps_completed: outcome.steps_completed,
                total_steps: outcome.total_steps,
                success: outcome.success(),
                challenger_points: outcome.challenger_points_obtained,
            });

            enriched.push(EnrichedChallenge {
                index,
                challenger_pseudo,
                challenger_name,
                sequence_length: challenge.sequence_length(),
                potential_points: challenge.potential_points().for_both_sides(),
                result,
                challenge,
            });
        }

        Ok(enriched)
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Stakes shown while a challenge is being built
    pub fn preview(&self, sequence_length: usize, difficulty: u8) -> Result<PotentialPoints> {
        let difficulty = Difficulty::new(difficulty)?;
        Ok(scoring::potential_points(sequence_length, difficulty.value()))
    }

    /// Send a new pending challenge from the session's user to `target`
    pub async fn create(
        &self,
        session: &Session,
        target: &UserId,
        sequence: &str,
        difficulty: u8,
    ) -> Result<Challenge> {
        let sequence: Sequence = sequence.parse()?;
        sequence.validate_length()?;
        let difficulty = Difficulty::new(difficulty)?;
        if *target == session.user_id {
            return Err(DuelError::SelfChallenge);
        }
        if self.profile(target).await?.is_none() {
            return Err(DuelError::NotFound(format!("user {target}")));
        }

        let challenge = Challenge::pending(session.user_id.clone(), sequence, difficulty);

        with_retries(self.settings.transaction_attempts, "create_challenge", || {
            let challenge = challenge.clone();
            async move {
                let (version, mut doc) = self.load(target).await?;
                doc.challenges.push(challenge);
                self.commit_document(target, version, &doc).await
            }
        })
        .await?;

        info!(
            challenge_id = %challenge.id,
            challenger = %challenge.challenger,
            recipient = %target,
            length = challenge.sequence_length(),
            difficulty = challenge.difficulty.value(),
            "Challenge created"
        );
        self.events.emit(DuelEvent::ChallengeCreated {
            id: challenge.id,
            challenger: challenge.challenger.clone(),
            recipient: target.clone(),
        });
        Ok(challenge)
    }

    /// Move a pending challenge to accepted.
    ///
    /// Returns `false` when the id is unknown or the challenge is no longer
    /// pending; nothing is written in that case.
    pub async fn accept(&self, session: &Session, id: ChallengeId) -> Result<bool> {
        let recipient = &session.user_id;
        let accepted = with_retries(self.settings.transaction_attempts, "accept_challenge", || async move {
            let (version, mut doc) = self.load(recipient).await?;
            self.accept_in(recipient, version, &mut doc, id)
                .await
                .map(|accepted| accepted.is_some())
        })
        .await?;

        if accepted {
            self.events.emit(DuelEvent::ChallengeAccepted {
                id,
                recipient: recipient.clone(),
            });
        }
        Ok(accepted)
    }

    /// Accept the `index`-th pending challenge, for callers that address
    /// challenges by their position in the pending list.
    ///
    /// The index is resolved against the document read inside the
    /// transaction; an index that no longer points at a pending challenge
    /// yields `false`.
    pub async fn accept_pending_at(&self, session: &Session, index: usize) -> Result<bool> {
        let recipient = &session.user_id;
        let accepted = with_retries(self.settings.transaction_attempts, "accept_pending_at", || async move {
            let (version, mut doc) = self.load(recipient).await?;
            let pending = doc.with_status(ChallengeStatus::Pending);
            let Some(target) = pending.get(index) else {
                debug!(user = %recipient, index, pending = pending.len(), "Pending index out of range");
                return Ok(None);
            };
            let Some(id) = doc
                .challenges
                .iter()
                .find(|c| {
                    c.challenger == target.challenger
                        && c.sequence == target.sequence
                        && c.status() == ChallengeStatus::Pending
                })
                .map(|c| c.id)
            else {
                return Ok(None);
            };
            self.accept_in(recipient, version, &mut doc, id).await
        })
        .await?;

        match accepted {
            Some(id) => {
                self.events.emit(DuelEvent::ChallengeAccepted {
                    id,
                    recipient: recipient.clone(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn accept_in(
        &self,
        recipient: &UserId,
        version: Option<u64>,
        doc: &mut ChallengeDocument,
        id: ChallengeId,
    ) -> Result<Option<ChallengeId>> {
        let Some(challenge) = doc.get_mut(id) else {
            debug!(user = %recipient, challenge_id = %id, "Accept for unknown challenge");
            return Ok(None);
        };
        if challenge.accept().is_err() {
            debug!(
                user = %recipient,
                challenge_id = %id,
                status = %challenge.status(),
                "Accept for challenge that is no longer pending"
            );
            return Ok(None);
        }

        self.commit_document(recipient, version, doc).await?;
        info!(user = %recipient, challenge_id = %id, "Challenge accepted");
        Ok(Some(id))
    }

    /// Settle an accepted challenge with the device's report.
    ///
    /// The challenge list and both players' totals are written in one
    /// versioned batch. A challenge is scored at most once.
    pub async fn complete(
        &self,
        recipient: &UserId,
        id: ChallengeId,
        report: DeviceReport,
    ) -> Result<CompletionReceipt> {
        let receipt = with_retries(self.settings.transaction_attempts, "complete_challenge", || async move {
            self.complete_once(recipient, id, report).await
        })
        .await?;

        info!(
            challenge_id = %id,
            recipient = %recipient,
            steps = report.steps_completed,
            total = report.total_steps,
            points = receipt.points,
            success = receipt.success,
            "Challenge completed"
        );
        Ok(receipt)
    }

    async fn complete_once(
        &self,
        recipient: &UserId,
        id: ChallengeId,
        report: DeviceReport,
    ) -> Result<CompletionReceipt> {
        let (Some(version), mut doc) = self.load(recipient).await? else {
            return Err(DuelError::NotFound(format!("challenges of {recipient}")));
        };
        let challenge = doc
            .get_mut(id)
            .ok_or_else(|| DuelError::NotFound(format!("challenge {id}")))?;

        match challenge.status() {
            ChallengeStatus::Accepted => {}
            ChallengeStatus::Completed => {
                error!(challenge_id = %id, recipient = %recipient, "Challenge reported twice; keeping first result");
                return Err(DuelError::AlreadyCompleted { id: id.to_string() });
            }
            ChallengeStatus::Pending => {
                return Err(DuelError::InvalidTransition {
                    id: id.to_string(),
                    from: ChallengeStatus::Pending.as_str(),
                    to: ChallengeStatus::Completed.as_str(),
                });
            }
        }

        let length = challenge.sequence_length();
        if report.total_steps as usize != length {
            error!(
                challenge_id = %id,
                total_steps = report.total_steps,
                sequence_length = length,
                "Device report does not match the sequence"
            );
            return Err(DuelError::DataIntegrity(format!(
                "challenge {id}: device reported {} steps for a sequence of {length}",
                report.total_steps
            )));
        }
        if report.steps_completed > report.total_steps {
            return Err(DuelError::Validation(format!(
                "steps completed ({}) exceed total steps ({})",
                report.steps_completed, report.total_steps
            )));
        }

        let settled = scoring::final_points(
            length,
            challenge.difficulty.value(),
            report.steps_completed,
            report.total_steps,
        );
        let challenger_id = challenge.challenger.clone();
        if challenger_id == *recipient {
            return Err(DuelError::DataIntegrity(format!(
                "challenge {id} is addressed to its own challenger"
            )));
        }
        challenge.complete(Outcome {
            steps_completed: report.steps_completed,
            total_steps: report.total_steps,
            points_obtained: settled.points,
            challenger_points_obtained: settled.challenger_points,
        })?;

        // Both players must exist before any point moves
        let (recipient_version, mut recipient_profile) = self
            .profile(recipient)
            .await?
            .ok_or_else(|| DuelError::NotFound(format!("user {recipient}")))?;
        let (challenger_version, mut challenger_profile) = self
            .profile(&challenger_id)
            .await?
            .ok_or_else(|| DuelError::NotFound(format!("user {challenger_id}")))?;

        recipient_profile.points += settled.points;
        recipient_profile.win_streak = if settled.success {
            recipient_profile.win_streak.saturating_add(1)
        } else {
            0
        };
        challenger_profile.points += settled.challenger_points;

        let batch = WriteBatch::new()
            .set(
                CHALLENGE_COLLECTION,
                recipient.as_str(),
                to_document(&doc)?,
                Precondition::Version(version),
            )
            .set(
                USER_COLLECTION,
                recipient.as_str(),
                to_document(&recipient_profile)?,
                Precondition::Version(recipient_version),
            )
            .set(
                USER_COLLECTION,
                challenger_id.as_str(),
                to_document(&challenger_profile)?,
                Precondition::Version(challenger_version),
            );
        self.store.commit(batch).await?;

        self.events.emit(DuelEvent::ChallengeCompleted {
            id,
            recipient: recipient.clone(),
            challenger: challenger_id,
            points: settled.points,
            success: settled.success,
        });

        Ok(CompletionReceipt {
            challenge_id: id,
            points: settled.points,
            challenger_points: settled.challenger_points,
            success: settled.success,
            ratio: settled.ratio,
            recipient_total: recipient_profile.points,
            challenger_total: challenger_profile.points,
        })
    }

    async fn commit_document(
        &self,
        recipient: &UserId,
        version: Option<u64>,
        doc: &ChallengeDocument,
    ) -> Result<()> {
        let precondition = match version {
            Some(v) => Precondition::Version(v),
            None => Precondition::Missing,
        };
        let batch = WriteBatch::new().set(
            CHALLENGE_COLLECTION,
            recipient.as_str(),
            to_document(doc)?,
            precondition,
        );
        self.store.commit(batch).await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Push the full challenge list on every change
    pub fn subscribe<F>(&self, user: &UserId, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Challenge>) + Send + 'static,
    {
        let user_id = user.clone();
        watch_document(
            self.store.clone(),
            CHALLENGE_COLLECTION,
            user.as_str(),
            move |snapshot| {
                let challenges = match snapshot {
                    None => Vec::new(),
                    Some(snapshot) => match snapshot.decode::<ChallengeDocument>() {
                        Ok(doc) => doc.challenges,
                        Err(e) => {
                            error!(user = %user_id, error = %e, "Undecodable challenge document");
                            return;
                        }
                    },
                };
                callback(challenges);
            },
        )
    }

    /// Pending and accepted challenges, re-derived from each snapshot
    pub fn subscribe_pending<F>(&self, user: &UserId, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Challenge>) + Send + 'static,
    {
        self.subscribe(user, move |all| callback(filter_open(&all)))
    }

    pub fn subscribe_completed<F>(&self, user: &UserId, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<Challenge>) + Send + 'static,
    {
        self.subscribe(user, move |all| callback(filter_completed(&all)))
    }
}
