//! Challenge records and the per-recipient challenge document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::sequence::Sequence;
use super::user::UserId;
use crate::error::{DuelError, Result};
use crate::scoring::{self, PotentialPoints};

/// Collection holding one document per recipient
pub const CHALLENGE_COLLECTION: &str = "challenges";
/// Sole field of a challenge document
pub const CHALLENGES_FIELD: &str = "challenges";

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 10;
/// Applied to stored records that predate the difficulty field
pub const DEFAULT_DIFFICULTY: u8 = 5;

/// Stable identifier of a challenge within its recipient's document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChallengeId(Uuid);

impl ChallengeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Id for a record written without one (device firmware rewrites the
    /// list without ids). Derived from the record's position and content so
    /// every read of the same document yields the same ids.
    pub fn for_legacy_record(index: usize, challenger: &UserId, sequence: &Sequence) -> Self {
        let name = format!("{index}:{challenger}:{sequence}");
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }
}

impl Default for ChallengeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ChallengeId {
    type Err = DuelError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(ChallengeId)
            .map_err(|e| DuelError::Validation(format!("invalid challenge id {s:?}: {e}")))
    }
}

/// Difficulty level chosen by the challenger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Difficulty(u8);

impl Difficulty {
    pub fn new(value: u8) -> Result<Self> {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&value) {
            return Err(DuelError::InvalidDifficulty {
                difficulty: value,
                min: MIN_DIFFICULTY,
                max: MAX_DIFFICULTY,
            });
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self(DEFAULT_DIFFICULTY)
    }
}

/// Status string stored on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Accepted,
    Completed,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Accepted => "accepted",
            ChallengeStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a played challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub steps_completed: u32,
    pub total_steps: u32,
    /// Signed points applied to the recipient
    pub points_obtained: i64,
    /// Signed points applied to the challenger
    pub challenger_points_obtained: i64,
}

impl Outcome {
    pub fn success(&self) -> bool {
        self.steps_completed == self.total_steps
    }
}

/// Lifecycle state; outcome data only exists once completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Pending,
    Accepted,
    Completed(Outcome),
}

impl ChallengeState {
    pub fn status(&self) -> ChallengeStatus {
        match self {
            ChallengeState::Pending => ChallengeStatus::Pending,
            ChallengeState::Accepted => ChallengeStatus::Accepted,
            ChallengeState::Completed(_) => ChallengeStatus::Completed,
        }
    }
}

/// A duel addressed to one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ChallengeRecord", into = "ChallengeRecord")]
pub struct Challenge {
    pub id: ChallengeId,
    pub challenger: UserId,
    pub sequence: Sequence,
    pub difficulty: Difficulty,
    pub created_at: Option<DateTime<Utc>>,
    pub state: ChallengeState,
}

impl Challenge {
    /// New pending challenge; inputs must already be validated
    pub fn pending(challenger: UserId, sequence: Sequence, difficulty: Difficulty) -> Self {
        Self {
            id: ChallengeId::new(),
            challenger,
            sequence,
            difficulty,
            created_at: Some(Utc::now()),
            state: ChallengeState::Pending,
        }
    }

    pub fn status(&self) -> ChallengeStatus {
        self.state.status()
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence.len()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match &self.state {
            ChallengeState::Completed(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Shown to the recipient as waiting or in progress
    pub fn is_open(&self) -> bool {
        !matches!(self.state, ChallengeState::Completed(_))
    }

    pub fn potential_points(&self) -> PotentialPoints {
        scoring::potential_points(self.sequence_length(), self.difficulty.value())
    }

    /// `pending -> accepted`
    pub fn accept(&mut self) -> Result<()> {
        match self.state {
            ChallengeState::Pending => {
                self.state = ChallengeState::Accepted;
                Ok(())
            }
            other => Err(self.transition_error(other.status(), ChallengeStatus::Accepted)),
        }
    }

    /// `accepted -> completed`
    pub fn complete(&mut self, outcome: Outcome) -> Result<()> {
        match self.state {
            ChallengeState::Accepted => {
                self.state = ChallengeState::Completed(outcome);
                Ok(())
            }
            ChallengeState::Completed(_) => Err(DuelError::AlreadyCompleted {
                id: self.id.to_string(),
            }),
            ChallengeState::Pending => {
                Err(self.transition_error(ChallengeStatus::Pending, ChallengeStatus::Completed))
            }
        }
    }

    fn transition_error(&self, from: ChallengeStatus, to: ChallengeStatus) -> DuelError {
        DuelError::InvalidTransition {
            id: self.id.to_string(),
            from: from.as_str(),
            to: to.as_str(),
        }
    }
}

/// Flat record layout shared with the device firmware
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<ChallengeId>,
    challenger: UserId,
    sequence: Sequence,
    status: ChallengeStatus,
    #[serde(default = "default_difficulty")]
    difficulty: u8,
    #[serde(default)]
    points_obtained: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    steps_completed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    challenger_points_obtained: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

fn default_difficulty() -> u8 {
    DEFAULT_DIFFICULTY
}

impl TryFrom<ChallengeRecord> for Challenge {
    type Error = DuelError;

    fn try_from(record: ChallengeRecord) -> Result<Self> {
        record.into_challenge(0)
    }
}

impl ChallengeRecord {
    /// `index` is the record's position in its document, used only when the
    /// record carries no id
    fn into_challenge(self, index: usize) -> Result<Challenge> {
        let id = self.id.unwrap_or_else(|| {
            ChallengeId::for_legacy_record(index, &self.challenger, &self.sequence)
        });
        let state = match self.status {
            ChallengeStatus::Pending => ChallengeState::Pending,
            ChallengeStatus::Accepted => ChallengeState::Accepted,
            ChallengeStatus::Completed => {
                let steps_completed = self.steps_completed.ok_or_else(|| {
                    DuelError::DataIntegrity(format!(
                        "completed challenge {id} has no stepsCompleted"
                    ))
                })?;
                ChallengeState::Completed(Outcome {
                    steps_completed,
                    total_steps: self.total_steps.unwrap_or(self.sequence.len() as u32),
                    points_obtained: self.points_obtained,
                    challenger_points_obtained: self
                        .challenger_points_obtained
                        .unwrap_or(-self.points_obtained),
                })
            }
        };

        Ok(Challenge {
            id,
            challenger: self.challenger,
            sequence: self.sequence,
            // Stored values are trusted; bounds apply on create
            difficulty: Difficulty(self.difficulty),
            created_at: self.created_at,
            state,
        })
    }
}

impl From<Challenge> for ChallengeRecord {
    fn from(challenge: Challenge) -> Self {
        let status = challenge.status();
        let outcome = challenge.outcome().copied();
        ChallengeRecord {
            id: Some(challenge.id),
            challenger: challenge.challenger,
            sequence: challenge.sequence,
            status,
            difficulty: challenge.difficulty.value(),
            points_obtained: outcome.map(|o| o.points_obtained).unwrap_or(0),
            steps_completed: outcome.map(|o| o.steps_completed),
            total_steps: outcome.map(|o| o.total_steps),
            challenger_points_obtained: outcome.map(|o| o.challenger_points_obtained),
            created_at: challenge.created_at,
        }
    }
}

/// All challenges addressed to one recipient, in insertion order.
///
/// Records without an id get a positional one on read; the next versioned
/// write of the document persists it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DocumentRecord")]
pub struct ChallengeDocument {
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

#[derive(Deserialize)]
struct DocumentRecord {
    #[serde(default)]
    challenges: Vec<ChallengeRecord>,
}

impl TryFrom<DocumentRecord> for ChallengeDocument {
    type Error = DuelError;

    fn try_from(record: DocumentRecord) -> Result<Self> {
        let challenges = record
            .challenges
            .into_iter()
            .enumerate()
            .map(|(index, challenge)| challenge.into_challenge(index))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { challenges })
    }
}

impl ChallengeDocument {
    pub fn position(&self, id: ChallengeId) -> Option<usize> {
        self.challenges.iter().position(|c| c.id == id)
    }

    pub fn get(&self, id: ChallengeId) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: ChallengeId) -> Option<&mut Challenge> {
        self.challenges.iter_mut().find(|c| c.id == id)
    }

    /// Pending and accepted challenges
    pub fn open(&self) -> Vec<Challenge> {
        filter_open(&self.challenges)
    }

    pub fn completed(&self) -> Vec<Challenge> {
        filter_completed(&self.challenges)
    }

    pub fn with_status(&self, status: ChallengeStatus) -> Vec<&Challenge> {
        self.challenges
            .iter()
            .filter(|c| c.status() == status)
            .collect()
    }
}

/// Challenges still visible as waiting or in progress
pub fn filter_open(challenges: &[Challenge]) -> Vec<Challenge> {
    challenges.iter().filter(|c| c.is_open()).cloned().collect()
}

pub fn filter_completed(challenges: &[Challenge]) -> Vec<Challenge> {
    challenges
        .iter()
        .filter(|c| c.status() == ChallengeStatus::Completed)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Challenge {
        Challenge::pending(
            UserId::from("alice"),
            "1231231".parse().unwrap(),
            Difficulty::new(3).unwrap(),
        )
    }

    #[test]
    fn test_difficulty_bounds() {
        assert!(Difficulty::new(0).is_err());
        assert!(Difficulty::new(11).is_err());
        assert_eq!(Difficulty::new(10).unwrap().value(), 10);
        assert_eq!(Difficulty::default().value(), DEFAULT_DIFFICULTY);
    }

    #[test]
    fn test_forward_transitions() {
        let mut c = sample();
        assert_eq!(c.status(), ChallengeStatus::Pending);

        let outcome = Outcome {
            steps_completed: 7,
            total_steps: 7,
            points_obtained: 10,
            challenger_points_obtained: -10,
        };
        assert!(matches!(
            c.complete(outcome),
            Err(DuelError::InvalidTransition { from: "pending", .. })
        ));

        c.accept().unwrap();
        assert!(c.accept().is_err());

        c.complete(outcome).unwrap();
        assert!(c.outcome().unwrap().success());
        assert!(matches!(c.complete(outcome), Err(DuelError::AlreadyCompleted { .. })));
        assert!(c.accept().is_err());
    }

    #[test]
    fn test_wire_layout() {
        let mut c = sample();
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["sequence"], "1231231");
        assert_eq!(json["pointsObtained"], 0);
        assert!(json.get("stepsCompleted").is_none());

        c.accept().unwrap();
        c.complete(Outcome {
            steps_completed: 3,
            total_steps: 7,
            points_obtained: -20,
            challenger_points_obtained: 20,
        })
        .unwrap();
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["stepsCompleted"], 3);
        assert_eq!(json["challengerPointsObtained"], 20);

        let back: Challenge = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_completed_record_requires_steps() {
        let raw = json!({
            "id": ChallengeId::new(),
            "challenger": "alice",
            "sequence": "11111",
            "status": "completed",
            "difficulty": 2,
            "pointsObtained": 4
        });
        let err = serde_json::from_value::<Challenge>(raw).unwrap_err();
        assert!(err.to_string().contains("stepsCompleted"));
    }

    #[test]
    fn test_missing_difficulty_defaults() {
        let raw = json!({
            "id": ChallengeId::new(),
            "challenger": "alice",
            "sequence": "11111",
            "status": "pending"
        });
        let c: Challenge = serde_json::from_value(raw).unwrap();
        assert_eq!(c.difficulty.value(), DEFAULT_DIFFICULTY);
        assert_eq!(c.created_at, None);
    }

    #[test]
    fn test_device_written_records_get_stable_ids() {
        let raw = json!({
            "challenges": [
                {
                    "challenger": "alice",
                    "sequence": "11111",
                    "status": "completed",
                    "pointsObtained": 5,
                    "stepsCompleted": 5,
                    "totalSteps": 5
                },
                { "challenger": "alice", "sequence": "11111", "status": "pending" },
                { "challenger": "alice", "sequence": "11111", "status": "pending" }
            ]
        });

        let doc: ChallengeDocument = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(doc.challenges.len(), 3);
        assert_eq!(doc.completed()[0].outcome().unwrap().steps_completed, 5);
        assert_ne!(doc.challenges[1].id, doc.challenges[2].id);

        let again: ChallengeDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(again, doc);

        // Once written back, the ids are part of the record
        let written = serde_json::to_value(&doc).unwrap();
        assert_eq!(written["challenges"][1]["id"], json!(doc.challenges[1].id));
        let reread: ChallengeDocument = serde_json::from_value(written).unwrap();
        assert_eq!(reread, doc);
    }

    #[test]
    fn test_document_views() {
        let mut doc = ChallengeDocument::default();
        let mut accepted = sample();
        accepted.accept().unwrap();
        let mut done = sample();
        done.accept().unwrap();
        done.complete(Outcome {
            steps_completed: 0,
            total_steps: 7,
            points_obtained: -5,
            challenger_points_obtained: 5,
        })
        .unwrap();
        doc.challenges = vec![sample(), accepted.clone(), done.clone()];

        assert_eq!(doc.open().len(), 2);
        assert_eq!(doc.completed(), vec![done.clone()]);
        assert_eq!(doc.with_status(ChallengeStatus::Accepted).len(), 1);
        assert_eq!(doc.position(done.id), Some(2));
        assert!(doc.get(ChallengeId::new()).is_none());
    }
}
