//! Event bus for game operations
//!
//! Services emit an event after each committed state change. Listeners use
//! it for audit logging and notifications; the store's change feed remains
//! the source of truth for subscriptions.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, trace};

use crate::model::{CaptureState, ChallengeId, SpeciesId, UserId};

#[derive(Debug, Clone, PartialEq)]
pub enum DuelEvent {
    ChallengeCreated {
        id: ChallengeId,
        challenger: UserId,
        recipient: UserId,
    },
    ChallengeAccepted {
        id: ChallengeId,
        recipient: UserId,
    },
    ChallengeCompleted {
        id: ChallengeId,
        recipient: UserId,
        challenger: UserId,
        points: i64,
        success: bool,
    },
    ProfileCreated {
        user_id: UserId,
    },
    CaptureAttempted {
        owner: UserId,
        species: SpeciesId,
        status: CaptureState,
    },
    CreatureEvolved {
        owner: UserId,
        from: SpeciesId,
        to: SpeciesId,
    },
    DeckExported {
        owner: UserId,
        species: Vec<SpeciesId>,
    },
    DeckImported {
        owner: UserId,
        species: Vec<SpeciesId>,
    },
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DuelEvent);
}

/// Broadcasts events to every subscriber
pub struct EventBus {
    sender: broadcast::Sender<DuelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: DuelEvent) {
        trace!(event = ?event, "Emitting event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DuelEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Audit trail through tracing
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &DuelEvent) {
        match event {
            DuelEvent::ChallengeCompleted {
                id,
                recipient,
                challenger,
                points,
                success,
            } => info!(
                challenge_id = %id,
                recipient = %recipient,
                challenger = %challenger,
                points,
                success,
                "Audit: challenge completed"
            ),
            DuelEvent::CreatureEvolved { owner, from, to } => {
                info!(owner = %owner, from = %from, to = %to, "Audit: creature evolved")
            }
            other => info!(event = ?other, "Audit"),
        }
    }
}

/// Spawn a task that feeds every event to `listener`
pub fn spawn_listener(
    bus: &EventBus,
    listener: Arc<dyn EventListener>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
