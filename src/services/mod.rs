//! Service layer for led-duel
//!
//! Services hold the game rules between callers (CLI, device bridge, app
//! backend) and the document store. Each one validates input, runs its
//! read-modify-write as an optimistic transaction, and emits an event once
//! the write is committed.
//!
//! ```text
//! Callers (CLI, device bridge)
//!     ↓
//! Service Layer (rules, transactions)
//!     ↓
//! DocumentStore (memory | sled)
//! ```

pub mod challenges;
pub mod deck;
pub mod events;
pub mod users;

pub use challenges::{
    ChallengeService, ChallengeSettings, CompletionReceipt, DeviceReport, EnrichedChallenge,
    UNKNOWN_PLAYER,
};
pub use deck::{CaptureOutcome, DeckService, ExperienceOutcome, ImportOutcome};
pub use events::{spawn_listener, DuelEvent, EventBus, EventListener, LoggingEventListener};
pub use users::UserService;

use std::sync::Arc;
use tracing::info;

use crate::auth::StoreAuth;
use crate::catalog::{SpeciesCatalog, StaticCatalog};
use crate::config::{Backend, Config};
use crate::error::Result;
use crate::store::{DocumentStore, MemoryStore, SledStore};

/// Service container sharing one store and one event bus
pub struct Services {
    pub challenges: Arc<ChallengeService>,
    pub users: Arc<UserService>,
    pub deck: Arc<DeckService>,
    pub auth: Arc<StoreAuth>,
    pub events: Arc<EventBus>,
    pub store: Arc<dyn DocumentStore>,
}

impl Services {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        catalog: Arc<dyn SpeciesCatalog>,
        config: &Config,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let settings = ChallengeSettings {
            transaction_attempts: config.transaction_attempts,
            device_queue_size: config.device_queue_size,
        };

        Self {
            challenges: Arc::new(ChallengeService::new(store.clone(), events.clone(), settings)),
            users: Arc::new(UserService::new(
                store.clone(),
                events.clone(),
                config.leaderboard_limit,
                config.rank_scan_limit,
            )),
            deck: Arc::new(DeckService::new(
                store.clone(),
                catalog,
                events.clone(),
                config.transaction_attempts,
            )),
            auth: Arc::new(StoreAuth::new(store.clone())),
            events,
            store,
        }
    }

    /// Open the configured backend and catalog
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn DocumentStore> = match config.backend {
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::Sled => Arc::new(SledStore::at_path(config.database_path()).await?),
        };
        let catalog = match &config.catalog_path {
            Some(path) => StaticCatalog::load(path)?,
            None => StaticCatalog::bundled()?,
        };

        info!(backend = %config.backend, species = catalog.len(), "Services ready");
        Ok(Self::new(store, Arc::new(catalog), config))
    }
}
