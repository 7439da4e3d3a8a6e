//! Capture, training and evolution through the service container

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use led_duel::model::{CaptureState, SpeciesId, UserId};
use led_duel::progression::ExperiencePlan;
use led_duel::store::{ChangeEvent, DocumentStore, Snapshot, WriteBatch, WriteOp};
use led_duel::{Config, DuelError, MemoryStore, Result, Services, StaticCatalog};

fn services() -> Services {
    let catalog = StaticCatalog::bundled().unwrap();
    Services::new(Arc::new(MemoryStore::new()), Arc::new(catalog), &Config::in_memory())
}

#[tokio::test]
async fn test_capture_train_and_evolve() {
    let services = services();
    let owner = UserId::from("trainer");

    let capture = services
        .deck
        .attempt_capture(&owner, SpeciesId(1), true)
        .await
        .unwrap();
    assert!(capture.recorded);
    assert!(capture.entry_created);
    assert_eq!(capture.status.status, CaptureState::Captured);

    let outcome = services
        .deck
        .add_experience(&owner, SpeciesId(1), 100)
        .await
        .unwrap();
    assert_eq!(outcome.plan, ExperiencePlan::Accumulate { experience: 100 });

    // Herbizarre needs 142
    let outcome = services
        .deck
        .add_experience(&owner, SpeciesId(1), 50)
        .await
        .unwrap();
    assert!(outcome.plan.evolves());
    assert_eq!(outcome.entry.species_id, SpeciesId(2));
    assert_eq!(outcome.entry.experience, 8);

    let deck = services.deck.deck(&owner).await.unwrap();
    assert_eq!(deck.len(), 1);
    assert_eq!(deck[0].name, "Herbizarre");
    assert!(services.deck.entry(&owner, SpeciesId(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_creature_flees_after_three_misses() {
    let services = services();
    let owner = UserId::from("trainer");

    for _ in 0..3 {
        let outcome = services
            .deck
            .attempt_capture(&owner, SpeciesId(4), false)
            .await
            .unwrap();
        assert!(outcome.recorded);
        assert!(!outcome.entry_created);
    }

    let late = services
        .deck
        .attempt_capture(&owner, SpeciesId(4), true)
        .await
        .unwrap();
    assert!(!late.recorded);
    assert_eq!(late.status.status, CaptureState::Fled);
    assert!(services.deck.deck(&owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_last_form_only_accumulates() {
    let services = services();
    let owner = UserId::from("trainer");

    services
        .deck
        .attempt_capture(&owner, SpeciesId(9), true)
        .await
        .unwrap();
    let outcome = services
        .deck
        .add_experience(&owner, SpeciesId(9), 10_000)
        .await
        .unwrap();
    assert_eq!(outcome.plan, ExperiencePlan::FinalTier { experience: 10_000 });
    assert_eq!(outcome.entry.species_id, SpeciesId(9));
}

/// Memory store whose batches containing a delete can be made to fail
struct FlakyDeletes {
    inner: MemoryStore,
    failing: AtomicBool,
}

#[async_trait]
impl DocumentStore for FlakyDeletes {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Snapshot>> {
        self.inner.get_document(collection, id).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Snapshot>> {
        self.inner.list(collection).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        self.inner.delete_document(collection, id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let deletes = batch.writes().iter().any(|w| matches!(w.op, WriteOp::Delete));
        if deletes && self.failing.load(Ordering::SeqCst) {
            return Err(DuelError::Unavailable("write rejected".into()));
        }
        self.inner.commit(batch).await
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes()
    }
}

#[tokio::test]
async fn test_failed_evolution_keeps_current_form() {
    let store = Arc::new(FlakyDeletes {
        inner: MemoryStore::new(),
        failing: AtomicBool::new(false),
    });
    let catalog = StaticCatalog::bundled().unwrap();
    let services = Services::new(store.clone(), Arc::new(catalog), &Config::in_memory());
    let owner = UserId::from("trainer");

    services.deck.attempt_capture(&owner, SpeciesId(1), true).await.unwrap();
    services.deck.add_experience(&owner, SpeciesId(1), 100).await.unwrap();

    store.failing.store(true, Ordering::SeqCst);
    let result = services.deck.add_experience(&owner, SpeciesId(1), 100).await;
    assert!(matches!(result, Err(DuelError::Unavailable(_))));

    let deck = services.deck.deck(&owner).await.unwrap();
    assert_eq!(deck.len(), 1);
    assert_eq!(deck[0].species_id, SpeciesId(1));
    assert_eq!(deck[0].experience, 100);

    store.failing.store(false, Ordering::SeqCst);
    let outcome = services.deck.add_experience(&owner, SpeciesId(1), 100).await.unwrap();
    assert!(outcome.plan.evolves());
    assert_eq!(services.deck.deck(&owner).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_offline_store_fails_closed() {
    let store = Arc::new(MemoryStore::new());
    let catalog = StaticCatalog::bundled().unwrap();
    let services = Services::new(store.clone(), Arc::new(catalog), &Config::in_memory());
    let owner = UserId::from("trainer");

    services.deck.attempt_capture(&owner, SpeciesId(1), true).await.unwrap();
    services.deck.add_experience(&owner, SpeciesId(1), 100).await.unwrap();

    store.set_available(false);
    let result = services.deck.add_experience(&owner, SpeciesId(1), 100).await;
    assert!(matches!(result, Err(DuelError::Unavailable(_))));
    store.set_available(true);

    let deck = services.deck.deck(&owner).await.unwrap();
    assert_eq!(deck.len(), 1);
    assert_eq!(deck[0].id, "trainer_1");
    assert_eq!(deck[0].experience, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_training_evolves_once() {
    let services = services();
    let owner = UserId::from("trainer");
    services.deck.attempt_capture(&owner, SpeciesId(1), true).await.unwrap();
    services.deck.add_experience(&owner, SpeciesId(1), 140).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let deck = services.deck.clone();
        let owner = owner.clone();
        handles.push(tokio::spawn(async move {
            deck.add_experience(&owner, SpeciesId(1), 10).await
        }));
    }

    let mut evolved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) if outcome.plan.evolves() => evolved += 1,
            Ok(outcome) => panic!("unexpected plan {:?}", outcome.plan),
            Err(e) => assert!(matches!(e, DuelError::NotFound(_)), "{e}"),
        }
    }
    assert_eq!(evolved, 1);

    let deck = services.deck.deck(&owner).await.unwrap();
    assert_eq!(deck.len(), 1);
    assert_eq!(deck[0].species_id, SpeciesId(2));
}
