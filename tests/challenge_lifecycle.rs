//! End-to-end duel between two registered players

use std::sync::Arc;

use led_duel::auth::{AuthProvider, RegisterRequest, Session};
use led_duel::model::ChallengeStatus;
use led_duel::model::Challenge;
use led_duel::services::{DeviceReport, DuelEvent};
use led_duel::{Config, DuelError, MemoryStore, Services, StaticCatalog};

fn services() -> Services {
    let catalog = StaticCatalog::bundled().unwrap();
    Services::new(Arc::new(MemoryStore::new()), Arc::new(catalog), &Config::in_memory())
}

async fn register(services: &Services, email: &str, pseudonyme: &str) -> Session {
    services
        .auth
        .register(RegisterRequest {
            email: email.to_string(),
            password: "hunter22".to_string(),
            first_name: "Test".to_string(),
            last_name: pseudonyme.to_string(),
            pseudonyme: pseudonyme.to_string(),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_duel_moves_points_between_players() {
    let services = services();
    let alice = register(&services, "alice@example.com", "alice").await;
    let bob = register(&services, "bob@example.com", "bob").await;
    let mut events = services.events.subscribe();

    let challenge = services
        .challenges
        .create(&alice, &bob.user_id, "1231231231", 1)
        .await
        .unwrap();
    assert_eq!(challenge.status(), ChallengeStatus::Pending);

    let pending = services.challenges.enriched_pending(&bob.user_id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].challenger_pseudo, "alice");
    assert_eq!(pending[0].potential_points.max_win, 113);

    assert!(services.challenges.accept_pending_at(&bob, 0).await.unwrap());
    let queue = services.challenges.device_queue(&bob.user_id).await.unwrap();
    assert_eq!(queue.len(), 1);

    let receipt = services
        .challenges
        .complete(
            &bob.user_id,
            challenge.id,
            DeviceReport {
                steps_completed: 10,
                total_steps: 10,
            },
        )
        .await
        .unwrap();
    assert!(receipt.success);
    assert_eq!(receipt.points, 113);
    assert_eq!(receipt.points + receipt.challenger_points, 0);

    let bob_profile = services.users.user(&bob.user_id).await.unwrap().unwrap();
    let alice_profile = services.users.user(&alice.user_id).await.unwrap().unwrap();
    assert_eq!(bob_profile.points, 113);
    assert_eq!(bob_profile.win_streak, 1);
    assert_eq!(alice_profile.points, -113);

    let completed = services.challenges.completed(&bob.user_id).await.unwrap();
    assert_eq!(completed.len(), 1);
    assert!(services.challenges.pending(&bob.user_id).await.unwrap().is_empty());

    let board = services.users.leaderboard(None).await.unwrap();
    assert_eq!(board[0].user_id, bob.user_id);
    assert_eq!(services.users.rank(&alice.user_id).await.unwrap(), Some(2));

    let mut saw_completion = false;
    while let Ok(event) = events.try_recv() {
        if let DuelEvent::ChallengeCompleted { points, success, .. } = event {
            assert_eq!(points, 113);
            assert!(success);
            saw_completion = true;
        }
    }
    assert!(saw_completion);
}

#[tokio::test]
async fn test_second_report_keeps_first_result() {
    let services = services();
    let alice = register(&services, "alice@example.com", "alice").await;
    let bob = register(&services, "bob@example.com", "bob").await;

    let challenge = services
        .challenges
        .create(&alice, &bob.user_id, "12312", 1)
        .await
        .unwrap();
    assert!(services.challenges.accept(&bob, challenge.id).await.unwrap());

    let first = services
        .challenges
        .complete(
            &bob.user_id,
            challenge.id,
            DeviceReport {
                steps_completed: 0,
                total_steps: 5,
            },
        )
        .await
        .unwrap();
    assert!(!first.success);
    assert!(first.points < 0);

    let again = services
        .challenges
        .complete(
            &bob.user_id,
            challenge.id,
            DeviceReport {
                steps_completed: 5,
                total_steps: 5,
            },
        )
        .await;
    assert!(matches!(again, Err(DuelError::AlreadyCompleted { .. })));

    let bob_profile = services.users.user(&bob.user_id).await.unwrap().unwrap();
    assert_eq!(bob_profile.points, first.points);
    assert_eq!(bob_profile.win_streak, 0);
}

#[tokio::test]
async fn test_pending_challenge_cannot_be_completed() {
    let services = services();
    let alice = register(&services, "alice@example.com", "alice").await;
    let bob = register(&services, "bob@example.com", "bob").await;

    let challenge = services
        .challenges
        .create(&alice, &bob.user_id, "123123", 3)
        .await
        .unwrap();
    let result = services
        .challenges
        .complete(
            &bob.user_id,
            challenge.id,
            DeviceReport {
                steps_completed: 6,
                total_steps: 6,
            },
        )
        .await;
    assert!(matches!(result, Err(DuelError::InvalidTransition { .. })));

    let alice_profile = services.users.user(&alice.user_id).await.unwrap().unwrap();
    assert_eq!(alice_profile.points, 0);
}

#[tokio::test]
async fn test_login_after_register_returns_same_user() {
    let services = services();
    let registered = register(&services, "Carol@Example.com", "carol").await;

    let session = services
        .auth
        .login("carol@example.com", "hunter22")
        .await
        .unwrap();
    assert_eq!(session.user_id, registered.user_id);
    assert!(services.auth.login("carol@example.com", "wrong-password").await.is_err());
}

async fn accepted_duel(services: &Services, sequence: &str) -> (Session, Session, Challenge) {
    let alice = register(services, "alice@example.com", "alice").await;
    let bob = register(services, "bob@example.com", "bob").await;
    let challenge = services
        .challenges
        .create(&alice, &bob.user_id, sequence, 1)
        .await
        .unwrap();
    assert!(services.challenges.accept(&bob, challenge.id).await.unwrap());
    (alice, bob, challenge)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_reports_pay_out_once() {
    let services = services();
    let (alice, bob, challenge) = accepted_duel(&services, "12312").await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let challenges = services.challenges.clone();
        let recipient = bob.user_id.clone();
        let id = challenge.id;
        handles.push(tokio::spawn(async move {
            challenges
                .complete(
                    &recipient,
                    id,
                    DeviceReport {
                        steps_completed: 5,
                        total_steps: 5,
                    },
                )
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(receipt) => {
                assert_eq!(receipt.points, 13);
                successes += 1;
            }
            Err(e) => assert!(matches!(e, DuelError::AlreadyCompleted { .. }), "{e}"),
        }
    }
    assert_eq!(successes, 1);

    let bob_profile = services.users.user(&bob.user_id).await.unwrap().unwrap();
    let alice_profile = services.users.user(&alice.user_id).await.unwrap().unwrap();
    assert_eq!(bob_profile.points, 13);
    assert_eq!(alice_profile.points, -13);
    assert_eq!(bob_profile.win_streak, 1);
    assert_eq!(services.challenges.completed(&bob.user_id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_accepts_by_id_accept_once() {
    let services = services();
    let alice = register(&services, "alice@example.com", "alice").await;
    let bob = register(&services, "bob@example.com", "bob").await;
    let challenge = services
        .challenges
        .create(&alice, &bob.user_id, "123123", 2)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let challenges = services.challenges.clone();
        let session = bob.clone();
        let id = challenge.id;
        handles.push(tokio::spawn(async move { challenges.accept(&session, id).await }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(services.challenges.device_queue(&bob.user_id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_accepts_by_index_take_distinct_challenges() {
    let services = services();
    let alice = register(&services, "alice@example.com", "alice").await;
    let bob = register(&services, "bob@example.com", "bob").await;
    for sequence in ["11111", "22222"] {
        services
            .challenges
            .create(&alice, &bob.user_id, sequence, 1)
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let challenges = services.challenges.clone();
        let session = bob.clone();
        handles.push(tokio::spawn(async move { challenges.accept_pending_at(&session, 0).await }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 2);

    let queue = services.challenges.device_queue(&bob.user_id).await.unwrap();
    assert_eq!(queue.len(), 2);
    assert_ne!(queue[0].id, queue[1].id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_creates_all_land() {
    let services = services();
    let bob = register(&services, "bob@example.com", "bob").await;
    let mut challengers = Vec::new();
    for name in ["ann", "cid", "dee", "eve"] {
        challengers.push(register(&services, &format!("{name}@example.com"), name).await);
    }

    let mut handles = Vec::new();
    for challenger in challengers {
        let challenges = services.challenges.clone();
        let recipient = bob.user_id.clone();
        handles.push(tokio::spawn(async move {
            challenges.create(&challenger, &recipient, "1231231", 3).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(services.challenges.pending(&bob.user_id).await.unwrap().len(), 4);
}
