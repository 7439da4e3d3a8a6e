//! Player profiles and leaderboard

use std::sync::Arc;
use tracing::{debug, info};

use super::events::{DuelEvent, EventBus};
use crate::error::{DuelError, Result};
use crate::model::{UserId, UserProfile, USER_COLLECTION};
use crate::store::{
    to_document, watch_query, Direction, DocumentStore, Precondition, Query, Snapshot,
    Subscription, WriteBatch,
};

const POINTS_FIELD: &str = "points";

pub struct UserService {
    store: Arc<dyn DocumentStore>,
    events: Arc<EventBus>,
    leaderboard_limit: usize,
    rank_scan_limit: usize,
}

fn decode_all(docs: Vec<Snapshot>) -> Result<Vec<UserProfile>> {
    docs.iter().map(|doc| doc.decode()).collect()
}

impl UserService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        events: Arc<EventBus>,
        leaderboard_limit: usize,
        rank_scan_limit: usize,
    ) -> Self {
        Self {
            store,
            events,
            leaderboard_limit,
            rank_scan_limit,
        }
    }

    pub async fn user(&self, id: &UserId) -> Result<Option<UserProfile>> {
        match self.store.get_document(USER_COLLECTION, id.as_str()).await? {
            Some(snapshot) => Ok(Some(snapshot.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn all_users(&self) -> Result<Vec<UserProfile>> {
        decode_all(self.store.list(USER_COLLECTION).await?)
    }

    /// Store a new profile; fails if one already exists for the id
    pub async fn create_profile(&self, profile: UserProfile) -> Result<UserProfile> {
        if profile.pseudonyme.trim().is_empty() {
            return Err(DuelError::Validation("pseudonyme must not be empty".to_string()));
        }
        let batch = WriteBatch::new().set(
            USER_COLLECTION,
            profile.user_id.as_str(),
            to_document(&profile)?,
            Precondition::Missing,
        );
        self.store.commit(batch).await.map_err(|e| match e {
            DuelError::Conflict(_) => {
                DuelError::Validation(format!("profile {} already exists", profile.user_id))
            }
            other => other,
        })?;

        info!(user_id = %profile.user_id, pseudonyme = %profile.pseudonyme, "Profile created");
        self.events.emit(DuelEvent::ProfileCreated {
            user_id: profile.user_id.clone(),
        });
        Ok(profile)
    }

    /// Players by points, highest first; `None` uses the configured size
    pub async fn leaderboard(&self, limit: Option<usize>) -> Result<Vec<UserProfile>> {
        let limit = limit.unwrap_or(self.leaderboard_limit);
        let docs = self
            .store
            .query_ordered(USER_COLLECTION, POINTS_FIELD, Direction::Descending, limit)
            .await?;
        debug!(limit, returned = docs.len(), "Leaderboard loaded");
        decode_all(docs)
    }

    /// 1-based position, or `None` outside the scanned part of the leaderboard
    pub async fn rank(&self, user: &UserId) -> Result<Option<usize>> {
        let board = self.leaderboard(Some(self.rank_scan_limit)).await?;
        Ok(board
            .iter()
            .position(|profile| profile.user_id == *user)
            .map(|index| index + 1))
    }

    pub fn subscribe_leaderboard<F>(&self, limit: Option<usize>, mut callback: F) -> Subscription
    where
        F: FnMut(Vec<UserProfile>) + Send + 'static,
    {
        let query = Query::Ordered {
            field: POINTS_FIELD.to_string(),
            direction: Direction::Descending,
            limit: limit.unwrap_or(self.leaderboard_limit),
        };
        watch_query(self.store.clone(), USER_COLLECTION, query, move |docs| {
            match decode_all(docs) {
                Ok(profiles) => callback(profiles),
                Err(e) => tracing::error!(error = %e, "Undecodable leaderboard entry"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    async fn service_with(points: &[(&str, i64)]) -> UserService {
        let service = UserService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EventBus::new()),
            50,
            1000,
        );
        for (id, pts) in points {
            let mut profile =
                UserProfile::new((*id).into(), *id, "", "", format!("{id}@mail.test"));
            profile.points = *pts;
            service.create_profile(profile).await.unwrap();
        }
        service
    }

    #[tokio::test]
    async fn test_leaderboard_order_and_limit() {
        let service = service_with(&[("a", 10), ("b", -40), ("c", 300), ("d", 0)]).await;
        let board = service.leaderboard(None).await.unwrap();
        let ids: Vec<_> = board.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "d", "b"]);

        assert_eq!(service.leaderboard(Some(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rank() {
        let service = service_with(&[("a", 10), ("b", 20)]).await;
        assert_eq!(service.rank(&"b".into()).await.unwrap(), Some(1));
        assert_eq!(service.rank(&"a".into()).await.unwrap(), Some(2));
        assert_eq!(service.rank(&"zed".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rank_beyond_scan_limit() {
        let service = UserService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(EventBus::new()),
            1,
            1,
        );
        for (id, pts) in [("a", 5), ("b", 1)] {
            let mut profile = UserProfile::new(id.into(), id, "", "", "x@y.z");
            profile.points = pts;
            service.create_profile(profile).await.unwrap();
        }
        assert_eq!(service.rank(&"b".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_profile_rejected() {
        let service = service_with(&[("a", 0)]).await;
        let again = UserProfile::new("a".into(), "again", "", "", "a@mail.test");
        assert!(matches!(
            service.create_profile(again).await,
            Err(DuelError::Validation(_))
        ));
        assert_eq!(service.all_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_leaderboard_subscription() {
        let service = service_with(&[("a", 1)]).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = service.subscribe_leaderboard(Some(10), move |board| {
            let _ = tx.send(board.len());
        });
        assert_eq!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap(), Some(1));

        let profile = UserProfile::new("b".into(), "bee", "", "", "b@mail.test");
        service.create_profile(profile).await.unwrap();
        assert_eq!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap(), Some(2));
    }
}
