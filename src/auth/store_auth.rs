//! Email/password accounts kept in the document store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::password::{check_password_strength, hash_password, verify_password};
use super::{AuthFailure, AuthProvider, AuthResult, RegisterRequest, Session};
use crate::error::{DuelError, Result};
use crate::model::{UserId, UserProfile, USER_COLLECTION};
use crate::store::{to_document, DocumentStore, Precondition, WriteBatch};

/// Credentials keyed by normalized email
pub const CREDENTIAL_COLLECTION: &str = "credentials";

const INVALID_CREDENTIALS: &str = "invalid email or password";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Credential {
    user_id: UserId,
    email: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(DuelError::Validation(format!("invalid email address: {email:?}"))),
    }
}

/// [`AuthProvider`] backed by the same store as the game data
pub struct StoreAuth {
    store: Arc<dyn DocumentStore>,
}

impl StoreAuth {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn credential(&self, email: &str) -> Result<Option<(u64, Credential)>> {
        match self.store.get_document(CREDENTIAL_COLLECTION, email).await? {
            Some(snapshot) => Ok(Some((snapshot.version, snapshot.decode()?))),
            None => Ok(None),
        }
    }

    /// Accounts created before their profile get a blank one on first login
    async fn ensure_profile(&self, credential: &Credential) -> Result<()> {
        let id = credential.user_id.as_str();
        if self.store.get_document(USER_COLLECTION, id).await?.is_some() {
            return Ok(());
        }
        let profile = UserProfile::new(
            credential.user_id.clone(),
            "",
            "",
            "",
            credential.email.clone(),
        );
        let batch = WriteBatch::new().set(
            USER_COLLECTION,
            id,
            to_document(&profile)?,
            Precondition::Missing,
        );
        match self.store.commit(batch).await {
            Ok(()) => {
                warn!(user_id = %credential.user_id, "Created missing profile");
                Ok(())
            }
            // Created concurrently
            Err(DuelError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AuthProvider for StoreAuth {
    async fn login(&self, email: &str, password: &str) -> AuthResult<Session> {
        let email = normalize_email(email)?;
        let Some((_, credential)) = self.credential(&email).await? else {
            debug!(email = %email, "Login for unknown account");
            return Err(AuthFailure::new(INVALID_CREDENTIALS));
        };
        if !verify_password(password, &credential.password_hash)? {
            debug!(email = %email, "Login with wrong password");
            return Err(AuthFailure::new(INVALID_CREDENTIALS));
        }

        self.ensure_profile(&credential).await?;
        info!(user_id = %credential.user_id, "User logged in");
        Ok(Session {
            user_id: credential.user_id,
            email,
        })
    }

    async fn register(&self, request: RegisterRequest) -> AuthResult<Session> {
        let email = normalize_email(&request.email)?;
        check_password_strength(&request.password)?;

        let user_id = UserId::new(Uuid::new_v4().simple().to_string());
        let credential = Credential {
            user_id: user_id.clone(),
            email: email.clone(),
            password_hash: hash_password(&request.password)?,
            created_at: Utc::now(),
        };
        let profile = UserProfile::new(
            user_id.clone(),
            request.pseudonyme,
            request.first_name,
            request.last_name,
            email.clone(),
        );

        let batch = WriteBatch::new()
            .set(
                CREDENTIAL_COLLECTION,
                &email,
                to_document(&credential).map_err(AuthFailure::from)?,
                Precondition::Missing,
            )
            .set(
                USER_COLLECTION,
                user_id.as_str(),
                to_document(&profile).map_err(AuthFailure::from)?,
                Precondition::Missing,
            );

        match self.store.commit(batch).await {
            Ok(()) => {}
            Err(DuelError::Conflict(_)) => {
                return Err(AuthFailure::new("email address already in use"));
            }
            Err(e) => return Err(e.into()),
        }

        info!(user_id = %user_id, "User registered");
        Ok(Session { user_id, email })
    }

    async fn change_password(
        &self,
        session: &Session,
        current: &str,
        next: &str,
    ) -> AuthResult<()> {
        let email = normalize_email(&session.email)?;
        let Some((version, mut credential)) = self.credential(&email).await? else {
            return Err(AuthFailure::new("user not logged in"));
        };
        if credential.user_id != session.user_id {
            return Err(AuthFailure::new("session does not match account"));
        }
        if !verify_password(current, &credential.password_hash)? {
            return Err(AuthFailure::new(INVALID_CREDENTIALS));
        }
        check_password_strength(next)?;

        credential.password_hash = hash_password(next)?;
        let batch = WriteBatch::new().set(
            CREDENTIAL_COLLECTION,
            &email,
            to_document(&credential).map_err(AuthFailure::from)?,
            Precondition::Version(version),
        );
        self.store.commit(batch).await?;

        info!(user_id = %session.user_id, "Password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            pseudonyme: "ace".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_creates_profile() {
        let store = Arc::new(MemoryStore::new());
        let auth = StoreAuth::new(store.clone());

        let session = auth.register(request("Ada@Example.com ", "secret1")).await.unwrap();
        assert_eq!(session.email, "ada@example.com");

        let profile: UserProfile = store
            .get_document(USER_COLLECTION, session.user_id.as_str())
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(profile.points, 0);
        assert_eq!(profile.win_streak, 0);
        assert_eq!(profile.pseudonyme, "ace");
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let auth = StoreAuth::new(Arc::new(MemoryStore::new()));
        auth.register(request("a@b.c", "secret1")).await.unwrap();
        let err = auth.register(request("A@B.C", "secret2")).await.unwrap_err();
        assert_eq!(err.message.as_deref(), Some("email address already in use"));
    }

    #[tokio::test]
    async fn test_short_password_rejected() {
        let auth = StoreAuth::new(Arc::new(MemoryStore::new()));
        let err = auth.register(request("a@b.c", "12345")).await.unwrap_err();
        assert!(err.to_string().contains("at least 6"));
    }

    #[tokio::test]
    async fn test_login_and_change_password() {
        let auth = StoreAuth::new(Arc::new(MemoryStore::new()));
        let registered = auth.register(request("a@b.c", "secret1")).await.unwrap();

        let session = auth.login("a@b.c", "secret1").await.unwrap();
        assert_eq!(session, registered);
        assert!(auth.login("a@b.c", "wrong-pw").await.is_err());
        assert!(auth.login("nobody@b.c", "secret1").await.is_err());

        assert!(auth
            .change_password(&session, "not-current", "secret2")
            .await
            .is_err());
        auth.change_password(&session, "secret1", "secret2")
            .await
            .unwrap();
        assert!(auth.login("a@b.c", "secret1").await.is_err());
        assert!(auth.login("a@b.c", "secret2").await.is_ok());
    }

    #[tokio::test]
    async fn test_login_restores_missing_profile() {
        let store = Arc::new(MemoryStore::new());
        let auth = StoreAuth::new(store.clone());
        let session = auth.register(request("a@b.c", "secret1")).await.unwrap();
        store
            .delete_document(USER_COLLECTION, session.user_id.as_str())
            .await
            .unwrap();

        auth.login("a@b.c", "secret1").await.unwrap();
        let restored = store
            .get_document(USER_COLLECTION, session.user_id.as_str())
            .await
            .unwrap();
        assert!(restored.is_some());
    }

    #[test]
    fn test_email_normalization() {
        assert_eq!(normalize_email("  Bob@Mail.COM").unwrap(), "bob@mail.com");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@domain").is_err());
    }
}
