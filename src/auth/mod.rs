//! Authentication capability
//!
//! Services never consult ambient login state; callers obtain a [`Session`]
//! from an [`AuthProvider`] and pass it explicitly.

pub mod password;
mod store_auth;

pub use password::{hash_password, verify_password, MIN_PASSWORD_LENGTH};
pub use store_auth::{StoreAuth, CREDENTIAL_COLLECTION};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DuelError;
use crate::model::UserId;

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
}

/// Failed auth operation, with a message fit for display when available
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .message.as_deref().unwrap_or("authentication failed"))]
pub struct AuthFailure {
    pub message: Option<String>,
}

impl AuthFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

impl From<DuelError> for AuthFailure {
    fn from(err: DuelError) -> Self {
        Self::new(err.to_string())
    }
}

pub type AuthResult<T> = std::result::Result<T, AuthFailure>;

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub pseudonyme: String,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> AuthResult<Session>;

    /// Create the account and its profile (points and streak at zero)
    async fn register(&self, request: RegisterRequest) -> AuthResult<Session>;

    async fn change_password(&self, session: &Session, current: &str, next: &str)
        -> AuthResult<()>;
}
