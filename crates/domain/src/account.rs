//! Account lifecycle engine: registration, sessions, profile, purge.

use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use common::UserId;
use store::{AuthTokenRecord, MarketStore, UserRecord};

use crate::credential::{hash_password, verify_password};
use crate::error::{MarketError, Result};
use crate::patch::double_option;

/// Bearer token lifetime.
const TOKEN_TTL_DAYS: i64 = 7;

const MIN_PASSWORD_LEN: usize = 6;

/// Input for registering an account.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub avatar_ref: Option<String>,
}

/// Password change carried inside a profile patch.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChange {
    pub current: String,
    pub new: String,
}

/// Partial profile update. Outer `None` leaves a field alone; nullable
/// fields use a second `Option` so an explicit `null` clears them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub avatar_ref: Option<Option<String>>,
    pub password: Option<PasswordChange>,
}

/// A freshly issued session: the bearer token plus its user.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user: UserRecord,
}

/// Service for managing accounts and sessions.
pub struct AccountService<S> {
    store: S,
}

impl<S: MarketStore> AccountService<S> {
    /// Creates a new account service backed by the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Registers an account and signs it in.
    #[tracing::instrument(skip(self, new))]
    pub async fn register(&self, new: NewUser) -> Result<AuthSession> {
        if new.name.trim().is_empty() {
            return Err(MarketError::Validation("name is required".to_string()));
        }
        validate_email(&new.email)?;
        validate_password(&new.password)?;
        if self.store.user_by_email(&new.email).await?.is_some() {
            return Err(MarketError::Validation(
                "email already registered".to_string(),
            ));
        }

        let user = UserRecord {
            id: UserId::new(),
            name: new.name.trim().to_string(),
            email: new.email,
            credential_hash: hash_password(&new.password),
            phone: new.phone,
            address: new.address,
            avatar_ref: new.avatar_ref,
            created_at: Utc::now(),
        };
        self.store.insert_user(&user).await?;
        self.issue_token(user).await
    }

    /// Signs a user in. Unknown email and wrong password fail the same
    /// way, so the response does not reveal which accounts exist.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let denied = || MarketError::Authorization("invalid email or password".to_string());

        let user = self.store.user_by_email(email).await?.ok_or_else(denied)?;
        if !verify_password(password, &user.credential_hash) {
            return Err(denied());
        }
        self.issue_token(user).await
    }

    /// Revokes a bearer token. Idempotent.
    #[tracing::instrument(skip(self, token))]
    pub async fn logout(&self, token: &str) -> Result<()> {
        Ok(self.store.delete_token(token).await?)
    }

    /// Resolves a bearer token to its user, rejecting unknown or expired
    /// tokens.
    #[tracing::instrument(skip(self, token))]
    pub async fn authenticate(&self, token: &str) -> Result<UserId> {
        let record = self
            .store
            .token(token)
            .await?
            .ok_or_else(|| MarketError::Authorization("invalid token".to_string()))?;
        if record.is_expired(Utc::now()) {
            return Err(MarketError::Authorization("token expired".to_string()));
        }
        Ok(record.user_id)
    }

    /// Fetches a user's own profile.
    #[tracing::instrument(skip(self))]
    pub async fn profile(&self, user_id: UserId) -> Result<UserRecord> {
        self.store
            .user(user_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("user not found: {user_id}")))
    }

    /// Applies a partial profile update. A password change must prove
    /// knowledge of the current password.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update_profile(&self, user_id: UserId, patch: ProfilePatch) -> Result<UserRecord> {
        let mut user = self.profile(user_id).await?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(MarketError::Validation("name is required".to_string()));
            }
            user.name = name.trim().to_string();
        }
        if let Some(email) = patch.email {
            validate_email(&email)?;
            user.email = email;
        }
        if let Some(phone) = patch.phone {
            user.phone = phone;
        }
        if let Some(address) = patch.address {
            user.address = address;
        }
        if let Some(avatar_ref) = patch.avatar_ref {
            user.avatar_ref = avatar_ref;
        }
        if let Some(change) = patch.password {
            if !verify_password(&change.current, &user.credential_hash) {
                return Err(MarketError::Authorization(
                    "current password does not match".to_string(),
                ));
            }
            validate_password(&change.new)?;
            user.credential_hash = hash_password(&change.new);
        }

        self.store.update_user(&user).await?;
        Ok(user)
    }

    /// Deletes the account and everything it touches, in one unit of
    /// work, after verifying the credential proof.
    #[tracing::instrument(skip(self, password))]
    pub async fn purge(&self, user_id: UserId, password: &str) -> Result<()> {
        let user = self.profile(user_id).await?;
        if !verify_password(password, &user.credential_hash) {
            return Err(MarketError::Authorization(
                "password does not match".to_string(),
            ));
        }
        self.store.purge_user(user_id).await?;
        metrics::counter!("account_purges_total").increment(1);
        Ok(())
    }

    async fn issue_token(&self, user: UserRecord) -> Result<AuthSession> {
        let now = Utc::now();
        let record = AuthTokenRecord {
            token: Uuid::new_v4().to_string(),
            user_id: user.id,
            issued_at: now,
            expires_at: now + Duration::days(TOKEN_TTL_DAYS),
        };
        self.store.insert_token(&record).await?;
        Ok(AuthSession {
            token: record.token,
            user,
        })
    }
}

fn validate_email(email: &str) -> Result<()> {
    if !plausible_email(email) {
        return Err(MarketError::Validation(
            "email address is not valid".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(MarketError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

// Shape check only: one '@', a non-empty local part, and a dotted domain.
fn plausible_email(email: &str) -> bool {
    if email.contains(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}
