use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info, warn};

use herald_db::Database;
use herald_db::models::UserRow;
use herald_types::api::{
    LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, UpdatePasswordRequest,
};

use crate::blob::BlobStore;
use crate::error::ApiError;
use crate::extract::Json;
use crate::middleware::Identity;
use crate::session::SessionStore;
use crate::token::{TOKEN_TTL, TokenCodec};
use crate::workflow::ReceiptPolicy;

const MAX_LOGIN_CHARS: usize = 25;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub tokens: TokenCodec,
    pub sessions: Arc<dyn SessionStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub receipts: Arc<dyn ReceiptPolicy>,
    /// Deadline for every storage, session or blob call.
    pub storage_timeout: Duration,
    /// Public prefix for chat image references, without trailing slash.
    pub image_base_url: String,
}

impl AppStateInner {
    /// Runs blocking database work off the async runtime, bounded by the
    /// storage deadline.
    ///
    /// On timeout the task keeps running to completion; every write it does
    /// is a single transaction, so it lands whole or not at all.
    pub async fn run_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));
        match tokio::time::timeout(self.storage_timeout, task).await {
            Ok(joined) => joined.map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?,
            Err(_) => {
                warn!("storage call exceeded {:?}", self.storage_timeout);
                Err(ApiError::Unavailable)
            }
        }
    }

    /// Bounds a session or blob call by the storage deadline.
    pub async fn within_deadline<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, ApiError> {
        match tokio::time::timeout(self.storage_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("store call exceeded {:?}", self.storage_timeout);
                Err(ApiError::Unavailable)
            }
        }
    }
}

// ── Password hashing ────────────────────────────────────────────────────

/// Argon2id PHC string with a fresh salt. CPU-heavy; call from blocking code.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

fn password_matches(password: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| anyhow::anyhow!("stored password hash is corrupt: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

// ── Operations ──────────────────────────────────────────────────────────

fn normalize_login(login: &str) -> Result<String, ApiError> {
    let login = login.trim();
    let chars = login.chars().count();
    if chars == 0 || chars > MAX_LOGIN_CHARS {
        return Err(ApiError::validation(format!(
            "login must be 1 to {} characters",
            MAX_LOGIN_CHARS
        )));
    }
    Ok(login.to_string())
}

pub async fn register_user(
    state: &AppStateInner,
    req: RegisterRequest,
) -> Result<RegisterResponse, ApiError> {
    let login = normalize_login(&req.login)?;
    if req.password.is_empty() {
        return Err(ApiError::validation("password must not be empty"));
    }
    if req.password != req.repeat_password {
        return Err(ApiError::validation("passwords do not match"));
    }

    let password = req.password;
    let created = state
        .run_db(move |db| {
            // Skip the expensive hash when the login is obviously taken.
            if db.get_user_by_login(&login)?.is_some() {
                return Ok(None);
            }
            let hash = hash_password(&password)?;
            Ok(db.create_user(&login, &hash, false)?)
        })
        .await?;

    let user = created.ok_or(ApiError::Conflict("user already exists"))?;
    info!("Registered user {} ({})", user.login, user.id);
    Ok(RegisterResponse {
        user_id: user.id,
        login: user.login,
    })
}

pub async fn login_user(
    state: &AppStateInner,
    req: LoginRequest,
) -> Result<LoginResponse, ApiError> {
    let login = req.login.trim().to_string();
    let password = req.password;
    let user = state
        .run_db(move |db| verified_user(db, &login, &password))
        .await?
        .ok_or(ApiError::Unauthenticated("invalid login or password"))?;

    let token = state.tokens.issue(user.id, &user.login, user.is_moderator)?;
    state
        .within_deadline(state.sessions.set(user.id, &token, TOKEN_TTL))
        .await?;

    info!("User {} logged in", user.login);
    Ok(LoginResponse {
        user_id: user.id,
        login: user.login,
        is_moderator: user.is_moderator,
        token,
    })
}

fn verified_user(db: &Database, login: &str, password: &str) -> Result<Option<UserRow>, ApiError> {
    let Some(user) = db.get_user_by_login(login)? else {
        return Ok(None);
    };
    if password_matches(password, &user.password)? {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

pub async fn logout_user(state: &AppStateInner, identity: &Identity) -> Result<(), ApiError> {
    state
        .within_deadline(state.sessions.delete(identity.user_id))
        .await?;
    info!("User {} logged out", identity.login);
    Ok(())
}

/// Changes the caller's password after checking the current one. The
/// session stays valid.
pub async fn change_password(
    state: &AppStateInner,
    identity: &Identity,
    req: UpdatePasswordRequest,
) -> Result<(), ApiError> {
    if req.new_password.is_empty() {
        return Err(ApiError::validation("new password must not be empty"));
    }
    let user_id = identity.user_id;
    state
        .run_db(move |db| {
            let user = db
                .get_user_by_id(user_id)?
                .ok_or(ApiError::NotFound("user not found"))?;
            if !password_matches(&req.current_password, &user.password)? {
                return Err(ApiError::Forbidden("current password is wrong"));
            }
            let hash = hash_password(&req.new_password)?;
            db.update_password(user_id, &hash)?;
            Ok(())
        })
        .await?;
    info!("User {} changed password", identity.login);
    Ok(())
}

/// Makes sure the configured moderator account exists and carries the flag.
pub async fn bootstrap_moderator(
    state: &AppStateInner,
    login: &str,
    password: &str,
) -> Result<(), ApiError> {
    let login = normalize_login(login)?;
    let password = password.to_string();
    let name = login.clone();
    let created = state
        .run_db(move |db| {
            let hash = hash_password(&password)?;
            Ok(db.ensure_moderator(&login, &hash)?)
        })
        .await?;
    if created {
        info!("Created moderator account {}", name);
    } else {
        info!("Moderator account {} already present", name);
    }
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────────────

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resp = register_user(&state, req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(login_user(&state, req).await?))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    logout_user(&state, &identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_password(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    change_password(&state, &identity, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestApp;
    use axum::http::Method;
    use serde_json::json;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("pw123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(password_matches("pw123", &hash).unwrap());
        assert!(!password_matches("pw124", &hash).unwrap());
        assert!(password_matches("pw123", "not-a-phc-string").is_err());
    }

    #[test]
    fn login_length_is_counted_in_characters() {
        assert_eq!(normalize_login("  алиса  ").unwrap(), "алиса");
        assert!(normalize_login("   ").is_err());
        assert!(normalize_login(&"я".repeat(25)).is_ok());
        assert!(normalize_login(&"я".repeat(26)).is_err());
    }

    #[tokio::test]
    async fn register_duplicate_and_login_scenario() {
        let app = TestApp::new().await;

        let (status, body) = app
            .send(
                Method::POST,
                "/user/reg",
                None,
                Some(json!({"login": "alice", "password": "pw123", "repeat_password": "pw123"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["login"], "alice");

        let (status, body) = app
            .send(
                Method::POST,
                "/user/reg",
                None,
                Some(json!({"login": "alice", "password": "other", "repeat_password": "other"})),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["description"], "user already exists");

        let (status, body) = app
            .send(
                Method::POST,
                "/user/login",
                None,
                Some(json!({"login": "alice", "password": "wrongpw"})),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthenticated");

        let (status, body) = app
            .send(
                Method::POST,
                "/user/login",
                None,
                Some(json!({"login": "alice", "password": "pw123"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap();
        let user_id = body["user_id"].as_i64().unwrap();
        let stored = app.state.sessions.get(user_id).await.unwrap();
        assert_eq!(stored.as_deref(), Some(token));
    }

    #[tokio::test]
    async fn mismatched_passwords_are_refused() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(
                Method::POST,
                "/user/reg",
                None,
                Some(json!({"login": "bob", "password": "a", "repeat_password": "b"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
        assert!(app.state.db.get_user_by_login("bob").unwrap().is_none());
    }

    #[tokio::test]
    async fn logged_out_token_is_rejected() {
        let app = TestApp::new().await;
        let token = app.user_token("alice").await;

        let (status, _) = app.send(Method::GET, "/messages", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app.send(Method::POST, "/user/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // Still a well-signed, unexpired token, but the session is gone.
        assert!(app.state.tokens.verify(&token).is_ok());
        let (status, body) = app.send(Method::GET, "/messages", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["description"], "session not found or expired");
    }

    #[tokio::test]
    async fn second_login_evicts_the_first_token() {
        let app = TestApp::new().await;
        let first = app.user_token("alice").await;
        // exp has second resolution; same-second logins sign identical claims
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = app.login("alice").await;
        assert_ne!(first, second);

        let (status, _) = app.send(Method::GET, "/messages", Some(&first), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = app.send(Method::GET, "/messages", Some(&second), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn password_change_requires_the_current_password() {
        let app = TestApp::new().await;
        let token = app.user_token("alice").await;

        let (status, _) = app
            .send(
                Method::PUT,
                "/user/update",
                Some(&token),
                Some(json!({"current_password": "nope", "new_password": "fresh"})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .send(
                Method::PUT,
                "/user/update",
                Some(&token),
                Some(json!({"current_password": TestApp::PASSWORD, "new_password": "fresh"})),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .send(
                Method::POST,
                "/user/login",
                None,
                Some(json!({"login": "alice", "password": "fresh"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn bootstrap_moderator_is_idempotent() {
        let app = TestApp::new().await;
        bootstrap_moderator(&app.state, "root", "secret").await.unwrap();
        bootstrap_moderator(&app.state, "root", "ignored").await.unwrap();

        let root = app.state.db.get_user_by_login("root").unwrap().unwrap();
        assert!(root.is_moderator);
        assert!(password_matches("secret", &root.password).unwrap());
    }
}
