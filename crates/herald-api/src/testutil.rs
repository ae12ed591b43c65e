//! Test harness: a full router over a throwaway database and image directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use herald_db::Database;
use herald_types::api::ChatInput;

use crate::auth::{AppState, AppStateInner, hash_password};
use crate::blob::DiskBlobStore;
use crate::middleware::Identity;
use crate::session::MemorySessionStore;
use crate::token::TokenCodec;
use crate::workflow::FixedReceipts;

pub struct TestApp {
    dir: TempDir,
    pub app: Router,
    pub state: AppState,
}

impl TestApp {
    pub const PASSWORD: &'static str = "pw123";
    pub const IMAGE_BASE: &'static str = "http://img.test/images";

    pub async fn new() -> Self {
        Self::with_receipts(true).await
    }

    pub async fn with_receipts(read: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("herald.db")).unwrap();
        let blobs = DiskBlobStore::new(dir.path().join("images")).await.unwrap();

        let state: AppState = Arc::new(AppStateInner {
            db: Arc::new(db),
            tokens: TokenCodec::new("test-secret-not-for-production"),
            sessions: Arc::new(MemorySessionStore::new()),
            blobs: Arc::new(blobs),
            receipts: Arc::new(FixedReceipts(read)),
            storage_timeout: Duration::from_secs(5),
            image_base_url: Self::IMAGE_BASE.to_string(),
        });
        let app = crate::routes::router(state.clone(), &dir.path().join("images"));
        Self { dir, app, state }
    }

    pub fn image_dir(&self) -> PathBuf {
        self.dir.path().join("images")
    }

    /// Sends one request through the router; the body is parsed as JSON
    /// (`Null` when empty).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(json) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Registers `login` with [`Self::PASSWORD`] and returns a fresh token.
    pub async fn user_token(&self, login: &str) -> String {
        let (status, _) = self
            .send(
                Method::POST,
                "/user/reg",
                None,
                Some(json!({
                    "login": login,
                    "password": Self::PASSWORD,
                    "repeat_password": Self::PASSWORD,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {login}");
        self.login(login).await
    }

    pub async fn moderator_token(&self, login: &str) -> String {
        let hash = hash_password(Self::PASSWORD).unwrap();
        self.state.db.ensure_moderator(login, &hash).unwrap();
        self.login(login).await
    }

    pub async fn login(&self, login: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/user/login",
                None,
                Some(json!({"login": login, "password": Self::PASSWORD})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login {login}");
        body["token"].as_str().unwrap().to_string()
    }

    /// Identity for calling engine operations directly.
    pub async fn user(&self, login: &str) -> Identity {
        let user = self.state.db.create_user(login, "unused", false).unwrap().unwrap();
        Identity {
            user_id: user.id,
            login: user.login,
            is_moderator: false,
        }
    }

    pub async fn moderator(&self, login: &str) -> Identity {
        let user = self.state.db.create_user(login, "unused", true).unwrap().unwrap();
        Identity {
            user_id: user.id,
            login: user.login,
            is_moderator: true,
        }
    }

    pub async fn chat(&self, name: &str) -> i64 {
        self.state
            .db
            .create_chat(&ChatInput {
                name: name.to_string(),
                info: String::new(),
                nickname: format!("@{}", name.to_lowercase()),
                friends: 0,
                subscribers: 0,
            })
            .unwrap()
            .id
    }
}
