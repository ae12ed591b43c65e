use axum::{
    Extension,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::{debug, warn};

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;

/// Who is calling, as established from a verified token and a live session.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: i64,
    pub login: String,
    pub is_moderator: bool,
}

async fn authenticate(state: &AppStateInner, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let bearer = headers
        .typed_get::<Authorization<Bearer>>()
        .ok_or(ApiError::Unauthenticated("missing bearer token"))?;

    let claims = state.tokens.verify(bearer.token()).map_err(|e| {
        debug!("token rejected: {}", e);
        ApiError::Unauthenticated("invalid or expired token")
    })?;

    let stored = state
        .within_deadline(state.sessions.get(claims.user_id))
        .await?;
    if stored.as_deref() != Some(bearer.token()) {
        return Err(ApiError::Unauthenticated("session not found or expired"));
    }

    Ok(Identity {
        user_id: claims.user_id,
        login: claims.username,
        is_moderator: claims.is_moderator,
    })
}

/// Rejects the request unless it carries a valid bearer token that matches
/// the caller's current session.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, req.headers()).await?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Must run inside `require_auth`.
pub async fn require_moderator(
    Extension(identity): Extension<Identity>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !identity.is_moderator {
        warn!("User {} tried a moderator action", identity.login);
        return Err(ApiError::Forbidden("moderator role required"));
    }
    Ok(next.run(req).await)
}

/// Identity for public reads: present when the request authenticates,
/// anonymous otherwise. Never rejects.
pub async fn optional_identity(state: &AppStateInner, headers: &HeaderMap) -> Option<Identity> {
    if headers.typed_get::<Authorization<Bearer>>().is_none() {
        return None;
    }
    match authenticate(state, headers).await {
        Ok(identity) => Some(identity),
        Err(e) => {
            debug!("treating caller as anonymous: {}", e);
            None
        }
    }
}
