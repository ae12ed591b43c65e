use std::path::Path;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::services::ServeDir;

use crate::auth::{self, AppState};
use crate::catalog::{self, MAX_IMAGE_BYTES};
use crate::messages;
use crate::middleware::{require_auth, require_moderator};

/// All HTTP routes. Chat images are served read-only from `image_dir`.
pub fn router(state: AppState, image_dir: &Path) -> Router {
    let public_routes = Router::new()
        .route("/user/reg", post(auth::register))
        .route("/user/login", post(auth::login))
        .route("/chats", get(catalog::list_chats_handler))
        .route("/chats/{id}", get(catalog::get_chat_handler));

    let protected_routes = Router::new()
        .route("/user/logout", post(auth::logout))
        .route("/user/update", put(auth::update_password))
        .route("/chats/{id}/in-message", post(catalog::attach_handler))
        .route("/messages", get(messages::list_messages))
        .route("/messages/{id}", get(messages::get_message))
        .route("/messages/{id}/text", put(messages::update_text))
        .route("/messages/{id}/form", put(messages::form))
        .route("/messages/{id}/delete", delete(messages::delete))
        .route("/message-chats/{message_id}/{chat_id}", delete(messages::detach_chat))
        .route("/message-chats/{message_id}/{chat_id}/sound", put(messages::toggle_sound))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let moderator_routes = Router::new()
        .route("/chats/create", post(catalog::create_chat_handler))
        .route("/chats/{id}/update", put(catalog::update_chat_handler))
        .route("/chats/{id}/delete", delete(catalog::delete_chat_handler))
        .route(
            "/chats/{id}/new-image",
            post(catalog::new_image_handler).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
        .route("/messages/{id}/finish", put(messages::finish))
        .route("/messages/{id}/reject", put(messages::reject))
        .layer(middleware::from_fn(require_moderator))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(moderator_routes)
        .nest_service("/images", ServeDir::new(image_dir))
        .with_state(state)
}
