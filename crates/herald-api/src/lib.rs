pub mod auth;
pub mod blob;
pub mod catalog;
pub mod error;
pub mod extract;
pub mod messages;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod token;
pub mod workflow;

#[cfg(test)]
mod testutil;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
