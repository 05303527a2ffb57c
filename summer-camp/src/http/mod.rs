//! HTTP layer: Axum router, guards, handlers and error mapping.
//!
//! Exposes the camp endpoints (`/classes`, `/users`, `/instructors`, `/enrolled`,
//! `/payment`, ...) behind bearer-token and stored-role guards.

mod auth;
mod error;
mod handlers;
mod responses;
mod state;

#[cfg(test)]
mod tests;

pub use handlers::router;
pub use state::AppState;
