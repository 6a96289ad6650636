//! Route definitions for the KeyGate API

mod auth;
mod health;

pub use auth::auth_routes;
pub use health::health_routes;
