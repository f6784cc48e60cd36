//! HTTP surface of the cascade gateway.
//!
//! Exposes an OpenAI-compatible `POST /v1/chat/completions` endpoint backed by
//! a [`cascade_router::Dispatcher`], plus `GET /v1/models` and `GET /health`.

pub mod completions;
pub mod error;
pub mod middleware;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, GatewayServer};
