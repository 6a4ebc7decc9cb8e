//! HTTP and SSE adapter over the relay runtime
//!
//! Thin wrappers only: every endpoint delegates to the coordinator, the
//! state store or the event bus. Embedders build an [`AppState`] from their
//! wired runtime and mount [`routes::router`]; the `relay-server` binary
//! does the same over a SQLite database.

pub mod config;
pub mod error;
pub mod handlers;
pub mod provider;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use provider::HttpProvider;
pub use routes::router;
pub use state::AppState;
