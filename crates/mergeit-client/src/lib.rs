//! Clients of the repository server used by mergeit.
//!
//! [`RestApi`] implements every collaborator trait from `mergeit-core` on top
//! of the server REST API. [`WebSocketEventSource`] subscribes to repository
//! triggers and forwards them as [`mergeit_core::RepoEvent`]s.

pub mod error;
mod plugs;
mod repository;
mod rest;
pub mod websocket;

pub use error::{ClientError, ClientResult};
pub use rest::RestApi;
pub use websocket::{WebSocketEventSource, event_names};
