//! Drover relay hub
//!
//! Mediates all traffic between a pool of remote agents and a small set of
//! authenticated operators over persistent WebSocket connections. Agents and
//! operators never talk to each other directly; the hub classifies each new
//! connection by its first frame, routes operator commands, relays agent
//! events, and reaps dead peers.
//!
//! All registry and session-state mutation is funneled through one
//! state-owning task (see [`hub::Hub`]); connection tasks only translate
//! socket I/O into events.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod liveness;
pub mod media;
pub mod negotiate;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod state;

pub use config::HubConfig;
pub use error::HubError;
pub use hub::{Hub, HubHandle};
pub use server::HubServer;
