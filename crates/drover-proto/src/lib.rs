//! Drover Wire Protocol
//!
//! This crate defines the envelope types exchanged between the relay hub,
//! its agents, and its operators, plus the parse helpers that classify
//! inbound frames.

pub mod error;
pub mod messages;

pub use error::ProtoError;
pub use messages::*;

/// Tag field shared by every envelope
pub const TAG_FIELD: &str = "type";
