//! Protocol parse errors

use thiserror::Error;

/// Errors produced while parsing an inbound envelope.
///
/// Only operator frames can fail to parse; agent frames always degrade to
/// the opaque relay path instead.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("frame has no '{}' field", crate::TAG_FIELD)]
    MissingTag,

    #[error("invalid payload for '{tag}' command: {source}")]
    BadPayload {
        tag: String,
        source: serde_json::Error,
    },
}
