//! First-frame role negotiation
//!
//! A fresh connection is neither agent nor operator until its first text
//! frame arrives. A frame that authenticates with the operator secret makes
//! it an operator; any other parseable frame makes it an agent, with that
//! frame re-delivered through the normal relay path so nothing the agent
//! said is lost. Connections that stay silent past the deadline are dropped
//! before they touch any registry.

use std::future::Future;
use std::time::Duration;

use drover_proto::OperatorAuth;

/// Why a connection was dropped before taking a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// No first frame within the negotiation window.
    Timeout,
    /// The peer closed before sending anything.
    Closed,
}

/// Outcome of role negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// Authenticated operator. The auth frame is consumed.
    Operator,
    /// Agent side. `initial_frame` is re-delivered through the relay path
    /// when present; an unparseable first frame is discarded.
    Agent { initial_frame: Option<String> },
    /// Never took a role; the connection is closed unregistered.
    Abandoned(AbandonReason),
}

/// Classify a first frame. Auth with the wrong secret is not an error; the
/// frame simply reads as agent traffic.
pub fn classify_first_frame(text: &str, operator_secret: &str) -> Negotiation {
    match serde_json::from_str::<OperatorAuth>(text) {
        Ok(auth) if auth.secret == operator_secret => Negotiation::Operator,
        Ok(_) => Negotiation::Agent { initial_frame: Some(text.to_owned()) },
        Err(_) => {
            if serde_json::from_str::<serde_json::Value>(text).is_ok() {
                Negotiation::Agent { initial_frame: Some(text.to_owned()) }
            } else {
                tracing::debug!("unparseable first frame, treating as agent and discarding it");
                Negotiation::Agent { initial_frame: None }
            }
        }
    }
}

/// Drive negotiation against a connection's first text frame.
///
/// `first_frame` resolves to the first text payload, or `None` once the
/// peer is gone.
pub async fn negotiate<F>(first_frame: F, wait: Duration, operator_secret: &str) -> Negotiation
where
    F: Future<Output = Option<String>>,
{
    match tokio::time::timeout(wait, first_frame).await {
        Err(_) => Negotiation::Abandoned(AbandonReason::Timeout),
        Ok(None) => Negotiation::Abandoned(AbandonReason::Closed),
        Ok(Some(text)) => classify_first_frame(&text, operator_secret),
    }
}
