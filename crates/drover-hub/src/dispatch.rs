//! Unicast and fan-out delivery
//!
//! Payloads travel through per-connection outbound queues drained by each
//! connection's writer task. A send failure means the writer is gone, so the
//! entry is reaped from the registry on the spot (lazy dead-connection
//! cleanup); callers are told which ids were reaped so dependent state can be
//! cleaned up through the hub's single dispatch path.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::registry::ConnectionRegistry;

/// One item queued toward a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A text frame, serialized once and shared between destinations.
    Frame(Arc<str>),
    /// Transport-level liveness probe.
    Ping,
    /// Orderly close after any already queued frames.
    Close,
}

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct PeerSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PeerSender {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// Build a sender together with the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Queue a frame. `false` means the writer task is gone.
    pub fn send_frame(&self, frame: Arc<str>) -> bool {
        self.tx.send(Outbound::Frame(frame)).is_ok()
    }

    pub fn send_ping(&self) -> bool {
        self.tx.send(Outbound::Ping).is_ok()
    }

    /// Request an orderly close. Best effort; a dead writer is already closed.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Result of a single unicast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnicastOutcome {
    Delivered,
    /// No registry entry for the id.
    NotFound,
    /// The entry existed but its transport was dead; it has been removed.
    Reaped,
}

impl UnicastOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, UnicastOutcome::Delivered)
    }
}

/// Deliver one payload to one connection.
///
/// Never panics; a missing id or dead transport is an ordinary failure.
pub fn unicast(registry: &mut ConnectionRegistry, id: u32, payload: &Arc<str>) -> UnicastOutcome {
    let Some(record) = registry.get(id) else {
        return UnicastOutcome::NotFound;
    };

    if record.sender.send_frame(payload.clone()) {
        UnicastOutcome::Delivered
    } else {
        tracing::debug!(role = registry.role().as_str(), id, "reaping dead connection on send");
        registry.unregister(id);
        UnicastOutcome::Reaped
    }
}

/// Result of a broadcast: how many destinations accepted the payload, and
/// which entries turned out to be dead along the way.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub reaped: Vec<u32>,
}

/// Deliver one payload to every connection in the registry, continuing past
/// individual failures. No ordering between destinations.
pub fn broadcast(registry: &mut ConnectionRegistry, payload: &Arc<str>) -> FanoutReport {
    let mut report = FanoutReport::default();

    for id in registry.ids() {
        match unicast(registry, id, payload) {
            UnicastOutcome::Delivered => report.delivered += 1,
            UnicastOutcome::Reaped => report.reaped.push(id),
            UnicastOutcome::NotFound => {}
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PeerRole;

    fn payload(text: &str) -> Arc<str> {
        Arc::from(text)
    }

    #[test]
    fn test_unicast_to_missing_id_fails_without_mutation() {
        let mut registry = ConnectionRegistry::new(PeerRole::Agent);
        let (sender, _rx) = PeerSender::channel();
        registry.register("10.0.0.1".into(), 4000, sender);

        let outcome = unicast(&mut registry, 99, &payload("x"));
        assert_eq!(outcome, UnicastOutcome::NotFound);
        assert!(!outcome.is_delivered());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unicast_delivers_exact_payload() {
        let mut registry = ConnectionRegistry::new(PeerRole::Agent);
        let (sender, mut rx) = PeerSender::channel();
        let id = registry.register("10.0.0.1".into(), 4000, sender);

        let outcome = unicast(&mut registry, id, &payload(r#"{"type":"list_files"}"#));
        assert!(outcome.is_delivered());

        match rx.try_recv().unwrap() {
            Outbound::Frame(frame) => assert_eq!(&*frame, r#"{"type":"list_files"}"#),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_unicast_reaps_dead_connection() {
        let mut registry = ConnectionRegistry::new(PeerRole::Agent);
        let (sender, rx) = PeerSender::channel();
        let id = registry.register("10.0.0.1".into(), 4000, sender);
        drop(rx);

        let outcome = unicast(&mut registry, id, &payload("x"));
        assert_eq!(outcome, UnicastOutcome::Reaped);
        assert!(registry.get(id).is_none());

        // A second attempt sees a plainly missing id.
        assert_eq!(unicast(&mut registry, id, &payload("x")), UnicastOutcome::NotFound);
    }

    #[test]
    fn test_broadcast_counts_only_live_destinations() {
        let mut registry = ConnectionRegistry::new(PeerRole::Agent);

        let (s1, mut r1) = PeerSender::channel();
        let (s2, r2) = PeerSender::channel();
        let (s3, mut r3) = PeerSender::channel();
        registry.register("10.0.0.1".into(), 1, s1);
        let dead = registry.register("10.0.0.2".into(), 2, s2);
        registry.register("10.0.0.3".into(), 3, s3);
        drop(r2);

        let report = broadcast(&mut registry, &payload("hello"));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.reaped, vec![dead]);
        assert_eq!(registry.len(), 2);

        assert!(matches!(r1.try_recv().unwrap(), Outbound::Frame(_)));
        assert!(matches!(r3.try_recv().unwrap(), Outbound::Frame(_)));
    }

    #[test]
    fn test_broadcast_on_empty_registry() {
        let mut registry = ConnectionRegistry::new(PeerRole::Operator);
        let report = broadcast(&mut registry, &payload("hello"));
        assert_eq!(report, FanoutReport::default());
    }
}
