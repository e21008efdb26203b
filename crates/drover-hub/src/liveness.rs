//! Liveness sweeps
//!
//! Runs on the hub task's ping interval. A connection that produced no
//! traffic since the previous sweep is reaped; everyone else has their live
//! flag cleared and gets a transport ping. Any inbound frame or pong sets
//! the flag again, so a peer only has to show up once per interval.

use crate::hub::Hub;
use crate::registry::ConnectionRegistry;

impl Hub {
    pub(crate) fn sweep_liveness(&mut self) {
        for agent_id in sweep_registry(&mut self.agents) {
            self.retire_agent(agent_id, "liveness timeout");
        }
        for operator_id in sweep_registry(&mut self.operators) {
            self.operators.unregister(operator_id);
        }
    }
}

/// Clear flags and probe one registry, returning the ids to reap.
fn sweep_registry(registry: &mut ConnectionRegistry) -> Vec<u32> {
    let role = registry.role();
    let mut stale = Vec::new();

    for id in registry.ids() {
        let Some(record) = registry.get_mut(id) else { continue };
        if !record.live {
            tracing::debug!(role = role.as_str(), id, "no traffic since last sweep");
            stale.push(id);
        } else {
            record.live = false;
            if !record.sender.send_ping() {
                stale.push(id);
            }
        }
    }

    stale
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::oneshot;

    use crate::config::HubConfig;
    use crate::dispatch::{Outbound, PeerSender};
    use crate::hub::{Hub, HubEvent};

    fn test_hub() -> Hub {
        Hub::new(HubConfig::default().with_operator_secret("secret")).0
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    fn join_agent(hub: &mut Hub) -> (u32, UnboundedReceiver<Outbound>) {
        let (sender, mut rx) = PeerSender::channel();
        let (reply, mut reply_rx) = oneshot::channel();
        hub.handle_event(HubEvent::AgentJoined {
            address: "10.0.0.2".into(),
            port: 6000,
            sender,
            initial_frame: Some(r#"{"type":"identification","data":"Pixel 7"}"#.to_owned()),
            reply,
        });
        drain(&mut rx);
        (reply_rx.try_recv().unwrap(), rx)
    }

    fn join_operator(hub: &mut Hub) -> (u32, UnboundedReceiver<Outbound>) {
        let (sender, mut rx) = PeerSender::channel();
        let (reply, mut reply_rx) = oneshot::channel();
        hub.handle_event(HubEvent::OperatorJoined {
            address: "10.0.0.9".into(),
            port: 5000,
            sender,
            reply,
        });
        drain(&mut rx);
        (reply_rx.try_recv().unwrap(), rx)
    }

    #[tokio::test]
    async fn test_first_sweep_probes_instead_of_reaping() {
        let mut hub = test_hub();
        let (agent_id, mut agent_rx) = join_agent(&mut hub);

        hub.sweep_liveness();

        assert!(hub.agents.contains(agent_id));
        assert!(!hub.agents.get(agent_id).unwrap().live);
        assert_eq!(drain(&mut agent_rx), vec![Outbound::Ping]);
    }

    #[tokio::test]
    async fn test_silent_agent_is_reaped_on_second_sweep() {
        let mut hub = test_hub();
        let (agent_id, _agent_rx) = join_agent(&mut hub);
        let (_op, mut op_rx) = join_operator(&mut hub);
        drain(&mut op_rx);

        hub.sweep_liveness();
        hub.sweep_liveness();

        assert!(!hub.agents.contains(agent_id));
        assert!(hub.states.get(agent_id).is_none());

        let announced: Vec<Value> = drain(&mut op_rx)
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Frame(text) => serde_json::from_str(&text).ok(),
                _ => None,
            })
            .collect();
        assert_eq!(announced[0]["type"], "agent_disconnected");
        assert_eq!(announced[0]["agent_id"], agent_id as i64);
    }

    #[tokio::test]
    async fn test_inbound_frame_between_sweeps_prevents_reaping() {
        let mut hub = test_hub();
        let (agent_id, _agent_rx) = join_agent(&mut hub);

        hub.sweep_liveness();
        hub.handle_event(HubEvent::AgentFrame {
            agent_id,
            text: r#"{"type":"directory_changed","path":"/sdcard"}"#.to_owned(),
        });
        hub.sweep_liveness();

        assert!(hub.agents.contains(agent_id));
    }

    #[tokio::test]
    async fn test_pong_counts_as_liveness() {
        let mut hub = test_hub();
        let (agent_id, _agent_rx) = join_agent(&mut hub);

        hub.sweep_liveness();
        hub.handle_event(HubEvent::AgentPong { agent_id });
        hub.sweep_liveness();

        assert!(hub.agents.contains(agent_id));
        // Pongs keep the connection alive without counting as frames.
        assert_eq!(hub.agents.get(agent_id).unwrap().message_count, 1);
    }

    #[tokio::test]
    async fn test_dead_writer_is_reaped_when_probed() {
        let mut hub = test_hub();
        let (agent_id, agent_rx) = join_agent(&mut hub);
        drop(agent_rx);

        hub.sweep_liveness();

        assert!(!hub.agents.contains(agent_id));
        assert!(hub.states.get(agent_id).is_none());
    }

    #[tokio::test]
    async fn test_stale_operator_is_dropped_without_announcement() {
        let mut hub = test_hub();
        let (stale_op, _stale_rx) = join_operator(&mut hub);
        let (live_op, mut live_rx) = join_operator(&mut hub);

        hub.sweep_liveness();
        hub.handle_event(HubEvent::OperatorPong { operator_id: live_op });
        hub.sweep_liveness();

        assert!(!hub.operators.contains(stale_op));
        assert!(hub.operators.contains(live_op));

        // The surviving operator saw pings only, no departure frames.
        assert!(drain(&mut live_rx).iter().all(|item| matches!(item, Outbound::Ping)));
    }
}
