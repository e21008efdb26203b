//! Operator command routing
//!
//! One entry point per operator frame. Unknown tags and malformed payloads
//! are answered with an error frame naming the problem and the connection
//! stays open; only transport failures end an operator session.

use std::sync::Arc;

use chrono::Utc;
use drover_proto::{
    AgentSummary, HubMessage, OperatorCommand, OperatorSummary, ParsedCommand,
};

use crate::dispatch::UnicastOutcome;
use crate::hub::Hub;

impl Hub {
    pub(crate) fn ingest_operator_frame(&mut self, operator_id: u32, text: &str) {
        let command = match OperatorCommand::parse(text) {
            Ok(ParsedCommand::Command(command)) => command,
            Ok(ParsedCommand::Unknown { tag }) => {
                tracing::debug!(operator_id, tag, "unknown operator command");
                self.reply_to_operator(
                    operator_id,
                    &HubMessage::Error { message: format!("unknown command: {tag}") },
                );
                return;
            }
            Err(error) => {
                tracing::debug!(operator_id, %error, "malformed operator frame");
                self.reply_to_operator(
                    operator_id,
                    &HubMessage::Error { message: format!("malformed command: {error}") },
                );
                return;
            }
        };

        match command {
            OperatorCommand::ListAgents => {
                let agents = self.agent_summaries();
                let total = agents.len();
                self.reply_to_operator(
                    operator_id,
                    &HubMessage::AgentList { agents, total, timestamp: Utc::now() },
                );
            }
            OperatorCommand::ListOperators => {
                let operators = self.operator_summaries();
                let total = operators.len();
                self.reply_to_operator(
                    operator_id,
                    &HubMessage::OperatorList { operators, total, timestamp: Utc::now() },
                );
            }
            OperatorCommand::ServerStatus => {
                let status = self.status_report();
                self.reply_to_operator(
                    operator_id,
                    &HubMessage::ServerStatus { status, timestamp: Utc::now() },
                );
            }
            OperatorCommand::SendToAgent { agent_id, message } => {
                let outcome = self.unicast_to_agent(agent_id, Arc::from(message.to_string()));
                let result = if outcome == UnicastOutcome::Delivered {
                    HubMessage::CommandResult {
                        success: true,
                        message: format!("delivered to agent {agent_id}"),
                        delivered: None,
                    }
                } else {
                    HubMessage::CommandResult {
                        success: false,
                        message: format!("agent {agent_id} not found"),
                        delivered: None,
                    }
                };
                self.reply_to_operator(operator_id, &result);
            }
            OperatorCommand::BroadcastToAgents { message } => {
                let delivered = self.fanout_to_agents(&Arc::from(message.to_string()));
                self.reply_to_operator(
                    operator_id,
                    &HubMessage::CommandResult {
                        success: true,
                        message: format!("broadcast to {delivered} agents"),
                        delivered: Some(delivered),
                    },
                );
            }
            OperatorCommand::KickAgent { agent_id } => {
                if let Some(record) = self.agents.get(agent_id) {
                    record.sender.close();
                    tracing::info!(agent_id, operator_id, "agent kick requested");
                }
                // Kicking an absent agent still succeeds; the goal state is
                // already reached.
                self.reply_to_operator(
                    operator_id,
                    &HubMessage::CommandResult {
                        success: true,
                        message: format!("agent {agent_id} disconnect requested"),
                        delivered: None,
                    },
                );
            }
            OperatorCommand::GetAgentState { agent_id } => {
                let state = self.states.view(agent_id);
                self.reply_to_operator(operator_id, &HubMessage::AgentState { agent_id, state });
            }
            OperatorCommand::Heartbeat => {
                self.reply_to_operator(
                    operator_id,
                    &HubMessage::HeartbeatAck { timestamp: Utc::now() },
                );
            }
        }
    }

    fn agent_summaries(&self) -> Vec<AgentSummary> {
        self.agents
            .ids()
            .into_iter()
            .filter_map(|id| self.agents.get(id))
            .map(|record| AgentSummary {
                id: record.id,
                address: record.address.to_string(),
                port: record.port,
                device: record.device.clone(),
                connected_at: record.connected_at,
                last_activity: record.last_activity,
                message_count: record.message_count,
                live: record.live,
                state: self.states.view(record.id),
            })
            .collect()
    }

    fn operator_summaries(&self) -> Vec<OperatorSummary> {
        self.operators
            .ids()
            .into_iter()
            .filter_map(|id| self.operators.get(id))
            .map(|record| OperatorSummary {
                id: record.id,
                address: record.address.to_string(),
                port: record.port,
                connected_at: record.connected_at,
                message_count: record.message_count,
            })
            .collect()
    }
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

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Frame(text) = item {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
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

    fn join_agent(hub: &mut Hub, initial_frame: Option<&str>) -> (u32, UnboundedReceiver<Outbound>) {
        let (sender, mut rx) = PeerSender::channel();
        let (reply, mut reply_rx) = oneshot::channel();
        hub.handle_event(HubEvent::AgentJoined {
            address: "10.0.0.2".into(),
            port: 6000,
            sender,
            initial_frame: initial_frame.map(str::to_owned),
            reply,
        });
        drain(&mut rx);
        (reply_rx.try_recv().unwrap(), rx)
    }

    fn operator_says(hub: &mut Hub, operator_id: u32, text: &str) {
        hub.handle_event(HubEvent::OperatorFrame { operator_id, text: text.to_owned() });
    }

    #[tokio::test]
    async fn test_list_agents_includes_device_and_state() {
        let mut hub = test_hub();
        join_agent(&mut hub, Some(r#"{"type":"identification","data":"Pixel 7","path":"/sdcard"}"#));
        join_agent(&mut hub, None);
        let (operator_id, mut op_rx) = join_operator(&mut hub);
        drain(&mut op_rx);

        operator_says(&mut hub, operator_id, r#"{"type":"list_agents"}"#);

        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "agent_list");
        assert_eq!(reply["total"], 2);
        assert_eq!(reply["agents"][0]["id"], 1);
        assert_eq!(reply["agents"][0]["device"], "Pixel 7");
        assert_eq!(reply["agents"][0]["state"]["current_path"], "/sdcard");
        assert_eq!(reply["agents"][1]["device"], Value::Null);
        assert_eq!(reply["agents"][1]["state"], Value::Null);
    }

    #[tokio::test]
    async fn test_list_operators_reports_every_operator() {
        let mut hub = test_hub();
        let (first, mut op_rx) = join_operator(&mut hub);
        join_operator(&mut hub);

        operator_says(&mut hub, first, r#"{"type":"list_operators"}"#);

        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "operator_list");
        assert_eq!(reply["total"], 2);
        assert_eq!(reply["operators"][0]["id"], 1);
        assert_eq!(reply["operators"][1]["id"], 2);
    }

    #[tokio::test]
    async fn test_server_status_reports_counts_and_uptime() {
        let mut hub = test_hub();
        join_agent(&mut hub, Some(r#"{"type":"identification","data":"Pixel 7"}"#));
        let (operator_id, mut op_rx) = join_operator(&mut hub);

        operator_says(&mut hub, operator_id, r#"{"type":"server_status"}"#);

        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "server_status");
        assert_eq!(reply["status"]["port"], 8080);
        assert_eq!(reply["status"]["agents"], 1);
        assert_eq!(reply["status"]["operators"], 1);
        assert_eq!(reply["status"]["tracked_states"], 1);
        assert!(reply["status"]["uptime_human"].is_string());
    }

    #[tokio::test]
    async fn test_send_to_agent_forwards_payload_verbatim() {
        let mut hub = test_hub();
        let (agent_id, mut agent_rx) = join_agent(&mut hub, None);
        let (operator_id, mut op_rx) = join_operator(&mut hub);

        let frame = format!(
            r#"{{"type":"send_to_agent","agent_id":{agent_id},"message":{{"type":"list_files","path":"/sdcard"}}}}"#
        );
        operator_says(&mut hub, operator_id, &frame);

        let delivered = drain(&mut agent_rx).pop().unwrap();
        assert_eq!(delivered["type"], "list_files");
        assert_eq!(delivered["path"], "/sdcard");

        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "command_result");
        assert_eq!(reply["success"], true);
        assert!(reply.get("delivered").is_none());
    }

    #[tokio::test]
    async fn test_send_to_missing_agent_fails_softly() {
        let mut hub = test_hub();
        let (operator_id, mut op_rx) = join_operator(&mut hub);

        operator_says(
            &mut hub,
            operator_id,
            r#"{"type":"send_to_agent","agent_id":7,"message":{"type":"ping"}}"#,
        );

        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "command_result");
        assert_eq!(reply["success"], false);
        assert_eq!(reply["message"], "agent 7 not found");
    }

    #[tokio::test]
    async fn test_send_to_dead_agent_triggers_cleanup() {
        let mut hub = test_hub();
        let (agent_id, agent_rx) =
            join_agent(&mut hub, Some(r#"{"type":"identification","data":"Pixel 7"}"#));
        let (operator_id, mut op_rx) = join_operator(&mut hub);
        drop(agent_rx);

        let frame = format!(
            r#"{{"type":"send_to_agent","agent_id":{agent_id},"message":{{"type":"ping"}}}}"#
        );
        operator_says(&mut hub, operator_id, &frame);

        assert!(hub.agents.get(agent_id).is_none());
        assert!(hub.states.get(agent_id).is_none());

        let frames = drain(&mut op_rx);
        assert_eq!(frames[0]["type"], "agent_disconnected");
        assert_eq!(frames[1]["type"], "command_result");
        assert_eq!(frames[1]["success"], false);
    }

    #[tokio::test]
    async fn test_broadcast_reports_delivered_count() {
        let mut hub = test_hub();
        let (_a, mut rx_a) = join_agent(&mut hub, None);
        let (_b, mut rx_b) = join_agent(&mut hub, None);
        let (operator_id, mut op_rx) = join_operator(&mut hub);

        operator_says(
            &mut hub,
            operator_id,
            r#"{"type":"broadcast_to_agents","message":{"type":"refresh"}}"#,
        );

        assert_eq!(drain(&mut rx_a).pop().unwrap()["type"], "refresh");
        assert_eq!(drain(&mut rx_b).pop().unwrap()["type"], "refresh");

        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "command_result");
        assert_eq!(reply["success"], true);
        assert_eq!(reply["delivered"], 2);
    }

    #[tokio::test]
    async fn test_broadcast_skips_and_reaps_dead_agent() {
        let mut hub = test_hub();
        let (_a, _rx_a) = join_agent(&mut hub, None);
        let (_b, _rx_b) = join_agent(&mut hub, None);
        let (_c, _rx_c) = join_agent(&mut hub, None);
        let (dead, dead_rx) = join_agent(&mut hub, None);
        let (op_one, mut rx_one) = join_operator(&mut hub);
        let (op_two, mut rx_two) = join_operator(&mut hub);
        drop(dead_rx);

        operator_says(
            &mut hub,
            op_one,
            r#"{"type":"broadcast_to_agents","message":{"type":"refresh"}}"#,
        );

        let frames = drain(&mut rx_one);
        assert_eq!(frames[0]["type"], "agent_disconnected");
        assert_eq!(frames[0]["agent_id"], dead as i64);
        assert_eq!(frames[1]["type"], "command_result");
        assert_eq!(frames[1]["delivered"], 3);
        assert_eq!(drain(&mut rx_two)[0]["type"], "agent_disconnected");
        assert!(!hub.agents.contains(dead));

        // Both operators' next listing omits the reaped entry.
        for (operator_id, rx) in [(op_one, &mut rx_one), (op_two, &mut rx_two)] {
            operator_says(&mut hub, operator_id, r#"{"type":"list_agents"}"#);
            let list = drain(rx).pop().unwrap();
            assert_eq!(list["total"], 3);
            let ids: Vec<_> = list["agents"]
                .as_array()
                .unwrap()
                .iter()
                .map(|agent| agent["id"].as_i64().unwrap())
                .collect();
            assert!(!ids.contains(&(dead as i64)));
        }
    }

    #[tokio::test]
    async fn test_kick_succeeds_for_live_and_absent_agents() {
        let mut hub = test_hub();
        let (agent_id, mut agent_rx) = join_agent(&mut hub, None);
        let (operator_id, mut op_rx) = join_operator(&mut hub);

        let frame = format!(r#"{{"type":"kick_agent","agent_id":{agent_id}}}"#);
        operator_says(&mut hub, operator_id, &frame);

        // Close is queued; registry cleanup happens when the connection
        // actually drops.
        assert_eq!(agent_rx.try_recv().unwrap(), Outbound::Close);
        assert!(hub.agents.contains(agent_id));
        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["success"], true);

        operator_says(&mut hub, operator_id, r#"{"type":"kick_agent","agent_id":99}"#);
        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "command_result");
        assert_eq!(reply["success"], true);
    }

    #[tokio::test]
    async fn test_get_agent_state_returns_null_when_absent() {
        let mut hub = test_hub();
        let (agent_id, _agent_rx) =
            join_agent(&mut hub, Some(r#"{"type":"identification","data":"Pixel 7"}"#));
        let (operator_id, mut op_rx) = join_operator(&mut hub);
        drain(&mut op_rx);

        let frame = format!(r#"{{"type":"get_agent_state","agent_id":{agent_id}}}"#);
        operator_says(&mut hub, operator_id, &frame);
        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "agent_state");
        assert_eq!(reply["state"]["device_label"], "Pixel 7");

        operator_says(&mut hub, operator_id, r#"{"type":"get_agent_state","agent_id":50}"#);
        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["agent_id"], 50);
        assert_eq!(reply["state"], Value::Null);
    }

    #[tokio::test]
    async fn test_operator_heartbeat_is_acked() {
        let mut hub = test_hub();
        let (operator_id, mut op_rx) = join_operator(&mut hub);

        operator_says(&mut hub, operator_id, r#"{"type":"heartbeat"}"#);

        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "heartbeat_ack");
        assert!(reply["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_command_is_named_and_connection_survives() {
        let mut hub = test_hub();
        let (_agent, mut agent_rx) = join_agent(&mut hub, None);
        let (operator_id, mut op_rx) = join_operator(&mut hub);

        operator_says(&mut hub, operator_id, r#"{"type":"reboot_moon_base"}"#);
        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "unknown command: reboot_moon_base");
        assert!(drain(&mut agent_rx).is_empty());

        // The next command still works.
        operator_says(&mut hub, operator_id, r#"{"type":"heartbeat"}"#);
        assert_eq!(drain(&mut op_rx).pop().unwrap()["type"], "heartbeat_ack");
        assert!(hub.operators.contains(operator_id));
    }

    #[tokio::test]
    async fn test_malformed_known_command_reports_its_tag() {
        let mut hub = test_hub();
        let (operator_id, mut op_rx) = join_operator(&mut hub);

        operator_says(&mut hub, operator_id, r#"{"type":"send_to_agent","agent_id":"nope"}"#);

        let reply = drain(&mut op_rx).pop().unwrap();
        assert_eq!(reply["type"], "error");
        let message = reply["message"].as_str().unwrap();
        assert!(message.contains("send_to_agent"), "unexpected message: {message}");
        assert!(hub.operators.contains(operator_id));
    }
}
