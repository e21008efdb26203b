//! Protocol message types
//!
//! All envelopes are JSON objects with a `type` tag. Operator frames parse
//! into [`OperatorCommand`] (unknown tags become an explicit
//! [`ParsedCommand::Unknown`] rather than falling into a default branch).
//! Agent frames never fail to parse: anything that is not a recognized
//! event degrades to [`AgentEvent::Opaque`] and is relayed verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::TAG_FIELD;

/// Credential envelope, the first frame an operator submits.
///
/// Anything else on a fresh connection (including this tag with a wrong
/// secret) classifies the peer as an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename = "operator_auth")]
pub struct OperatorAuth {
    pub secret: String,
}

/// Commands an authenticated operator may issue against the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorCommand {
    ListAgents,
    ListOperators,
    ServerStatus,
    SendToAgent { agent_id: u32, message: Value },
    BroadcastToAgents { message: Value },
    KickAgent { agent_id: u32 },
    GetAgentState { agent_id: u32 },
    Heartbeat,
}

/// Wire tags accepted as operator commands, kept in sync with
/// [`OperatorCommand`] (checked by test).
pub const KNOWN_COMMANDS: &[&str] = &[
    "list_agents",
    "list_operators",
    "server_status",
    "send_to_agent",
    "broadcast_to_agents",
    "kick_agent",
    "get_agent_state",
    "heartbeat",
];

/// Outcome of parsing one operator frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCommand {
    Command(OperatorCommand),
    /// Well-formed envelope whose tag names no known command.
    Unknown { tag: String },
}

impl OperatorCommand {
    /// Parse an operator frame.
    ///
    /// Unknown tags are not errors (the router answers them by name);
    /// syntactically broken frames and bad payloads for known tags are.
    pub fn parse(text: &str) -> Result<ParsedCommand, ProtoError> {
        let value: Value = serde_json::from_str(text)?;
        let tag = value
            .get(TAG_FIELD)
            .and_then(Value::as_str)
            .ok_or(ProtoError::MissingTag)?
            .to_owned();

        if !KNOWN_COMMANDS.contains(&tag.as_str()) {
            return Ok(ParsedCommand::Unknown { tag });
        }

        match serde_json::from_value(value) {
            Ok(command) => Ok(ParsedCommand::Command(command)),
            Err(source) => Err(ProtoError::BadPayload { tag, source }),
        }
    }
}

/// One inbound agent frame: the raw text (always relayed unmodified) plus
/// the parsed event layered on top for the session-state cache.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentFrame {
    pub raw: String,
    pub event: AgentEvent,
}

impl AgentFrame {
    /// Classify an agent frame. Never fails; unrecognized or unparseable
    /// input becomes [`AgentEvent::Opaque`].
    pub fn parse(text: &str) -> Self {
        let event = match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                let tag = value
                    .get(TAG_FIELD)
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                match serde_json::from_value::<AgentEvent>(value) {
                    Ok(event) => event,
                    Err(_) => AgentEvent::Opaque { tag },
                }
            }
            Err(_) => AgentEvent::Opaque { tag: None },
        };

        Self {
            raw: text.to_owned(),
            event,
        }
    }
}

/// Events agents report about themselves.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// First self-description; `data` is the device label, `wallpaper` an
    /// optionally attached base64 screenshot of the home screen.
    Identification {
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        wallpaper: Option<String>,
    },
    NavigationUpdate {
        data: NavigationData,
    },
    SelectionUpdate {
        data: SelectionData,
    },
    UploadStarted {
        data: UploadData,
    },
    UploadProgress {
        data: UploadData,
    },
    UploadCompleted {
        data: UploadData,
    },
    UploadFailed {
        data: UploadData,
    },
    DirectoryChanged {
        path: String,
    },
    /// Application-level liveness ping; answered directly.
    Heartbeat,
    /// Anything else. Relayed to operators, never touches the state cache.
    #[serde(skip)]
    Opaque { tag: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationData {
    #[serde(default)]
    pub current_path: Option<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub files_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionData {
    #[serde(default)]
    pub selected_files: Vec<String>,
    #[serde(default)]
    pub selected_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadData {
    pub file_name: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One directory entry inside a `navigation_update` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    #[serde(default)]
    pub is_directory: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime: Option<String>,
}

/// Everything the hub sends to its peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// Greeting to a freshly registered agent.
    Welcome {
        agent_id: u32,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// Greeting to a freshly authenticated operator.
    OperatorWelcome {
        operator_id: u32,
        message: String,
        stats: HubStats,
        timestamp: DateTime<Utc>,
    },
    AgentConnected {
        agent_id: u32,
        address: String,
        port: u16,
        device: Option<String>,
        timestamp: DateTime<Utc>,
    },
    AgentDisconnected {
        agent_id: u32,
        timestamp: DateTime<Utc>,
    },
    /// One agent frame relayed verbatim, wrapped with origin and receive
    /// time. `payload` is the agent's raw text.
    AgentEvent {
        agent_id: u32,
        payload: String,
        timestamp: DateTime<Utc>,
    },
    AgentList {
        agents: Vec<AgentSummary>,
        total: usize,
        timestamp: DateTime<Utc>,
    },
    OperatorList {
        operators: Vec<OperatorSummary>,
        total: usize,
        timestamp: DateTime<Utc>,
    },
    ServerStatus {
        status: StatusReport,
        timestamp: DateTime<Utc>,
    },
    CommandResult {
        success: bool,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delivered: Option<usize>,
    },
    AgentState {
        agent_id: u32,
        state: Option<AgentStateView>,
    },
    HeartbeatAck {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
    Shutdown {
        message: String,
    },
}

/// Aggregate connection counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HubStats {
    pub agents: usize,
    pub operators: usize,
}

/// One agent registry entry joined with its cached state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSummary {
    pub id: u32,
    pub address: String,
    pub port: u16,
    pub device: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    pub live: bool,
    pub state: Option<AgentStateView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatorSummary {
    pub id: u32,
    pub address: String,
    pub port: u16,
    pub connected_at: DateTime<Utc>,
    pub message_count: u64,
}

/// Hub self-description for `server_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub port: u16,
    pub agents: usize,
    pub operators: usize,
    pub tracked_states: usize,
    pub uptime_secs: u64,
    pub uptime_human: String,
    pub memory_bytes: Option<u64>,
    pub started_at: DateTime<Utc>,
}

/// The hub's cached view of one agent, a convenience layer over the raw
/// event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStateView {
    pub device_label: Option<String>,
    pub current_path: Option<String>,
    pub selected_files: Vec<String>,
    pub upload_queue_len: usize,
    pub wallpaper_file: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl HubMessage {
    /// Serialize for the wire. Infallible for every constructible variant.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"internal serialization failure"}"#.to_owned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_each_known_command() {
        let frames = [
            r#"{"type":"list_agents"}"#,
            r#"{"type":"list_operators"}"#,
            r#"{"type":"server_status"}"#,
            r#"{"type":"send_to_agent","agent_id":3,"message":{"type":"list_files"}}"#,
            r#"{"type":"broadcast_to_agents","message":"hello"}"#,
            r#"{"type":"kick_agent","agent_id":7}"#,
            r#"{"type":"get_agent_state","agent_id":1}"#,
            r#"{"type":"heartbeat"}"#,
        ];

        for frame in frames {
            match OperatorCommand::parse(frame).unwrap() {
                ParsedCommand::Command(_) => {}
                other => panic!("expected command for {frame}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_known_commands_list_matches_enum() {
        let variants = [
            OperatorCommand::ListAgents,
            OperatorCommand::ListOperators,
            OperatorCommand::ServerStatus,
            OperatorCommand::SendToAgent {
                agent_id: 1,
                message: json!({}),
            },
            OperatorCommand::BroadcastToAgents {
                message: json!("x"),
            },
            OperatorCommand::KickAgent { agent_id: 1 },
            OperatorCommand::GetAgentState { agent_id: 1 },
            OperatorCommand::Heartbeat,
        ];
        assert_eq!(variants.len(), KNOWN_COMMANDS.len());

        for variant in &variants {
            let value = serde_json::to_value(variant).unwrap();
            let tag = value.get(TAG_FIELD).and_then(Value::as_str).unwrap();
            assert!(
                KNOWN_COMMANDS.contains(&tag),
                "tag {tag} missing from KNOWN_COMMANDS"
            );
        }
    }

    #[test]
    fn test_unknown_tag_is_explicit_variant() {
        let parsed = OperatorCommand::parse(r#"{"type":"frobnicate","x":1}"#).unwrap();
        assert_eq!(
            parsed,
            ParsedCommand::Unknown {
                tag: "frobnicate".to_string()
            }
        );
    }

    #[test]
    fn test_missing_tag_is_error() {
        let err = OperatorCommand::parse(r#"{"agent_id":1}"#).unwrap_err();
        assert!(matches!(err, ProtoError::MissingTag));
    }

    #[test]
    fn test_bad_payload_names_tag() {
        let err = OperatorCommand::parse(r#"{"type":"kick_agent"}"#).unwrap_err();
        match err {
            ProtoError::BadPayload { tag, .. } => assert_eq!(tag, "kick_agent"),
            other => panic!("expected BadPayload, got {other:?}"),
        }
    }

    #[test]
    fn test_non_json_is_syntax_error() {
        let err = OperatorCommand::parse("ls -la").unwrap_err();
        assert!(matches!(err, ProtoError::Syntax(_)));
    }

    #[test]
    fn test_agent_identification_frame() {
        let text = r#"{"type":"identification","data":"pixel-7","path":"/storage/emulated/0","wallpaper":"data:image/png;base64,AAAA"}"#;
        let frame = AgentFrame::parse(text);
        assert_eq!(frame.raw, text);
        match frame.event {
            AgentEvent::Identification {
                data,
                path,
                wallpaper,
            } => {
                assert_eq!(data.as_deref(), Some("pixel-7"));
                assert_eq!(path.as_deref(), Some("/storage/emulated/0"));
                assert!(wallpaper.is_some());
            }
            other => panic!("expected identification, got {other:?}"),
        }
    }

    #[test]
    fn test_agent_navigation_uses_camel_case_payload() {
        let text = r#"{"type":"navigation_update","data":{"currentPath":"/a/b","files":[{"name":"x.txt","isDirectory":false,"size":12}],"filesCount":1}}"#;
        let frame = AgentFrame::parse(text);
        match frame.event {
            AgentEvent::NavigationUpdate { data } => {
                assert_eq!(data.current_path.as_deref(), Some("/a/b"));
                assert_eq!(data.files.len(), 1);
                assert_eq!(data.files[0].name, "x.txt");
                assert_eq!(data.files_count, Some(1));
            }
            other => panic!("expected navigation_update, got {other:?}"),
        }
    }

    #[test]
    fn test_agent_unknown_tag_is_opaque() {
        let frame = AgentFrame::parse(r#"{"type":"battery_report","level":80}"#);
        assert_eq!(
            frame.event,
            AgentEvent::Opaque {
                tag: Some("battery_report".to_string())
            }
        );
        assert_eq!(frame.raw, r#"{"type":"battery_report","level":80}"#);
    }

    #[test]
    fn test_agent_bad_payload_for_known_tag_is_opaque() {
        let frame = AgentFrame::parse(r#"{"type":"navigation_update","data":"not-an-object"}"#);
        assert_eq!(
            frame.event,
            AgentEvent::Opaque {
                tag: Some("navigation_update".to_string())
            }
        );
    }

    #[test]
    fn test_agent_non_json_is_opaque_with_raw_preserved() {
        let frame = AgentFrame::parse("hello there");
        assert_eq!(frame.event, AgentEvent::Opaque { tag: None });
        assert_eq!(frame.raw, "hello there");
    }

    #[test]
    fn test_operator_auth_round_trip() {
        let auth = OperatorAuth {
            secret: "swordfish".to_string(),
        };
        let text = serde_json::to_string(&auth).unwrap();
        assert!(text.contains(r#""type":"operator_auth""#));

        let back: OperatorAuth = serde_json::from_str(&text).unwrap();
        assert_eq!(back, auth);
    }

    #[test]
    fn test_operator_auth_rejects_other_tags() {
        let result = serde_json::from_str::<OperatorAuth>(
            r#"{"type":"identification","secret":"swordfish"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_hub_message_tags() {
        let msg = HubMessage::AgentDisconnected {
            agent_id: 4,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value[TAG_FIELD], "agent_disconnected");

        let msg = HubMessage::HeartbeatAck {
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value[TAG_FIELD], "heartbeat_ack");
    }

    #[test]
    fn test_command_result_omits_absent_delivered() {
        let msg = HubMessage::CommandResult {
            success: true,
            message: "ok".to_string(),
            delivered: None,
        };
        let text = msg.to_text();
        assert!(!text.contains("delivered"));

        let msg = HubMessage::CommandResult {
            success: true,
            message: "ok".to_string(),
            delivered: Some(3),
        };
        assert!(msg.to_text().contains(r#""delivered":3"#));
    }

    #[test]
    fn test_relayed_payload_is_verbatim() {
        let raw = r#"{"type":"battery_report","level":80}"#;
        let msg = HubMessage::AgentEvent {
            agent_id: 2,
            payload: raw.to_string(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["payload"], raw);
    }
}
