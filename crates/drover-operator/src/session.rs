//! Operator session state machine
//!
//! Tracks the connection phase, the reconnect budget, and the caches that
//! outlive a single connection: known agents, per-agent working paths, and
//! the current selection. The console layer owns the socket; this module
//! only decides what the next move is.

use std::collections::HashMap;
use std::time::Duration;

use drover_proto::AgentSummary;

/// Working path assumed for an agent until it reports one.
pub const DEFAULT_AGENT_PATH: &str = "/storage/emulated/0";

/// Lifecycle of the hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transport; waiting out a reconnect delay or out of attempts
    Disconnected,
    /// Dialing the hub
    Connecting,
    /// Transport up, credentials sent, `operator_welcome` pending
    AwaitingAuth,
    /// Authenticated
    Active,
}

/// What to do after the transport dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPlan {
    /// Wait the fixed delay, then dial again. `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// Attempt budget spent; only a manual `reconnect` resumes.
    GiveUp,
}

/// Agent facts cached from connect notices and list snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInfo {
    pub address: String,
    pub port: u16,
    pub device: Option<String>,
}

/// Session state for one operator console.
///
/// The agent cache, path cache, and selection deliberately survive
/// transport loss; they are replaced by fresh hub data after reconnecting.
/// The selection clears only when the selected agent itself disconnects.
#[derive(Debug)]
pub struct OperatorSession {
    phase: SessionPhase,
    operator_id: Option<u32>,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
    selection: Option<u32>,
    agents: HashMap<u32, AgentInfo>,
    paths: HashMap<u32, String>,
}

impl OperatorSession {
    pub fn new(reconnect_delay: Duration, max_reconnect_attempts: u32) -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            operator_id: None,
            reconnect_attempts: 0,
            reconnect_delay,
            max_reconnect_attempts,
            selection: None,
            agents: HashMap::new(),
            paths: HashMap::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    /// Id assigned by the hub. Kept across disconnects for the prompt; the
    /// hub may assign a different one after reconnecting.
    pub fn operator_id(&self) -> Option<u32> {
        self.operator_id
    }

    pub fn selection(&self) -> Option<u32> {
        self.selection
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    /// The console is about to dial.
    pub fn begin_connect(&mut self) {
        self.phase = SessionPhase::Connecting;
    }

    /// Transport is up; credentials go out next.
    pub fn transport_opened(&mut self) {
        self.phase = SessionPhase::AwaitingAuth;
    }

    /// `operator_welcome` arrived. Resets the reconnect budget.
    pub fn authenticated(&mut self, operator_id: u32) {
        self.phase = SessionPhase::Active;
        self.operator_id = Some(operator_id);
        self.reconnect_attempts = 0;
    }

    /// Transport dropped (or never came up). Decides the next move; the
    /// delay is fixed per attempt, never scaled.
    pub fn connection_lost(&mut self) -> ReconnectPlan {
        self.phase = SessionPhase::Disconnected;
        if self.reconnect_attempts < self.max_reconnect_attempts {
            self.reconnect_attempts += 1;
            ReconnectPlan::Retry {
                attempt: self.reconnect_attempts,
                delay: self.reconnect_delay,
            }
        } else {
            ReconnectPlan::GiveUp
        }
    }

    /// Manual `reconnect` command: restore the attempt budget.
    pub fn manual_reset(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Select an agent as the target for file-manager commands. Refused
    /// for ids the cache has never seen.
    pub fn select(&mut self, agent_id: u32) -> bool {
        if self.agents.contains_key(&agent_id) {
            self.selection = Some(agent_id);
            true
        } else {
            false
        }
    }

    /// Drop the selection, returning the previously selected id.
    pub fn deselect(&mut self) -> Option<u32> {
        self.selection.take()
    }

    pub fn agent_info(&self, agent_id: u32) -> Option<&AgentInfo> {
        self.agents.get(&agent_id)
    }

    pub fn known_agent(&self, agent_id: u32) -> bool {
        self.agents.contains_key(&agent_id)
    }

    /// Hub announced a new agent.
    pub fn agent_connected(&mut self, agent_id: u32, info: AgentInfo) {
        self.agents.insert(agent_id, info);
        self.paths.insert(agent_id, DEFAULT_AGENT_PATH.to_string());
    }

    /// Hub announced an agent left. Returns true when this invalidated the
    /// current selection.
    pub fn agent_disconnected(&mut self, agent_id: u32) -> bool {
        self.agents.remove(&agent_id);
        self.paths.remove(&agent_id);
        if self.selection == Some(agent_id) {
            self.selection = None;
            true
        } else {
            false
        }
    }

    /// Replace the agent cache with a fresh `agent_list` snapshot.
    pub fn absorb_agent_list(&mut self, agents: &[AgentSummary]) {
        self.agents = agents
            .iter()
            .map(|agent| {
                (
                    agent.id,
                    AgentInfo {
                        address: agent.address.clone(),
                        port: agent.port,
                        device: agent.device.clone(),
                    },
                )
            })
            .collect();

        for agent in agents {
            let reported = agent
                .state
                .as_ref()
                .and_then(|state| state.current_path.clone());
            match reported {
                Some(path) => {
                    self.paths.insert(agent.id, path);
                }
                None => {
                    self.paths
                        .entry(agent.id)
                        .or_insert_with(|| DEFAULT_AGENT_PATH.to_string());
                }
            }
        }
    }

    /// Last path the agent reported, or the default for unknown agents.
    pub fn path_for(&self, agent_id: u32) -> &str {
        self.paths
            .get(&agent_id)
            .map(String::as_str)
            .unwrap_or(DEFAULT_AGENT_PATH)
    }

    /// Record a path the agent just reported.
    pub fn note_path(&mut self, agent_id: u32, path: impl Into<String>) {
        self.paths.insert(agent_id, path.into());
    }
}
