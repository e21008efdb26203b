//! Per-agent session state cache
//!
//! The hub keeps the last known browsing state of every connected agent so
//! operators can inspect an agent without asking it. Entries live exactly as
//! long as the agent's connection: state-bearing events upsert them and the
//! entry is dropped before the agent's departure is announced to operators.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use drover_proto::{AgentEvent, AgentStateView};

/// Progress of one in-flight upload on an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub progress: Option<f64>,
}

/// Cached state for a single agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub device_label: Option<String>,
    pub current_path: Option<String>,
    pub selected_files: Vec<String>,
    /// In-flight uploads keyed by file name.
    pub uploads: HashMap<String, UploadProgress>,
    pub wallpaper_file: Option<String>,
    pub last_update: DateTime<Utc>,
}

/// State cache for all connected agents, keyed by agent id.
#[derive(Debug, Default)]
pub struct SessionStateStore {
    states: HashMap<u32, SessionState>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a state-bearing agent event into the cache.
    ///
    /// Heartbeats and opaque frames carry no session state and never create
    /// an entry.
    pub fn apply(&mut self, agent_id: u32, event: &AgentEvent) {
        match event {
            AgentEvent::Identification { data, path, .. } => {
                let state = self.entry(agent_id);
                state.device_label = data.clone();
                if path.is_some() {
                    state.current_path = path.clone();
                }
            }
            AgentEvent::NavigationUpdate { data } => {
                let state = self.entry(agent_id);
                if data.current_path.is_some() {
                    state.current_path = data.current_path.clone();
                }
            }
            AgentEvent::SelectionUpdate { data } => {
                self.entry(agent_id).selected_files = data.selected_files.clone();
            }
            AgentEvent::UploadStarted { data } | AgentEvent::UploadProgress { data } => {
                self.entry(agent_id)
                    .uploads
                    .insert(data.file_name.clone(), UploadProgress { progress: data.progress });
            }
            AgentEvent::UploadCompleted { data } | AgentEvent::UploadFailed { data } => {
                self.entry(agent_id).uploads.remove(&data.file_name);
            }
            AgentEvent::DirectoryChanged { path } => {
                self.entry(agent_id).current_path = Some(path.clone());
            }
            AgentEvent::Heartbeat | AgentEvent::Opaque { .. } => {}
        }
    }

    /// Record the persisted wallpaper file for an agent.
    ///
    /// Only updates an existing entry; a persist that finishes after the
    /// agent left must not resurrect its state.
    pub fn set_wallpaper(&mut self, agent_id: u32, file_name: String) {
        if let Some(state) = self.states.get_mut(&agent_id) {
            state.wallpaper_file = Some(file_name);
            state.last_update = Utc::now();
        }
    }

    /// Drop an agent's entry, returning it if one existed.
    pub fn remove(&mut self, agent_id: u32) -> Option<SessionState> {
        let removed = self.states.remove(&agent_id);
        if removed.is_some() {
            tracing::debug!(agent_id, "session state dropped");
        }
        removed
    }

    pub fn get(&self, agent_id: u32) -> Option<&SessionState> {
        self.states.get(&agent_id)
    }

    /// Wire-facing snapshot of an agent's state.
    pub fn view(&self, agent_id: u32) -> Option<AgentStateView> {
        self.states.get(&agent_id).map(|state| AgentStateView {
            device_label: state.device_label.clone(),
            current_path: state.current_path.clone(),
            selected_files: state.selected_files.clone(),
            upload_queue_len: state.uploads.len(),
            wallpaper_file: state.wallpaper_file.clone(),
            last_update: state.last_update,
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn entry(&mut self, agent_id: u32) -> &mut SessionState {
        let state = self.states.entry(agent_id).or_default();
        state.last_update = Utc::now();
        state
    }
}
