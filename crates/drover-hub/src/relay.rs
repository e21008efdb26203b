//! Agent frame ingestion
//!
//! Every frame an agent sends is wrapped with its origin and receive time
//! and fanned out to all operators before the hub looks at it. Processing
//! afterwards only feeds the session-state cache and the few direct replies
//! agents get; a frame the hub cannot interpret has still been relayed.

use chrono::Utc;
use drover_proto::{AgentEvent, AgentFrame, HubMessage};

use crate::hub::Hub;

impl Hub {
    pub(crate) fn ingest_agent_frame(&mut self, agent_id: u32, frame: AgentFrame) {
        self.fanout_to_operators(&HubMessage::AgentEvent {
            agent_id,
            payload: frame.raw,
            timestamp: Utc::now(),
        });

        self.states.apply(agent_id, &frame.event);

        match frame.event {
            AgentEvent::Identification { data, wallpaper, .. } => {
                if let Some(label) = &data {
                    if let Some(record) = self.agents.get_mut(agent_id) {
                        record.device = Some(label.clone());
                    }
                    tracing::info!(agent_id, device = %label, "agent identified");
                }
                if let Some(encoded) = wallpaper.filter(|encoded| !encoded.is_empty()) {
                    let label = data.unwrap_or_else(|| format!("agent-{agent_id}"));
                    self.spawn_wallpaper_persist(agent_id, label, encoded);
                }
            }
            AgentEvent::Heartbeat => {
                self.send_to_agent(agent_id, &HubMessage::HeartbeatAck { timestamp: Utc::now() });
            }
            AgentEvent::Opaque { tag } => {
                tracing::debug!(
                    agent_id,
                    tag = tag.as_deref().unwrap_or("<none>"),
                    "opaque agent frame relayed"
                );
            }
            _ => {}
        }
    }

    /// Decode and write a reported wallpaper off the hub task, then record
    /// the stored file name through the normal event path.
    fn spawn_wallpaper_persist(&self, agent_id: u32, device_label: String, encoded: String) {
        let media = self.media.clone();
        let handle = self.handle.clone();
        tokio::spawn(async move {
            match media.store_wallpaper(&device_label, &encoded).await {
                Ok(file_name) => handle.wallpaper_stored(agent_id, file_name),
                Err(error) => {
                    tracing::warn!(agent_id, %error, "failed to persist wallpaper");
                }
            }
        });
    }
}
