//! Hub actor
//!
//! All registries and session state live inside one task. Connection tasks,
//! the status endpoint and the shutdown path never touch that state
//! directly; they send [`HubEvent`]s through a [`HubHandle`] and the hub
//! applies them one at a time, so every mutation and every fan-out is
//! serialized without locks.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use drover_proto::{AgentFrame, HubMessage, HubStats, StatusReport};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant as TickInstant, MissedTickBehavior};

use crate::config::HubConfig;
use crate::dispatch::{self, PeerSender, UnicastOutcome};
use crate::error::HubError;
use crate::media::MediaStore;
use crate::registry::{ConnectionRegistry, PeerRole};
use crate::state::SessionStateStore;

/// One unit of work for the hub task.
#[derive(Debug)]
pub(crate) enum HubEvent {
    AgentJoined {
        address: Arc<str>,
        port: u16,
        sender: PeerSender,
        initial_frame: Option<String>,
        reply: oneshot::Sender<u32>,
    },
    OperatorJoined {
        address: Arc<str>,
        port: u16,
        sender: PeerSender,
        reply: oneshot::Sender<u32>,
    },
    AgentFrame { agent_id: u32, text: String },
    OperatorFrame { operator_id: u32, text: String },
    AgentPong { agent_id: u32 },
    OperatorPong { operator_id: u32 },
    AgentClosed { agent_id: u32 },
    OperatorClosed { operator_id: u32 },
    WallpaperStored { agent_id: u32, file_name: String },
    StatusQuery { reply: oneshot::Sender<StatusReport> },
    Shutdown { message: String },
}

/// Cloneable entry point into the hub task.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    fn send(&self, event: HubEvent) {
        // A dropped hub means shutdown is already underway.
        let _ = self.tx.send(event);
    }

    async fn send_with_reply<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HubEvent,
    ) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| HubError::HubGone)?;
        rx.await.map_err(|_| HubError::HubGone)
    }

    /// Register a negotiated agent connection and get its id back.
    pub async fn agent_joined(
        &self,
        address: Arc<str>,
        port: u16,
        sender: PeerSender,
        initial_frame: Option<String>,
    ) -> Result<u32, HubError> {
        self.send_with_reply(|reply| HubEvent::AgentJoined {
            address,
            port,
            sender,
            initial_frame,
            reply,
        })
        .await
    }

    /// Register an authenticated operator connection and get its id back.
    pub async fn operator_joined(
        &self,
        address: Arc<str>,
        port: u16,
        sender: PeerSender,
    ) -> Result<u32, HubError> {
        self.send_with_reply(|reply| HubEvent::OperatorJoined { address, port, sender, reply })
            .await
    }

    pub fn agent_frame(&self, agent_id: u32, text: String) {
        self.send(HubEvent::AgentFrame { agent_id, text });
    }

    pub fn operator_frame(&self, operator_id: u32, text: String) {
        self.send(HubEvent::OperatorFrame { operator_id, text });
    }

    pub fn agent_pong(&self, agent_id: u32) {
        self.send(HubEvent::AgentPong { agent_id });
    }

    pub fn operator_pong(&self, operator_id: u32) {
        self.send(HubEvent::OperatorPong { operator_id });
    }

    pub fn agent_closed(&self, agent_id: u32) {
        self.send(HubEvent::AgentClosed { agent_id });
    }

    pub fn operator_closed(&self, operator_id: u32) {
        self.send(HubEvent::OperatorClosed { operator_id });
    }

    pub(crate) fn wallpaper_stored(&self, agent_id: u32, file_name: String) {
        self.send(HubEvent::WallpaperStored { agent_id, file_name });
    }

    /// Snapshot for the HTTP status endpoint.
    pub async fn status(&self) -> Result<StatusReport, HubError> {
        self.send_with_reply(|reply| HubEvent::StatusQuery { reply }).await
    }

    /// Announce shutdown to every peer and stop the hub task.
    pub fn shutdown(&self, message: impl Into<String>) {
        self.send(HubEvent::Shutdown { message: message.into() });
    }
}

/// The state-owning hub task.
#[derive(Debug)]
pub struct Hub {
    pub(crate) config: HubConfig,
    pub(crate) events: mpsc::UnboundedReceiver<HubEvent>,
    pub(crate) handle: HubHandle,
    pub(crate) agents: ConnectionRegistry,
    pub(crate) operators: ConnectionRegistry,
    pub(crate) states: SessionStateStore,
    pub(crate) media: MediaStore,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, events) = mpsc::unbounded_channel();
        let handle = HubHandle { tx };
        let media = MediaStore::new(config.media_dir.clone());
        let hub = Self {
            config,
            events,
            handle: handle.clone(),
            agents: ConnectionRegistry::new(PeerRole::Agent),
            operators: ConnectionRegistry::new(PeerRole::Operator),
            states: SessionStateStore::new(),
            media,
            started_at: Utc::now(),
            started: Instant::now(),
        };
        (hub, handle)
    }

    /// Run until shutdown is requested or every handle is gone.
    pub async fn run(mut self) {
        let period = self.config.ping_interval;
        let mut sweep = interval_at(TickInstant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).is_break() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = sweep.tick() => self.sweep_liveness(),
            }
        }

        tracing::info!("hub task stopped");
    }

    pub(crate) fn handle_event(&mut self, event: HubEvent) -> ControlFlow<()> {
        match event {
            HubEvent::AgentJoined { address, port, sender, initial_frame, reply } => {
                self.admit_agent(address, port, sender, initial_frame, reply);
            }
            HubEvent::OperatorJoined { address, port, sender, reply } => {
                self.admit_operator(address, port, sender, reply);
            }
            HubEvent::AgentFrame { agent_id, text } => {
                let text = text.trim();
                if text.is_empty() {
                    // Blank frames count as a sign of life but are not relayed.
                    self.agents.mark_live(agent_id);
                } else {
                    self.agents.touch(agent_id);
                    self.ingest_agent_frame(agent_id, AgentFrame::parse(text));
                }
            }
            HubEvent::OperatorFrame { operator_id, text } => {
                self.operators.touch(operator_id);
                self.ingest_operator_frame(operator_id, &text);
            }
            HubEvent::AgentPong { agent_id } => self.agents.mark_live(agent_id),
            HubEvent::OperatorPong { operator_id } => self.operators.mark_live(operator_id),
            HubEvent::AgentClosed { agent_id } => self.retire_agent(agent_id, "connection closed"),
            HubEvent::OperatorClosed { operator_id } => {
                self.operators.unregister(operator_id);
            }
            HubEvent::WallpaperStored { agent_id, file_name } => {
                self.states.set_wallpaper(agent_id, file_name);
            }
            HubEvent::StatusQuery { reply } => {
                let _ = reply.send(self.status_report());
            }
            HubEvent::Shutdown { message } => {
                self.announce_shutdown(&message);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn admit_agent(
        &mut self,
        address: Arc<str>,
        port: u16,
        sender: PeerSender,
        initial_frame: Option<String>,
        reply: oneshot::Sender<u32>,
    ) {
        let agent_id = self.agents.register(address.clone(), port, sender);
        let _ = reply.send(agent_id);

        let first = initial_frame.map(|text| AgentFrame::parse(&text));
        let device = first.as_ref().and_then(|frame| match &frame.event {
            drover_proto::AgentEvent::Identification { data, .. } => data.clone(),
            _ => None,
        });

        self.fanout_to_operators(&HubMessage::AgentConnected {
            agent_id,
            address: address.to_string(),
            port,
            device,
            timestamp: Utc::now(),
        });

        self.send_to_agent(
            agent_id,
            &HubMessage::Welcome {
                agent_id,
                message: "connected to hub".to_owned(),
                timestamp: Utc::now(),
            },
        );

        // The negotiation frame flows through the same path as live traffic.
        if let Some(frame) = first {
            self.agents.touch(agent_id);
            self.ingest_agent_frame(agent_id, frame);
        }
    }

    fn admit_operator(
        &mut self,
        address: Arc<str>,
        port: u16,
        sender: PeerSender,
        reply: oneshot::Sender<u32>,
    ) {
        let operator_id = self.operators.register(address, port, sender);
        let _ = reply.send(operator_id);

        let welcome = HubMessage::OperatorWelcome {
            operator_id,
            message: "authenticated".to_owned(),
            stats: HubStats { agents: self.agents.len(), operators: self.operators.len() },
            timestamp: Utc::now(),
        };
        self.reply_to_operator(operator_id, &welcome);
    }

    /// Remove an agent everywhere and tell the operators, exactly once.
    ///
    /// The session state is dropped before the departure is fanned out, so
    /// no operator can observe state for an agent it was told is gone.
    pub(crate) fn retire_agent(&mut self, agent_id: u32, reason: &str) {
        if self.agents.unregister(agent_id).is_none() {
            return;
        }
        tracing::info!(agent_id, reason, "agent retired");
        self.finish_agent_cleanup(agent_id);
    }

    /// State removal and departure fan-out for an agent already out of the
    /// registry (retirement, or a reap inside a fan-out).
    pub(crate) fn finish_agent_cleanup(&mut self, agent_id: u32) {
        self.states.remove(agent_id);
        self.fanout_to_operators(&HubMessage::AgentDisconnected {
            agent_id,
            timestamp: Utc::now(),
        });
    }

    /// Fan a hub message out to every operator. Dead operators found along
    /// the way are dropped silently.
    pub(crate) fn fanout_to_operators(&mut self, message: &HubMessage) -> usize {
        let payload: Arc<str> = Arc::from(message.to_text());
        let report = dispatch::broadcast(&mut self.operators, &payload);
        report.delivered
    }

    /// Fan a raw payload out to every agent, finishing cleanup for any agent
    /// whose transport turns out to be dead.
    pub(crate) fn fanout_to_agents(&mut self, payload: &Arc<str>) -> usize {
        let report = dispatch::broadcast(&mut self.agents, payload);
        for agent_id in report.reaped {
            self.finish_agent_cleanup(agent_id);
        }
        report.delivered
    }

    /// Unicast a raw payload to one agent, finishing cleanup if the agent
    /// turns out to be dead.
    pub(crate) fn unicast_to_agent(&mut self, agent_id: u32, payload: Arc<str>) -> UnicastOutcome {
        let outcome = dispatch::unicast(&mut self.agents, agent_id, &payload);
        if outcome == UnicastOutcome::Reaped {
            self.finish_agent_cleanup(agent_id);
        }
        outcome
    }

    pub(crate) fn send_to_agent(&mut self, agent_id: u32, message: &HubMessage) {
        self.unicast_to_agent(agent_id, Arc::from(message.to_text()));
    }

    pub(crate) fn reply_to_operator(&mut self, operator_id: u32, message: &HubMessage) {
        let payload: Arc<str> = Arc::from(message.to_text());
        dispatch::unicast(&mut self.operators, operator_id, &payload);
    }

    fn announce_shutdown(&mut self, message: &str) {
        tracing::info!(agents = self.agents.len(), operators = self.operators.len(), "announcing shutdown");
        let frame: Arc<str> =
            Arc::from(HubMessage::Shutdown { message: message.to_owned() }.to_text());

        self.fanout_to_agents(&frame);
        let _ = dispatch::broadcast(&mut self.operators, &frame);

        for id in self.agents.ids() {
            if let Some(record) = self.agents.get(id) {
                record.sender.close();
            }
        }
        for id in self.operators.ids() {
            if let Some(record) = self.operators.get(id) {
                record.sender.close();
            }
        }
    }

    pub(crate) fn status_report(&self) -> StatusReport {
        let uptime_secs = self.started.elapsed().as_secs();
        StatusReport {
            port: self.config.port(),
            agents: self.agents.len(),
            operators: self.operators.len(),
            tracked_states: self.states.len(),
            uptime_secs,
            uptime_human: format_uptime(uptime_secs),
            memory_bytes: resident_memory_bytes(),
            started_at: self.started_at,
        }
    }
}

/// Render seconds as `1d 2h 3m 4s`, dropping leading zero units.
fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Resident set size, when the platform exposes it.
fn resident_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}
