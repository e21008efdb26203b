//! Interactive console runtime
//!
//! Owns the socket and stdin, feeds one [`OperatorSession`], and renders
//! through [`display`](crate::display). The loop follows the session
//! machine: dial, present credentials, serve the prompt, and on transport
//! loss apply the fixed-delay reconnect plan until the budget runs out.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use drover_proto::{AgentEvent, AgentFrame, HubMessage, OperatorAuth, OperatorCommand};

use crate::command::{AgentOp, ConsoleCommand};
use crate::config::OperatorConfig;
use crate::display;
use crate::session::{AgentInfo, OperatorSession, ReconnectPlan};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type ConsoleInput = Lines<BufReader<Stdin>>;

/// Why one connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Transport dropped or was refused; the reconnect plan decides next.
    Dropped,
    /// Manual `reconnect`; dial again immediately with a fresh budget.
    Reconnect,
    Exit,
}

/// What to do after one handled input line.
enum LineFlow {
    Continue,
    Reconnect,
    Exit,
}

/// The operator console.
pub struct Console {
    config: OperatorConfig,
    session: OperatorSession,
}

impl Console {
    pub fn new(config: OperatorConfig) -> Self {
        let session = OperatorSession::new(config.reconnect_delay, config.max_reconnect_attempts);
        Self { config, session }
    }

    /// Run until the operator leaves or stdin closes.
    pub async fn run(mut self) -> Result<()> {
        let mut input = BufReader::new(tokio::io::stdin()).lines();
        display::banner(&self.config.hub_url);

        loop {
            self.session.begin_connect();
            println!(
                "{}",
                format!("🔌 connecting to {}...", self.config.hub_url).blue()
            );

            match connect_async(self.config.hub_url.as_str()).await {
                Ok((socket, _)) => match self.drive(socket, &mut input).await? {
                    Outcome::Exit => break,
                    Outcome::Reconnect => {
                        self.session.manual_reset();
                        continue;
                    }
                    Outcome::Dropped => {}
                },
                Err(err) => {
                    println!("{}", format!("❌ could not connect: {err}").red());
                }
            }

            match self.session.connection_lost() {
                ReconnectPlan::Retry { attempt, delay } => {
                    println!(
                        "{}",
                        format!(
                            "🔄 reconnecting in {}s ({attempt}/{})...",
                            delay.as_secs(),
                            self.session.max_reconnect_attempts()
                        )
                        .yellow()
                    );
                    sleep(delay).await;
                }
                ReconnectPlan::GiveUp => {
                    println!("{}", "❌ reconnect attempts exhausted".red());
                    println!(
                        "{}",
                        "💡 type \"reconnect\" to try again, or \"exit\" to leave".yellow()
                    );
                    match self.offline_repl(&mut input).await? {
                        Outcome::Exit => break,
                        _ => continue,
                    }
                }
            }
        }

        println!("{}", "✅ disconnected".green());
        Ok(())
    }

    /// Serve one live connection until it drops or the operator leaves.
    async fn drive(
        &mut self,
        socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
        input: &mut ConsoleInput,
    ) -> Result<Outcome> {
        self.session.transport_opened();
        let (mut sink, mut stream) = socket.split();

        println!("{}", "✅ connected, authenticating...".green());
        let auth = serde_json::to_string(&OperatorAuth {
            secret: self.config.secret.clone(),
        })
        .context("encode auth frame")?;
        if sink.send(Message::Text(auth)).await.is_err() {
            println!("{}", "❌ connection dropped before authentication".red());
            return Ok(Outcome::Dropped);
        }

        loop {
            tokio::select! {
                frame = stream.next() => {
                    match self.handle_socket(frame)? {
                        Some(outcome) => return Ok(outcome),
                        None => self.show_prompt(),
                    }
                }
                line = input.next_line() => {
                    let Some(line) = line.context("read console input")? else {
                        return Ok(Outcome::Exit);
                    };
                    match self.handle_line(&line, &mut sink).await? {
                        LineFlow::Continue => self.show_prompt(),
                        LineFlow::Reconnect => {
                            let _ = sink.close().await;
                            return Ok(Outcome::Reconnect);
                        }
                        LineFlow::Exit => {
                            let _ = sink.send(Message::Close(None)).await;
                            return Ok(Outcome::Exit);
                        }
                    }
                }
            }
        }
    }

    /// One socket item. `Some` ends the connection with that outcome.
    fn handle_socket(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Result<Option<Outcome>> {
        match frame {
            Some(Ok(Message::Text(text))) => Ok(self.handle_frame(&text)),
            Some(Ok(Message::Close(_))) | None => {
                println!("{}", "\n⚠️  hub closed the connection".yellow());
                Ok(Some(Outcome::Dropped))
            }
            Some(Ok(_)) => Ok(None),
            Some(Err(err)) => {
                println!("{}", format!("\n❌ transport error: {err}").red());
                Ok(Some(Outcome::Dropped))
            }
        }
    }

    /// One frame from the hub. `Some` ends the connection.
    fn handle_frame(&mut self, text: &str) -> Option<Outcome> {
        tracing::debug!(len = text.len(), "hub frame");
        let message = match serde_json::from_str::<HubMessage>(text) {
            Ok(message) => message,
            Err(_) => {
                println!("{}", format!("\n📩 {text}").dimmed());
                return None;
            }
        };

        match message {
            HubMessage::OperatorWelcome {
                operator_id, stats, ..
            } => {
                self.session.authenticated(operator_id);
                display::welcome(operator_id, &stats);
            }

            // An agent greeting here means the hub rejected the secret and
            // classified this connection as an agent.
            HubMessage::Welcome { .. } => {
                println!(
                    "{}",
                    "\n❌ hub treated this connection as an agent (wrong secret?)".red()
                );
                return Some(Outcome::Dropped);
            }

            HubMessage::AgentConnected {
                agent_id,
                address,
                port,
                device,
                ..
            } => {
                println!("{}", format!("\n✅ agent {agent_id} connected").green());
                println!("{}", format!("   📍 {address}:{port}").dimmed());
                if let Some(device) = device.as_deref() {
                    println!("{}", format!("   📱 {device}").dimmed());
                }
                self.session.agent_connected(
                    agent_id,
                    AgentInfo {
                        address,
                        port,
                        device,
                    },
                );
            }

            HubMessage::AgentDisconnected { agent_id, .. } => {
                println!("{}", format!("\n❌ agent {agent_id} disconnected").red());
                if self.session.agent_disconnected(agent_id) {
                    println!("{}", "⚠️  the selected agent disconnected".yellow());
                }
            }

            HubMessage::AgentEvent {
                agent_id, payload, ..
            } => {
                println!();
                let frame = AgentFrame::parse(&payload);
                match &frame.event {
                    AgentEvent::Identification {
                        path: Some(path), ..
                    } => self.session.note_path(agent_id, path.clone()),
                    AgentEvent::NavigationUpdate { data } => {
                        if let Some(path) = data.current_path.clone() {
                            self.session.note_path(agent_id, path);
                        }
                    }
                    AgentEvent::DirectoryChanged { path } => {
                        self.session.note_path(agent_id, path.clone());
                    }
                    _ => {}
                }
                display::agent_event(agent_id, &frame.event, &payload);
            }

            HubMessage::AgentList { agents, .. } => {
                display::agent_table(&agents, self.session.selection());
                self.session.absorb_agent_list(&agents);
            }

            HubMessage::OperatorList { operators, .. } => {
                display::operator_table(&operators, self.session.operator_id());
            }

            HubMessage::ServerStatus { status, .. } => {
                display::status_panel(&status);
            }

            HubMessage::AgentState { agent_id, state } => {
                if let Some(path) = state.as_ref().and_then(|s| s.current_path.clone()) {
                    self.session.note_path(agent_id, path);
                }
                display::state_panel(agent_id, state.as_ref());
            }

            HubMessage::CommandResult {
                success,
                message,
                delivered,
            } => {
                if success {
                    println!("{}", format!("\n✅ {message}").green());
                } else {
                    println!("{}", format!("\n❌ {message}").red());
                }
                if let Some(count) = delivered {
                    println!("{}", format!("   📢 delivered to {count} agent(s)").dimmed());
                }
            }

            HubMessage::HeartbeatAck { timestamp } => {
                let latency = (Utc::now() - timestamp).num_milliseconds();
                println!("{}", format!("\n🏓 pong ({latency}ms)").dimmed());
            }

            HubMessage::Error { message } => {
                println!("{}", format!("\n❌ hub error: {message}").red());
            }

            HubMessage::Shutdown { message } => {
                println!("{}", format!("\n🛑 {message}").red());
            }
        }
        None
    }

    /// One console line while connected.
    async fn handle_line(&mut self, line: &str, sink: &mut WsSink) -> Result<LineFlow> {
        let Some(parsed) = ConsoleCommand::parse(line) else {
            return Ok(LineFlow::Continue);
        };
        let command = match parsed {
            Ok(command) => command,
            Err(err) => {
                println!("{}", format!("❌ {err}").red());
                return Ok(LineFlow::Continue);
            }
        };

        match command {
            ConsoleCommand::Help => display::help(),
            ConsoleCommand::Clear => {
                print!("\x1B[2J\x1B[1;1H");
                display::banner(&self.config.hub_url);
            }
            ConsoleCommand::Exit => {
                println!("{}", "👋 disconnecting...".yellow());
                return Ok(LineFlow::Exit);
            }
            ConsoleCommand::Reconnect => {
                println!("{}", "🔄 reconnecting...".blue());
                return Ok(LineFlow::Reconnect);
            }

            ConsoleCommand::ListAgents => self.issue(sink, OperatorCommand::ListAgents).await?,
            ConsoleCommand::ListOperators => {
                self.issue(sink, OperatorCommand::ListOperators).await?
            }
            ConsoleCommand::Status => self.issue(sink, OperatorCommand::ServerStatus).await?,
            ConsoleCommand::Ping => self.issue(sink, OperatorCommand::Heartbeat).await?,
            ConsoleCommand::Kick { agent_id } => {
                self.issue(sink, OperatorCommand::KickAgent { agent_id }).await?
            }

            ConsoleCommand::State { agent_id } => {
                match agent_id.or(self.session.selection()) {
                    Some(agent_id) => {
                        self.issue(sink, OperatorCommand::GetAgentState { agent_id })
                            .await?
                    }
                    None => {
                        println!(
                            "{}",
                            "usage: state <agent_id>, or select an agent first".yellow()
                        );
                    }
                }
            }

            ConsoleCommand::Select { agent_id: None } => self.report_selection(),
            ConsoleCommand::Select {
                agent_id: Some(agent_id),
            } => self.select_agent(agent_id),

            ConsoleCommand::Deselect => match self.session.deselect() {
                Some(agent_id) => {
                    println!("{}", format!("📌 agent {agent_id} deselected").yellow());
                    println!(
                        "{}",
                        "💡 broadcast mode: shortcuts now reach every agent".cyan()
                    );
                }
                None => println!("{}", "no agent was selected".dimmed()),
            },

            ConsoleCommand::Send { agent_id, message } => {
                match agent_id.or(self.session.selection()) {
                    Some(agent_id) => {
                        self.issue(sink, OperatorCommand::SendToAgent { agent_id, message })
                            .await?;
                        println!("{}", format!("📤 sent to agent {agent_id}").green());
                    }
                    None => {
                        println!(
                            "{}",
                            "usage: send <agent_id> <json>, or select an agent first".yellow()
                        );
                    }
                }
            }

            ConsoleCommand::Broadcast { message } => {
                self.issue(sink, OperatorCommand::BroadcastToAgents { message })
                    .await?;
                println!("{}", "📢 broadcast sent".green());
            }

            ConsoleCommand::Agent(op) => self.send_agent_op(sink, op).await?,

            ConsoleCommand::Debug { message } => print_debug_envelope(&message)?,
        }
        Ok(LineFlow::Continue)
    }

    /// Route a file-manager shortcut: selected agent if any, broadcast
    /// otherwise. Transfers need a concrete target and never broadcast.
    async fn send_agent_op(&mut self, sink: &mut WsSink, op: AgentOp) -> Result<()> {
        let verb = op.verb();
        match self.session.selection() {
            Some(agent_id) => {
                self.issue(
                    sink,
                    OperatorCommand::SendToAgent {
                        agent_id,
                        message: op.to_value(),
                    },
                )
                .await?;
                println!("{}", format!("📤 {verb} sent to agent {agent_id}").green());
            }
            None => match op {
                AgentOp::UploadFile { .. } | AgentOp::DownloadFile { .. } => {
                    println!(
                        "{}",
                        format!("❌ {verb} needs a selected agent (use \"select <id>\")").red()
                    );
                }
                _ => {
                    self.issue(
                        sink,
                        OperatorCommand::BroadcastToAgents {
                            message: op.to_value(),
                        },
                    )
                    .await?;
                    println!("{}", format!("📢 {verb} broadcast to all agents").green());
                }
            },
        }
        Ok(())
    }

    async fn issue(&mut self, sink: &mut WsSink, command: OperatorCommand) -> Result<()> {
        let frame = serde_json::to_string(&command).context("encode command")?;
        if sink.send(Message::Text(frame)).await.is_err() {
            println!("{}", "❌ not connected to the hub".red());
        }
        Ok(())
    }

    fn report_selection(&self) {
        match self.session.selection() {
            Some(agent_id) => {
                println!("{}", format!("📌 selected agent: {agent_id}").cyan());
                if let Some(info) = self.session.agent_info(agent_id) {
                    if let Some(device) = info.device.as_deref() {
                        println!("{}", format!("   📱 {device}").dimmed());
                    }
                    println!("{}", format!("   📍 {}:{}", info.address, info.port).dimmed());
                }
            }
            None => {
                println!("{}", "no agent selected".yellow());
                println!("{}", "usage: select <agent_id>".dimmed());
            }
        }
    }

    fn select_agent(&mut self, agent_id: u32) {
        if self.session.select(agent_id) {
            println!("{}", format!("✅ agent {agent_id} selected").green());
            if let Some(info) = self.session.agent_info(agent_id) {
                if let Some(device) = info.device.as_deref() {
                    println!("{}", format!("   📱 {device}").dimmed());
                }
                println!("{}", format!("   📍 {}:{}", info.address, info.port).dimmed());
            }
            println!(
                "{}",
                "\n💡 ls, cd, rm, upload and download now go only to this agent".cyan()
            );
            println!("{}", "   use \"deselect\" to return to broadcast".dimmed());
        } else {
            println!("{}", format!("❌ agent {agent_id} is not known").red());
            println!("{}", "💡 use \"agents\" to list connected agents".yellow());
        }
    }

    /// Commands still served after the reconnect budget ran out. Anything
    /// that needs the hub just points at `reconnect`.
    async fn offline_repl(&mut self, input: &mut ConsoleInput) -> Result<Outcome> {
        loop {
            self.show_prompt();
            let Some(line) = input.next_line().await.context("read console input")? else {
                return Ok(Outcome::Exit);
            };
            let Some(parsed) = ConsoleCommand::parse(&line) else {
                continue;
            };
            match parsed {
                Ok(ConsoleCommand::Exit) => return Ok(Outcome::Exit),
                Ok(ConsoleCommand::Reconnect) => {
                    self.session.manual_reset();
                    println!("{}", "🔄 reconnecting...".blue());
                    return Ok(Outcome::Reconnect);
                }
                Ok(ConsoleCommand::Help) => display::help(),
                Ok(ConsoleCommand::Clear) => {
                    print!("\x1B[2J\x1B[1;1H");
                    display::banner(&self.config.hub_url);
                }
                Ok(ConsoleCommand::Debug { message }) => print_debug_envelope(&message)?,
                Ok(_) => {
                    println!("{}", "❌ not connected to the hub".red());
                    println!("{}", "💡 type \"reconnect\" to dial again".yellow());
                }
                Err(err) => println!("{}", format!("❌ {err}").red()),
            }
        }
    }

    fn show_prompt(&self) {
        let path = self
            .session
            .selection()
            .map(|id| self.session.path_for(id).to_string())
            .unwrap_or_default();
        let prompt = display::prompt(
            self.session.is_active(),
            self.session.operator_id(),
            self.session.selection(),
            &path,
        );
        print!("{prompt}");
        let _ = std::io::stdout().flush();
    }
}

/// Render the exact wire form of an envelope without sending it.
fn print_debug_envelope(message: &serde_json::Value) -> Result<()> {
    println!("{}", "🔍 would send:".cyan());
    let pretty = serde_json::to_string_pretty(message).context("render debug envelope")?;
    println!("{}", pretty.yellow());
    let size = serde_json::to_string(message).context("render debug envelope")?.len();
    println!("{}", format!("({size} bytes on the wire)").dimmed());
    Ok(())
}
