//! Console rendering
//!
//! All human-facing output for the operator console. Column widths are
//! applied before coloring so ANSI escapes never skew the alignment.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use drover_proto::{
    AgentEvent, AgentStateView, AgentSummary, HubStats, OperatorSummary, StatusReport,
};

pub fn banner(hub_url: &str) {
    println!("{}", "╔════════════════════════════════════════╗".green().bold());
    println!("{}", "║        DROVER - OPERATOR CONSOLE       ║".green().bold());
    println!("{}", "╚════════════════════════════════════════╝".green().bold());
    println!("{}", format!("\n🔗 hub: {hub_url}\n").cyan());
}

pub fn help() {
    println!("{}", "\n=== OPERATOR CONSOLE COMMANDS ===".cyan().bold());
    println!("{}", "\n📊 hub information:".white());
    println!("  help, ?           - show this help");
    println!("  agents, list      - list connected agents");
    println!("  operators         - list connected operators");
    println!("  status            - show hub status");
    println!("  state [id]        - show an agent's cached state (selected agent if omitted)");

    println!("{}", "\n🎯 agent selection:".white());
    println!("  select <id>       - select one agent as the command target");
    println!("  deselect          - drop the selection (back to broadcast)");

    println!("{}", "\n📤 sending commands:".white());
    println!("  send <id> <json>  - send a raw envelope to one agent");
    println!("  send <json>       - send to the selected agent");
    println!("  broadcast <json>  - send to every agent");
    println!("  kick <id>         - disconnect an agent");

    println!("{}", "\n📂 file manager shortcuts:".white());
    println!("  ls [path]         - list files (selected agent, or broadcast)");
    println!("  cd <path>         - change directory (selected agent, or broadcast)");
    println!("  rm <path>         - delete a file (selected agent, or broadcast)");
    println!("  upload <file>     - ask the agent to upload a file (selected agent only)");
    println!("  download <file>   - ask the agent to fetch a file (selected agent only)");

    println!("{}", "\n🔧 utilities:".white());
    println!("  ping              - measure hub round-trip time");
    println!("  debug <cmd>       - show the JSON a command would send, without sending");
    println!("  reconnect         - reconnect to the hub");
    println!("  clear             - clear the screen");
    println!("  exit, quit        - disconnect and leave");
    println!("{}", "\n=================================\n".cyan());
}

pub fn welcome(operator_id: u32, stats: &HubStats) {
    println!("{}", "\n👑 AUTHENTICATED AS OPERATOR".green().bold());
    println!("{}", format!("📋 operator id: {operator_id}").cyan());
    println!("{}", format!("📊 agents connected: {}", stats.agents).cyan());
    println!("{}", format!("👥 operators connected: {}", stats.operators).cyan());
    println!("{}", "\n💡 type \"help\" for the available commands\n".yellow());
}

pub fn agent_table(agents: &[AgentSummary], selection: Option<u32>) {
    if agents.is_empty() {
        println!("{}", "\n📭 no agents connected".yellow());
        return;
    }

    println!(
        "{}",
        format!("\n👥 connected agents ({}):", agents.len()).cyan().bold()
    );
    println!("{}", "─".repeat(78));
    println!(
        "{}",
        format!(
            "{:>2} | {:<21} | {:<14} | {:<12} | {:>5} | status",
            "id", "address", "device", "connected", "msgs"
        )
        .bold()
    );
    println!("{}", "─".repeat(78));

    for agent in agents {
        let address = format!("{:<21}", format!("{}:{}", agent.address, agent.port));
        let device = format!("{:<14}", agent.device.as_deref().unwrap_or("unknown"));
        let connected = format!("{:<12}", connected_for(agent.connected_at));
        let liveness = if agent.live {
            "✓ live".green()
        } else {
            "✗ stale".red()
        };
        let marker = if selection == Some(agent.id) {
            " ◄ selected".yellow()
        } else {
            "".normal()
        };

        println!(
            "{} | {} | {} | {} | {} | {}{}",
            format!("{:>2}", agent.id).yellow(),
            address.dimmed(),
            device.cyan(),
            connected.blue(),
            format!("{:>5}", agent.message_count).magenta(),
            liveness,
            marker,
        );
    }
    println!("{}", "─".repeat(78));

    match selection {
        Some(id) => println!(
            "{}",
            format!("\n📌 agent {id} is selected (commands go only to it)").cyan()
        ),
        None => println!(
            "{}",
            "\n💡 use \"select <id>\" to target a single agent".dimmed()
        ),
    }
}

pub fn operator_table(operators: &[OperatorSummary], own_id: Option<u32>) {
    if operators.is_empty() {
        println!("{}", "\n📭 no operators connected".yellow());
        return;
    }

    println!(
        "{}",
        format!("\n👑 connected operators ({}):", operators.len())
            .cyan()
            .bold()
    );
    println!("{}", "─".repeat(56));
    println!(
        "{}",
        format!("{:>2} | {:<21} | {:<12} | {:>4}", "id", "address", "connected", "msgs").bold()
    );
    println!("{}", "─".repeat(56));

    for operator in operators {
        let address = format!("{:<21}", format!("{}:{}", operator.address, operator.port));
        let connected = format!("{:<12}", connected_for(operator.connected_at));
        let you = if own_id == Some(operator.id) {
            " (you)".green()
        } else {
            "".normal()
        };

        println!(
            "{} | {} | {} | {}{}",
            format!("{:>2}", operator.id).yellow(),
            address.dimmed(),
            connected.blue(),
            format!("{:>4}", operator.message_count).magenta(),
            you,
        );
    }
    println!("{}", "─".repeat(56));
}

pub fn status_panel(status: &StatusReport) {
    let memory = status
        .memory_bytes
        .map(format_bytes)
        .unwrap_or_else(|| "n/a".to_string());
    let started = status
        .started_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");

    println!("{}", "\n📊 hub status:".cyan().bold());
    println!("{}", "─".repeat(50));
    println!("{} {}", format!("{:<20}", "🚀 port:").white(), status.port.to_string().yellow());
    println!("{} {}", format!("{:<20}", "👥 agents:").white(), status.agents.to_string().yellow());
    println!("{} {}", format!("{:<20}", "👑 operators:").white(), status.operators.to_string().yellow());
    println!("{} {}", format!("{:<20}", "📍 tracked states:").white(), status.tracked_states.to_string().yellow());
    println!("{} {}", format!("{:<20}", "⏱️ uptime:").white(), status.uptime_human.yellow());
    println!("{} {}", format!("{:<20}", "💾 memory:").white(), memory.yellow());
    println!("{} {}", format!("{:<20}", "🕐 started at:").white(), started.to_string().yellow());
    println!("{}", "─".repeat(50));
}

pub fn state_panel(agent_id: u32, state: Option<&AgentStateView>) {
    let Some(state) = state else {
        println!("{}", format!("\n❌ agent {agent_id} has no saved state").red());
        return;
    };

    let path = state.current_path.as_deref().unwrap_or("unknown");
    let label = state.device_label.as_deref().unwrap_or("unknown");
    let updated = state
        .last_update
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");

    println!("{}", format!("\n📋 agent {agent_id} state:").cyan().bold());
    println!("{}", "─".repeat(60));
    println!("{} {}", format!("{:<20}", "📱 device:").white(), label.yellow());
    println!("{} {}", format!("{:<20}", "📂 current path:").white(), path.yellow());
    println!("{} {}", format!("{:<20}", "✅ selected files:").white(), state.selected_files.len().to_string().yellow());
    println!("{} {}", format!("{:<20}", "📤 upload queue:").white(), state.upload_queue_len.to_string().yellow());
    if let Some(wallpaper) = state.wallpaper_file.as_deref() {
        println!("{} {}", format!("{:<20}", "🖼️ wallpaper:").white(), wallpaper.yellow());
    }
    println!("{} {}", format!("{:<20}", "🕐 last update:").white(), updated.to_string().yellow());
    println!("{}", "─".repeat(60));

    if !state.selected_files.is_empty() {
        println!("{}", "\n✅ selected files:".cyan());
        for (index, file) in state.selected_files.iter().enumerate() {
            let name = file.rsplit('/').next().unwrap_or(file);
            println!("{}", format!("   {}. {name}", index + 1).dimmed());
        }
    }
}

/// Render one relayed agent frame. Heartbeats stay silent; anything the
/// protocol does not model prints as a dimmed payload preview.
pub fn agent_event(agent_id: u32, event: &AgentEvent, raw: &str) {
    match event {
        AgentEvent::Identification { data, path, .. } => {
            let label = data.as_deref().unwrap_or("unnamed device");
            println!("{}", format!("🆔 agent {agent_id} identified as {label}").green());
            if let Some(path) = path {
                println!("{}", format!("   📂 starting at {path}").dimmed());
            }
        }
        AgentEvent::NavigationUpdate { data } => {
            let path = data.current_path.as_deref().unwrap_or("?");
            println!("{}", format!("📂 agent {agent_id} navigated to {path}").cyan());
            if let Some(count) = data.files_count {
                println!("{}", format!("   {count} files listed").dimmed());
            }
        }
        AgentEvent::SelectionUpdate { data } => {
            let count = data.selected_count.unwrap_or(data.selected_files.len() as u64);
            println!("{}", format!("✅ agent {agent_id} selected {count} file(s)").cyan());
        }
        AgentEvent::UploadStarted { data } => {
            println!("{}", format!("🚀 agent {agent_id} upload started: {}", data.file_name).blue());
        }
        AgentEvent::UploadProgress { data } => {
            let progress = data.progress.unwrap_or(0.0);
            println!(
                "{}",
                format!("📈 agent {agent_id} upload: {} - {progress:.0}%", data.file_name).yellow()
            );
        }
        AgentEvent::UploadCompleted { data } => {
            println!("{}", format!("✅ agent {agent_id} upload complete: {}", data.file_name).green());
        }
        AgentEvent::UploadFailed { data } => {
            println!("{}", format!("❌ agent {agent_id} upload failed: {}", data.file_name).red());
            if let Some(error) = data.error.as_deref() {
                println!("{}", format!("   {error}").red());
            }
        }
        AgentEvent::DirectoryChanged { path } => {
            println!("{}", format!("📂 agent {agent_id} moved to {path}").cyan());
        }
        AgentEvent::Heartbeat => {}
        AgentEvent::Opaque { .. } => {
            println!("{}", format!("📩 agent {agent_id}: {}", preview(raw)).dimmed());
        }
    }
}

/// Ready-to-print prompt line.
pub fn prompt(connected: bool, operator_id: Option<u32>, selection: Option<u32>, path: &str) -> String {
    let dot = if connected { "●".green() } else { "●".red() };
    let who = match operator_id {
        Some(id) => format!("Operator {id}").cyan(),
        None => "offline".dimmed(),
    };
    let target = match selection {
        Some(id) => format!(
            "{}{}",
            format!(" → Agent {id}").yellow(),
            format!(" {path}").magenta()
        ),
        None => " → broadcast".dimmed().to_string(),
    };
    format!("{dot} [{who}{target}] > ")
}

/// Byte count in the largest fitting unit, at most two decimals, trailing
/// zeros trimmed.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let exponent = (((63 - bytes.leading_zeros()) / 10) as usize).min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[exponent])
}

/// Elapsed time in the two largest units ("1h 2m", "2m 5s", "42s").
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

fn connected_for(connected_at: DateTime<Utc>) -> String {
    let elapsed = (Utc::now() - connected_at).to_std().unwrap_or_default();
    format_duration(elapsed)
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 80;
    if raw.chars().count() > LIMIT {
        let head: String = raw.chars().take(LIMIT).collect();
        format!("{head}...")
    } else {
        raw.to_string()
    }
}
