//! Console line parsing
//!
//! One stdin line becomes one [`ConsoleCommand`]. Parsing is pure; routing
//! decisions (selected agent versus broadcast) stay in the console loop,
//! which knows the session state.

use serde_json::{json, Value};
use thiserror::Error;

/// Agent-bound envelopes the file-manager shortcuts expand into. The hub
/// relays these untouched; only agents interpret them.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOp {
    ListFiles { path: String },
    ChangeDirectory { path: String },
    DeleteFile { path: String },
    UploadFile { file: String },
    DownloadFile { file: String },
}

impl AgentOp {
    /// Wire form of the envelope.
    pub fn to_value(&self) -> Value {
        match self {
            AgentOp::ListFiles { path } => json!({"type": "list_files", "path": path}),
            AgentOp::ChangeDirectory { path } => json!({"type": "change_directory", "path": path}),
            AgentOp::DeleteFile { path } => json!({"type": "delete_file", "path": path}),
            AgentOp::UploadFile { file } => json!({"type": "upload_file", "file": file}),
            AgentOp::DownloadFile { file } => json!({"type": "download_file", "file": file}),
        }
    }

    /// Short verb for confirmation output.
    pub fn verb(&self) -> &'static str {
        match self {
            AgentOp::ListFiles { .. } => "ls",
            AgentOp::ChangeDirectory { .. } => "cd",
            AgentOp::DeleteFile { .. } => "rm",
            AgentOp::UploadFile { .. } => "upload",
            AgentOp::DownloadFile { .. } => "download",
        }
    }
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    ListAgents,
    ListOperators,
    Status,
    /// `send <id> <json>`, or `send <json>` against the selected agent
    Send {
        agent_id: Option<u32>,
        message: Value,
    },
    Broadcast {
        message: Value,
    },
    Kick {
        agent_id: u32,
    },
    /// Without an id this queries the selected agent
    State {
        agent_id: Option<u32>,
    },
    /// Without an id this reports the current selection
    Select {
        agent_id: Option<u32>,
    },
    Deselect,
    /// File-manager shortcut; target resolved against the selection
    Agent(AgentOp),
    Ping,
    /// Show the JSON an op would send, without sending it
    Debug {
        message: Value,
    },
    Reconnect,
    Clear,
    Exit,
}

/// Why a line did not parse. Messages are ready to print.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unknown command: {0} (try \"help\")")]
    Unknown(String),
    #[error("{0}")]
    Usage(&'static str),
    #[error("agent id must be a number, got {0}")]
    BadId(String),
    #[error("message must be valid JSON: {0}")]
    BadJson(String),
}

impl ConsoleCommand {
    /// Parse one console line. `None` for blank input.
    pub fn parse(line: &str) -> Option<Result<Self, ParseError>> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next()?.to_lowercase();
        let args: Vec<&str> = tokens.collect();
        Some(Self::parse_verb(&verb, &args))
    }

    fn parse_verb(verb: &str, args: &[&str]) -> Result<Self, ParseError> {
        match verb {
            "help" | "?" => Ok(Self::Help),
            "agents" | "list" => Ok(Self::ListAgents),
            "operators" => Ok(Self::ListOperators),
            "status" => Ok(Self::Status),
            "ping" => Ok(Self::Ping),
            "reconnect" => Ok(Self::Reconnect),
            "clear" => Ok(Self::Clear),
            "exit" | "quit" => Ok(Self::Exit),
            "deselect" | "desel" => Ok(Self::Deselect),

            "send" => {
                if args.is_empty() {
                    return Err(ParseError::Usage(
                        "usage: send <agent_id> <json>, or select an agent and send <json>",
                    ));
                }
                // An id followed by a payload targets that agent; anything
                // else is a payload for the selected one.
                if args.len() >= 2 {
                    if let Ok(agent_id) = args[0].parse::<u32>() {
                        let message = parse_json(&args[1..].join(" "))?;
                        return Ok(Self::Send {
                            agent_id: Some(agent_id),
                            message,
                        });
                    }
                }
                let message = parse_json(&args.join(" "))?;
                Ok(Self::Send {
                    agent_id: None,
                    message,
                })
            }

            "broadcast" => {
                if args.is_empty() {
                    return Err(ParseError::Usage("usage: broadcast <json>"));
                }
                let message = parse_json(&args.join(" "))?;
                Ok(Self::Broadcast { message })
            }

            "kick" => match args {
                [] => Err(ParseError::Usage("usage: kick <agent_id>")),
                [id, ..] => Ok(Self::Kick {
                    agent_id: parse_id(id)?,
                }),
            },

            "state" => match args {
                [] => Ok(Self::State { agent_id: None }),
                [id, ..] => Ok(Self::State {
                    agent_id: Some(parse_id(id)?),
                }),
            },

            "select" | "sel" => match args {
                [] => Ok(Self::Select { agent_id: None }),
                [id, ..] => Ok(Self::Select {
                    agent_id: Some(parse_id(id)?),
                }),
            },

            "ls" => Ok(Self::Agent(AgentOp::ListFiles {
                path: args.first().map(|s| s.to_string()).unwrap_or_default(),
            })),

            "cd" => {
                if args.is_empty() {
                    return Err(ParseError::Usage("usage: cd <path>"));
                }
                Ok(Self::Agent(AgentOp::ChangeDirectory {
                    path: args.join(" "),
                }))
            }

            "rm" => {
                if args.is_empty() {
                    return Err(ParseError::Usage("usage: rm <path>"));
                }
                Ok(Self::Agent(AgentOp::DeleteFile {
                    path: args.join(" "),
                }))
            }

            "upload" => {
                if args.is_empty() {
                    return Err(ParseError::Usage("usage: upload <file>"));
                }
                Ok(Self::Agent(AgentOp::UploadFile {
                    file: args.join(" "),
                }))
            }

            "down" | "download" => {
                if args.is_empty() {
                    return Err(ParseError::Usage("usage: download <file>"));
                }
                Ok(Self::Agent(AgentOp::DownloadFile {
                    file: args.join(" "),
                }))
            }

            "debug" => parse_debug(args),

            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

/// `debug <shortcut...>` renders the envelope a shortcut would send; any
/// other argument string must itself be JSON.
fn parse_debug(args: &[&str]) -> Result<ConsoleCommand, ParseError> {
    let message = match args {
        [] => {
            return Err(ParseError::Usage(
                "usage: debug <command>, e.g. \"debug ls /sdcard\"",
            ))
        }
        ["ls", rest @ ..] => AgentOp::ListFiles {
            path: rest.first().map(|s| s.to_string()).unwrap_or_default(),
        }
        .to_value(),
        ["cd", rest @ ..] => AgentOp::ChangeDirectory {
            path: rest.join(" "),
        }
        .to_value(),
        ["rm", rest @ ..] => AgentOp::DeleteFile {
            path: rest.join(" "),
        }
        .to_value(),
        ["upload", rest @ ..] => AgentOp::UploadFile { file: rest.join(" ") }.to_value(),
        ["download", rest @ ..] => AgentOp::DownloadFile { file: rest.join(" ") }.to_value(),
        _ => parse_json(&args.join(" "))?,
    };
    Ok(ConsoleCommand::Debug { message })
}

fn parse_id(raw: &str) -> Result<u32, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::BadId(raw.to_string()))
}

fn parse_json(raw: &str) -> Result<Value, ParseError> {
    serde_json::from_str(raw).map_err(|err| ParseError::BadJson(err.to_string()))
}
