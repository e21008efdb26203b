//! Drover operator console
//!
//! Interactive client for the relay hub: authenticates with the shared
//! secret, renders relayed agent events, and turns console lines into hub
//! commands. Connection loss is handled by a fixed-delay reconnect with a
//! bounded attempt budget; the agent cache and selection survive
//! reconnects (see [`session::OperatorSession`]).

pub mod command;
pub mod config;
pub mod console;
pub mod display;
pub mod session;

pub use command::{AgentOp, ConsoleCommand};
pub use config::OperatorConfig;
pub use console::Console;
pub use session::{OperatorSession, ReconnectPlan, SessionPhase};
