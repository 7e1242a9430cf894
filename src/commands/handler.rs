//! Command Handler Module
//!
//! This module turns a decoded RESP request into a reply.
//! A request is an array whose first element is a bulk string naming the
//! command; the remaining elements are its arguments.
//!
//! ## Supported Commands
//!
//! - `PING` - Replies `PONG`
//! - `ECHO message` - Replies with `message`, exactly as it was sent
//!
//! Command names are matched ASCII case-insensitively.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  execute()  │───>│  dispatch() │───>│  cmd_*()    │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │         ▲                                     │             │
//! │         └──────── CommandError → -ERR ────────┘             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::RespValue;
use std::vec;
use thiserror::Error;
use tracing::debug;

/// Dispatch-level failures.
///
/// These never close a connection; they are sent back to the client as a
/// RESP error reply.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Not a command invocation, or a command name we do not know
    #[error("ERR unknown command")]
    UnknownCommand,

    /// A known command with missing arguments
    #[error("ERR wrong number of arguments")]
    WrongArgumentCount,
}

impl From<CommandError> for RespValue {
    fn from(err: CommandError) -> Self {
        RespValue::error(err.to_string())
    }
}

/// Handles Redis commands by dispatching them to the appropriate handlers.
///
/// The handler holds no state, so a single instance can be cloned into
/// every connection task.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandHandler;

impl CommandHandler {
    /// Creates a new command handler.
    pub fn new() -> Self {
        Self
    }

    /// Executes a command and returns the response.
    ///
    /// # Arguments
    ///
    /// * `command` - The parsed RESP value (should be a non-empty array)
    ///
    /// # Returns
    ///
    /// The RESP response to send back to the client. Dispatch failures are
    /// returned as `RespValue::Error`.
    pub fn execute(&self, command: RespValue) -> RespValue {
        // Commands should be non-null, non-empty arrays
        let mut args = match command.into_array() {
            Some(args) if !args.is_empty() => args.into_iter(),
            _ => return CommandError::UnknownCommand.into(),
        };

        // Only a bulk string may name the command
        let cmd_name = match args.next() {
            Some(RespValue::BulkString(Some(name))) => match std::str::from_utf8(&name) {
                Ok(s) => s.to_ascii_uppercase(),
                Err(_) => return CommandError::UnknownCommand.into(),
            },
            _ => return CommandError::UnknownCommand.into(),
        };

        match self.dispatch(&cmd_name, args) {
            Ok(response) => response,
            Err(err) => {
                debug!(command = %cmd_name, error = %err, "Command rejected");
                err.into()
            }
        }
    }

    /// Dispatches a command to its handler.
    fn dispatch(
        &self,
        cmd: &str,
        args: vec::IntoIter<RespValue>,
    ) -> Result<RespValue, CommandError> {
        debug!(command = %cmd, args = args.len(), "Dispatching command");

        match cmd {
            "PING" => Ok(self.cmd_ping()),
            "ECHO" => self.cmd_echo(args),
            _ => Err(CommandError::UnknownCommand),
        }
    }

    /// PING
    fn cmd_ping(&self) -> RespValue {
        RespValue::pong()
    }

    /// ECHO message
    ///
    /// The message is handed back untouched, whatever its type. Arguments
    /// after the first are ignored.
    fn cmd_echo(&self, mut args: vec::IntoIter<RespValue>) -> Result<RespValue, CommandError> {
        args.next().ok_or(CommandError::WrongArgumentCount)
    }
}

/// Dispatches a single request with a fresh [`CommandHandler`].
pub fn dispatch(command: RespValue) -> RespValue {
    CommandHandler::new().execute(command)
}
