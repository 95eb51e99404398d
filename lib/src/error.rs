// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::LoadError;
use crate::parse::ParseError;
use crate::partition::PowerState;
use crate::session::LinkError;
use std::fmt;
use std::io;
use thiserror::Error;

/// The step of a partition workflow a command error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Startup,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Startup => write!(f, "startup"),
        }
    }
}

/// Error conditions that can be emitted by libpowervm
#[derive(Error, Debug)]
pub enum Error {
    #[error("link: {0}")]
    Link(#[from] LinkError),
    #[error("command{}: {message}{}", action_tag(.action), command_tag(.command))]
    Command {
        command: Option<String>,
        message: String,
        action: Option<Action>,
    },
    #[error("power state of {subject}: expected {expected}, found {actual}")]
    PowerState {
        expected: String,
        actual: PowerState,
        subject: String,
    },
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("{0} has been deleted and can no longer be used")]
    UseAfterDestroy(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("partition {0} is not defined on its managed system")]
    NotDefined(String),
    #[error("no vio server with id {0} on this managed system")]
    UnknownVios(u32),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("io: {0}")]
    IO(#[from] io::Error),
    #[error("ssh: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("ron: {0}")]
    Ron(#[from] ron::Error),
    #[error("cli: {0}")]
    Cli(String),
}

fn action_tag(action: &Option<Action>) -> String {
    action.map(|a| format!(" ({a})")).unwrap_or_default()
}

fn command_tag(command: &Option<String>) -> String {
    command.as_ref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

impl Error {
    /// A command error carrying the command text and the raw output that
    /// tripped a vendor error marker.
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Command {
            command: Some(command.into()),
            message: message.into(),
            action: None,
        }
    }

    pub fn with_action(self, action: Action) -> Self {
        match self {
            Error::Command { command, message, .. } => Error::Command {
                command,
                message,
                action: Some(action),
            },
            other => other,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Error::Command { .. })
    }
}
