use std::path::PathBuf;

use serde_json::Value;

use crate::types::{ConsoleContext, Severity};

/// Notifications published by a [`crate::Debugger`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Spawned,
    ConsoleOut {
        message: String,
        severity: Severity,
        context: Option<ConsoleContext>,
    },
    Stdout(String),
    Stderr(String),
    /// Any other push from the interpreter
    Message {
        r#type: String,
        data: Value,
    },
    /// Transport errors, stderr chunks and unparseable frames
    UnknownMessage(String),
    /// The interpreter reported `CodeExecuted` for the first time
    Done,
    Closed(Option<i32>),
    /// The interpreter died while being polled
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArguments {
    pub program: PathBuf,
    pub stop_on_entry: bool,
    /// `false` runs the program without consulting breakpoints
    pub debug: bool,
}

impl LaunchArguments {
    pub fn from_path(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            stop_on_entry: false,
            debug: true,
        }
    }
}
