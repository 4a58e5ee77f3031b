//! Data reported by the interpreter
use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterpreterState {
    /// No status received from the interpreter yet
    #[default]
    Loading,
    Initialized,
    SetGlobalVariables,
    CallCodeEntry,
    CallUpdate,
    CallCodeEnd,
    DisposeGlobalVariables,
    CodeExecuted,
    Destroyed,
}

impl InterpreterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpreterState::Loading => "Loading",
            InterpreterState::Initialized => "Initialized",
            InterpreterState::SetGlobalVariables => "SetGlobalVariables",
            InterpreterState::CallCodeEntry => "CallCodeEntry",
            InterpreterState::CallUpdate => "CallUpdate",
            InterpreterState::CallCodeEnd => "CallCodeEnd",
            InterpreterState::DisposeGlobalVariables => "DisposeGlobalVariables",
            InterpreterState::CodeExecuted => "CodeExecuted",
            InterpreterState::Destroyed => "Destroyed",
        }
    }

    /// User code is executing
    pub fn is_running_code(&self) -> bool {
        matches!(
            self,
            InterpreterState::CallCodeEntry
                | InterpreterState::CallUpdate
                | InterpreterState::CallCodeEnd
        )
    }

    /// Interpreter-internal setup or teardown that is stepped through silently
    pub fn is_bootstrap(&self) -> bool {
        matches!(
            self,
            InterpreterState::SetGlobalVariables | InterpreterState::DisposeGlobalVariables
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InterpreterState::CodeExecuted)
    }

    /// Codicon name for showing the state in a status bar
    pub fn icon(&self) -> Option<&'static str> {
        match self {
            InterpreterState::CallCodeEnd
            | InterpreterState::CallCodeEntry
            | InterpreterState::CallUpdate
            | InterpreterState::DisposeGlobalVariables
            | InterpreterState::SetGlobalVariables => Some("debug-start"),
            InterpreterState::CodeExecuted => Some("debug-stop"),
            InterpreterState::Destroyed => Some("terminal-kill"),
            InterpreterState::Initialized => Some("check"),
            InterpreterState::Loading => None,
        }
    }
}

impl fmt::Display for InterpreterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Int,
    Float,
    Byte,
    Char,
    String,
    Boolean,
    Struct,
    List,
    Runtime,
    Other(String),
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "INT" => DataType::Int,
            "FLOAT" => DataType::Float,
            "BYTE" => DataType::Byte,
            "CHAR" => DataType::Char,
            "STRING" => DataType::String,
            "BOOLEAN" => DataType::Boolean,
            "STRUCT" => DataType::Struct,
            "LIST" => DataType::List,
            "RUNTIME" => DataType::Runtime,
            _ => DataType::Other(value),
        }
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        match value {
            DataType::Int => "INT".to_string(),
            DataType::Float => "FLOAT".to_string(),
            DataType::Byte => "BYTE".to_string(),
            DataType::Char => "CHAR".to_string(),
            DataType::String => "STRING".to_string(),
            DataType::Boolean => "BOOLEAN".to_string(),
            DataType::Struct => "STRUCT".to_string(),
            DataType::List => "LIST".to_string(),
            DataType::Runtime => "RUNTIME".to_string(),
            DataType::Other(other) => other,
        }
    }
}

/// Provenance of a stack slot, parsed from `var.<name>` / `param.<name>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tag {
    Variable(String),
    Parameter(String),
    Other(String),
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        if let Some(name) = value.strip_prefix("var.") {
            Tag::Variable(name.to_string())
        } else if let Some(name) = value.strip_prefix("param.") {
            Tag::Parameter(name.to_string())
        } else {
            Tag::Other(value)
        }
    }
}

impl From<Tag> for String {
    fn from(value: Tag) -> Self {
        match value {
            Tag::Variable(name) => format!("var.{name}"),
            Tag::Parameter(name) => format!("param.{name}"),
            Tag::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataItem {
    #[serde(deserialize_with = "string_or_json")]
    pub value: String,
    pub r#type: DataType,
    #[serde(default)]
    pub tag: Option<Tag>,
}

/// Values are normally strings, but accept any scalar
fn string_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStackFrame {
    /// An interpreter phase rather than user code
    State { name: String },
    Source {
        name: String,
        file: String,
        offset: i64,
        line: i64,
    },
}

impl CallStackFrame {
    pub fn is_state(&self) -> bool {
        matches!(self, CallStackFrame::State { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            CallStackFrame::State { name } | CallStackFrame::Source { name, .. } => name,
        }
    }
}

impl FromStr for CallStackFrame {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("State: ") {
            return Ok(CallStackFrame::State {
                name: name.to_string(),
            });
        }

        let mut parts = s.split(';');
        let (Some(name), Some(file), Some(offset), Some(line)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            eyre::bail!("call stack frame {s:?} does not have four fields");
        };
        let offset = offset
            .trim()
            .parse()
            .map_err(|e| eyre::eyre!("invalid offset in frame {s:?}: {e}"))?;
        let line = line
            .trim()
            .parse()
            .map_err(|e| eyre::eyre!("invalid line in frame {s:?}: {e}"))?;

        Ok(CallStackFrame::Source {
            name: name.to_string(),
            file: file.to_string(),
            offset,
            line,
        })
    }
}

/// Parse the interpreter's call stack strings, dropping frames that do not parse
pub fn parse_call_stack<S>(frames: &[S]) -> Vec<CallStackFrame>
where
    S: AsRef<str>,
{
    frames
        .iter()
        .filter_map(|frame| match frame.as_ref().parse() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(error = %e, "skipping call stack frame");
                None
            }
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
    pub start_line: i64,
    pub start_char: i64,
    pub end_line: i64,
    pub end_char: i64,
    pub start_total: i64,
    pub end_total: i64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DebugInfo {
    pub start_offset: i64,
    pub end_offset: i64,
    pub position: Position,
}

impl DebugInfo {
    pub fn contains(&self, offset: i64) -> bool {
        self.start_offset <= offset && offset <= self.end_offset
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instruction {
    pub opcode: String,
    #[serde(default)]
    pub parameter: Option<DataItem>,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Registers {
    pub base_pointer: i64,
    pub code_pointer: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackDump {
    #[serde(default)]
    pub stack_memory_size: i64,
    pub stack: Vec<DataItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    System,
    Normal,
    Warning,
    Error,
    Debug,
    #[serde(other)]
    Unknown,
}

/// Payload of a `console/out` push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsoleOut {
    pub message: String,
    pub r#type: Severity,
    #[serde(default)]
    pub context: Option<WireContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireContext {
    pub code_pointer: i64,
    #[serde(default)]
    pub call_stack: Vec<String>,
}

/// Where the interpreter was when it wrote to the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleContext {
    pub code_pointer: i64,
    pub call_stack: Vec<CallStackFrame>,
}

impl WireContext {
    /// A code pointer of -1 means the output happened outside user code
    pub fn into_context(self) -> Option<ConsoleContext> {
        if self.code_pointer == -1 {
            return None;
        }
        Some(ConsoleContext {
            code_pointer: self.code_pointer,
            call_stack: parse_call_stack(self.call_stack.as_slice()),
        })
    }
}
