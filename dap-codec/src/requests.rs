//! Requests a DAP client sends to the adapter
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::types::{
    DataBreakpoint, ExceptionFilterOptions, FunctionBreakpoint, InstructionBreakpoint, Seq,
    Source, SourceBreakpoint, StackFrameId, SteppingGranularity, ThreadId, VariablesReference,
};

/// A request as it arrives on the wire
///
/// The arguments stay untyped until [`Request::parse`] so that a request for
/// an unknown command, or one with bad arguments, can still be answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: Seq,
    #[serde(default = "request_type")]
    pub r#type: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

fn request_type() -> String {
    "request".to_string()
}

impl Request {
    pub fn new(seq: Seq, command: impl Into<String>, arguments: Value) -> Self {
        Self {
            seq,
            r#type: request_type(),
            command: command.into(),
            arguments,
        }
    }

    /// Decode the arguments according to the command
    pub fn parse(&self) -> Result<RequestBody, serde_json::Error> {
        let body = match self.command.as_str() {
            "initialize" => RequestBody::Initialize(self.args()?),
            "configurationDone" => RequestBody::ConfigurationDone,
            "launch" => RequestBody::Launch(self.args()?),
            "attach" => RequestBody::Attach(self.args()?),
            "disconnect" => RequestBody::Disconnect(self.args()?),
            "terminate" => RequestBody::Terminate(self.args()?),
            "setBreakpoints" => RequestBody::SetBreakpoints(self.args()?),
            "setFunctionBreakpoints" => RequestBody::SetFunctionBreakpoints(self.args()?),
            "setExceptionBreakpoints" => RequestBody::SetExceptionBreakpoints(self.args()?),
            "breakpointLocations" => RequestBody::BreakpointLocations(self.args()?),
            "setDataBreakpoints" => RequestBody::SetDataBreakpoints(self.args()?),
            "dataBreakpointInfo" => RequestBody::DataBreakpointInfo(self.args()?),
            "setInstructionBreakpoints" => RequestBody::SetInstructionBreakpoints(self.args()?),
            "exceptionInfo" => RequestBody::ExceptionInfo(self.args()?),
            "threads" => RequestBody::Threads,
            "stackTrace" => RequestBody::StackTrace(self.args()?),
            "scopes" => RequestBody::Scopes(self.args()?),
            "variables" => RequestBody::Variables(self.args()?),
            "continue" => RequestBody::Continue(self.args()?),
            "next" => RequestBody::Next(self.args()?),
            "evaluate" => RequestBody::Evaluate(self.args()?),
            "setExpression" => RequestBody::SetExpression(self.args()?),
            "completions" => RequestBody::Completions(self.args()?),
            "readMemory" => RequestBody::ReadMemory(self.args()?),
            "cancel" => RequestBody::Cancel(self.args()?),
            "toggleFormatting" => RequestBody::ToggleFormatting,
            other => RequestBody::Unknown(other.to_string()),
        };
        Ok(body)
    }

    fn args<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.arguments {
            Value::Null => serde_json::from_value(Value::Object(Default::default())),
            arguments => T::deserialize(arguments),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Initialize(Initialize),
    ConfigurationDone,
    Launch(Launch),
    Attach(Launch),
    Disconnect(Disconnect),
    Terminate(Terminate),
    SetBreakpoints(SetBreakpoints),
    SetFunctionBreakpoints(SetFunctionBreakpoints),
    SetExceptionBreakpoints(SetExceptionBreakpoints),
    BreakpointLocations(BreakpointLocations),
    SetDataBreakpoints(SetDataBreakpoints),
    DataBreakpointInfo(DataBreakpointInfo),
    SetInstructionBreakpoints(SetInstructionBreakpoints),
    ExceptionInfo(ExceptionInfo),
    Threads,
    StackTrace(StackTrace),
    Scopes(Scopes),
    Variables(Variables),
    Continue(Continue),
    Next(Next),
    Evaluate(Evaluate),
    SetExpression(SetExpression),
    Completions(Completions),
    ReadMemory(ReadMemory),
    Cancel(Cancel),
    /// Custom request flipping variable formatting between decimal and hex
    ToggleFormatting,
    Unknown(String),
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Initialize {
    #[serde(rename = "adapterID")]
    pub adapter_id: Option<String>,
    #[serde(rename = "linesStartAt1")]
    pub lines_start_at_one: Option<bool>,
    pub supports_invalidated_event: Option<bool>,
    pub supports_memory_references: Option<bool>,
}

/// How a launch should report its simulated compile error
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CompileError {
    Default,
    Show,
    Hide,
}

/// Arguments of both `launch` and `attach`
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Launch {
    pub program: Option<String>,
    pub stop_on_entry: Option<bool>,
    pub no_debug: Option<bool>,
    pub trace: Option<bool>,
    pub compile_error: Option<CompileError>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Disconnect {
    pub restart: Option<bool>,
    pub terminate_debuggee: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Terminate {
    pub restart: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpoints {
    pub source: Source,
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    pub lines: Option<Vec<i64>>,
    pub source_modified: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct SetFunctionBreakpoints {
    pub breakpoints: Vec<FunctionBreakpoint>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetExceptionBreakpoints {
    #[serde(default)]
    pub filters: Vec<String>,
    pub filter_options: Option<Vec<ExceptionFilterOptions>>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocations {
    pub source: Source,
    pub line: i64,
    pub column: Option<i64>,
    pub end_line: Option<i64>,
    pub end_column: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct SetDataBreakpoints {
    pub breakpoints: Vec<DataBreakpoint>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataBreakpointInfo {
    pub variables_reference: Option<VariablesReference>,
    pub name: String,
    pub frame_id: Option<StackFrameId>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct SetInstructionBreakpoints {
    pub breakpoints: Vec<InstructionBreakpoint>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub thread_id: Option<ThreadId>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    pub thread_id: Option<ThreadId>,
    pub start_frame: Option<usize>,
    pub levels: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scopes {
    pub frame_id: StackFrameId,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variables {
    pub variables_reference: VariablesReference,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Continue {
    pub thread_id: Option<ThreadId>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Next {
    pub thread_id: Option<ThreadId>,
    pub granularity: Option<SteppingGranularity>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Evaluate {
    pub expression: String,
    pub frame_id: Option<StackFrameId>,
    pub context: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetExpression {
    pub expression: String,
    pub value: String,
    pub frame_id: Option<StackFrameId>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Completions {
    pub text: String,
    pub column: i64,
    pub line: Option<i64>,
    pub frame_id: Option<StackFrameId>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadMemory {
    pub memory_reference: String,
    pub offset: Option<i64>,
    pub count: i64,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cancel {
    pub request_id: Option<Seq>,
    pub progress_id: Option<String>,
}
