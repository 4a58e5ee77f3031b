//! Responses the adapter sends back to the client
use serde::Serialize;

use crate::{
    requests::Request,
    types::{
        Breakpoint, BreakpointLocation, Capabilities, CompletionItem, DataBreakpointAccessType,
        ExceptionDetails, Message, Scope, Seq, StackFrame, Thread, Variable, VariablePresentationHint,
        VariablesReference,
    },
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub request_seq: Seq,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<ResponseBody>,
}

impl Response {
    /// A successful response without a body
    pub fn ack(request: &Request) -> Self {
        Self {
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body: None,
        }
    }

    pub fn success(request: &Request, body: ResponseBody) -> Self {
        Self {
            body: Some(body),
            ..Self::ack(request)
        }
    }

    /// A failed response carrying a structured error
    pub fn error(request: &Request, error: Message) -> Self {
        Self {
            success: false,
            message: Some(error.format.clone()),
            body: Some(ResponseBody::Error(ErrorBody { error: Some(error) })),
            ..Self::ack(request)
        }
    }

    /// A failed response with only a short message, such as `cancelled`
    pub fn failure(request: &Request, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::ack(request)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Initialize(Capabilities),
    SetBreakpoints(SetBreakpoints),
    BreakpointLocations(BreakpointLocations),
    DataBreakpointInfo(DataBreakpointInfo),
    ExceptionInfo(ExceptionInfo),
    Threads(Threads),
    StackTrace(StackTrace),
    Scopes(Scopes),
    Variables(Variables),
    Continue(Continue),
    Evaluate(Evaluate),
    SetExpression(SetExpression),
    Completions(Completions),
    ReadMemory(ReadMemory),
    Error(ErrorBody),
}

/// Body of `setBreakpoints`, `setDataBreakpoints` and `setInstructionBreakpoints`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetBreakpoints {
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakpointLocations {
    pub breakpoints: Vec<BreakpointLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBreakpointInfo {
    /// `None` when no data breakpoint can be set on the target
    pub data_id: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_types: Option<Vec<DataBreakpointAccessType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_persist: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub exception_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub break_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threads {
    pub threads: Vec<Thread>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    pub stack_frames: Vec<StackFrame>,
    pub total_frames: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scopes {
    pub scopes: Vec<Scope>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variables {
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Continue {
    pub all_threads_continued: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluate {
    pub result: String,
    pub variables_reference: VariablesReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<VariablePresentationHint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetExpression {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables_reference: Option<VariablesReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completions {
    pub targets: Vec<CompletionItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMemory {
    pub address: String,
    /// Base64 encoded bytes
    pub data: String,
    pub unreadable_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Message>,
}
