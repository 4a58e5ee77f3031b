//! One DAP session between an editor and the interpreter runtime
use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use dap_codec::{
    events::{Event, InvalidatedEventBody, OutputEventBody, OutputEventGroup, StoppedEventBody},
    requests::{self, CompileError, Request, RequestBody},
    responses::{self, Response, ResponseBody},
    types::{
        Breakpoint, BreakpointLocation, Capabilities, CompletionItem, DataBreakpointAccessType,
        ExceptionBreakpointsFilter, ExceptionDetails, Message, Scope, Seq, Source, StackFrame,
        SteppingGranularity, Thread, ThreadId, Variable, VariablePresentationHint,
    },
    BaseMessage, CodecError, DapCodec, LenientCodec, Sendable,
};
use debugger::{
    DataAccess, DebuggerConfig, LaunchArguments, Launcher, Runtime, RuntimeEvent, RuntimeVariable,
    StepGranularity, VariableValue,
};
use eyre::WrapErr;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, watch},
};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::handles::Handles;

/// The interpreter runs a single thread
const THREAD_ID: ThreadId = 1;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long `launch` waits for `configurationDone` before starting anyway
    pub configuration_timeout: Duration,
    pub debugger: DebuggerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            configuration_timeout: Duration::from_secs(1),
            debugger: DebuggerConfig::default(),
        }
    }
}

#[derive(Debug)]
enum Container {
    Locals,
    Parameters,
    Globals,
    Variable(RuntimeVariable),
}

enum Outgoing {
    Message(Sendable),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Disconnect,
}

#[derive(Clone)]
struct Responder {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Responder {
    fn respond(&self, response: Response) {
        self.send(Sendable::Response(response));
    }

    fn event(&self, event: Event) {
        self.send(Sendable::Event(event));
    }

    fn send(&self, message: Sendable) {
        if self.tx.send(Outgoing::Message(message)).is_err() {
            tracing::debug!("client gone, dropping message");
        }
    }

    fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }
}

/// A debug adapter session
///
/// Requests are handled in arrival order. Requests that drive the interpreter
/// (`launch`, `continue`, `next`) run in the background so that the session
/// keeps answering while the program runs.
pub struct Session {
    handler: Handler,
    runtime_events: mpsc::UnboundedReceiver<RuntimeEvent>,
    outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

impl Session {
    pub fn new(launcher: Arc<dyn Launcher>, config: SessionConfig) -> Self {
        let (events_tx, runtime_events) = mpsc::unbounded_channel();
        let runtime = Arc::new(Runtime::new(launcher, config.debugger.clone(), events_tx));
        let (tx, outgoing) = mpsc::unbounded_channel();
        let (configuration_done, _) = watch::channel(false);

        Self {
            handler: Handler {
                runtime,
                config,
                responder: Responder { tx },
                configuration_done,
                cancelled: Arc::new(Mutex::new(HashSet::new())),
                variables: Handles::default(),
                values_in_hex: false,
                use_invalidated_event: false,
            },
            runtime_events,
            outgoing,
        }
    }

    /// Serve requests from `input` until the client disconnects or closes the stream
    #[tracing::instrument(skip_all)]
    pub async fn run<R, W>(self, input: R, output: W) -> eyre::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Session {
            mut handler,
            mut runtime_events,
            outgoing,
        } = self;

        let writer = tokio::spawn(write_messages(
            FramedWrite::new(output, DapCodec::<Value>::new()),
            outgoing,
        ));
        let mut requests = FramedRead::new(input, LenientCodec::<Request>::new());

        loop {
            tokio::select! {
                request = requests.next() => match request {
                    Some(Ok(Ok(request))) => {
                        if handler.handle_request(request) == Flow::Disconnect {
                            tracing::debug!("client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Err(malformed))) => {
                        tracing::warn!(raw = %malformed.raw, error = %malformed.error, "ignoring malformed request");
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "could not read request");
                        break;
                    }
                    None => {
                        tracing::debug!("client closed the stream");
                        break;
                    }
                },
                Some(event) = runtime_events.recv() => handler.handle_runtime_event(event),
            }
        }

        // the interpreter does not outlive its session
        handler.runtime.terminate();
        handler.responder.close();
        writer
            .await
            .wrap_err("message writer panicked")?
            .wrap_err("writing messages")
    }
}

async fn write_messages<W>(
    mut sink: FramedWrite<W, DapCodec<Value>>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let mut seq: Seq = 0;
    while let Some(Outgoing::Message(message)) = outgoing.recv().await {
        seq += 1;
        tracing::trace!(seq, ?message, "sending message");
        sink.send(BaseMessage { seq, message }).await?;
    }
    Ok(())
}

struct Handler {
    runtime: Arc<Runtime>,
    config: SessionConfig,
    responder: Responder,
    configuration_done: watch::Sender<bool>,
    cancelled: Arc<Mutex<HashSet<Seq>>>,
    variables: Handles<Container>,
    values_in_hex: bool,
    use_invalidated_event: bool,
}

impl Handler {
    fn handle_request(&mut self, request: Request) -> Flow {
        let body = match request.parse() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(command = %request.command, error = %e, "invalid request arguments");
                self.responder.respond(Response::error(
                    &request,
                    Message::new(1015, "invalid arguments: {reason}")
                        .with_variable("reason", e.to_string()),
                ));
                return Flow::Continue;
            }
        };
        tracing::debug!(seq = request.seq, command = %request.command, "handling request");

        match body {
            RequestBody::Initialize(args) => self.initialize(&request, args),
            RequestBody::ConfigurationDone => {
                self.configuration_done.send_replace(true);
                self.responder.respond(Response::ack(&request));
            }
            RequestBody::Launch(args) | RequestBody::Attach(args) => self.launch(request, args),
            RequestBody::Disconnect(args) => {
                tracing::debug!(terminate = ?args.terminate_debuggee, "disconnect requested");
                if args.terminate_debuggee == Some(true) {
                    self.runtime.terminate();
                }
                self.responder.respond(Response::ack(&request));
                return Flow::Disconnect;
            }
            RequestBody::Terminate(_) => {
                self.runtime.terminate();
                self.responder.respond(Response::ack(&request));
            }
            RequestBody::SetBreakpoints(args) => self.set_breakpoints(&request, args),
            RequestBody::SetFunctionBreakpoints(args) => {
                let breakpoints = args
                    .breakpoints
                    .iter()
                    .map(|_| Breakpoint::default())
                    .collect();
                self.responder.respond(Response::success(
                    &request,
                    ResponseBody::SetBreakpoints(responses::SetBreakpoints { breakpoints }),
                ));
            }
            RequestBody::SetExceptionBreakpoints(args) => {
                self.set_exception_breakpoints(&request, args)
            }
            RequestBody::BreakpointLocations(args) => self.breakpoint_locations(&request, args),
            RequestBody::SetDataBreakpoints(args) => self.set_data_breakpoints(&request, args),
            RequestBody::DataBreakpointInfo(args) => self.data_breakpoint_info(&request, args),
            RequestBody::SetInstructionBreakpoints(args) => {
                self.set_instruction_breakpoints(&request, args)
            }
            RequestBody::ExceptionInfo(_) => self.exception_info(&request),
            RequestBody::Threads => {
                self.responder.respond(Response::success(
                    &request,
                    ResponseBody::Threads(responses::Threads {
                        threads: vec![Thread {
                            id: THREAD_ID,
                            name: "Main Thread".to_string(),
                        }],
                    }),
                ));
            }
            RequestBody::StackTrace(args) => self.stack_trace(&request, args),
            RequestBody::Scopes(_) => self.scopes(&request),
            RequestBody::Variables(args) => self.variables(&request, args),
            RequestBody::Continue(_) => {
                let runtime = Arc::clone(&self.runtime);
                tokio::spawn(async move { runtime.continue_execution().await });
                self.responder.respond(Response::success(
                    &request,
                    ResponseBody::Continue(responses::Continue {
                        all_threads_continued: true,
                    }),
                ));
            }
            RequestBody::Next(args) => {
                let granularity = match args.granularity {
                    Some(SteppingGranularity::Instruction) => StepGranularity::Instruction,
                    Some(SteppingGranularity::Statement | SteppingGranularity::Line) | None => {
                        StepGranularity::Line
                    }
                };
                let runtime = Arc::clone(&self.runtime);
                tokio::spawn(async move { runtime.step(granularity).await });
                self.responder.respond(Response::ack(&request));
            }
            RequestBody::Evaluate(args) => self.evaluate(&request, args),
            RequestBody::SetExpression(args) => self.set_expression(&request, args),
            RequestBody::Completions(_) => self.completions(&request),
            RequestBody::ReadMemory(args) => self.read_memory(&request, args),
            RequestBody::Cancel(args) => {
                if let Some(id) = args.request_id {
                    lock(&self.cancelled).insert(id);
                }
                self.responder.respond(Response::ack(&request));
            }
            RequestBody::ToggleFormatting => {
                self.values_in_hex = !self.values_in_hex;
                tracing::debug!(hex = self.values_in_hex, "toggled number formatting");
                if self.use_invalidated_event {
                    self.responder
                        .event(Event::Invalidated(InvalidatedEventBody {
                            areas: vec!["variables".to_string()],
                        }));
                }
                self.responder.respond(Response::ack(&request));
            }
            RequestBody::Unknown(command) => {
                tracing::warn!(%command, "unrecognized request");
                self.responder.respond(Response::error(
                    &request,
                    Message::new(1014, "unrecognized request").show_user(false),
                ));
            }
        }
        Flow::Continue
    }

    fn handle_runtime_event(&mut self, event: RuntimeEvent) {
        let reason = match event {
            RuntimeEvent::StopOnEntry => "entry",
            RuntimeEvent::StopOnStep => "step",
            RuntimeEvent::StopOnBreakpoint => "breakpoint",
            RuntimeEvent::StopOnInstructionBreakpoint => "instruction breakpoint",
            RuntimeEvent::Output { category, text } => {
                self.responder.event(Event::Output(output_event(category.as_str(), text)));
                return;
            }
            RuntimeEvent::End => {
                self.responder.event(Event::Terminated);
                return;
            }
        };
        // references handed out before the stop describe the old state
        self.variables.reset();
        self.responder
            .event(Event::Stopped(StoppedEventBody::new(reason, THREAD_ID)));
    }

    fn initialize(&mut self, request: &Request, args: requests::Initialize) {
        self.use_invalidated_event = args.supports_invalidated_event.unwrap_or(false);
        tracing::debug!(adapter = ?args.adapter_id, "initializing");

        self.responder.respond(Response::success(
            request,
            ResponseBody::Initialize(capabilities()),
        ));
        self.responder.event(Event::Initialized);
    }

    fn launch(&mut self, request: Request, args: requests::Launch) {
        let runtime = Arc::clone(&self.runtime);
        let responder = self.responder.clone();
        let cancelled = Arc::clone(&self.cancelled);
        let configured = self.configuration_done.subscribe();
        let timeout = self.config.configuration_timeout;

        tokio::spawn(async move {
            tracing::debug!(program = ?args.program, trace = ?args.trace, "launch requested");
            if tokio::time::timeout(timeout, wait_for_configuration(configured))
                .await
                .is_err()
            {
                tracing::debug!("configuration not finished, launching anyway");
            }
            if lock(&cancelled).remove(&request.seq) {
                responder.respond(Response::failure(&request, "cancelled"));
                return;
            }

            let Some(program) = args.program else {
                responder.respond(Response::error(
                    &request,
                    Message::new(1004, "no program to debug").show_user(true),
                ));
                return;
            };
            runtime
                .start(LaunchArguments {
                    program: program.into(),
                    stop_on_entry: args.stop_on_entry.unwrap_or(false),
                    debug: !args.no_debug.unwrap_or(false),
                })
                .await;

            let response = match args.compile_error {
                Some(compile_error) => {
                    let mut error = Message::new(1001, "compile error: some fake error.");
                    error.show_user = match compile_error {
                        CompileError::Show => Some(true),
                        CompileError::Hide => Some(false),
                        CompileError::Default => None,
                    };
                    Response::error(&request, error)
                }
                None => Response::ack(&request),
            };
            responder.respond(response);
        });
    }

    fn set_breakpoints(&mut self, request: &Request, args: requests::SetBreakpoints) {
        let Some(path) = args.source.path else {
            self.responder.respond(Response::success(
                request,
                ResponseBody::SetBreakpoints(responses::SetBreakpoints {
                    breakpoints: Vec::new(),
                }),
            ));
            return;
        };

        let lines: Vec<i64> = match args.breakpoints {
            Some(breakpoints) => breakpoints.iter().map(|bp| bp.line).collect(),
            None => args.lines.unwrap_or_default(),
        };

        self.runtime.clear_breakpoints(&path);
        let breakpoints = lines
            .into_iter()
            .map(|line| {
                let bp = self.runtime.set_breakpoint(&path, line);
                Breakpoint {
                    id: i64::try_from(bp.id).ok(),
                    verified: bp.verified,
                    line: Some(bp.line),
                    ..Breakpoint::default()
                }
            })
            .collect();

        self.responder.respond(Response::success(
            request,
            ResponseBody::SetBreakpoints(responses::SetBreakpoints { breakpoints }),
        ));
    }

    fn set_exception_breakpoints(
        &mut self,
        request: &Request,
        args: requests::SetExceptionBreakpoints,
    ) {
        let mut named_exception = None;
        let mut other_exceptions = args.filters.iter().any(|f| f == "otherExceptions");
        for option in args.filter_options.iter().flatten() {
            match option.filter_id.as_str() {
                "namedException" => named_exception = option.condition.clone(),
                "otherExceptions" => other_exceptions = true,
                other => tracing::debug!(filter = %other, "ignoring exception filter"),
            }
        }

        self.runtime
            .set_exception_filters(named_exception.as_deref(), other_exceptions);
        self.responder.respond(Response::ack(request));
    }

    fn breakpoint_locations(&mut self, request: &Request, args: requests::BreakpointLocations) {
        let breakpoints = match &args.source.path {
            Some(path) => self
                .runtime
                .breakpoint_columns(path, args.line)
                .into_iter()
                .map(|column| BreakpointLocation {
                    line: args.line,
                    column: Some(column),
                })
                .collect(),
            None => Vec::new(),
        };
        self.responder.respond(Response::success(
            request,
            ResponseBody::BreakpointLocations(responses::BreakpointLocations { breakpoints }),
        ));
    }

    fn set_data_breakpoints(&mut self, request: &Request, args: requests::SetDataBreakpoints) {
        self.runtime.clear_all_data_breakpoints();

        let breakpoints = args
            .breakpoints
            .iter()
            .map(|bp| {
                let access = match bp.access_type {
                    Some(DataBreakpointAccessType::Read) => DataAccess::Read,
                    Some(DataBreakpointAccessType::ReadWrite) => DataAccess::ReadWrite,
                    Some(DataBreakpointAccessType::Write) | None => DataAccess::Write,
                };
                Breakpoint {
                    verified: self.runtime.set_data_breakpoint(&bp.data_id, access),
                    ..Breakpoint::default()
                }
            })
            .collect();

        self.responder.respond(Response::success(
            request,
            ResponseBody::SetBreakpoints(responses::SetBreakpoints { breakpoints }),
        ));
    }

    fn data_breakpoint_info(&mut self, request: &Request, args: requests::DataBreakpointInfo) {
        let reference = args.variables_reference.filter(|r| *r != 0);
        let body = match reference {
            Some(reference) if !args.name.is_empty() => {
                let access_types = match self.variables.get(reference) {
                    Some(Container::Globals) => vec![DataBreakpointAccessType::Write],
                    _ => vec![
                        DataBreakpointAccessType::Read,
                        DataBreakpointAccessType::Write,
                        DataBreakpointAccessType::ReadWrite,
                    ],
                };
                responses::DataBreakpointInfo {
                    data_id: Some(args.name.clone()),
                    description: args.name,
                    access_types: Some(access_types),
                    can_persist: Some(true),
                }
            }
            _ => responses::DataBreakpointInfo {
                data_id: None,
                description: "cannot break on data access".to_string(),
                access_types: None,
                can_persist: Some(false),
            },
        };
        self.responder.respond(Response::success(
            request,
            ResponseBody::DataBreakpointInfo(body),
        ));
    }

    fn set_instruction_breakpoints(
        &mut self,
        request: &Request,
        args: requests::SetInstructionBreakpoints,
    ) {
        self.runtime.clear_instruction_breakpoints();

        let breakpoints = args
            .breakpoints
            .iter()
            .map(|bp| {
                let verified = match parse_address(&bp.instruction_reference) {
                    Some(address) => self
                        .runtime
                        .set_instruction_breakpoint(address + bp.offset.unwrap_or(0)),
                    None => {
                        tracing::warn!(reference = %bp.instruction_reference, "invalid instruction reference");
                        false
                    }
                };
                Breakpoint {
                    verified,
                    ..Breakpoint::default()
                }
            })
            .collect();

        self.responder.respond(Response::success(
            request,
            ResponseBody::SetBreakpoints(responses::SetBreakpoints { breakpoints }),
        ));
    }

    fn exception_info(&mut self, request: &Request) {
        self.responder.respond(Response::success(
            request,
            ResponseBody::ExceptionInfo(responses::ExceptionInfo {
                exception_id: "Exception ID".to_string(),
                description: Some("This is a descriptive description of the exception.".to_string()),
                break_mode: "always".to_string(),
                details: Some(ExceptionDetails {
                    message: Some("Message contained in the exception.".to_string()),
                    type_name: Some("Short type name of the exception object".to_string()),
                    stack_trace: Some("stack frame 1\nstack frame 2".to_string()),
                }),
            }),
        ));
    }

    fn stack_trace(&mut self, request: &Request, args: requests::StackTrace) {
        let frames = self.runtime.stack();
        let total_frames = frames.len();
        let levels = args.levels.filter(|l| *l > 0).unwrap_or(total_frames);

        let stack_frames = frames
            .into_iter()
            .skip(args.start_frame.unwrap_or(0))
            .take(levels)
            .map(|frame| StackFrame {
                id: frame.index as i64,
                name: frame.name,
                source: Some(source(&frame.file)),
                line: frame.line,
                column: 0,
                instruction_pointer_reference: frame.instruction.map(|i| i.to_string()),
            })
            .collect();

        self.responder.respond(Response::success(
            request,
            ResponseBody::StackTrace(responses::StackTrace {
                stack_frames,
                total_frames,
            }),
        ));
    }

    fn scopes(&mut self, request: &Request) {
        let scopes = vec![
            Scope {
                name: "Locals".to_string(),
                variables_reference: self.variables.create(Container::Locals),
                expensive: false,
                presentation_hint: Some("locals".to_string()),
            },
            Scope {
                name: "Parameters".to_string(),
                variables_reference: self.variables.create(Container::Parameters),
                expensive: false,
                presentation_hint: Some("arguments".to_string()),
            },
            Scope {
                name: "Globals".to_string(),
                variables_reference: self.variables.create(Container::Globals),
                expensive: true,
                presentation_hint: None,
            },
        ];
        self.responder.respond(Response::success(
            request,
            ResponseBody::Scopes(responses::Scopes { scopes }),
        ));
    }

    fn variables(&mut self, request: &Request, args: requests::Variables) {
        let runtime_variables = match self.variables.get(args.variables_reference) {
            Some(Container::Locals) => self.runtime.local_variables(),
            Some(Container::Parameters) => self.runtime.parameter_variables(),
            Some(Container::Variable(variable)) => match variable.value() {
                VariableValue::List(children) => children.clone(),
                _ => Vec::new(),
            },
            Some(Container::Globals) | None => Vec::new(),
        };

        let variables = runtime_variables
            .into_iter()
            .map(|variable| self.to_dap_variable(variable))
            .collect();
        self.responder.respond(Response::success(
            request,
            ResponseBody::Variables(responses::Variables { variables }),
        ));
    }

    fn to_dap_variable(&mut self, variable: RuntimeVariable) -> Variable {
        let name = variable.name().to_string();
        let (value, r#type) = match variable.value() {
            VariableValue::Integer(i) => (format_number(*i, self.values_in_hex), "integer"),
            VariableValue::Float(f) => (f.to_string(), "float"),
            VariableValue::String(s) => (format!("\"{s}\""), "string"),
            VariableValue::Boolean(b) => (b.to_string(), "boolean"),
            VariableValue::List(_) => ("Object".to_string(), "list"),
        };
        let expandable = matches!(variable.value(), VariableValue::List(_));
        let has_memory = variable.has_memory();

        let reference = match variable.reference {
            Some(reference) => Some(reference),
            None => (expandable || has_memory)
                .then(|| self.variables.create(Container::Variable(variable))),
        };

        Variable {
            evaluate_name: Some(format!("${name}")),
            name,
            value,
            r#type: Some(r#type.to_string()),
            variables_reference: reference.filter(|_| expandable).unwrap_or(0),
            memory_reference: reference.filter(|_| has_memory).map(|r| r.to_string()),
            presentation_hint: None,
        }
    }

    fn evaluate(&mut self, request: &Request, args: requests::Evaluate) {
        let context = args.context.as_deref();
        let result = self
            .runtime
            .evaluate(&args.expression, context)
            .unwrap_or_else(|| {
                format!(
                    "evaluate(context: '{}', '{}')",
                    context.unwrap_or("undefined"),
                    args.expression
                )
            });

        self.responder.respond(Response::success(
            request,
            ResponseBody::Evaluate(responses::Evaluate {
                result,
                variables_reference: 0,
                presentation_hint: Some(VariablePresentationHint {
                    kind: Some("data".to_string()),
                    attributes: Some(vec!["readOnly".to_string()]),
                    lazy: None,
                }),
            }),
        ));
    }

    fn set_expression(&mut self, request: &Request, args: requests::SetExpression) {
        tracing::debug!(expression = %args.expression, value = %args.value, "set expression");
        let error = if args.expression.starts_with('$') {
            Message::new(1002, "variable '{lexpr}' not found")
        } else {
            Message::new(1003, "'{lexpr}' not an assignable expression")
        };
        self.responder.respond(Response::error(
            request,
            error
                .with_variable("lexpr", args.expression)
                .show_user(true),
        ));
    }

    fn completions(&mut self, request: &Request) {
        let item = |label: &str, sort_text: &str| CompletionItem {
            label: label.to_string(),
            sort_text: Some(sort_text.to_string()),
            ..CompletionItem::default()
        };
        let targets = vec![
            item("item 10", "10"),
            CompletionItem {
                detail: Some("detail 1".to_string()),
                ..item("item 1", "01")
            },
            CompletionItem {
                detail: Some("detail 2".to_string()),
                ..item("item 2", "02")
            },
            CompletionItem {
                selection_start: Some(6),
                ..item("array[]", "03")
            },
            CompletionItem {
                selection_start: Some(5),
                selection_length: Some(3),
                ..item("func(arg)", "04")
            },
        ];
        self.responder.respond(Response::success(
            request,
            ResponseBody::Completions(responses::Completions { targets }),
        ));
    }

    fn read_memory(&mut self, request: &Request, args: requests::ReadMemory) {
        let offset = usize::try_from(args.offset.unwrap_or(0)).unwrap_or(0);
        let count = usize::try_from(args.count).unwrap_or(0);

        let container = match args.memory_reference.parse::<i64>() {
            Ok(handle) => self.variables.get_mut(handle),
            Err(_) => None,
        };
        let memory = match container {
            Some(Container::Variable(variable)) => variable.memory(),
            _ => None,
        };
        let bytes = match memory {
            Some(memory) => {
                let start = offset.min(memory.len());
                let end = offset.saturating_add(count).min(memory.len());
                memory[start..end].to_vec()
            }
            None => Vec::new(),
        };

        self.responder.respond(Response::success(
            request,
            ResponseBody::ReadMemory(responses::ReadMemory {
                address: offset.to_string(),
                data: STANDARD.encode(&bytes),
                unreadable_bytes: (count - bytes.len()) as i64,
            }),
        ));
    }
}

async fn wait_for_configuration(mut configured: watch::Receiver<bool>) {
    while !*configured.borrow_and_update() {
        if configured.changed().await.is_err() {
            return;
        }
    }
}

fn capabilities() -> Capabilities {
    Capabilities {
        supports_configuration_done_request: Some(true),
        supports_evaluate_for_hovers: Some(false),
        supports_step_back: Some(false),
        supports_data_breakpoints: Some(false),
        supports_completions_request: Some(true),
        supports_cancel_request: Some(false),
        supports_breakpoint_locations_request: Some(false),
        supports_step_in_targets_request: Some(false),
        supports_exception_filter_options: Some(false),
        exception_breakpoint_filters: Some(vec![
            ExceptionBreakpointsFilter {
                filter: "namedException".to_string(),
                label: "Named Exception".to_string(),
                description: Some(
                    "Break on named exceptions. Enter the exception's name as the Condition."
                        .to_string(),
                ),
                default: Some(false),
                supports_condition: Some(true),
                condition_description: Some("Enter the exception's name".to_string()),
            },
            ExceptionBreakpointsFilter {
                filter: "otherExceptions".to_string(),
                label: "Other Exceptions".to_string(),
                description: Some("This is a other exception".to_string()),
                default: Some(true),
                supports_condition: Some(false),
                condition_description: None,
            },
        ]),
        supports_exception_info_request: Some(true),
        supports_set_variable: Some(false),
        supports_set_expression: Some(true),
        supports_disassemble_request: Some(false),
        supports_stepping_granularity: Some(false),
        supports_instruction_breakpoints: Some(true),
        supports_read_memory_request: Some(true),
        supports_write_memory_request: Some(false),
        support_suspend_debuggee: Some(false),
        support_terminate_debuggee: Some(true),
        supports_function_breakpoints: Some(false),
        supports_delayed_stack_trace_loading: Some(false),
        ..Capabilities::default()
    }
}

/// Output lines `start`, `startCollapsed` and `end` open and close groups
fn output_event(category: &str, text: String) -> OutputEventBody {
    let group = match text.as_str() {
        "start" => Some(OutputEventGroup::Start),
        "startCollapsed" => Some(OutputEventGroup::StartCollapsed),
        "end" => Some(OutputEventGroup::End),
        _ => None,
    };
    let output = match group {
        Some(_) => format!("group-{text}\n"),
        None => format!("{text}\n"),
    };
    OutputEventBody {
        category: Some(category.to_string()),
        output,
        group,
        source: None,
        line: None,
        column: None,
    }
}

fn format_number(x: i64, hex: bool) -> String {
    match (hex, x < 0) {
        (true, false) => format!("0x{x:x}"),
        (true, true) => format!("-0x{:x}", x.unsigned_abs()),
        (false, _) => x.to_string(),
    }
}

fn source(path: &str) -> Source {
    Source {
        name: Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        path: Some(path.to_string()),
        ..Source::default()
    }
}

/// Decimal, or hexadecimal with a `0x` prefix
fn parse_address(reference: &str) -> Option<i64> {
    let reference = reference.trim();
    match reference
        .strip_prefix("0x")
        .or_else(|| reference.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => reference.parse().ok(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_groups() {
        let body = output_event("stdout", "startCollapsed".to_string());
        assert_eq!(body.group, Some(OutputEventGroup::StartCollapsed));
        assert_eq!(body.output, "group-startCollapsed\n");

        let body = output_event("stderr", "boom".to_string());
        assert_eq!(body.group, None);
        assert_eq!(body.output, "boom\n");
        assert_eq!(body.category.as_deref(), Some("stderr"));
    }

    #[test]
    fn numbers_in_hex() {
        assert_eq!(format_number(255, false), "255");
        assert_eq!(format_number(255, true), "0xff");
        assert_eq!(format_number(-16, true), "-0x10");
    }

    #[test]
    fn addresses() {
        assert_eq!(parse_address("42"), Some(42));
        assert_eq!(parse_address(" 0x2a "), Some(42));
        assert_eq!(parse_address("nope"), None);
    }

    #[test]
    fn sources_are_named_after_the_file() {
        let source = source("/work/dir/main.bbc");
        assert_eq!(source.name.as_deref(), Some("main.bbc"));
        assert_eq!(source.path.as_deref(), Some("/work/dir/main.bbc"));
    }
}
