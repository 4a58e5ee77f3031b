//! Scripted interpreter for exercising the debugger without a real process
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{io::DuplexStream, sync::mpsc};
use tokio_util::codec::Framed;
use transport::{Channel, ChannelConfig, ChannelEvent, InMemoryTransport, IpcCodec, IpcMessage};

use crate::{
    debugger::DebuggerConfig,
    launcher::Launcher,
    types::{DataItem, DebugInfo, Instruction, InterpreterState, Position},
};

impl DebuggerConfig {
    /// Timings suitable for driving a [`StubInterpreter`]
    pub fn fast() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            code_fetch_delay: Duration::from_millis(1),
            status_timeout: Duration::from_secs(5),
            channel: ChannelConfig {
                write_delay: Duration::from_millis(1),
                ..ChannelConfig::default()
            },
            ..DebuggerConfig::default()
        }
    }
}

/// What the interpreter reports between two `debug/step` commands
#[derive(Debug, Clone)]
pub struct StubStep {
    pub state: InterpreterState,
    pub code_pointer: i64,
    pub base_pointer: i64,
    pub stack: Vec<DataItem>,
    pub call_stack: Vec<String>,
}

impl StubStep {
    pub fn new(state: InterpreterState, code_pointer: i64) -> Self {
        Self {
            state,
            code_pointer,
            base_pointer: 0,
            stack: Vec::new(),
            call_stack: vec![format!("State: {state}")],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StubProgram {
    pub steps: Vec<StubStep>,
    pub debug_info: Vec<DebugInfo>,
    pub code: Vec<Instruction>,
    /// Leave `compiler/*` requests unanswered
    pub silent_compiler: bool,
}

impl StubProgram {
    /// A program with one instruction per entry of `lines`
    ///
    /// Instruction `i` maps to source line `lines[i]`. Execution starts in
    /// global setup and ends with teardown followed by `CodeExecuted`.
    pub fn from_lines(file: &str, lines: &[i64]) -> Self {
        let mut steps = vec![StubStep::new(InterpreterState::SetGlobalVariables, -1)];
        let mut debug_info = Vec::new();
        let mut code = Vec::new();

        for (offset, line) in (0..).zip(lines) {
            let mut step = StubStep::new(InterpreterState::CallUpdate, offset);
            step.call_stack.push(format!("main;{file};{offset};{line}"));
            steps.push(step);

            debug_info.push(DebugInfo {
                start_offset: offset,
                end_offset: offset,
                position: Position {
                    start_line: *line,
                    end_line: *line,
                    ..Position::default()
                },
            });
            code.push(Instruction {
                opcode: "NOP".to_string(),
                parameter: None,
                tag: None,
            });
        }

        steps.push(StubStep::new(InterpreterState::DisposeGlobalVariables, -1));
        steps.push(StubStep::new(InterpreterState::CodeExecuted, -1));

        Self {
            steps,
            debug_info,
            code,
            silent_compiler: false,
        }
    }
}

enum StubCommand {
    Push { r#type: String, data: Value },
    Close,
}

#[derive(Default)]
struct Received {
    types: Vec<String>,
    steps: usize,
}

/// Handle to a running scripted interpreter
#[derive(Clone)]
pub struct StubInterpreter {
    received: Arc<Mutex<Received>>,
    commands: mpsc::UnboundedSender<StubCommand>,
}

impl StubInterpreter {
    /// Serve `program` on the interpreter end of an in-memory transport
    pub fn spawn(transport: InMemoryTransport, codec: IpcCodec, program: StubProgram) -> Self {
        let received = Arc::new(Mutex::new(Received::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(serve(
            transport.framed(codec),
            program,
            Arc::clone(&received),
            rx,
        ));
        Self {
            received,
            commands: tx,
        }
    }

    /// Message types received so far, in arrival order
    pub fn received(&self) -> Vec<String> {
        lock(&self.received).types.clone()
    }

    pub fn steps_received(&self) -> usize {
        lock(&self.received).steps
    }

    /// Send an unsolicited message to the client
    pub fn push(&self, r#type: &str, data: Value) {
        let _ = self.commands.send(StubCommand::Push {
            r#type: r#type.to_string(),
            data,
        });
    }

    /// Close the interpreter's end of the stream
    pub fn close(&self) {
        let _ = self.commands.send(StubCommand::Close);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn serve(
    mut framed: Framed<DuplexStream, IpcCodec>,
    program: StubProgram,
    received: Arc<Mutex<Received>>,
    mut commands: mpsc::UnboundedReceiver<StubCommand>,
) {
    let last = program.steps.len().saturating_sub(1);
    let mut position = 0;
    let mut next_id = 0u64;

    loop {
        let outgoing = tokio::select! {
            frame = framed.next() => {
                let message = match frame {
                    Some(Ok(Ok(message))) => message,
                    Some(Ok(Err(malformed))) => {
                        tracing::warn!(raw = %malformed.raw, "stub received malformed frame");
                        continue;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "stub stream failed");
                        break;
                    }
                    None => break,
                };

                {
                    let mut received = lock(&received);
                    received.types.push(message.r#type.clone());
                    if message.r#type == "debug/step" {
                        received.steps += 1;
                    }
                }
                if message.r#type == "debug/step" {
                    position = (position + 1).min(last);
                }

                let Some(step) = program.steps.get(position) else {
                    continue;
                };
                let data = match message.r#type.as_str() {
                    "interpreter/state" => json!(step.state),
                    "interpreter/registers" => json!({
                        "BasePointer": step.base_pointer,
                        "CodePointer": step.code_pointer,
                    }),
                    "interpreter/stack" => json!({
                        "StackMemorySize": step.stack.len(),
                        "Stack": step.stack,
                    }),
                    "interpreter/callstack" => json!(step.call_stack),
                    "compiler/debuginfo" | "compiler/code" if program.silent_compiler => continue,
                    "compiler/debuginfo" => json!(program.debug_info),
                    "compiler/code" => json!(program.code),
                    _ => continue,
                };
                IpcMessage::new(message.r#type.clone(), String::new(), data).reply_to(message.id)
            }
            command = commands.recv() => match command {
                Some(StubCommand::Push { r#type, data }) => IpcMessage::new(r#type, String::new(), data),
                Some(StubCommand::Close) | None => break,
            },
        };

        next_id += 1;
        let outgoing = IpcMessage {
            id: format!("stub-{next_id}"),
            ..outgoing
        };
        if let Err(e) = framed.send(outgoing).await {
            tracing::warn!(error = %e, "stub could not reply");
            break;
        }
    }
    tracing::debug!("stub interpreter finished");
}

/// Launcher that connects every session to a fresh [`StubInterpreter`]
pub struct StubLauncher {
    program: StubProgram,
    fail: bool,
    launches: Mutex<Vec<Vec<String>>>,
    interpreter: Mutex<Option<StubInterpreter>>,
}

impl StubLauncher {
    pub fn new(program: StubProgram) -> Self {
        Self {
            program,
            fail: false,
            launches: Mutex::new(Vec::new()),
            interpreter: Mutex::new(None),
        }
    }

    /// A launcher whose interpreter can never be found
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(StubProgram::default())
        }
    }

    /// Arguments of every launch so far
    pub fn launches(&self) -> Vec<Vec<String>> {
        lock(&self.launches).clone()
    }

    /// The interpreter of the most recent launch
    pub fn interpreter(&self) -> Option<StubInterpreter> {
        lock(&self.interpreter).clone()
    }
}

impl Launcher for StubLauncher {
    fn launch(
        &self,
        args: &[String],
        config: ChannelConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> eyre::Result<Channel> {
        lock(&self.launches).push(args.to_vec());
        if self.fail {
            eyre::bail!("interpreter not found");
        }

        let (client, interpreter) = InMemoryTransport::pair();
        let stub = StubInterpreter::spawn(
            interpreter,
            IpcCodec::new(config.delimiter, config.max_frames_per_chunk),
            self.program.clone(),
        );
        *lock(&self.interpreter) = Some(stub);
        Channel::with_transport(client, config, events)
    }
}
