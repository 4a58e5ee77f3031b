use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    breakpoints::{instruction_to_debug_info, BreakpointStore, DataAccess, RuntimeBreakpoint},
    debugger::{Debugger, DebuggerConfig},
    internals::DebuggerSnapshot,
    launcher::Launcher,
    state::{Event, LaunchArguments},
    types::{CallStackFrame, Severity, Tag},
    utils::{normalise_path, normalize_path_and_casing},
    variables::RuntimeVariable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    Stdout,
    Stderr,
    Console,
    Important,
}

impl OutputCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputCategory::Stdout => "stdout",
            OutputCategory::Stderr => "stderr",
            OutputCategory::Console => "console",
            OutputCategory::Important => "important",
        }
    }
}

impl From<Severity> for OutputCategory {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Debug => OutputCategory::Stdout,
            Severity::Warning => OutputCategory::Important,
            Severity::Error => OutputCategory::Stderr,
            Severity::System | Severity::Normal | Severity::Unknown => OutputCategory::Console,
        }
    }
}

/// Notifications published by a [`Runtime`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    StopOnEntry,
    StopOnStep,
    StopOnBreakpoint,
    StopOnInstructionBreakpoint,
    Output {
        category: OutputCategory,
        text: String,
    },
    /// The debug session is over
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStackFrame {
    pub index: usize,
    pub name: String,
    pub file: String,
    pub line: i64,
    pub instruction: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGranularity {
    Line,
    Instruction,
}

#[derive(Debug, Clone, Copy)]
struct StopLocation {
    line: Option<i64>,
    code_pointer: i64,
}

#[derive(Debug, Default)]
struct ControlState {
    debug: bool,
    /// Where execution last stopped, so resuming does not re-hit the same breakpoint
    resume_from: Option<StopLocation>,
}

/// Execution control on top of a [`Debugger`]
///
/// Continue and step are implemented by driving the interpreter one
/// instruction at a time and checking breakpoints and line boundaries after
/// every status refresh.
pub struct Runtime {
    launcher: Arc<dyn Launcher>,
    config: DebuggerConfig,
    events: mpsc::UnboundedSender<RuntimeEvent>,
    debugger: Mutex<Option<Arc<Debugger>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    breakpoints: Mutex<BreakpointStore>,
    control: tokio::sync::Mutex<ControlState>,
}

impl Runtime {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        config: DebuggerConfig,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Self {
        Self {
            launcher,
            config,
            events,
            debugger: Mutex::new(None),
            listener: Mutex::new(None),
            breakpoints: Mutex::new(BreakpointStore::default()),
            control: tokio::sync::Mutex::new(ControlState::default()),
        }
    }

    /// Start a fresh debug session for `args.program`
    ///
    /// Never fails: problems starting the interpreter are reported as output
    /// followed by [`RuntimeEvent::End`]. Unless the program stops on entry,
    /// execution continues in the background once the interpreter is up.
    #[tracing::instrument(skip(self))]
    pub async fn start(self: &Arc<Self>, args: LaunchArguments) {
        {
            let mut control = self.control.lock().await;
            self.dispose_session();

            let program = normalize_path_and_casing(&normalise_path(&args.program).to_string_lossy());
            *control = ControlState {
                debug: args.debug,
                resume_from: None,
            };

            let (tx, rx) = mpsc::unbounded_channel();
            let debugger = match Debugger::start(
                self.launcher.as_ref(),
                Path::new(&program),
                self.config.clone(),
                tx,
            )
            .await
            {
                Ok(debugger) => Arc::new(debugger),
                Err(e) => {
                    tracing::error!(error = ?e, %program, "could not start debugger");
                    self.emit(RuntimeEvent::Output {
                        category: OutputCategory::Important,
                        text: format!("{e:#}"),
                    });
                    self.emit(RuntimeEvent::End);
                    return;
                }
            };

            let listener = tokio::spawn(listen(
                rx,
                Arc::downgrade(&debugger),
                self.events.clone(),
            ));
            *lock(&self.listener) = Some(listener);
            *lock(&self.debugger) = Some(Arc::clone(&debugger));

            if args.debug {
                // breakpoints and line steps resolve through the debug info
                debugger.wait_for_code().await;
                lock(&self.breakpoints).verify_breakpoints(&program);
                if args.stop_on_entry {
                    self.step_with(
                        &mut control,
                        &debugger,
                        StepGranularity::Instruction,
                        RuntimeEvent::StopOnEntry,
                    )
                    .await;
                    return;
                }
            }
        }

        let runtime = Arc::clone(self);
        tokio::spawn(async move { runtime.continue_execution().await });
    }

    /// Run until a breakpoint is hit or the program ends
    #[tracing::instrument(skip(self))]
    pub async fn continue_execution(&self) {
        let mut control = self.control.lock().await;
        let Some(debugger) = self.debugger() else {
            tracing::debug!("no program to continue");
            return;
        };

        self.execute_base_instructions(&debugger).await;

        let resume = control.resume_from.take();
        let mut leaving_line = resume.and_then(|r| r.line);
        let mut skip_code_pointer = resume.map(|r| r.code_pointer);

        while debugger.is_running_code() {
            let here = debugger.with_snapshot(stop_location);
            if leaving_line.is_some() && here.line != leaving_line {
                leaving_line = None;
            }

            if control.debug {
                if skip_code_pointer != Some(here.code_pointer)
                    && lock(&self.breakpoints).has_instruction_breakpoint(here.code_pointer)
                {
                    tracing::debug!(code_pointer = here.code_pointer, "hit instruction breakpoint");
                    control.resume_from = Some(here);
                    self.emit(RuntimeEvent::StopOnInstructionBreakpoint);
                    break;
                }
                if leaving_line.is_none() && lock(&self.breakpoints).there_is_breakpoint(here.line)
                {
                    tracing::debug!(line = ?here.line, "hit breakpoint");
                    control.resume_from = Some(here);
                    self.emit(RuntimeEvent::StopOnBreakpoint);
                    break;
                }
            }
            skip_code_pointer = None;

            if let Err(e) = debugger.execute_next().await {
                tracing::warn!(error = %e, "continue interrupted");
                break;
            }
        }

        self.execute_base_instructions(&debugger).await;
    }

    /// Step over one source line or one instruction
    #[tracing::instrument(skip(self))]
    pub async fn step(&self, granularity: StepGranularity) {
        let mut control = self.control.lock().await;
        let Some(debugger) = self.debugger() else {
            tracing::debug!("no program to step");
            return;
        };
        self.step_with(&mut control, &debugger, granularity, RuntimeEvent::StopOnStep)
            .await;
    }

    async fn step_with(
        &self,
        control: &mut ControlState,
        debugger: &Debugger,
        granularity: StepGranularity,
        stop: RuntimeEvent,
    ) {
        self.execute_base_instructions(debugger).await;

        match granularity {
            StepGranularity::Instruction => {
                if let Err(e) = debugger.execute_next().await {
                    tracing::warn!(error = %e, "instruction step failed");
                }
            }
            StepGranularity::Line => self.execute_next_line(debugger).await,
        }
        control.resume_from = Some(debugger.with_snapshot(stop_location));
        self.emit(stop);

        self.execute_base_instructions(debugger).await;
    }

    async fn execute_next_line(&self, debugger: &Debugger) {
        let started = debugger.with_snapshot(current_line).unwrap_or(-1);
        loop {
            if let Err(e) = debugger.execute_next().await {
                tracing::warn!(error = %e, started, "line step interrupted");
                return;
            }
            let line = debugger.with_snapshot(current_line);
            if !debugger.is_running_code() || line != Some(started) {
                return;
            }
        }
    }

    /// Silently step through interpreter setup and teardown
    async fn execute_base_instructions(&self, debugger: &Debugger) {
        while debugger.state().is_bootstrap() {
            if let Err(e) = debugger.execute_next().await {
                tracing::warn!(error = %e, state = %debugger.state(), "stepping through bootstrap");
                break;
            }
        }
    }

    /// Source line of the current instruction
    pub fn current_line(&self) -> Option<i64> {
        self.debugger()?.with_snapshot(current_line)
    }

    pub fn snapshot(&self) -> Option<DebuggerSnapshot> {
        Some(self.debugger()?.snapshot())
    }

    /// Source frames of the interpreter's call stack, innermost first
    ///
    /// When the innermost frame is real code a synthetic frame for the current
    /// instruction is put on top of it.
    pub fn stack(&self) -> Vec<RuntimeStackFrame> {
        let Some(debugger) = self.debugger() else {
            return Vec::new();
        };
        debugger.with_snapshot(|snapshot| {
            let Some(call_stack) = &snapshot.call_stack else {
                return Vec::new();
            };

            let mut frames = Vec::new();
            for frame in call_stack {
                if let CallStackFrame::Source {
                    name,
                    file,
                    offset,
                    line,
                } = frame
                {
                    frames.push(RuntimeStackFrame {
                        index: frames.len(),
                        name: name.clone(),
                        file: file.clone(),
                        line: *line,
                        instruction: Some(*offset),
                    });
                }
            }

            if let Some(CallStackFrame::Source { file, .. }) = call_stack.last() {
                if let Some(line) = current_line(snapshot).filter(|line| *line != 0) {
                    frames.push(RuntimeStackFrame {
                        index: frames.len(),
                        name: format!("Instruction {}", snapshot.code_pointer),
                        file: file.clone(),
                        line,
                        instruction: None,
                    });
                }
            }

            frames.reverse();
            frames
        })
    }

    /// Columns on `line` where a breakpoint may be placed
    pub fn breakpoint_columns(&self, _path: &str, _line: i64) -> Vec<i64> {
        vec![0]
    }

    pub fn set_breakpoint(&self, path: &str, line: i64) -> RuntimeBreakpoint {
        lock(&self.breakpoints).set_breakpoint(path, line)
    }

    pub fn clear_breakpoints(&self, path: &str) {
        lock(&self.breakpoints).clear_breakpoints(path);
    }

    pub fn set_data_breakpoint(&self, address: &str, access: DataAccess) -> bool {
        lock(&self.breakpoints).set_data_breakpoint(address, access)
    }

    pub fn clear_all_data_breakpoints(&self) {
        lock(&self.breakpoints).clear_data_breakpoints();
    }

    pub fn set_instruction_breakpoint(&self, address: i64) -> bool {
        lock(&self.breakpoints).set_instruction_breakpoint(address)
    }

    pub fn clear_instruction_breakpoints(&self) {
        lock(&self.breakpoints).clear_instruction_breakpoints();
    }

    /// The interpreter does not report exceptions, so filters are only recorded in the log
    pub fn set_exception_filters(&self, named_exception: Option<&str>, other_exceptions: bool) {
        tracing::debug!(?named_exception, other_exceptions, "exception filters set");
    }

    /// Stack slots tagged `var.<name>`
    pub fn local_variables(&self) -> Vec<RuntimeVariable> {
        self.tagged_variables(|tag| match tag {
            Tag::Variable(name) => Some(name),
            Tag::Parameter(_) | Tag::Other(_) => None,
        })
    }

    /// Stack slots tagged `param.<name>`
    pub fn parameter_variables(&self) -> Vec<RuntimeVariable> {
        self.tagged_variables(|tag| match tag {
            Tag::Parameter(name) => Some(name),
            Tag::Variable(_) | Tag::Other(_) => None,
        })
    }

    fn tagged_variables(&self, name_of: impl Fn(&Tag) -> Option<&String>) -> Vec<RuntimeVariable> {
        let Some(debugger) = self.debugger() else {
            return Vec::new();
        };
        debugger.with_snapshot(|snapshot| {
            snapshot
                .stack
                .iter()
                .flatten()
                .filter_map(|item| {
                    let name = name_of(item.tag.as_ref()?)?;
                    Some(RuntimeVariable::from_data_item(name.clone(), item))
                })
                .collect()
        })
    }

    /// Resolve a watch pseudo-variable, or hand the expression to the interpreter
    ///
    /// Returns `None` when there is no immediate answer. Expressions outside the
    /// watch context are sent to the interpreter, whose answer arrives later as
    /// console output.
    pub fn evaluate(&self, expression: &str, context: Option<&str>) -> Option<String> {
        let debugger = self.debugger()?;

        if context == Some("watch") {
            let name = expression
                .trim()
                .strip_prefix('%')?
                .strip_suffix('%')?
                .to_ascii_lowercase();
            return match name.as_str() {
                "bp" | "basepointer" => Some(debugger.base_pointer().to_string()),
                "cp" | "codepointer" => Some(debugger.code_pointer().to_string()),
                _ => None,
            };
        }

        if let Err(e) = debugger.send("eval", Value::String(expression.to_string())) {
            tracing::debug!(error = %e, expression, "could not send expression");
        }
        None
    }

    /// Kill the interpreter; the session ends once its output closes
    pub fn terminate(&self) {
        if let Some(debugger) = self.debugger() {
            tracing::debug!("terminating interpreter");
            debugger.dispose();
        }
    }

    fn dispose_session(&self) {
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
        if let Some(debugger) = lock(&self.debugger).take() {
            debugger.dispose();
        }
    }

    fn debugger(&self) -> Option<Arc<Debugger>> {
        lock(&self.debugger).clone()
    }

    fn emit(&self, event: RuntimeEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("no runtime event listener");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.dispose_session();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn current_line(snapshot: &DebuggerSnapshot) -> Option<i64> {
    instruction_to_debug_info(&snapshot.debug_info, snapshot.code_pointer)
        .map(|info| info.position.start_line)
}

fn stop_location(snapshot: &DebuggerSnapshot) -> StopLocation {
    StopLocation {
        line: current_line(snapshot),
        code_pointer: snapshot.code_pointer,
    }
}

async fn listen(
    mut rx: mpsc::UnboundedReceiver<Event>,
    debugger: Weak<Debugger>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
) {
    let emit = |event| {
        if events.send(event).is_err() {
            tracing::trace!("no runtime event listener");
        }
    };

    while let Some(event) = rx.recv().await {
        match event {
            Event::ConsoleOut {
                message, severity, ..
            } => emit(RuntimeEvent::Output {
                category: severity.into(),
                text: message,
            }),
            Event::Stdout(text) => emit(RuntimeEvent::Output {
                category: OutputCategory::Stdout,
                text,
            }),
            Event::Stderr(text) => emit(RuntimeEvent::Output {
                category: OutputCategory::Stderr,
                text,
            }),
            Event::Error(message) => emit(RuntimeEvent::Output {
                category: OutputCategory::Important,
                text: message,
            }),
            Event::Done => {
                if let Some(debugger) = debugger.upgrade() {
                    debugger.dispose();
                }
            }
            Event::Closed(code) => {
                tracing::debug!(?code, "interpreter closed");
                emit(RuntimeEvent::End);
            }
            Event::Spawned => tracing::debug!("interpreter spawned"),
            Event::Message { r#type, .. } => {
                tracing::debug!(message_type = %r#type, "ignoring interpreter push")
            }
            Event::UnknownMessage(text) => tracing::debug!(%text, "unrecognised interpreter output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{
        testing::{StubLauncher, StubProgram, StubStep},
        types::{DataItem, DataType, InterpreterState},
        variables::VariableValue,
    };

    const PROGRAM: &str = "/work/prog.bbc";

    fn setup(program: StubProgram) -> (Arc<Runtime>, Arc<StubLauncher>, mpsc::UnboundedReceiver<RuntimeEvent>) {
        let launcher = Arc::new(StubLauncher::new(program));
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(Runtime::new(
            launcher.clone(),
            DebuggerConfig::fast(),
            tx,
        ));
        (runtime, launcher, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<RuntimeEvent>) -> RuntimeEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for runtime event")
            .expect("runtime event channel closed")
    }

    fn launch(stop_on_entry: bool, debug: bool) -> LaunchArguments {
        LaunchArguments {
            program: PROGRAM.into(),
            stop_on_entry,
            debug,
        }
    }

    #[tokio::test]
    async fn continue_stops_at_breakpoint_and_resumes_to_the_end() {
        let (runtime, launcher, mut rx) = setup(StubProgram::from_lines(PROGRAM, &[1, 2, 3, 4]));
        let bp = runtime.set_breakpoint(PROGRAM, 3);
        assert_eq!(bp.id, 1);

        runtime.start(launch(false, true)).await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnBreakpoint);
        assert_eq!(runtime.current_line(), Some(3));
        assert_eq!(launcher.interpreter().unwrap().steps_received(), 3);

        runtime.continue_execution().await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::End);
    }

    #[tokio::test]
    async fn stop_on_entry_reports_entry() {
        let (runtime, _launcher, mut rx) = setup(StubProgram::from_lines(PROGRAM, &[1, 2, 3]));

        runtime.start(launch(true, true)).await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);
        assert_eq!(runtime.current_line(), Some(2));
    }

    #[tokio::test]
    async fn line_step_stops_on_every_changed_line() {
        let (runtime, _launcher, mut rx) = setup(StubProgram::from_lines(PROGRAM, &[1, 2, 3, 4]));
        runtime.start(launch(true, true)).await;
        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);

        runtime.step(StepGranularity::Line).await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnStep);
        assert_eq!(runtime.current_line(), Some(3));
    }

    #[tokio::test]
    async fn line_step_runs_through_instructions_on_the_same_line() {
        let (runtime, launcher, mut rx) =
            setup(StubProgram::from_lines(PROGRAM, &[1, 2, 2, 2, 5]));
        runtime.start(launch(true, true)).await;
        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);
        assert_eq!(runtime.current_line(), Some(2));
        let before = launcher.interpreter().unwrap().steps_received();

        runtime.step(StepGranularity::Line).await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnStep);
        assert_eq!(runtime.current_line(), Some(5));
        assert_eq!(launcher.interpreter().unwrap().steps_received() - before, 3);
    }

    #[tokio::test]
    async fn instruction_step_executes_exactly_one_instruction() {
        let (runtime, launcher, mut rx) =
            setup(StubProgram::from_lines(PROGRAM, &[1, 1, 1, 2]));
        runtime.start(launch(true, true)).await;
        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);
        let before = launcher.interpreter().unwrap().steps_received();

        runtime.step(StepGranularity::Instruction).await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnStep);
        assert_eq!(launcher.interpreter().unwrap().steps_received() - before, 1);
        assert_eq!(runtime.snapshot().unwrap().code_pointer, 2);
    }

    #[tokio::test]
    async fn missing_debug_info_does_not_block_the_session() {
        let mut program = StubProgram::from_lines(PROGRAM, &[1, 2, 3]);
        program.silent_compiler = true;
        let config = DebuggerConfig {
            code_timeout: Duration::from_millis(100),
            ..DebuggerConfig::fast()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(Runtime::new(
            Arc::new(StubLauncher::new(program)),
            config,
            tx,
        ));

        runtime.start(launch(true, true)).await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);
        assert_eq!(runtime.current_line(), None);
        assert_eq!(runtime.snapshot().unwrap().code_pointer, 1);
    }

    #[tokio::test]
    async fn run_without_debugging_ignores_breakpoints() {
        let (runtime, _launcher, mut rx) = setup(StubProgram::from_lines(PROGRAM, &[1, 2, 3]));
        runtime.set_breakpoint(PROGRAM, 2);

        runtime.start(launch(true, false)).await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::End);
    }

    #[tokio::test]
    async fn instruction_breakpoint_stops_on_its_code_pointer() {
        let (runtime, _launcher, mut rx) = setup(StubProgram::from_lines(PROGRAM, &[1, 1, 1, 1]));
        assert!(runtime.set_instruction_breakpoint(2));

        runtime.start(launch(false, true)).await;

        assert_eq!(
            next_event(&mut rx).await,
            RuntimeEvent::StopOnInstructionBreakpoint
        );
        assert_eq!(runtime.snapshot().unwrap().code_pointer, 2);
    }

    #[tokio::test]
    async fn bootstrap_states_are_stepped_through_silently() {
        let mut program = StubProgram::from_lines(PROGRAM, &[7, 8]);
        program
            .steps
            .insert(0, StubStep::new(InterpreterState::SetGlobalVariables, -1));
        program
            .steps
            .insert(0, StubStep::new(InterpreterState::SetGlobalVariables, -1));
        let (runtime, launcher, mut rx) = setup(program);

        runtime.start(launch(true, true)).await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);
        // three bootstrap steps, then the entry step
        assert_eq!(launcher.interpreter().unwrap().steps_received(), 4);
        assert_eq!(runtime.current_line(), Some(8));
    }

    #[tokio::test]
    async fn console_output_is_categorised_by_severity() {
        let (runtime, launcher, mut rx) = setup(StubProgram::from_lines(PROGRAM, &[1, 2]));
        runtime.start(launch(true, true)).await;
        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);
        let interpreter = launcher.interpreter().unwrap();

        interpreter.push("console/out", json!({"Message": "careful", "Type": "Warning"}));
        interpreter.push("stderr", json!("boom"));

        assert_eq!(
            next_event(&mut rx).await,
            RuntimeEvent::Output {
                category: OutputCategory::Important,
                text: "careful".to_string()
            }
        );
        assert_eq!(
            next_event(&mut rx).await,
            RuntimeEvent::Output {
                category: OutputCategory::Stderr,
                text: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn launch_failure_ends_the_session() {
        let launcher = Arc::new(StubLauncher::failing());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(Runtime::new(launcher, DebuggerConfig::fast(), tx));

        runtime.start(launch(false, true)).await;

        assert!(matches!(
            next_event(&mut rx).await,
            RuntimeEvent::Output {
                category: OutputCategory::Important,
                ..
            }
        ));
        assert_eq!(next_event(&mut rx).await, RuntimeEvent::End);
    }

    #[tokio::test]
    async fn variables_and_stack_follow_the_snapshot() {
        let mut program = StubProgram::from_lines(PROGRAM, &[1, 2]);
        let stack = vec![
            DataItem {
                value: "5".to_string(),
                r#type: DataType::Int,
                tag: Some(Tag::Variable("count".to_string())),
            },
            DataItem {
                value: "hi".to_string(),
                r#type: DataType::String,
                tag: Some(Tag::Parameter("greeting".to_string())),
            },
            DataItem {
                value: "0".to_string(),
                r#type: DataType::Int,
                tag: None,
            },
        ];
        for step in &mut program.steps {
            step.stack = stack.clone();
        }
        let (runtime, _launcher, mut rx) = setup(program);
        runtime.start(launch(true, true)).await;
        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);

        let locals = runtime.local_variables();
        assert_eq!(locals.len(), 1);
        assert_eq!(locals[0].name(), "count");
        assert_eq!(locals[0].value(), &VariableValue::Integer(5));
        let params = runtime.parameter_variables();
        assert_eq!(params[0].value(), &VariableValue::String("hi".to_string()));

        let stack = runtime.stack();
        assert_eq!(stack[0].name, "Instruction 1");
        assert_eq!(stack[0].line, 2);
        assert_eq!(stack[1].name, "main");
    }

    #[tokio::test]
    async fn watch_builtins_resolve_pointers() {
        let (runtime, launcher, mut rx) = setup(StubProgram::from_lines(PROGRAM, &[1, 2]));
        assert_eq!(runtime.evaluate("%cp%", Some("watch")), None);
        runtime.start(launch(true, true)).await;
        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);

        assert_eq!(runtime.evaluate("%CodePointer%", Some("watch")), Some("1".to_string()));
        assert_eq!(runtime.evaluate("%bp%", Some("watch")), Some("0".to_string()));
        assert_eq!(runtime.evaluate("%sp%", Some("watch")), None);
        assert_eq!(runtime.evaluate("1 + 1", Some("repl")), None);

        let interpreter = launcher.interpreter().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !interpreter.received().iter().any(|t| t == "eval") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("expression was never sent");
    }

    #[tokio::test]
    async fn restart_replaces_the_previous_session() {
        let (runtime, launcher, mut rx) = setup(StubProgram::from_lines(PROGRAM, &[1, 2, 3]));
        runtime.start(launch(true, true)).await;
        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);

        runtime.start(launch(true, true)).await;

        assert_eq!(next_event(&mut rx).await, RuntimeEvent::StopOnEntry);
        assert_eq!(launcher.launches().len(), 2);
        assert!(launcher.launches()[1]
            .last()
            .is_some_and(|arg| arg == &format!("\"{PROGRAM}\"")));
    }

    #[test]
    fn severity_maps_to_output_category() {
        assert_eq!(OutputCategory::from(Severity::Debug), OutputCategory::Stdout);
        assert_eq!(OutputCategory::from(Severity::Warning), OutputCategory::Important);
        assert_eq!(OutputCategory::from(Severity::Error), OutputCategory::Stderr);
        assert_eq!(OutputCategory::from(Severity::Normal), OutputCategory::Console);
        assert_eq!(OutputCategory::from(Severity::System), OutputCategory::Console);
    }
}
