use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use eyre::WrapErr;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use transport::{Channel, ChannelConfig, ChannelError, ChannelEvent, IpcMessage, ProcessStatus};

use crate::{
    internals::{DebuggerInternals, DebuggerSnapshot},
    launcher::Launcher,
    state::Event,
    types::{
        ConsoleOut, DebugInfo, Instruction, InterpreterState, Registers, StackDump, WireContext,
    },
};

#[derive(Debug, Clone)]
pub struct DebuggerConfig {
    /// Period of the registers/stack/call stack/state poll
    pub poll_interval: Duration,
    /// Delay before fetching the compiled code and debug info
    pub code_fetch_delay: Duration,
    /// How long to wait for a fresh status after starting or stepping
    pub status_timeout: Duration,
    /// How long each compiler request may take before the code is left unloaded
    pub code_timeout: Duration,
    /// Flags passed to the interpreter before the program path
    pub interpreter_args: Vec<String>,
    pub channel: ChannelConfig,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            code_fetch_delay: Duration::from_secs(1),
            status_timeout: Duration::from_secs(5),
            code_timeout: Duration::from_secs(5),
            interpreter_args: vec![
                "--debug".to_string(),
                "--throw-errors".to_string(),
                "--no-pause".to_string(),
            ],
            channel: ChannelConfig::default(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DebuggerError {
    #[error("Debugger timed out ({} ms)", .0.as_millis())]
    WaitTimeout(Duration),
    #[error("interpreter is not running")]
    NotRunning,
}

struct Shared {
    internals: Mutex<DebuggerInternals>,
    events: mpsc::UnboundedSender<Event>,
    /// Number of poll ticks whose requests have been issued
    ticks_started: AtomicU64,
    /// Highest tick whose state reply has been applied
    refreshed: watch::Sender<u64>,
    /// Set once the compiler output has been fetched, given up on or cancelled
    code_loaded: watch::Sender<bool>,
}

impl Shared {
    fn with_internals<R>(&self, f: impl FnOnce(&mut DebuggerInternals) -> R) -> R {
        let mut internals = self
            .internals
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut internals)
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            tracing::trace!("no debugger event listener");
        }
    }
}

/// Polled view of a running interpreter
///
/// Starting a debugger spawns the interpreter, fetches its compiled code once
/// and then polls registers, stack, call stack and state at a fixed period.
pub struct Debugger {
    channel: Channel,
    shared: Arc<Shared>,
    config: DebuggerConfig,
    poll: Mutex<Option<JoinHandle<()>>>,
    code_fetch: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Debugger {
    /// Start the interpreter on `path` and wait for its first status report
    #[tracing::instrument(skip(launcher, config, events))]
    pub async fn start(
        launcher: &dyn Launcher,
        path: &Path,
        config: DebuggerConfig,
        events: mpsc::UnboundedSender<Event>,
    ) -> eyre::Result<Self> {
        let mut args = config.interpreter_args.clone();
        args.push(format!("\"{}\"", path.display()));

        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let channel = launcher
            .launch(&args, config.channel.clone(), channel_tx)
            .wrap_err("starting interpreter")?;

        let (refreshed, mut first_status) = watch::channel(0);
        let (code_loaded, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            internals: Mutex::new(DebuggerInternals::default()),
            events,
            ticks_started: AtomicU64::new(0),
            refreshed,
            code_loaded,
        });

        tokio::spawn(forward_events(channel_rx, Arc::clone(&shared)));
        let code_fetch = tokio::spawn(fetch_code(
            channel.clone(),
            Arc::clone(&shared),
            config.code_fetch_delay,
            config.code_timeout,
        ));
        let poll = tokio::spawn(poll(
            channel.clone(),
            Arc::clone(&shared),
            config.poll_interval,
            config.status_timeout,
        ));

        let debugger = Self {
            channel,
            shared,
            config,
            poll: Mutex::new(Some(poll)),
            code_fetch: Mutex::new(Some(code_fetch)),
            disposed: AtomicBool::new(false),
        };

        let ready = wait_until(&mut first_status, |tick| *tick > 0);
        let timeout = debugger.config.status_timeout;
        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(())) => {
                tracing::debug!(status = %debugger.status_label(), "debugger started");
                Ok(debugger)
            }
            Ok(Err(e)) => {
                debugger.dispose();
                Err(e).wrap_err("waiting for first status")
            }
            Err(_) => {
                debugger.dispose();
                Err(DebuggerError::WaitTimeout(timeout)).wrap_err("waiting for first status")
            }
        }
    }

    /// Execute a single instruction and wait for the resulting status
    #[tracing::instrument(skip(self))]
    pub async fn execute_next(&self) -> Result<(), DebuggerError> {
        if self.disposed.load(Ordering::SeqCst) || !self.channel.is_running() {
            return Err(DebuggerError::NotRunning);
        }
        let mut refreshed = self.shared.refreshed.subscribe();
        self.channel
            .send("debug/step", Value::Null)
            .map_err(|_| DebuggerError::NotRunning)?;
        // only ticks issued after the step can observe its effect
        let issued = self.shared.ticks_started.load(Ordering::SeqCst);

        let timeout = self.config.status_timeout;
        match tokio::time::timeout(timeout, wait_until(&mut refreshed, |tick| *tick > issued)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(?timeout, "no status after step");
                Err(DebuggerError::WaitTimeout(timeout))
            }
        }
    }

    /// Wait until the background fetch of compiled code and debug info is over
    ///
    /// Returns once both replies arrived, their requests timed out or the
    /// debugger was disposed; the snapshot may still lack either of them.
    pub async fn wait_for_code(&self) {
        let mut loaded = self.shared.code_loaded.subscribe();
        if wait_until(&mut loaded, |loaded| *loaded).await.is_err() {
            tracing::debug!("code fetch abandoned");
        }
    }

    pub fn send(&self, r#type: &str, data: Value) -> Result<(), DebuggerError> {
        self.channel
            .send(r#type, data)
            .map_err(|_| DebuggerError::NotRunning)
    }

    pub fn snapshot(&self) -> DebuggerSnapshot {
        self.shared.with_internals(|i| i.snapshot.clone())
    }

    pub fn with_snapshot<R>(&self, f: impl FnOnce(&DebuggerSnapshot) -> R) -> R {
        self.shared.with_internals(|i| f(&i.snapshot))
    }

    pub fn state(&self) -> InterpreterState {
        self.with_snapshot(|s| s.state)
    }

    pub fn is_running_code(&self) -> bool {
        self.state().is_running_code()
    }

    pub fn base_pointer(&self) -> i64 {
        self.with_snapshot(|s| s.base_pointer)
    }

    pub fn code_pointer(&self) -> i64 {
        self.with_snapshot(|s| s.code_pointer)
    }

    pub fn status_label(&self) -> String {
        self.with_snapshot(DebuggerSnapshot::status_label)
    }

    pub fn status_icon(&self) -> Option<&'static str> {
        self.state().icon()
    }

    /// Whether the interpreter process is still alive
    pub fn is_running(&self) -> bool {
        self.channel.is_running()
    }

    /// Stop polling, cancel the pending code fetch and kill the interpreter
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(poll) = lock(&self.poll).take() {
            poll.abort();
        }
        if let Some(code_fetch) = lock(&self.code_fetch).take() {
            code_fetch.abort();
        }
        self.shared.code_loaded.send_replace(true);
        self.channel.stop();
    }
}

impl Drop for Debugger {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn wait_until<T>(
    rx: &mut watch::Receiver<T>,
    predicate: impl Fn(&T) -> bool,
) -> Result<(), DebuggerError> {
    loop {
        if predicate(&rx.borrow_and_update()) {
            return Ok(());
        }
        if rx.changed().await.is_err() {
            return Err(DebuggerError::NotRunning);
        }
    }
}

async fn request<T>(channel: &Channel, r#type: &str, timeout: Duration) -> Option<T>
where
    T: DeserializeOwned,
{
    let data = match channel.send_async(r#type, Value::Null, Some(timeout)).await {
        Ok(data) => data,
        Err(ChannelError::Closed) => {
            tracing::debug!(message_type = r#type, "channel closed before reply");
            return None;
        }
        Err(e) => {
            tracing::warn!(error = %e, message_type = r#type, "request failed");
            return None;
        }
    };
    match serde_json::from_value(data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, message_type = r#type, "unexpected reply payload");
            None
        }
    }
}

async fn fetch_code(channel: Channel, shared: Arc<Shared>, delay: Duration, timeout: Duration) {
    tokio::time::sleep(delay).await;
    if channel.is_running() {
        tracing::debug!("fetching compiler output");
        let (debug_info, code) = tokio::join!(
            request::<Vec<DebugInfo>>(&channel, "compiler/debuginfo", timeout),
            request::<Vec<Instruction>>(&channel, "compiler/code", timeout),
        );
        shared.with_internals(|internals| {
            if let Some(debug_info) = debug_info {
                internals.apply_debug_info(debug_info);
            }
            if let Some(code) = code {
                internals.apply_code(code);
            }
        });
    }
    shared.code_loaded.send_replace(true);
}

async fn poll(channel: Channel, shared: Arc<Shared>, interval: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if !channel.is_running() {
            let message = format!("Process exited with code {}", exit_code(channel.status()));
            tracing::error!(%message, "interpreter stopped while polling");
            shared.emit(Event::Error(message));
            break;
        }

        let tick = shared.ticks_started.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(refresh(channel.clone(), Arc::clone(&shared), tick, timeout));
    }
}

fn exit_code(status: ProcessStatus) -> String {
    match status {
        ProcessStatus::Exited(Some(code)) => code.to_string(),
        ProcessStatus::Exited(None) | ProcessStatus::Killed | ProcessStatus::Running => {
            "unknown".to_string()
        }
    }
}

/// One poll tick; the state is applied last so waiters see a coherent snapshot
async fn refresh(channel: Channel, shared: Arc<Shared>, tick: u64, timeout: Duration) {
    let registers = async {
        if let Some(registers) = request::<Registers>(&channel, "interpreter/registers", timeout).await
        {
            shared.with_internals(|i| i.apply_registers(registers));
        }
    };
    let stack = async {
        if let Some(stack) = request::<StackDump>(&channel, "interpreter/stack", timeout).await {
            shared.with_internals(|i| i.apply_stack(stack));
        }
    };
    let call_stack = async {
        if let Some(frames) =
            request::<Vec<String>>(&channel, "interpreter/callstack", timeout).await
        {
            shared.with_internals(|i| i.apply_call_stack(frames));
        }
    };
    let details = async { tokio::join!(registers, stack, call_stack) };

    let (_, state) = tokio::join!(
        details,
        request::<InterpreterState>(&channel, "interpreter/state", timeout)
    );
    let Some(state) = state else {
        return;
    };

    let done = shared.with_internals(|i| i.apply_state(state));
    shared
        .refreshed
        .send_modify(|applied| *applied = (*applied).max(tick));
    tracing::trace!(%state, tick, "status refreshed");

    if done {
        tracing::debug!("interpreter finished executing");
        shared.emit(Event::Done);
    }
}

async fn forward_events(mut rx: mpsc::UnboundedReceiver<ChannelEvent>, shared: Arc<Shared>) {
    while let Some(event) = rx.recv().await {
        match event {
            ChannelEvent::Spawned => shared.emit(Event::Spawned),
            ChannelEvent::Exited(code) => tracing::debug!(?code, "interpreter exited"),
            ChannelEvent::Closed(code) => shared.emit(Event::Closed(code)),
            ChannelEvent::Error(text)
            | ChannelEvent::ErrorMessage(text)
            | ChannelEvent::UnknownMessage(text) => shared.emit(Event::UnknownMessage(text)),
            ChannelEvent::Message(message) => shared.emit(translate(message)),
        }
    }
}

fn translate(message: IpcMessage) -> Event {
    match message.r#type.as_str() {
        "console/out" => match message.data_as::<ConsoleOut>() {
            Ok(out) => Event::ConsoleOut {
                message: out.message,
                severity: out.r#type,
                context: out.context.and_then(WireContext::into_context),
            },
            Err(e) => {
                tracing::warn!(error = %e, "malformed console output");
                Event::UnknownMessage(message.data.to_string())
            }
        },
        "stdout" => Event::Stdout(text(message.data)),
        "stderr" => Event::Stderr(text(message.data)),
        _ => Event::Message {
            r#type: message.r#type,
            data: message.data,
        },
    }
}

fn text(data: Value) -> String {
    match data {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{CallStackFrame, Severity};

    #[test]
    fn console_output_carries_parsed_context() {
        let message = IpcMessage::new(
            "console/out",
            "3",
            json!({
                "Message": "hello",
                "Type": "Debug",
                "Context": {"CodePointer": 4, "CallStack": ["main;/a.bbc;0;2"]}
            }),
        );

        let Event::ConsoleOut {
            message,
            severity,
            context,
        } = translate(message)
        else {
            panic!("expected console output");
        };
        assert_eq!(message, "hello");
        assert_eq!(severity, Severity::Debug);
        let context = context.unwrap();
        assert_eq!(context.code_pointer, 4);
        assert!(matches!(
            &context.call_stack[0],
            CallStackFrame::Source { line: 2, .. }
        ));
    }

    #[test]
    fn other_pushes_pass_through() {
        assert_eq!(
            translate(IpcMessage::new("stdout", "1", json!("x"))),
            Event::Stdout("x".to_string())
        );
        assert_eq!(
            translate(IpcMessage::new("interpreter/updated", "2", json!(1))),
            Event::Message {
                r#type: "interpreter/updated".to_string(),
                data: json!(1)
            }
        );
    }
}
