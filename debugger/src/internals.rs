use crate::types::{
    parse_call_stack, CallStackFrame, DataItem, DebugInfo, Instruction, InterpreterState,
    Registers, StackDump,
};

/// The debugger's current belief about the interpreter
///
/// Fields are overwritten by whichever poll reply arrives last, so a field
/// may briefly be older than its neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct DebuggerSnapshot {
    pub state: InterpreterState,
    pub base_pointer: i64,
    pub code_pointer: i64,
    pub stack: Option<Vec<DataItem>>,
    pub call_stack: Option<Vec<CallStackFrame>>,
    pub compiled_code: Option<Vec<Instruction>>,
    pub debug_info: Vec<DebugInfo>,
}

impl Default for DebuggerSnapshot {
    fn default() -> Self {
        Self {
            state: InterpreterState::Loading,
            base_pointer: -1,
            code_pointer: -1,
            stack: None,
            call_stack: None,
            compiled_code: None,
            debug_info: Vec::new(),
        }
    }
}

impl DebuggerSnapshot {
    pub fn status_label(&self) -> String {
        format!("{} ({})", self.state, self.code_pointer)
    }
}

#[derive(Debug, Default)]
pub(crate) struct DebuggerInternals {
    pub(crate) snapshot: DebuggerSnapshot,
    done_emitted: bool,
}

impl DebuggerInternals {
    pub(crate) fn apply_registers(&mut self, registers: Registers) {
        self.snapshot.base_pointer = registers.base_pointer;
        self.snapshot.code_pointer = registers.code_pointer;
    }

    pub(crate) fn apply_stack(&mut self, stack: StackDump) {
        self.snapshot.stack = Some(stack.stack);
    }

    pub(crate) fn apply_call_stack(&mut self, frames: Vec<String>) {
        self.snapshot.call_stack = Some(parse_call_stack(frames.as_slice()));
    }

    pub(crate) fn apply_debug_info(&mut self, debug_info: Vec<DebugInfo>) {
        self.snapshot.debug_info = debug_info;
    }

    pub(crate) fn apply_code(&mut self, code: Vec<Instruction>) {
        self.snapshot.compiled_code = Some(code);
    }

    /// Record a state report, returning true the first time the run is done
    pub(crate) fn apply_state(&mut self, state: InterpreterState) -> bool {
        self.snapshot.state = state;
        if state.is_terminal() && !self.done_emitted {
            self.done_emitted = true;
            return true;
        }
        false
    }
}
