//! Debugger for the interpreter
//!
//! [`Debugger`] keeps a polled snapshot of a running interpreter and
//! [`Runtime`] builds continue, step and breakpoint handling on top of it by
//! stepping the interpreter one instruction at a time.
mod breakpoints;
mod debugger;
mod internals;
mod launcher;
mod runtime;
pub(crate) mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod utils;
mod variables;

pub use breakpoints::{
    instruction_to_debug_info, BreakpointId, BreakpointStore, DataAccess, RuntimeBreakpoint,
};
pub use debugger::{Debugger, DebuggerConfig, DebuggerError};
pub use internals::DebuggerSnapshot;
pub use launcher::{Launcher, ProcessLauncher};
pub use runtime::{OutputCategory, Runtime, RuntimeEvent, RuntimeStackFrame, StepGranularity};
pub use state::{Event, LaunchArguments};
pub use variables::{RuntimeVariable, VariableValue};
