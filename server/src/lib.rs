//! Debug Adapter Protocol server for the interpreter
//!
//! A [`Session`] speaks DAP over any byte stream and translates requests into
//! calls on a [`debugger::Runtime`].
mod handles;
mod session;

pub use session::{Session, SessionConfig};
