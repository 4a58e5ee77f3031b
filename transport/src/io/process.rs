//! Child process transport
use std::path::Path;
use std::process::Stdio;

use eyre::{OptionExt, WrapErr};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::{IpcTransport, TransportParts};

/// Transport over the stdio pipes of a spawned interpreter
pub struct ChildProcessTransport {
    child: Child,
}

impl ChildProcessTransport {
    #[tracing::instrument(skip(args))]
    pub fn spawn(executable: impl AsRef<Path> + std::fmt::Debug, args: &[String]) -> eyre::Result<Self> {
        let executable = executable.as_ref();
        tracing::debug!(?args, "starting interpreter process");
        let child = Command::new(executable)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .wrap_err_with(|| format!("spawning interpreter {}", executable.display()))?;
        tracing::debug!(pid = ?child.id(), "interpreter process started");
        Ok(Self { child })
    }
}

impl IpcTransport for ChildProcessTransport {
    type Reader = ChildStdout;
    type Writer = ChildStdin;

    fn split(mut self) -> eyre::Result<TransportParts<Self::Reader, Self::Writer>> {
        let reader = self
            .child
            .stdout
            .take()
            .ok_or_eyre("interpreter stdout was not captured")?;
        let writer = self
            .child
            .stdin
            .take()
            .ok_or_eyre("interpreter stdin was not captured")?;
        let stderr = self
            .child
            .stderr
            .take()
            .map(|s| Box::new(s) as super::BoxedReader);

        Ok(TransportParts {
            reader,
            writer,
            stderr,
            child: Some(self.child),
        })
    }
}
