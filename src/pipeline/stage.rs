//! Pipeline stage definitions
//!
//! A pipeline is one source, zero or more transforms and one sink. Transforms
//! are always external processes; the two ends may also be in-process async
//! readers and writers (the local archive file).

use std::ffi::OsString;
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;

/// Boxed async byte reader used as a pipeline source
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed async byte writer used as a pipeline sink
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An external process taking part in a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    /// Stage label used in logs and failures (e.g. "encode")
    pub label: String,
    /// Program to execute
    pub program: OsString,
    /// Program arguments
    pub args: Vec<OsString>,
}

impl StageCommand {
    /// Create a new stage command
    pub fn new(label: impl Into<String>, program: impl Into<OsString>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build the tokio command with the requested stdio wiring.
    ///
    /// stderr is always piped so failures can carry diagnostics, and the
    /// child is killed if its handle is dropped before it is reaped.
    pub(crate) fn to_command(&self, piped_stdin: bool, piped_stdout: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(if piped_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(if piped_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Human-readable command line for debug logs
    pub fn display_command(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Where the pipeline's bytes come from
pub enum ByteSource {
    /// Stdout of an external process
    Command(StageCommand),
    /// An in-process reader
    Reader { label: String, reader: BoxReader },
}

impl ByteSource {
    /// Wrap an async reader as a source
    pub fn reader(
        label: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self::Reader {
            label: label.into(),
            reader: Box::new(reader),
        }
    }

    /// Stage label
    pub fn label(&self) -> &str {
        match self {
            Self::Command(cmd) => &cmd.label,
            Self::Reader { label, .. } => label,
        }
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            Self::Reader { label, .. } => f.debug_struct("Reader").field("label", label).finish(),
        }
    }
}

/// A process that consumes bytes on stdin and produces bytes on stdout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteTransform(pub StageCommand);

impl ByteTransform {
    /// Stage label
    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// Underlying command
    pub fn command(&self) -> &StageCommand {
        &self.0
    }
}

/// Where the pipeline's bytes end up
pub enum ByteSink {
    /// Stdin of an external process
    Command(StageCommand),
    /// An in-process writer, shut down once the stream ends
    Writer { label: String, writer: BoxWriter },
}

impl ByteSink {
    /// Wrap an async writer as a sink
    pub fn writer(
        label: impl Into<String>,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self::Writer {
            label: label.into(),
            writer: Box::new(writer),
        }
    }

    /// Stage label
    pub fn label(&self) -> &str {
        match self {
            Self::Command(cmd) => &cmd.label,
            Self::Writer { label, .. } => label,
        }
    }
}

impl fmt::Debug for ByteSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(cmd) => f.debug_tuple("Command").field(cmd).finish(),
            Self::Writer { label, .. } => f.debug_struct("Writer").field("label", label).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_command_builder() {
        let cmd = StageCommand::new("encode", "zstd")
            .arg("-3")
            .args(["-T0", "-c"]);

        assert_eq!(cmd.label, "encode");
        assert_eq!(cmd.args.len(), 3);
        assert_eq!(cmd.display_command(), "zstd -3 -T0 -c");
    }

    #[test]
    fn endpoint_labels() {
        let source = ByteSource::reader("archive", tokio::io::empty());
        assert_eq!(source.label(), "archive");

        let sink = ByteSink::Command(StageCommand::new("inject", "docker"));
        assert_eq!(sink.label(), "inject");
    }
}
