//! Streaming pipeline coordinator
//!
//! Wires a source through zero or more process transforms into a sink:
//!
//! ```text
//! source -> link -> transform 1 -> link -> ... -> transform N -> link -> sink
//! ```
//!
//! Every link is a fixed-size copy loop. A chunk is only read from upstream
//! once the previous chunk has been fully written downstream, so memory use is
//! bounded by the link buffer plus the OS pipe buffers regardless of archive
//! size. The first stage to fail terminates every other stage and aborts every
//! link; the run resolves to that failure.

mod stage;

pub use stage::{BoxReader, BoxWriter, ByteSink, ByteSource, ByteTransform, StageCommand};

use crate::error::{StateError, StateResult};
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use std::collections::VecDeque;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// Default link buffer size (64 KiB)
pub const DEFAULT_LINK_BUFFER: usize = 64 * 1024;

/// Max number of stderr lines attached to a stage failure.
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for a failed stage's stderr to drain.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte counts observed on each link of a finished pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Bytes moved across each link, upstream first
    pub link_bytes: Vec<u64>,
}

impl PipelineStats {
    /// Bytes read from the source
    pub fn bytes_in(&self) -> u64 {
        self.link_bytes.first().copied().unwrap_or(0)
    }

    /// Bytes delivered to the sink
    pub fn bytes_out(&self) -> u64 {
        self.link_bytes.last().copied().unwrap_or(0)
    }
}

/// Connects pipeline stages and resolves to a single completion status
#[derive(Debug, Clone)]
pub struct PipelineCoordinator {
    buffer_size: usize,
}

impl PipelineCoordinator {
    /// Create a coordinator with the default link buffer
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_LINK_BUFFER,
        }
    }

    /// Create a coordinator with a custom link buffer size
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Run `source -> stages -> sink` to completion.
    ///
    /// Returns per-link byte counts when every stage succeeds. Otherwise
    /// returns the first failure observed; failures that become ready in the
    /// same poll are ordered by pipeline position, upstream first.
    pub async fn run(
        &self,
        source: ByteSource,
        stages: Vec<ByteTransform>,
        sink: ByteSink,
    ) -> StateResult<PipelineStats> {
        let mut specs = Vec::with_capacity(stages.len() + 2);
        specs.push(match source {
            ByteSource::Command(cmd) => NodeSpec::Command(cmd),
            ByteSource::Reader { label, reader } => NodeSpec::Reader { label, reader },
        });
        specs.extend(stages.into_iter().map(|t| NodeSpec::Command(t.0)));
        specs.push(match sink {
            ByteSink::Command(cmd) => NodeSpec::Command(cmd),
            ByteSink::Writer { label, writer } => NodeSpec::Writer { label, writer },
        });

        let nodes = spawn_nodes(specs).await?;
        self.drive(nodes).await
    }

    async fn drive(&self, nodes: Vec<Node>) -> StateResult<PipelineStats> {
        let count = nodes.len();
        let mut labels = Vec::with_capacity(count);
        let mut in_process = Vec::with_capacity(count);
        let mut inputs: Vec<Option<BoxWriter>> = Vec::with_capacity(count);
        let mut outputs: Vec<Option<BoxReader>> = Vec::with_capacity(count);
        let mut stderr_tasks: Vec<Option<JoinHandle<String>>> = Vec::with_capacity(count);
        let mut stop_senders: Vec<Option<oneshot::Sender<()>>> = Vec::with_capacity(count);
        let mut events: FuturesUnordered<BoxFuture<'static, Event>> = FuturesUnordered::new();

        for (position, node) in nodes.into_iter().enumerate() {
            match node {
                Node::Process { label, mut child } => {
                    inputs.push(child.stdin.take().map(|s| Box::new(s) as BoxWriter));
                    outputs.push(child.stdout.take().map(|s| Box::new(s) as BoxReader));
                    stderr_tasks.push(
                        child
                            .stderr
                            .take()
                            .map(|s| tokio::spawn(collect_stderr(label.clone(), s))),
                    );

                    let (tx, rx) = oneshot::channel();
                    stop_senders.push(Some(tx));
                    events.push(
                        async move {
                            Event::Exited {
                                position,
                                status: supervise(child, rx).await,
                            }
                        }
                        .boxed(),
                    );

                    labels.push(label);
                    in_process.push(false);
                }
                Node::Reader { label, reader } => {
                    inputs.push(None);
                    outputs.push(Some(reader));
                    stderr_tasks.push(None);
                    stop_senders.push(None);
                    labels.push(label);
                    in_process.push(true);
                }
                Node::Writer { label, writer } => {
                    inputs.push(Some(writer));
                    outputs.push(None);
                    stderr_tasks.push(None);
                    stop_senders.push(None);
                    labels.push(label);
                    in_process.push(true);
                }
            }
        }

        let mut link_aborts: Vec<AbortHandle> = Vec::with_capacity(count - 1);
        for position in 0..count - 1 {
            let (Some(reader), Some(writer)) =
                (outputs[position].take(), inputs[position + 1].take())
            else {
                unreachable!("adjacent stages always expose a piped output and input");
            };
            let handle = tokio::spawn(pump(reader, writer, self.buffer_size));
            link_aborts.push(handle.abort_handle());
            events.push(
                async move {
                    Event::Linked {
                        position,
                        result: handle.await,
                    }
                }
                .boxed(),
            );
        }
        drop(inputs);
        drop(outputs);

        let mut link_bytes = vec![0u64; count - 1];
        let mut failure: Option<Failure> = None;

        while let Some(event) = events.next().await {
            let mut batch = vec![event];
            while let Some(Some(ready)) = events.next().now_or_never() {
                batch.push(ready);
            }

            let mut candidates = Vec::new();
            for event in batch {
                match event {
                    Event::Exited { position, status } => match status {
                        Ok(status) if status.success() => {
                            debug!("Stage '{}' finished", labels[position]);
                        }
                        Ok(status) => candidates.push(Failure {
                            position,
                            kind: FailureKind::Exit(status),
                        }),
                        Err(e) => candidates.push(Failure {
                            position,
                            kind: FailureKind::Stream(e),
                        }),
                    },
                    Event::Linked { position, result } => match result {
                        Ok(Ok(bytes)) => link_bytes[position] = bytes,
                        Ok(Err(LinkError::Read(e))) => {
                            if in_process[position] {
                                candidates.push(Failure {
                                    position,
                                    kind: FailureKind::Stream(e),
                                });
                            } else {
                                debug!("Link read from '{}' failed: {}", labels[position], e);
                            }
                        }
                        Ok(Err(LinkError::Write(e))) => {
                            if in_process[position + 1] {
                                candidates.push(Failure {
                                    position: position + 1,
                                    kind: FailureKind::Stream(e),
                                });
                            } else {
                                // The downstream process decides the outcome by its exit status
                                debug!("Link write to '{}' failed: {}", labels[position + 1], e);
                            }
                        }
                        Err(e) => {
                            if let Some(kind) = join_failure(e) {
                                candidates.push(Failure { position, kind });
                            }
                        }
                    },
                }
            }

            if failure.is_some() || candidates.is_empty() {
                continue;
            }

            candidates.sort_by_key(|c| c.position);
            let first = candidates.swap_remove(0);
            warn!(
                "Stage '{}' failed, terminating remaining stages",
                labels[first.position]
            );

            for (position, sender) in stop_senders.iter_mut().enumerate() {
                if position == first.position {
                    continue;
                }
                if let Some(tx) = sender.take() {
                    let _ = tx.send(());
                }
            }
            for abort in &link_aborts {
                abort.abort();
            }
            failure = Some(first);
        }

        let Some(failure) = failure else {
            for task in stderr_tasks.into_iter().flatten() {
                task.abort();
            }
            let stats = PipelineStats { link_bytes };
            info!(
                "Pipeline finished: {} bytes in, {} bytes out",
                stats.bytes_in(),
                stats.bytes_out()
            );
            return Ok(stats);
        };

        let mut stderr = String::new();
        for (position, task) in stderr_tasks.into_iter().enumerate() {
            let Some(task) = task else { continue };
            if position == failure.position {
                if let Ok(Ok(tail)) = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await {
                    stderr = tail;
                }
            } else {
                task.abort();
            }
        }

        let position = failure.position;
        Err(failure.into_error(labels.swap_remove(position), stderr))
    }
}

impl Default for PipelineCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

enum NodeSpec {
    Command(StageCommand),
    Reader { label: String, reader: BoxReader },
    Writer { label: String, writer: BoxWriter },
}

enum Node {
    Process { label: String, child: Child },
    Reader { label: String, reader: BoxReader },
    Writer { label: String, writer: BoxWriter },
}

enum Event {
    Exited {
        position: usize,
        status: io::Result<ExitStatus>,
    },
    Linked {
        position: usize,
        result: Result<Result<u64, LinkError>, JoinError>,
    },
}

enum LinkError {
    Read(io::Error),
    Write(io::Error),
}

struct Failure {
    position: usize,
    kind: FailureKind,
}

enum FailureKind {
    Exit(ExitStatus),
    Stream(io::Error),
}

impl Failure {
    fn into_error(self, stage: String, stderr: String) -> StateError {
        match self.kind {
            FailureKind::Exit(status) => match status.code() {
                Some(code) => StateError::NonZeroExit {
                    stage,
                    code,
                    stderr,
                },
                None => StateError::StageTerminated { stage, stderr },
            },
            FailureKind::Stream(source) => StateError::StreamIo { stage, source },
        }
    }
}

/// Spawn every process stage in pipeline order.
///
/// If a spawn fails, the stages already started are terminated and reaped
/// before the spawn error is returned.
async fn spawn_nodes(specs: Vec<NodeSpec>) -> StateResult<Vec<Node>> {
    let count = specs.len();
    let mut nodes = Vec::with_capacity(count);

    for (position, spec) in specs.into_iter().enumerate() {
        match spec {
            NodeSpec::Command(cmd) => {
                debug!("Spawning stage '{}': {}", cmd.label, cmd.display_command());
                match cmd.to_command(position > 0, position + 1 < count).spawn() {
                    Ok(child) => nodes.push(Node::Process {
                        label: cmd.label,
                        child,
                    }),
                    Err(source) => {
                        warn!("Failed to start stage '{}': {}", cmd.label, source);
                        for node in nodes {
                            if let Node::Process { mut child, .. } = node {
                                send_terminate(&mut child);
                                let _ = child.wait().await;
                            }
                        }
                        return Err(StateError::ProcessSpawn {
                            stage: cmd.label,
                            source,
                        });
                    }
                }
            }
            NodeSpec::Reader { label, reader } => nodes.push(Node::Reader { label, reader }),
            NodeSpec::Writer { label, writer } => nodes.push(Node::Writer { label, writer }),
        }
    }

    Ok(nodes)
}

/// Wait for a child, terminating it first if asked to stop.
async fn supervise(mut child: Child, stop: oneshot::Receiver<()>) -> io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        signal = stop => {
            if signal.is_ok() {
                send_terminate(&mut child);
            }
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: the pid belongs to our own child, which has not been reaped yet
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Copy bytes from one stage to the next.
///
/// Reads a chunk only after the previous one has been written in full, then
/// shuts the downstream input so the next stage sees end-of-stream.
async fn pump(
    mut reader: BoxReader,
    mut writer: BoxWriter,
    buffer_size: usize,
) -> Result<u64, LinkError> {
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await.map_err(LinkError::Read)?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(LinkError::Write)?;
        total += n as u64;
    }

    writer.shutdown().await.map_err(LinkError::Write)?;
    Ok(total)
}

fn join_failure(err: JoinError) -> Option<FailureKind> {
    if err.is_cancelled() {
        None
    } else {
        Some(FailureKind::Stream(io::Error::other(err.to_string())))
    }
}

/// Drain a stage's stderr, logging each line and keeping the tail for errors.
async fn collect_stderr(label: String, stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[{}] {}", label, line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Instant;
    use tokio::io::AsyncWrite;

    fn sh(label: &str, script: &str) -> StageCommand {
        StageCommand::new(label, "sh").args(["-c", script])
    }

    /// Writer that records everything written into shared memory
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl AsyncWrite for Capture {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: std::pin::Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that always fails
    struct Broken;

    impl AsyncWrite for Broken {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other("disk full")))
        }

        fn poll_flush(self: std::pin::Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn reader_through_processes_into_writer() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let capture = Capture::default();

        let stats = PipelineCoordinator::with_buffer_size(4096)
            .run(
                ByteSource::reader("archive", std::io::Cursor::new(data.clone())),
                vec![
                    ByteTransform(StageCommand::new("first", "cat")),
                    ByteTransform(StageCommand::new("second", "cat")),
                ],
                ByteSink::writer("capture", capture.clone()),
            )
            .await
            .unwrap();

        assert_eq!(capture.bytes(), data);
        assert_eq!(stats.link_bytes.len(), 3);
        assert_eq!(stats.bytes_in(), data.len() as u64);
        assert_eq!(stats.bytes_out(), data.len() as u64);
    }

    #[tokio::test]
    async fn process_source_and_sink() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("out.txt");

        PipelineCoordinator::new()
            .run(
                ByteSource::Command(sh("source", "printf 'hello pipeline'")),
                vec![],
                ByteSink::Command(sh("sink", &format!("cat > '{}'", out.display()))),
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello pipeline");
    }

    #[tokio::test]
    async fn failing_transform_reports_stage_and_terminates_source() {
        let started = Instant::now();

        let result = tokio::time::timeout(
            Duration::from_secs(20),
            PipelineCoordinator::new().run(
                ByteSource::Command(StageCommand::new("source", "sleep").arg("30")),
                vec![ByteTransform(sh("decode", "echo 'bad magic' >&2; exit 3"))],
                ByteSink::writer("capture", Capture::default()),
            ),
        )
        .await
        .expect("pipeline should not wait for the source to finish on its own");

        match result {
            Err(StateError::NonZeroExit { stage, code, stderr }) => {
                assert_eq!(stage, "decode");
                assert_eq!(code, 3);
                assert!(stderr.contains("bad magic"));
            }
            other => panic!("expected decode failure, got {:?}", other.map(|_| ())),
        }
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn failing_sink_process_is_reported() {
        let result = PipelineCoordinator::new()
            .run(
                ByteSource::reader("archive", std::io::Cursor::new(vec![7u8; 1024])),
                vec![ByteTransform(StageCommand::new("encode", "cat"))],
                ByteSink::Command(sh("inject", "cat > /dev/null; exit 5")),
            )
            .await;

        assert_eq!(result.unwrap_err().exit_code(), Some(5));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_immediately() {
        let result = PipelineCoordinator::new()
            .run(
                ByteSource::Command(StageCommand::new("source", "sleep").arg("30")),
                vec![ByteTransform(StageCommand::new(
                    "encode",
                    "/nonexistent/definitely-not-a-compressor",
                ))],
                ByteSink::writer("capture", Capture::default()),
            )
            .await;

        match result {
            Err(StateError::ProcessSpawn { stage, .. }) => assert_eq!(stage, "encode"),
            other => panic!("expected spawn failure, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn writer_failure_is_attributed_to_sink() {
        let result = PipelineCoordinator::new()
            .run(
                ByteSource::Command(sh("source", "yes | head -c 100000")),
                vec![],
                ByteSink::writer("archive-file", Broken),
            )
            .await;

        match result {
            Err(StateError::StreamIo { stage, .. }) => assert_eq!(stage, "archive-file"),
            other => panic!("expected stream failure, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn empty_stream_succeeds() {
        let capture = Capture::default();
        let stats = PipelineCoordinator::new()
            .run(
                ByteSource::reader("empty", tokio::io::empty()),
                vec![ByteTransform(StageCommand::new("copy", "cat"))],
                ByteSink::writer("capture", capture.clone()),
            )
            .await
            .unwrap();

        assert!(capture.bytes().is_empty());
        assert_eq!(stats.bytes_out(), 0);
    }
}
