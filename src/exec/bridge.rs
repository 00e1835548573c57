//! Bridge from a running Codex process to a pull-based event stream.
//!
//! [`Bridge::run`] returns an [`ExecStream`] without starting anything. The
//! first call to [`ExecStream::next`] spawns the process and a driver task
//! that owns it. The driver feeds decoded stdout events into the queue, logs
//! stderr, watches the cancellation token, and finally lets the
//! [`LifecycleMonitor`] flush and terminate the queue. The consumer sees every
//! event first, then at most one [`ExecError`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::error::{ExecError, SpawnError};
use super::events::Event;
use super::framer::EventDecoder;
use super::lifecycle::{Cancellation, LifecycleMonitor, ProcessReport};
use super::process::{CodexProcess, ExecOptions};
use super::queue::{event_queue, QueueReceiver, QueueSender};
use crate::config::BridgeConfig;

/// Default timeout between SIGTERM and SIGKILL on cancellation.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of each stdout read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Tracing target for the child's stderr.
const STDERR_TARGET: &str = "codex_bridge::stderr";

/// Launches Codex runs. Each call to [`run`](Self::run) owns a fresh process,
/// queue, framer and monitor.
#[derive(Debug, Clone)]
pub struct Bridge {
    binary: PathBuf,
    terminate_timeout: Duration,
}

impl Bridge {
    /// Create a bridge for the given binary, looked up on `PATH` if bare.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            terminate_timeout: DEFAULT_TERMINATE_TIMEOUT,
        }
    }

    /// Create a bridge from loaded configuration.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.binary.clone()).terminate_timeout(config.terminate_timeout())
    }

    /// Set how long a cancelled process gets to exit after SIGTERM.
    #[must_use]
    pub fn terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    /// Get the binary path.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Stream the events of one `codex exec` run.
    pub fn run<T>(&self, options: &ExecOptions, cancel: CancellationToken) -> ExecStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.run_with_args(options.build_args(), options.get_env().clone(), cancel)
    }

    /// Stream the events of the binary run with explicit arguments.
    pub fn run_with_args<T>(
        &self,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        cancel: CancellationToken,
    ) -> ExecStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        ExecStream {
            state: StreamState::Pending(Launch {
                program: self.binary.clone(),
                args,
                env,
                terminate_timeout: self.terminate_timeout,
                cancel,
            }),
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new("codex")
    }
}

/// Everything needed to start the process on first pull.
#[derive(Debug)]
struct Launch {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    terminate_timeout: Duration,
    cancel: CancellationToken,
}

impl Launch {
    fn start<T>(self) -> QueueReceiver<T, ExecError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (queue, receiver) = event_queue();

        if self.cancel.is_cancelled() {
            tracing::debug!("Cancelled before launch, not spawning");
            queue.fail(ExecError::Cancelled);
            return receiver;
        }

        let spawned = CodexProcess::spawn_with_args(&self.program, &self.args, &self.env)
            .and_then(|mut process| {
                let stdout = process.take_stdout().ok_or(SpawnError::MissingPipe("stdout"))?;
                let stderr = process.take_stderr().ok_or(SpawnError::MissingPipe("stderr"))?;
                Ok((process, stdout, stderr))
            });

        match spawned {
            Ok((process, stdout, stderr)) => {
                let driver = Driver {
                    process,
                    queue,
                    cancel: self.cancel,
                    terminate_timeout: self.terminate_timeout,
                    cancellation: Cancellation::NotRequested,
                    kill_deadline: None,
                };
                tokio::spawn(driver.run(stdout, stderr));
            }
            Err(err) => {
                tracing::error!(program = %self.program.display(), error = %err, "Failed to spawn");
                let mut monitor = LifecycleMonitor::new();
                monitor.observe(ProcessReport::SpawnFailed(err), Cancellation::NotRequested);
                monitor.finish(&mut EventDecoder::<T>::new(), &queue);
            }
        }

        receiver
    }
}

/// Owns the child for the duration of one run.
struct Driver<T> {
    process: CodexProcess,
    queue: QueueSender<T, ExecError>,
    cancel: CancellationToken,
    terminate_timeout: Duration,
    cancellation: Cancellation,
    /// When to escalate to SIGKILL, armed by a cancellation.
    kill_deadline: Option<Instant>,
}

impl<T: DeserializeOwned> Driver<T> {
    async fn run(mut self, mut stdout: ChildStdout, stderr: ChildStderr) {
        tokio::spawn(log_stderr(stderr));

        let mut decoder = EventDecoder::<T>::new();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        // Stdout keeps draining during the SIGTERM grace period.
        loop {
            let deadline = self.kill_deadline;
            tokio::select! {
                read = stdout.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        for event in decoder.decode(&buf[..n]) {
                            self.queue.push(event);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read Codex stdout");
                        break;
                    }
                },
                () = self.cancel.cancelled(), if !self.cancellation.is_requested() => {
                    self.request_stop();
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.escalate();
                }
            }
        }
        tracing::debug!(dropped = decoder.dropped(), "Codex stdout closed");

        let report = loop {
            let deadline = self.kill_deadline;
            tokio::select! {
                status = self.process.wait() => break match status {
                    Ok(status) => ProcessReport::from_status(status),
                    Err(e) => ProcessReport::WaitFailed(e),
                },
                () = self.cancel.cancelled(), if !self.cancellation.is_requested() => {
                    self.request_stop();
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.escalate();
                }
            }
        };

        // The token may have fired after the last select poll.
        if self.cancel.is_cancelled() {
            self.cancellation = Cancellation::Requested;
        }

        let mut monitor = LifecycleMonitor::new();
        monitor.observe(report, self.cancellation);
        monitor.finish(&mut decoder, &self.queue);
    }

    /// Send SIGTERM and arm the kill deadline.
    fn request_stop(&mut self) {
        self.cancellation = Cancellation::Requested;
        tracing::info!(pid = ?self.process.id(), "Cancellation requested, terminating Codex");
        if let Err(e) = self.process.terminate() {
            tracing::warn!(error = %e, "Failed to send SIGTERM to Codex");
        }
        self.kill_deadline = Some(Instant::now() + self.terminate_timeout);
    }

    fn escalate(&mut self) {
        self.kill_deadline = None;
        tracing::warn!(
            pid = ?self.process.id(),
            timeout = ?self.terminate_timeout,
            "Codex ignored SIGTERM, killing"
        );
        if let Err(e) = self.process.start_kill() {
            tracing::warn!(error = %e, "Failed to kill Codex process");
        }
    }
}

/// Forward the child's stderr to tracing, one line at a time.
async fn log_stderr(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    tracing::debug!(target: STDERR_TARGET, "{text}");
                }
            }
            Err(e) => {
                tracing::debug!(target: STDERR_TARGET, error = %e, "stderr read failed");
                break;
            }
        }
    }
}

#[derive(Debug)]
enum StreamState<T> {
    Pending(Launch),
    Running(QueueReceiver<T, ExecError>),
    Taken,
}

/// Lazy, finite, single-pass stream of events from one run.
///
/// Yields each event in arrival order, then `Some(Err(_))` once if the run
/// failed, then `None`. Dropping the stream does not stop the process; cancel
/// the token for that.
#[derive(Debug)]
pub struct ExecStream<T = Event> {
    state: StreamState<T>,
}

impl<T> ExecStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Returns true once the process has been launched.
    #[must_use]
    pub fn is_started(&self) -> bool {
        !matches!(self.state, StreamState::Pending(_))
    }

    /// Pull the next event, launching the process on first use.
    pub async fn next(&mut self) -> Option<Result<T, ExecError>> {
        if matches!(self.state, StreamState::Pending(_)) {
            if let StreamState::Pending(launch) =
                std::mem::replace(&mut self.state, StreamState::Taken)
            {
                self.state = StreamState::Running(launch.start());
            }
        }

        match &mut self.state {
            StreamState::Running(receiver) => receiver.next().await,
            StreamState::Pending(_) | StreamState::Taken => None,
        }
    }

    /// Convert into a `Stream` of results.
    pub fn into_stream(self) -> impl futures_core::Stream<Item = Result<T, ExecError>> {
        futures_util::stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }

    /// Drain every event.
    ///
    /// # Errors
    ///
    /// Returns the run's `ExecError`; events already received are discarded.
    pub async fn collect_all(mut self) -> Result<Vec<T>, ExecError> {
        let mut events = Vec::new();
        while let Some(item) = self.next().await {
            events.push(item?);
        }
        Ok(events)
    }
}
