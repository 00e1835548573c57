//! Process lifecycle monitoring and termination classification.
//!
//! The driver reports how the child ended as a [`ProcessReport`] together
//! with whether the caller had asked for cancellation. Both travel into
//! [`TerminationOutcome::classify`] as one value, so the decision never reads
//! shared state after the fact.

use std::process::ExitStatus;

use serde::de::DeserializeOwned;

use super::error::{ExecError, SpawnError};
use super::framer::EventDecoder;
use super::queue::QueueSender;

/// Whether the caller requested cancellation before termination was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Cancellation {
    #[default]
    NotRequested,
    Requested,
}

impl Cancellation {
    #[must_use]
    pub fn is_requested(self) -> bool {
        matches!(self, Self::Requested)
    }
}

/// What the operating system told us about the child.
#[derive(Debug)]
pub enum ProcessReport {
    /// Normal termination with an exit code.
    Exited(i32),
    /// Killed by a signal.
    Signaled { name: String, number: i32 },
    /// The process never started.
    SpawnFailed(SpawnError),
    /// Waiting on the process failed.
    WaitFailed(std::io::Error),
}

impl ProcessReport {
    /// Build a report from an exit status.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(number) = status.signal() {
                return Self::Signaled {
                    name: signal_name(number),
                    number,
                };
            }
        }
        // Neither a code nor a signal; treat as an anonymous failure.
        Self::Exited(-1)
    }
}

#[cfg(unix)]
fn signal_name(number: i32) -> String {
    nix::sys::signal::Signal::try_from(number)
        .map_or_else(|_| format!("signal {number}"), |s| s.as_str().to_string())
}

/// Returns true for signals used to stop a process on request.
#[must_use]
pub fn is_termination_signal(number: i32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;
        [Signal::SIGTERM, Signal::SIGKILL, Signal::SIGINT, Signal::SIGHUP]
            .iter()
            .any(|s| *s as i32 == number)
    }
    #[cfg(not(unix))]
    {
        let _ = number;
        false
    }
}

/// Classified result of one process lifecycle.
#[derive(Debug)]
pub enum TerminationOutcome {
    /// Exit code 0.
    Normal,
    /// Exit with a non-zero code and no cancellation.
    NonZeroExit(i32),
    /// Killed by a signal.
    Signaled {
        signal: String,
        aborted_by_user: bool,
    },
    /// The process could not be started.
    SpawnFailure(SpawnError),
    /// The caller cancelled and the process ended because of it.
    UserAborted,
    /// The exit status could not be collected.
    WaitFailure(std::io::Error),
}

impl TerminationOutcome {
    /// Classify a report in light of the caller's cancellation request.
    #[must_use]
    pub fn classify(report: ProcessReport, cancellation: Cancellation) -> Self {
        let cancelled = cancellation.is_requested();
        match report {
            ProcessReport::Exited(0) => Self::Normal,
            ProcessReport::Exited(_) if cancelled => Self::UserAborted,
            ProcessReport::Exited(code) => Self::NonZeroExit(code),
            ProcessReport::Signaled { name, number } => Self::Signaled {
                signal: name,
                aborted_by_user: cancelled && is_termination_signal(number),
            },
            ProcessReport::SpawnFailed(_) if cancelled => Self::UserAborted,
            ProcessReport::SpawnFailed(err) => Self::SpawnFailure(err),
            ProcessReport::WaitFailed(_) if cancelled => Self::UserAborted,
            ProcessReport::WaitFailed(err) => Self::WaitFailure(err),
        }
    }

    /// Returns true for a clean exit.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Normal)
    }

    /// Convert into the error surfaced to the consumer, if any.
    ///
    /// # Errors
    ///
    /// Returns the `ExecError` matching every outcome except `Normal`.
    pub fn into_result(self) -> Result<(), ExecError> {
        match self {
            Self::Normal => Ok(()),
            Self::NonZeroExit(code) => Err(ExecError::Exit { code }),
            Self::Signaled {
                aborted_by_user: true,
                ..
            }
            | Self::UserAborted => Err(ExecError::Cancelled),
            Self::Signaled { signal, .. } => Err(ExecError::Signal { signal }),
            Self::SpawnFailure(err) => Err(ExecError::Spawn(err)),
            Self::WaitFailure(err) => Err(ExecError::Wait(err)),
        }
    }
}

/// Lifecycle states of one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Exited(i32),
    Signaled(i32),
    SpawnFailed,
    WaitFailed,
    Done,
}

/// Drives one child's lifecycle from running to a single terminal signal.
#[derive(Debug)]
pub struct LifecycleMonitor {
    state: LifecycleState,
    outcome: Option<TerminationOutcome>,
}

impl Default for LifecycleMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Running,
            outcome: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Returns the classified outcome once termination has been observed.
    #[must_use]
    pub fn outcome(&self) -> Option<&TerminationOutcome> {
        self.outcome.as_ref()
    }

    /// Record how the process ended. Only the first report counts.
    pub fn observe(&mut self, report: ProcessReport, cancellation: Cancellation) {
        if self.state != LifecycleState::Running {
            tracing::warn!(state = ?self.state, ?report, "Ignoring duplicate termination report");
            return;
        }

        let next = match &report {
            ProcessReport::Exited(code) => LifecycleState::Exited(*code),
            ProcessReport::Signaled { number, .. } => LifecycleState::Signaled(*number),
            ProcessReport::SpawnFailed(_) => LifecycleState::SpawnFailed,
            ProcessReport::WaitFailed(_) => LifecycleState::WaitFailed,
        };
        self.transition(next);

        let outcome = TerminationOutcome::classify(report, cancellation);
        tracing::info!(?outcome, ?cancellation, "Codex process terminated");
        self.outcome = Some(outcome);
    }

    /// Flush the decoder's trailing line into the queue, then signal it.
    ///
    /// Every event parsed from the trailing fragment is delivered before the
    /// terminal signal. Returns the state the monitor finished in.
    pub fn finish<T: DeserializeOwned>(
        mut self,
        decoder: &mut EventDecoder<T>,
        queue: &QueueSender<T, ExecError>,
    ) -> LifecycleState {
        if let Some(event) = decoder.flush() {
            queue.push(event);
        }

        let outcome = self.outcome.take().unwrap_or_else(|| {
            tracing::warn!("Lifecycle finished without a termination report");
            TerminationOutcome::Normal
        });
        match outcome.into_result() {
            Ok(()) => {
                queue.end();
            }
            Err(err) => {
                queue.fail(err);
            }
        }

        self.transition(LifecycleState::Done);
        self.state
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!(from = ?self.state, to = ?next, "Lifecycle transition");
        self.state = next;
    }
}
