//! Event records emitted by `codex exec --json`.
//!
//! Each stdout line is one record of the form `{"id": ..., "msg": {"type": ...}}`.
//! The bridge forwards records untouched; [`EventMsg`] is an optional typed
//! view over the payload for callers that want to match on known variants.

use serde::{Deserialize, Serialize};

/// One record from the child's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Submission identifier the event belongs to.
    #[serde(default)]
    pub id: String,
    /// Raw payload, kept verbatim.
    pub msg: serde_json::Value,
}

impl Event {
    /// Returns the `type` discriminator of the payload, if present.
    #[must_use]
    pub fn msg_type(&self) -> Option<&str> {
        self.msg.get("type").and_then(serde_json::Value::as_str)
    }

    /// Decode the payload into the typed view.
    ///
    /// Unknown discriminators decode to [`EventMsg::Unknown`]; only a payload
    /// whose known variant is missing required fields fails.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload does not match its variant.
    pub fn typed(&self) -> Result<EventMsg, serde_json::Error> {
        EventMsg::deserialize(&self.msg)
    }
}

/// Output stream of a running command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecOutputStream {
    Stdout,
    Stderr,
}

/// Token accounting for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_output_tokens: u64,
    pub total_tokens: u64,
}

/// Typed view of the known event catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMsg {
    /// Complete agent message.
    AgentMessage { message: String },
    /// Incremental agent message text.
    AgentMessageDelta { delta: String },
    /// Complete reasoning summary.
    AgentReasoning { text: String },
    /// Incremental reasoning text.
    AgentReasoningDelta { delta: String },
    /// A shell command is about to run.
    ExecCommandBegin {
        call_id: String,
        command: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    /// A chunk of command output.
    ExecCommandOutputDelta {
        call_id: String,
        stream: ExecOutputStream,
        /// Output bytes as delivered by the protocol.
        chunk: serde_json::Value,
    },
    /// A shell command finished.
    ExecCommandEnd {
        call_id: String,
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
        exit_code: i32,
    },
    /// The agent asks for permission to run a command.
    ExecApprovalRequest {
        call_id: String,
        command: Vec<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    /// The agent asks for permission to apply a patch.
    ApplyPatchApprovalRequest {
        call_id: String,
        changes: serde_json::Value,
        #[serde(default)]
        reason: Option<String>,
    },
    /// A patch is being applied.
    PatchApplyBegin {
        call_id: String,
        #[serde(default)]
        auto_approved: bool,
        changes: serde_json::Value,
    },
    /// A patch finished applying.
    PatchApplyEnd {
        call_id: String,
        success: bool,
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
    },
    /// The agent started working on a task.
    TaskStarted,
    /// The agent finished the task.
    TaskComplete {
        #[serde(default)]
        last_agent_message: Option<String>,
    },
    /// Token usage report.
    TokenCount(TokenUsage),
    /// Session metadata, sent once at startup.
    SessionConfigured {
        session_id: String,
        model: String,
    },
    /// Informational notice from the agent runtime.
    BackgroundEvent { message: String },
    /// Fatal error reported by the agent.
    Error { message: String },
    /// Catch-all for variants this crate does not model.
    #[serde(other)]
    Unknown,
}

impl EventMsg {
    /// Returns true if no further events are expected for the task.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TaskComplete { .. } | Self::Error { .. })
    }

    /// Returns the call identifier for command and patch events.
    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ExecCommandBegin { call_id, .. }
            | Self::ExecCommandOutputDelta { call_id, .. }
            | Self::ExecCommandEnd { call_id, .. }
            | Self::ExecApprovalRequest { call_id, .. }
            | Self::ApplyPatchApprovalRequest { call_id, .. }
            | Self::PatchApplyBegin { call_id, .. }
            | Self::PatchApplyEnd { call_id, .. } => Some(call_id),
            _ => None,
        }
    }
}
