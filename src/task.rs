//! Task handle and status types.
//!
//! A `TaskHandle` identifies one remote operation. Its status is never stored
//! on the handle: it is read through a `StatusReader` (polling) or delivered
//! as property changes through a `SubscriptionService` (waiting), and
//! surfaced to callbacks as a `TaskInfo`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a remote task.
///
/// # Examples
///
/// ```
/// use taskwatch::TaskId;
///
/// let id = TaskId::new();
/// assert_ne!(id, TaskId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new random task id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Handle to a remote operation.
///
/// Created by whatever started the operation; read-only from the monitor's
/// point of view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Stable identifier.
    pub id: TaskId,
    /// Name of the remote method that produced the task, e.g. `PowerOnVM_Task`.
    pub kind: String,
}

impl TaskHandle {
    /// Creates a handle for an existing remote task.
    #[must_use]
    pub fn new(id: TaskId, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
        }
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.id)
    }
}

/// The task states the monitor reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted by the remote side, not yet started.
    Queued,
    /// In progress.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
}

impl TaskState {
    /// Wire name of this state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Parses a wire name. Returns `None` for states this crate does not know.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Success and Error end a monitor run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state value as reported by the remote side.
///
/// Values outside [`TaskState`] are kept as `Unknown` so newer servers do not
/// break older monitors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ObservedState {
    /// One of the four states the monitor acts on.
    Known(TaskState),
    /// Anything else; ignored by the monitor.
    Unknown(String),
}

impl ObservedState {
    /// The known state, if any.
    #[must_use]
    pub const fn known(&self) -> Option<TaskState> {
        match self {
            Self::Known(state) => Some(*state),
            Self::Unknown(_) => None,
        }
    }

    /// True when this is a known terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::Known(state) => state.is_terminal(),
            Self::Unknown(_) => false,
        }
    }
}

impl From<TaskState> for ObservedState {
    fn from(state: TaskState) -> Self {
        Self::Known(state)
    }
}

impl From<String> for ObservedState {
    fn from(raw: String) -> Self {
        match TaskState::from_wire(&raw) {
            Some(state) => Self::Known(state),
            None => Self::Unknown(raw),
        }
    }
}

impl From<&str> for ObservedState {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<ObservedState> for String {
    fn from(state: ObservedState) -> Self {
        match state {
            ObservedState::Known(state) => state.as_str().to_string(),
            ObservedState::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ObservedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(state) => write!(f, "{state}"),
            Self::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

/// Opaque error payload attached to a failed task.
///
/// Passed through verbatim to the error callback and to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorDetail(serde_json::Value);

impl ErrorDetail {
    /// Wraps a raw JSON payload.
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Placeholder used when the remote side reports an error state without
    /// any detail.
    #[must_use]
    pub const fn unspecified() -> Self {
        Self(serde_json::Value::Null)
    }

    /// The raw payload.
    #[must_use]
    pub const fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consumes the detail, returning the raw payload.
    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            serde_json::Value::Null => f.write_str("unspecified"),
            other => write!(f, "{other}"),
        }
    }
}

impl From<&str> for ErrorDetail {
    fn from(message: &str) -> Self {
        Self(serde_json::Value::String(message.to_string()))
    }
}

impl From<String> for ErrorDetail {
    fn from(message: String) -> Self {
        Self(serde_json::Value::String(message))
    }
}

impl From<serde_json::Value> for ErrorDetail {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Last-known status attributes of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Current state, possibly one this crate does not know.
    pub state: ObservedState,
    /// Present only when `state` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Percent complete, when the remote side reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// When the remote side accepted the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_time: Option<DateTime<Utc>>,
    /// When the task started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
}

impl TaskInfo {
    /// Info carrying only a state.
    #[must_use]
    pub fn with_state(state: impl Into<ObservedState>) -> Self {
        Self {
            state: state.into(),
            error: None,
            progress: None,
            queue_time: None,
            start_time: None,
            complete_time: None,
        }
    }

    /// A queued task.
    #[must_use]
    pub fn queued() -> Self {
        Self::with_state(TaskState::Queued)
    }

    /// A running task at the given progress.
    #[must_use]
    pub fn running(progress: Option<u8>) -> Self {
        Self {
            progress,
            ..Self::with_state(TaskState::Running)
        }
    }

    /// A successfully finished task.
    #[must_use]
    pub fn success() -> Self {
        Self {
            progress: Some(100),
            ..Self::with_state(TaskState::Success)
        }
    }

    /// A failed task with the given cause.
    #[must_use]
    pub fn failed(cause: impl Into<ErrorDetail>) -> Self {
        Self {
            error: Some(cause.into()),
            ..Self::with_state(TaskState::Error)
        }
    }

    /// The known state, if any.
    #[must_use]
    pub const fn known_state(&self) -> Option<TaskState> {
        self.state.known()
    }

    /// The error detail to report for a failed task.
    #[must_use]
    pub fn error_detail(&self) -> ErrorDetail {
        self.error.clone().unwrap_or_else(ErrorDetail::unspecified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_terminal_classification() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Error.is_terminal());
    }

    #[test]
    fn unknown_wire_state_is_preserved() {
        let state = ObservedState::from("paused");
        assert_eq!(state, ObservedState::Unknown("paused".to_string()));
        assert_eq!(state.known(), None);
        assert!(!state.is_terminal());
        assert_eq!(String::from(state), "paused");
    }

    #[test]
    fn task_info_deserializes_unknown_state() {
        let info: TaskInfo = serde_json::from_value(serde_json::json!({
            "state": "suspended",
            "progress": 40
        }))
        .unwrap();
        assert_eq!(info.state, ObservedState::Unknown("suspended".to_string()));
        assert_eq!(info.progress, Some(40));
        assert!(info.error.is_none());
    }

    #[test]
    fn task_info_serializes_state_as_wire_name() {
        let value = serde_json::to_value(TaskInfo::failed("DiskFull")).unwrap();
        assert_eq!(value["state"], "error");
        assert_eq!(value["error"], "DiskFull");
        assert!(value.get("progress").is_none());
    }

    #[test]
    fn error_detail_display() {
        assert_eq!(ErrorDetail::from("DiskFull").to_string(), "DiskFull");
        assert_eq!(ErrorDetail::unspecified().to_string(), "unspecified");
        let structured = ErrorDetail::new(serde_json::json!({"fault": "NoDiskSpace"}));
        assert!(structured.to_string().contains("NoDiskSpace"));
    }

    #[test]
    fn error_detail_defaults_when_missing() {
        let info = TaskInfo::with_state(TaskState::Error);
        assert_eq!(info.error_detail(), ErrorDetail::unspecified());
    }
}
