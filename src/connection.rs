//! Remote collaborator interfaces.
//!
//! The monitor does not own any wire protocol. It consumes two capabilities
//! from whatever connection the caller already holds:
//!
//! - [`StatusReader`]: a synchronous read of a task's current status;
//! - [`SubscriptionService`]: property-change filters plus a blocking
//!   "give me everything since version V" call.
//!
//! Both are injected explicitly; nothing here reaches for a global session.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConnectionError;
use crate::task::{TaskId, TaskInfo};

/// Identifier of a property filter created on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(Uuid);

impl FilterId {
    /// Create a new random filter id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for FilterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque version token returned with each update batch.
///
/// Only the remote side interprets it; the monitor hands back the last one it
/// received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which properties of which task a filter reports on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Task being watched.
    pub task: TaskId,
    /// Property paths of interest, e.g. `info` or `info.state`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Report every property of the task regardless of `paths`.
    #[serde(default)]
    pub all: bool,
}

impl FilterSpec {
    /// Filter on the given paths of one task.
    #[must_use]
    pub fn for_paths<I, S>(task: TaskId, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task,
            paths: paths.into_iter().map(Into::into).collect(),
            all: false,
        }
    }

    /// Filter on every property of one task.
    #[must_use]
    pub const fn all_properties(task: TaskId) -> Self {
        Self {
            task,
            paths: Vec::new(),
            all: true,
        }
    }

    /// True if a change on `path` of `task` is reported by this filter.
    ///
    /// Paths match exactly; `all` covers every top-level property.
    #[must_use]
    pub fn covers(&self, task: TaskId, path: &str) -> bool {
        if task != self.task {
            return false;
        }
        if self.all && !path.contains('.') {
            return true;
        }
        self.paths.iter().any(|p| p == path)
    }
}

/// Kind of property change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// The property was set to a new value.
    Assign,
    /// An element was added to a collection property.
    Add,
    /// An element was removed from a collection property.
    Remove,
    /// The property disappeared because its owner was removed.
    IndirectRemove,
}

/// One field-level change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Task the property belongs to.
    pub task: TaskId,
    /// Property path, e.g. `info.state`.
    pub path: String,
    /// Kind of change.
    pub op: ChangeOp,
    /// New value; absent for removals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl PropertyChange {
    /// An assignment of `value` to `path`.
    #[must_use]
    pub fn assign(task: TaskId, path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            task,
            path: path.into(),
            op: ChangeOp::Assign,
            value: Some(value),
        }
    }
}

/// A batch of changes since the previously supplied version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Version to pass to the next wait call.
    pub version: Version,
    /// Changes in this batch, in the order they happened.
    pub changes: Vec<PropertyChange>,
}

/// Synchronous status reads.
pub trait StatusReader: Send + Sync {
    /// Read the current status of a task.
    fn task_info(&self, task: &TaskId) -> Result<TaskInfo, ConnectionError>;
}

/// Property-change subscription service.
pub trait SubscriptionService: Send + Sync {
    /// Register a filter. Changes matching it are reported by
    /// [`wait_for_updates`](Self::wait_for_updates) from now on.
    fn create_filter(&self, spec: &FilterSpec) -> Result<FilterId, ConnectionError>;

    /// Block until there are changes newer than `since`.
    ///
    /// `since == None` asks for the initial values of every filtered
    /// property. With `max_wait` set, returns `Ok(None)` when nothing changed
    /// within that duration.
    fn wait_for_updates(
        &self,
        since: Option<&Version>,
        max_wait: Option<Duration>,
    ) -> Result<Option<UpdateBatch>, ConnectionError>;

    /// Remove a filter.
    fn destroy_filter(&self, filter: FilterId) -> Result<(), ConnectionError>;
}

/// A connection offering both capabilities.
pub trait Connection: StatusReader + SubscriptionService {}

impl<T: StatusReader + SubscriptionService + ?Sized> Connection for T {}
