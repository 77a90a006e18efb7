//! In-memory reference connection.
//!
//! `InMemoryConnection` implements both collaborator traits against a local
//! task table. It is intended for embedded usage, tests and benchmarks, and
//! as a reference for what a real connection must provide:
//!
//! - every status change is appended to a change log and bumps the version;
//! - the first `wait_for_updates(None)` returns a snapshot of every filtered
//!   property, later calls return logged changes newer than the version;
//! - scripted reports stand in for the passage of time: one report is
//!   applied per status read of that task, or per wait call that would
//!   otherwise block.
//!
//! Only changes some live filter covers are logged, and destroying a filter
//! drops the entries nothing else covers. Filter creation and destruction are
//! counted so callers can verify that subscriptions never leak.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::connection::{
    FilterId, FilterSpec, PropertyChange, StatusReader, SubscriptionService, UpdateBatch, Version,
};
use crate::error::ConnectionError;
use crate::task::{TaskHandle, TaskId, TaskInfo};

fn lock_err(context: &'static str) -> ConnectionError {
    ConnectionError::Backend {
        message: format!("poisoned lock: {context}"),
    }
}

/// One scripted report.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Replace the task's status object.
    Info(TaskInfo),
    /// Set an unrelated property such as `name`.
    Property {
        /// Top-level property path.
        path: String,
        /// New value.
        value: serde_json::Value,
    },
}

impl From<TaskInfo> for Report {
    fn from(info: TaskInfo) -> Self {
        Self::Info(info)
    }
}

#[derive(Debug)]
struct TaskEntry {
    handle: TaskHandle,
    info: TaskInfo,
    properties: Vec<(String, serde_json::Value)>,
    script: VecDeque<Report>,
}

impl TaskEntry {
    fn property(&self, path: &str) -> Option<serde_json::Value> {
        if path == "info" {
            return serde_json::to_value(&self.info).ok();
        }
        if let Some(field) = path.strip_prefix("info.") {
            let value = serde_json::to_value(&self.info).ok()?;
            return value.get(field).cloned();
        }
        self.properties
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, value)| value.clone())
    }

    fn top_level_paths(&self) -> Vec<String> {
        std::iter::once("info".to_string())
            .chain(self.properties.iter().map(|(name, _)| name.clone()))
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    tasks: Vec<TaskEntry>,
    filters: Vec<(FilterId, FilterSpec)>,
    log: Vec<(u64, PropertyChange)>,
    seq: u64,
    filters_created: u64,
    filters_destroyed: u64,
    status_reads: u64,
    unreachable: bool,
    fail_destroy: bool,
}

impl State {
    fn task_mut(&mut self, id: &TaskId) -> Result<&mut TaskEntry, ConnectionError> {
        self.tasks
            .iter_mut()
            .find(|t| t.handle.id == *id)
            .ok_or(ConnectionError::TaskNotFound(*id))
    }

    fn check_reachable(&self) -> Result<(), ConnectionError> {
        if self.unreachable {
            return Err(ConnectionError::Unreachable {
                message: "in-memory connection marked unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn record(&mut self, change: PropertyChange) {
        self.seq += 1;
        // A filter created later starts from a snapshot, never from this entry.
        if self.is_filtered(&change) {
            self.log.push((self.seq, change));
        }
    }

    fn prune_log(&mut self) {
        let filters = &self.filters;
        self.log
            .retain(|(_, change)| filters.iter().any(|(_, spec)| spec.covers(change.task, &change.path)));
    }

    fn set_info(&mut self, id: &TaskId, info: TaskInfo) -> Result<(), ConnectionError> {
        let entry = self.task_mut(id)?;
        let previous = std::mem::replace(&mut entry.info, info);
        let current = entry.info.clone();

        let encode = |value: &TaskInfo| {
            serde_json::to_value(value).map_err(|e| ConnectionError::Backend {
                message: format!("failed to encode task info: {e}"),
            })
        };
        let whole = encode(&current)?;
        let before = encode(&previous)?;

        self.record(PropertyChange::assign(*id, "info", whole.clone()));
        for field in ["state", "error", "progress"] {
            let new = whole.get(field);
            if new != before.get(field) {
                if let Some(value) = new {
                    self.record(PropertyChange::assign(*id, format!("info.{field}"), value.clone()));
                }
            }
        }
        Ok(())
    }

    fn set_property(&mut self, id: &TaskId, path: &str, value: serde_json::Value) -> Result<(), ConnectionError> {
        let entry = self.task_mut(id)?;
        match entry.properties.iter_mut().find(|(name, _)| name == path) {
            Some((_, slot)) => *slot = value.clone(),
            None => entry.properties.push((path.to_string(), value.clone())),
        }
        self.record(PropertyChange::assign(*id, path, value));
        Ok(())
    }

    fn apply_report(&mut self, id: &TaskId, report: Report) -> Result<(), ConnectionError> {
        match report {
            Report::Info(info) => self.set_info(id, info),
            Report::Property { path, value } => self.set_property(id, &path, value),
        }
    }

    /// Apply the next scripted report of `id`, if any.
    fn advance(&mut self, id: &TaskId) -> Result<bool, ConnectionError> {
        let Some(report) = self.task_mut(id)?.script.pop_front() else {
            return Ok(false);
        };
        self.apply_report(id, report)?;
        Ok(true)
    }

    /// Apply the next scripted report of the first watched task that has one.
    fn advance_any_watched(&mut self) -> Result<bool, ConnectionError> {
        let next = self
            .filters
            .iter()
            .map(|(_, spec)| spec.task)
            .find(|task| {
                self.tasks
                    .iter()
                    .any(|t| t.handle.id == *task && !t.script.is_empty())
            });
        match next {
            Some(task) => self.advance(&task),
            None => Ok(false),
        }
    }

    fn is_filtered(&self, change: &PropertyChange) -> bool {
        self.filters
            .iter()
            .any(|(_, spec)| spec.covers(change.task, &change.path))
    }

    fn snapshot(&self) -> UpdateBatch {
        let mut changes = Vec::new();
        for (_, spec) in &self.filters {
            let Some(entry) = self.tasks.iter().find(|t| t.handle.id == spec.task) else {
                continue;
            };
            let mut paths = spec.paths.clone();
            if spec.all {
                for path in entry.top_level_paths() {
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
            }
            for path in paths {
                if let Some(value) = entry.property(&path) {
                    changes.push(PropertyChange::assign(spec.task, path, value));
                }
            }
        }
        UpdateBatch {
            version: Version::new(self.seq.to_string()),
            changes,
        }
    }

    fn changes_since(&self, since: u64) -> Vec<PropertyChange> {
        self.log
            .iter()
            .filter(|(seq, change)| *seq > since && self.is_filtered(change))
            .map(|(_, change)| change.clone())
            .collect()
    }
}

/// Thread-safe in-memory connection.
#[derive(Debug, Default)]
pub struct InMemoryConnection {
    state: Mutex<State>,
    changed: Condvar,
}

impl InMemoryConnection {
    /// An empty connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, context: &'static str) -> Result<MutexGuard<'_, State>, ConnectionError> {
        self.state.lock().map_err(|_| lock_err(context))
    }

    fn mutate<T>(
        &self,
        context: &'static str,
        f: impl FnOnce(&mut State) -> Result<T, ConnectionError>,
    ) -> Result<T, ConnectionError> {
        let out = {
            let mut state = self.lock(context)?;
            f(&mut state)?
        };
        self.changed.notify_all();
        Ok(out)
    }

    /// Register a new queued task and return its handle.
    pub fn register_task(&self, kind: impl Into<String>) -> TaskHandle {
        let handle = TaskHandle::new(TaskId::new(), kind);
        let mut info = TaskInfo::queued();
        info.queue_time = Some(Utc::now());
        let entry = TaskEntry {
            handle: handle.clone(),
            info,
            properties: Vec::new(),
            script: VecDeque::new(),
        };
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.tasks.push(entry);
        handle
    }

    /// Replace a task's status immediately.
    pub fn set_info(&self, id: &TaskId, info: TaskInfo) -> Result<(), ConnectionError> {
        self.mutate("set_info", |state| state.set_info(id, info))
    }

    /// Set an arbitrary top-level property immediately.
    pub fn set_property(&self, id: &TaskId, path: &str, value: serde_json::Value) -> Result<(), ConnectionError> {
        self.mutate("set_property", |state| state.set_property(id, path, value))
    }

    /// Queue reports to be applied one at a time as the task is observed.
    pub fn script<I>(&self, id: &TaskId, reports: I) -> Result<(), ConnectionError>
    where
        I: IntoIterator,
        I::Item: Into<Report>,
    {
        self.mutate("script", |state| {
            state.task_mut(id)?.script.extend(reports.into_iter().map(Into::into));
            Ok(())
        })
    }

    /// Apply the next scripted report for `id`. Returns false if none is left.
    pub fn advance(&self, id: &TaskId) -> Result<bool, ConnectionError> {
        self.mutate("advance", |state| state.advance(id))
    }

    /// Make every call fail with [`ConnectionError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) -> Result<(), ConnectionError> {
        self.mutate("set_unreachable", |state| {
            state.unreachable = unreachable;
            Ok(())
        })
    }

    /// Make `destroy_filter` fail (the filter is still removed).
    pub fn set_fail_destroy(&self, fail: bool) -> Result<(), ConnectionError> {
        self.mutate("set_fail_destroy", |state| {
            state.fail_destroy = fail;
            Ok(())
        })
    }

    /// Number of filters ever created.
    pub fn filters_created(&self) -> Result<u64, ConnectionError> {
        Ok(self.lock("filters_created")?.filters_created)
    }

    /// Number of filters ever destroyed.
    pub fn filters_destroyed(&self) -> Result<u64, ConnectionError> {
        Ok(self.lock("filters_destroyed")?.filters_destroyed)
    }

    /// Number of filters currently registered.
    pub fn active_filters(&self) -> Result<usize, ConnectionError> {
        Ok(self.lock("active_filters")?.filters.len())
    }

    /// Number of changes currently held in the change log.
    pub fn logged_changes(&self) -> Result<usize, ConnectionError> {
        Ok(self.lock("logged_changes")?.log.len())
    }

    /// Number of status reads served.
    pub fn status_reads(&self) -> Result<u64, ConnectionError> {
        Ok(self.lock("status_reads")?.status_reads)
    }
}

impl StatusReader for InMemoryConnection {
    fn task_info(&self, task: &TaskId) -> Result<TaskInfo, ConnectionError> {
        self.mutate("task_info", |state| {
            state.check_reachable()?;
            state.advance(task)?;
            state.status_reads += 1;
            Ok(state.task_mut(task)?.info.clone())
        })
    }
}

impl SubscriptionService for InMemoryConnection {
    fn create_filter(&self, spec: &FilterSpec) -> Result<FilterId, ConnectionError> {
        self.mutate("create_filter", |state| {
            state.check_reachable()?;
            if !spec.all && spec.paths.is_empty() {
                return Err(ConnectionError::InvalidFilter {
                    reason: "filter selects no properties".to_string(),
                });
            }
            state.task_mut(&spec.task)?;
            let id = FilterId::new();
            state.filters.push((id, spec.clone()));
            state.filters_created += 1;
            Ok(id)
        })
    }

    fn wait_for_updates(
        &self,
        since: Option<&Version>,
        max_wait: Option<Duration>,
    ) -> Result<Option<UpdateBatch>, ConnectionError> {
        let deadline = max_wait.map(|d| Instant::now() + d);
        let mut state = self.lock("wait_for_updates")?;
        state.check_reachable()?;

        let Some(since) = since else {
            return Ok(Some(state.snapshot()));
        };
        let since: u64 = since.as_str().parse().map_err(|_| ConnectionError::InvalidVersion {
            version: since.to_string(),
        })?;
        if since > state.seq {
            return Err(ConnectionError::InvalidVersion {
                version: since.to_string(),
            });
        }

        loop {
            let changes = state.changes_since(since);
            if !changes.is_empty() {
                return Ok(Some(UpdateBatch {
                    version: Version::new(state.seq.to_string()),
                    changes,
                }));
            }
            if state.advance_any_watched()? {
                continue;
            }

            state = match deadline {
                None => self.changed.wait(state).map_err(|_| lock_err("wait_for_updates"))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    let (guard, _) = self
                        .changed
                        .wait_timeout(state, deadline - now)
                        .map_err(|_| lock_err("wait_for_updates"))?;
                    guard
                }
            };
            state.check_reachable()?;
        }
    }

    fn destroy_filter(&self, filter: FilterId) -> Result<(), ConnectionError> {
        self.mutate("destroy_filter", |state| {
            let Some(pos) = state.filters.iter().position(|(id, _)| *id == filter) else {
                return Err(ConnectionError::UnknownFilter(filter));
            };
            state.filters.remove(pos);
            state.filters_destroyed += 1;
            state.prune_log();
            if state.fail_destroy {
                return Err(ConnectionError::Backend {
                    message: "destroy_filter failed".to_string(),
                });
            }
            Ok(())
        })
    }
}
