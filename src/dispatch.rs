//! Callback dispatch.
//!
//! A `DispatchTable` maps each transition class to a user handler. Unset
//! slots are no-ops. Extra caller context is whatever the closures capture.
//! Handlers may fail; a failure aborts the monitor run and is returned to the
//! caller unchanged, which is how a nested monitor started from a `success`
//! handler propagates its own outcome.

use std::fmt;

use tracing::{trace, warn};

use crate::detector::{detect, TransitionRecord};
use crate::error::MonitorResult;
use crate::task::{ObservedState, TaskHandle, TaskInfo, TaskState};

/// Handler for a classified transition.
pub type Handler<'a> = Box<dyn FnMut(&TaskHandle, &TaskInfo) -> MonitorResult<()> + 'a>;

/// Handler invoked on every monitor iteration.
pub type PeriodicHandler<'a> = Box<dyn FnMut(&TaskHandle) -> MonitorResult<()> + 'a>;

/// What the monitor loop should do after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep observing.
    Continue,
    /// A terminal callback fired; stop.
    Finished(TaskState),
}

/// Callbacks keyed by transition class.
///
/// ```
/// use std::cell::RefCell;
/// use taskwatch::{DispatchTable, TaskState};
///
/// let seen = RefCell::new(Vec::new());
/// let table = DispatchTable::new()
///     .on_running(|_, _| {
///         seen.borrow_mut().push(TaskState::Running);
///         Ok(())
///     })
///     .on_success(|_, _| {
///         seen.borrow_mut().push(TaskState::Success);
///         Ok(())
///     });
/// assert!(table.has_handler(TaskState::Running));
/// assert!(!table.has_handler(TaskState::Queued));
/// ```
#[derive(Default)]
pub struct DispatchTable<'a> {
    queued: Option<Handler<'a>>,
    running: Option<Handler<'a>>,
    success: Option<Handler<'a>>,
    error: Option<Handler<'a>>,
    periodic: Option<PeriodicHandler<'a>>,
}

impl<'a> DispatchTable<'a> {
    /// A table where every slot is a no-op.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler for a transition into `queued`.
    #[must_use]
    pub fn on_queued<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&TaskHandle, &TaskInfo) -> MonitorResult<()> + 'a,
    {
        self.queued = Some(Box::new(handler));
        self
    }

    /// Handler for a transition into `running`.
    #[must_use]
    pub fn on_running<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&TaskHandle, &TaskInfo) -> MonitorResult<()> + 'a,
    {
        self.running = Some(Box::new(handler));
        self
    }

    /// Handler for a transition into `success`.
    #[must_use]
    pub fn on_success<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&TaskHandle, &TaskInfo) -> MonitorResult<()> + 'a,
    {
        self.success = Some(Box::new(handler));
        self
    }

    /// Handler for a transition into `error`.
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&TaskHandle, &TaskInfo) -> MonitorResult<()> + 'a,
    {
        self.error = Some(Box::new(handler));
        self
    }

    /// Handler called on every iteration, before any transition handler of
    /// the same iteration. Useful for side-channel checks such as answering a
    /// question that blocks the task.
    #[must_use]
    pub fn on_periodic<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&TaskHandle) -> MonitorResult<()> + 'a,
    {
        self.periodic = Some(Box::new(handler));
        self
    }

    /// Same handler for all four transition classes.
    #[must_use]
    pub fn on_any<F>(self, handler: F) -> Self
    where
        F: FnMut(&TaskHandle, &TaskInfo) -> MonitorResult<()> + Clone + 'a,
    {
        self.on_queued(handler.clone())
            .on_running(handler.clone())
            .on_success(handler.clone())
            .on_error(handler)
    }

    /// True if a non-default handler is installed for `state`.
    #[must_use]
    pub const fn has_handler(&self, state: TaskState) -> bool {
        match state {
            TaskState::Queued => self.queued.is_some(),
            TaskState::Running => self.running.is_some(),
            TaskState::Success => self.success.is_some(),
            TaskState::Error => self.error.is_some(),
        }
    }

    /// Run the periodic handler.
    pub fn periodic(&mut self, handle: &TaskHandle) -> MonitorResult<()> {
        match self.periodic.as_mut() {
            Some(handler) => handler(handle),
            None => Ok(()),
        }
    }

    /// Run the handler matching `record.current`.
    pub fn dispatch(
        &mut self,
        record: &TransitionRecord,
        handle: &TaskHandle,
        info: &TaskInfo,
    ) -> MonitorResult<Flow> {
        let slot = match record.current {
            TaskState::Queued => self.queued.as_mut(),
            TaskState::Running => self.running.as_mut(),
            TaskState::Success => self.success.as_mut(),
            TaskState::Error => self.error.as_mut(),
        };
        if let Some(handler) = slot {
            handler(handle, info)?;
        }
        if record.is_terminal() {
            Ok(Flow::Finished(record.current))
        } else {
            Ok(Flow::Continue)
        }
    }
}

impl fmt::Debug for DispatchTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("queued", &self.queued.is_some())
            .field("running", &self.running.is_some())
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .field("periodic", &self.periodic.is_some())
            .finish()
    }
}

/// Per-run observation state shared by the poller and the event waiter.
///
/// Remembers the last dispatched state so repeated reports of the same value
/// never fire twice, and refuses to dispatch after a terminal callback.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    last: Option<TaskState>,
    last_unknown: Option<String>,
    finished: Option<TaskState>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) const fn last(&self) -> Option<TaskState> {
        self.last
    }

    /// Classify `state` and dispatch if it is a transition.
    pub(crate) fn observe(
        &mut self,
        table: &mut DispatchTable<'_>,
        handle: &TaskHandle,
        state: &ObservedState,
        info: &TaskInfo,
    ) -> MonitorResult<Flow> {
        if let Some(done) = self.finished {
            return Ok(Flow::Finished(done));
        }

        if let ObservedState::Unknown(raw) = state {
            if self.last_unknown.as_deref() != Some(raw.as_str()) {
                warn!(task = %handle.id, state = %raw, "ignoring unknown task state");
                self.last_unknown = Some(raw.clone());
            }
            return Ok(Flow::Continue);
        }
        self.last_unknown = None;

        let Some(record) = detect(self.last, state) else {
            return Ok(Flow::Continue);
        };
        trace!(task = %handle.id, previous = ?record.previous, current = %record.current, "task transition");
        self.last = Some(record.current);

        let flow = table.dispatch(&record, handle, info)?;
        if let Flow::Finished(done) = flow {
            self.finished = Some(done);
        }
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::MonitorError;
    use crate::task::TaskId;

    fn handle() -> TaskHandle {
        TaskHandle::new(TaskId::new(), "RenameTask")
    }

    #[test]
    fn empty_table_is_all_no_ops() {
        let mut table = DispatchTable::new();
        let h = handle();
        table.periodic(&h).unwrap();
        let record = TransitionRecord {
            previous: None,
            current: TaskState::Running,
        };
        assert_eq!(table.dispatch(&record, &h, &TaskInfo::running(None)).unwrap(), Flow::Continue);
    }

    #[test]
    fn terminal_dispatch_finishes() {
        let fired = RefCell::new(0);
        let mut table = DispatchTable::new().on_error(|_, info| {
            assert_eq!(info.error_detail().to_string(), "DiskFull");
            *fired.borrow_mut() += 1;
            Ok(())
        });
        let record = TransitionRecord {
            previous: Some(TaskState::Running),
            current: TaskState::Error,
        };
        let flow = table.dispatch(&record, &handle(), &TaskInfo::failed("DiskFull")).unwrap();
        assert_eq!(flow, Flow::Finished(TaskState::Error));
        drop(table);
        assert_eq!(fired.into_inner(), 1);
    }

    #[test]
    fn handler_error_propagates() {
        let mut table = DispatchTable::new().on_queued(|_, _| Err(MonitorError::internal("boom")));
        let record = TransitionRecord {
            previous: None,
            current: TaskState::Queued,
        };
        let err = table.dispatch(&record, &handle(), &TaskInfo::queued()).unwrap_err();
        assert!(format!("{err}").contains("boom"));
    }

    #[test]
    fn tracker_fires_once_per_distinct_state() {
        let seen = RefCell::new(Vec::new());
        let mut table = DispatchTable::new().on_any(|_, info: &TaskInfo| {
            seen.borrow_mut().push(info.known_state());
            Ok(())
        });
        let h = handle();
        let mut tracker = Tracker::new();
        for info in [
            TaskInfo::queued(),
            TaskInfo::queued(),
            TaskInfo::with_state("paused"),
            TaskInfo::running(Some(10)),
            TaskInfo::running(Some(20)),
        ] {
            assert_eq!(tracker.observe(&mut table, &h, &info.state, &info).unwrap(), Flow::Continue);
        }
        assert_eq!(tracker.last(), Some(TaskState::Running));
        drop(table);
        assert_eq!(
            seen.into_inner(),
            vec![Some(TaskState::Queued), Some(TaskState::Running)]
        );
    }

    #[test]
    fn tracker_stops_dispatching_after_terminal() {
        let count = RefCell::new(0);
        let mut table = DispatchTable::new().on_any(|_, _: &TaskInfo| {
            *count.borrow_mut() += 1;
            Ok(())
        });
        let h = handle();
        let mut tracker = Tracker::new();
        let success = TaskInfo::success();
        assert_eq!(
            tracker.observe(&mut table, &h, &success.state, &success).unwrap(),
            Flow::Finished(TaskState::Success)
        );
        let failed = TaskInfo::failed("late");
        assert_eq!(
            tracker.observe(&mut table, &h, &failed.state, &failed).unwrap(),
            Flow::Finished(TaskState::Success)
        );
        drop(table);
        assert_eq!(count.into_inner(), 1);
    }
}
