//! Change-subscription waiting strategy.
//!
//! The waiter creates a property filter on the task's status, then blocks on
//! `wait_for_updates` and reacts only to the deltas it receives. The filter
//! is owned by a [`Subscription`] guard and released on every exit path.
//!
//! Within a batch, changes are applied in order to a local copy of the task
//! status. Every change to the whole status object or to the state field is
//! one observation; observations are dispatched in order after the whole
//! batch is applied, so an error detail delivered alongside (or after) the
//! state change in the same batch still reaches the error handler.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::cancel::CancellationToken;
use crate::config::MonitorConfig;
use crate::connection::{ChangeOp, Connection, FilterSpec, PropertyChange};
use crate::dispatch::{DispatchTable, Flow, Tracker};
use crate::error::{MonitorError, MonitorResult, OperationError};
use crate::monitor::TaskMonitor;
use crate::subscription::Subscription;
use crate::task::{ErrorDetail, ObservedState, TaskHandle, TaskInfo, TaskState};

/// Waits for task completion through a change subscription.
pub struct EventWaiter<'c, C: Connection + ?Sized> {
    conn: &'c C,
    config: MonitorConfig,
    cancel: Option<CancellationToken>,
}

/// Task status as assembled from property changes.
#[derive(Debug, Default)]
struct StatusView {
    info: Option<TaskInfo>,
    // Error detail seen before any state.
    pending_error: Option<ErrorDetail>,
}

impl StatusView {
    fn set_info(&mut self, mut info: TaskInfo) {
        if info.error.is_none() {
            info.error = self.pending_error.take();
        }
        self.info = Some(info);
    }

    fn set_state(&mut self, state: ObservedState) {
        match self.info.as_mut() {
            Some(info) => info.state = state,
            None => {
                let mut info = TaskInfo::with_state(state);
                info.error = self.pending_error.take();
                self.info = Some(info);
            }
        }
    }

    fn set_error(&mut self, error: ErrorDetail) {
        match self.info.as_mut() {
            Some(info) => info.error = Some(error),
            None => self.pending_error = Some(error),
        }
    }

    fn error(&self) -> Option<&ErrorDetail> {
        self.info
            .as_ref()
            .and_then(|info| info.error.as_ref())
            .or(self.pending_error.as_ref())
    }
}

impl<'c, C: Connection + ?Sized> EventWaiter<'c, C> {
    /// A waiter using the default config.
    #[must_use]
    pub fn new(conn: &'c C) -> Self {
        Self::with_config(conn, MonitorConfig::default())
    }

    /// A waiter watching the paths named by `config`.
    #[must_use]
    pub const fn with_config(conn: &'c C, config: MonitorConfig) -> Self {
        Self {
            conn,
            config,
            cancel: None,
        }
    }

    /// Check `token` each time a wait call returns.
    ///
    /// Without a `max_wait_ms` bound in the config, cancellation is only
    /// noticed when the remote side next reports a change.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn max_wait(&self) -> Option<Duration> {
        self.config.max_wait()
    }

    fn check_cancelled(&self, handle: &TaskHandle) -> MonitorResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(MonitorError::Cancelled { task: handle.id }),
            _ => Ok(()),
        }
    }

    /// Apply one change; returns the observed state if the change carries one.
    fn apply(&self, view: &mut StatusView, change: &PropertyChange) -> MonitorResult<Option<ObservedState>> {
        if change.op != ChangeOp::Assign {
            trace!(task = %change.task, path = %change.path, op = ?change.op, "ignoring non-assign change");
            return Ok(None);
        }
        let Some(value) = change.value.as_ref() else {
            return Ok(None);
        };

        if change.path == self.config.status_path {
            let info: TaskInfo = serde_json::from_value(value.clone()).map_err(|e| MonitorError::Decode {
                path: change.path.clone(),
                message: e.to_string(),
            })?;
            let state = info.state.clone();
            view.set_info(info);
            Ok(Some(state))
        } else if change.path == self.config.state_path {
            let Some(raw) = value.as_str() else {
                return Err(MonitorError::Decode {
                    path: change.path.clone(),
                    message: format!("expected a string, got {value}"),
                });
            };
            let state = ObservedState::from(raw);
            view.set_state(state.clone());
            Ok(Some(state))
        } else if change.path == self.config.error_path {
            view.set_error(ErrorDetail::new(value.clone()));
            Ok(None)
        } else {
            Ok(None)
        }
    }

    fn wait_loop(
        &self,
        sub: &mut Subscription<'_, C>,
        handle: &TaskHandle,
        table: &mut DispatchTable<'_>,
    ) -> MonitorResult<()> {
        let mut tracker = Tracker::new();
        let mut view = StatusView::default();

        loop {
            let batch = sub.next_batch(self.max_wait())?;
            self.check_cancelled(handle)?;
            let Some(batch) = batch else {
                trace!(task = %handle.id, "wait elapsed without updates");
                table.periodic(handle)?;
                continue;
            };
            trace!(
                task = %handle.id,
                version = %batch.version,
                changes = batch.changes.len(),
                "received update batch"
            );

            table.periodic(handle)?;

            let mut observed = Vec::new();
            for change in batch.changes.iter().filter(|c| c.task == handle.id) {
                if let Some(state) = self.apply(&mut view, change)? {
                    if let Some(info) = view.info.clone() {
                        observed.push((state, info));
                    }
                }
            }

            for (state, mut info) in observed {
                if state.known() == Some(TaskState::Error) && info.error.is_none() {
                    let cause = match view.error() {
                        Some(cause) => cause.clone(),
                        None => self.conn.task_info(&handle.id)?.error_detail(),
                    };
                    info.error = Some(cause);
                }

                match tracker.observe(table, handle, &state, &info)? {
                    Flow::Continue => {}
                    Flow::Finished(TaskState::Error) => {
                        return Err(OperationError {
                            task: handle.id,
                            cause: info.error_detail(),
                        }
                        .into());
                    }
                    Flow::Finished(_) => return Ok(()),
                }
            }
        }
    }
}

impl<C: Connection + ?Sized> std::fmt::Debug for EventWaiter<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWaiter")
            .field("config", &self.config)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: Connection + ?Sized> TaskMonitor for EventWaiter<'_, C> {
    fn run(&self, handle: &TaskHandle, table: &mut DispatchTable<'_>) -> MonitorResult<()> {
        self.check_cancelled(handle)?;

        let spec = FilterSpec::for_paths(handle.id, self.config.watched_paths());
        let mut sub = Subscription::create(self.conn, &spec)?;
        let result = self.wait_loop(&mut sub, handle, table);

        // Drop would release too, but a release failure on an otherwise
        // successful run must reach the caller.
        let released = sub.release();
        debug!(
            task = %handle.id,
            version = ?sub.version(),
            ok = result.is_ok(),
            "wait finished"
        );
        match (result, released) {
            (Ok(()), Err(err)) => Err(err.into()),
            (result, Err(err)) => {
                warn!(task = %handle.id, error = %err, "failed to release subscription");
                result
            }
            (result, Ok(())) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskId;

    fn waiter_config() -> MonitorConfig {
        MonitorConfig::default()
    }

    struct NoConn;

    impl crate::connection::StatusReader for NoConn {
        fn task_info(&self, task: &TaskId) -> Result<TaskInfo, crate::error::ConnectionError> {
            Err(crate::error::ConnectionError::TaskNotFound(*task))
        }
    }

    impl crate::connection::SubscriptionService for NoConn {
        fn create_filter(
            &self,
            _spec: &FilterSpec,
        ) -> Result<crate::connection::FilterId, crate::error::ConnectionError> {
            Err(crate::error::ConnectionError::Unreachable {
                message: "offline".to_string(),
            })
        }

        fn wait_for_updates(
            &self,
            _since: Option<&crate::connection::Version>,
            _max_wait: Option<Duration>,
        ) -> Result<Option<crate::connection::UpdateBatch>, crate::error::ConnectionError> {
            Ok(None)
        }

        fn destroy_filter(&self, _filter: crate::connection::FilterId) -> Result<(), crate::error::ConnectionError> {
            Ok(())
        }
    }

    #[test]
    fn apply_status_object_change() {
        let waiter = EventWaiter::with_config(&NoConn, waiter_config());
        let task = TaskId::new();
        let mut view = StatusView::default();
        let change = PropertyChange::assign(task, "info", serde_json::to_value(TaskInfo::running(Some(5))).unwrap());
        let state = waiter.apply(&mut view, &change).unwrap();
        assert_eq!(state, Some(ObservedState::Known(TaskState::Running)));
        assert_eq!(view.info.unwrap().progress, Some(5));
    }

    #[test]
    fn apply_state_field_change_and_error_before_state() {
        let waiter = EventWaiter::with_config(&NoConn, waiter_config());
        let task = TaskId::new();
        let mut view = StatusView::default();

        let error = PropertyChange::assign(task, "info.error", serde_json::json!("DiskFull"));
        assert_eq!(waiter.apply(&mut view, &error).unwrap(), None);

        let state = PropertyChange::assign(task, "info.state", serde_json::json!("error"));
        assert_eq!(
            waiter.apply(&mut view, &state).unwrap(),
            Some(ObservedState::Known(TaskState::Error))
        );
        assert_eq!(view.error(), Some(&ErrorDetail::from("DiskFull")));
    }

    #[test]
    fn apply_ignores_unrelated_paths_and_removals() {
        let waiter = EventWaiter::with_config(&NoConn, waiter_config());
        let task = TaskId::new();
        let mut view = StatusView::default();

        let name = PropertyChange::assign(task, "name", serde_json::json!("renamed"));
        assert_eq!(waiter.apply(&mut view, &name).unwrap(), None);

        let removed = PropertyChange {
            task,
            path: "info".to_string(),
            op: ChangeOp::IndirectRemove,
            value: None,
        };
        assert_eq!(waiter.apply(&mut view, &removed).unwrap(), None);
        assert!(view.info.is_none());
    }

    #[test]
    fn apply_rejects_non_string_state() {
        let waiter = EventWaiter::with_config(&NoConn, waiter_config());
        let change = PropertyChange::assign(TaskId::new(), "info.state", serde_json::json!(3));
        let err = waiter.apply(&mut StatusView::default(), &change).unwrap_err();
        assert!(matches!(err, MonitorError::Decode { .. }));
    }

    #[test]
    fn filter_creation_failure_is_a_connection_error() {
        let handle = TaskHandle::new(TaskId::new(), "PowerOnVM_Task");
        let mut table = DispatchTable::new();
        let err = EventWaiter::new(&NoConn).run(&handle, &mut table).unwrap_err();
        assert!(err.is_connection());
        assert!(err.is_retryable());
    }
}
