//! Fixed-interval polling strategy.
//!
//! Each iteration runs the periodic handler, reads the task's status, and
//! dispatches on a state change. Between iterations the poller sleeps for the
//! configured interval; no interval (or a zero one) reads back-to-back, which
//! trades request volume for latency. Polling is the fallback when no change
//! subscription is available.

use std::time::Duration;

use tracing::{debug, trace};

use crate::cancel::{CancellationToken, Sleep};
use crate::connection::StatusReader;
use crate::dispatch::{DispatchTable, Flow, Tracker};
use crate::error::{MonitorError, MonitorResult, OperationError};
use crate::monitor::TaskMonitor;
use crate::task::{TaskHandle, TaskState};

/// Outcome of a single poll step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Not terminal yet; carries the last known state, if any was seen.
    Pending(Option<TaskState>),
    /// The task succeeded and the success handler has run.
    Done,
}

/// Observation state carried between poll steps of one task.
#[derive(Debug, Default)]
pub struct PollState {
    tracker: Tracker,
    iterations: u64,
}

impl PollState {
    /// Fresh state: the next observed state counts as a transition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed poll steps.
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }
}

/// Polls a task's status through a [`StatusReader`].
pub struct Poller<'c, R: StatusReader + ?Sized> {
    reader: &'c R,
    interval: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl<'c, R: StatusReader + ?Sized> Poller<'c, R> {
    /// A poller sleeping `interval` between reads.
    #[must_use]
    pub const fn new(reader: &'c R, interval: Option<Duration>) -> Self {
        Self {
            reader,
            interval,
            cancel: None,
        }
    }

    /// Check `token` before every read and abort sleeps when it fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Sleep between reads.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Run one iteration: periodic handler, status read, dispatch.
    ///
    /// Never sleeps. Returns `Err(MonitorError::Operation)` once the error
    /// handler has run for a failed task.
    pub fn step(
        &self,
        state: &mut PollState,
        handle: &TaskHandle,
        table: &mut DispatchTable<'_>,
    ) -> MonitorResult<Progress> {
        self.check_cancelled(handle)?;
        table.periodic(handle)?;

        let info = self.reader.task_info(&handle.id)?;
        state.iterations += 1;
        trace!(task = %handle.id, iteration = state.iterations, state = %info.state, "polled task");

        match state.tracker.observe(table, handle, &info.state, &info)? {
            Flow::Continue => Ok(Progress::Pending(state.tracker.last())),
            Flow::Finished(TaskState::Error) => Err(OperationError {
                task: handle.id,
                cause: info.error_detail(),
            }
            .into()),
            Flow::Finished(_) => Ok(Progress::Done),
        }
    }

    fn check_cancelled(&self, handle: &TaskHandle) -> MonitorResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(MonitorError::Cancelled { task: handle.id }),
            _ => Ok(()),
        }
    }

    fn suspend(&self, handle: &TaskHandle) -> MonitorResult<()> {
        let Some(interval) = self.interval.filter(|d| !d.is_zero()) else {
            return Ok(());
        };
        match &self.cancel {
            Some(token) => match token.sleep(interval) {
                Sleep::Elapsed => Ok(()),
                Sleep::Cancelled => Err(MonitorError::Cancelled { task: handle.id }),
            },
            None => {
                std::thread::sleep(interval);
                Ok(())
            }
        }
    }
}

impl<R: StatusReader + ?Sized> std::fmt::Debug for Poller<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("interval", &self.interval)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}

impl<R: StatusReader + ?Sized> TaskMonitor for Poller<'_, R> {
    fn run(&self, handle: &TaskHandle, table: &mut DispatchTable<'_>) -> MonitorResult<()> {
        let mut state = PollState::new();
        let result = loop {
            match self.step(&mut state, handle, table) {
                Ok(Progress::Done) => break Ok(()),
                Ok(Progress::Pending(_)) => {}
                Err(err) => break Err(err),
            }
            if let Err(err) = self.suspend(handle) {
                break Err(err);
            }
        };
        debug!(
            task = %handle.id,
            iterations = state.iterations(),
            ok = result.is_ok(),
            "poll finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::error::ConnectionError;
    use crate::task::{TaskId, TaskInfo};

    /// Hands out scripted reports, repeating the last one.
    struct Script(Mutex<VecDeque<TaskInfo>>);

    impl Script {
        fn new(reports: Vec<TaskInfo>) -> Self {
            Self(Mutex::new(reports.into()))
        }
    }

    impl StatusReader for Script {
        fn task_info(&self, _task: &TaskId) -> Result<TaskInfo, ConnectionError> {
            let mut queue = self.0.lock().unwrap();
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap())
            } else {
                queue.front().cloned().ok_or(ConnectionError::Backend {
                    message: "empty script".to_string(),
                })
            }
        }
    }

    fn handle() -> TaskHandle {
        TaskHandle::new(TaskId::new(), "RenameTask")
    }

    #[test]
    fn step_reports_pending_then_done() {
        let script = Script::new(vec![TaskInfo::queued(), TaskInfo::success()]);
        let poller = Poller::new(&script, None);
        let mut state = PollState::new();
        let mut table = DispatchTable::new();
        let h = handle();

        assert_eq!(
            poller.step(&mut state, &h, &mut table).unwrap(),
            Progress::Pending(Some(TaskState::Queued))
        );
        assert_eq!(poller.step(&mut state, &h, &mut table).unwrap(), Progress::Done);
        assert_eq!(state.iterations(), 2);
    }

    #[test]
    fn periodic_runs_before_transition_handler() {
        let script = Script::new(vec![TaskInfo::success()]);
        let order = RefCell::new(Vec::new());
        let mut table = DispatchTable::new()
            .on_periodic(|_| {
                order.borrow_mut().push("periodic");
                Ok(())
            })
            .on_success(|_, _| {
                order.borrow_mut().push("success");
                Ok(())
            });
        Poller::new(&script, Some(Duration::ZERO))
            .run(&handle(), &mut table)
            .unwrap();
        drop(table);
        assert_eq!(order.into_inner(), vec!["periodic", "success"]);
    }

    #[test]
    fn read_failure_aborts_without_retry() {
        struct Down;
        impl StatusReader for Down {
            fn task_info(&self, _task: &TaskId) -> Result<TaskInfo, ConnectionError> {
                Err(ConnectionError::Unreachable {
                    message: "connection reset".to_string(),
                })
            }
        }

        let mut table = DispatchTable::new();
        let err = Poller::new(&Down, None).run(&handle(), &mut table).unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn cancelled_token_stops_before_first_read() {
        let script = Script::new(vec![TaskInfo::running(None)]);
        let token = CancellationToken::new();
        token.cancel();
        let mut table = DispatchTable::new().on_periodic(|_| panic!("periodic must not run"));
        let err = Poller::new(&script, Some(Duration::from_secs(5)))
            .with_cancellation(token)
            .run(&handle(), &mut table)
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
