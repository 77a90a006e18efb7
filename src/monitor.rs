//! Monitor facade.
//!
//! [`TaskMonitor`] is the common contract of both completion strategies:
//! block until the task is terminal, return `Ok(())` on success, fail with
//! [`MonitorError::Operation`](crate::MonitorError::Operation) when the task
//! fails. [`Monitor`] binds a connection and lets the caller pick the
//! strategy explicitly per call.

use std::time::Duration;

use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::MonitorConfig;
use crate::connection::Connection;
use crate::dispatch::DispatchTable;
use crate::error::MonitorResult;
use crate::poller::{PollState, Poller, Progress};
use crate::task::TaskHandle;
use crate::waiter::EventWaiter;

/// A completion-monitoring strategy.
pub trait TaskMonitor {
    /// Observe `handle` until it is terminal, dispatching through `table`.
    fn run(&self, handle: &TaskHandle, table: &mut DispatchTable<'_>) -> MonitorResult<()>;
}

/// Strategy selection for [`Monitor::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Block on the change subscription.
    Wait,
    /// Re-read the status, sleeping the given interval between reads.
    Poll(Option<Duration>),
}

/// Entry point binding a connection to both strategies.
///
/// ```
/// use taskwatch::memory::InMemoryConnection;
/// use taskwatch::{DispatchTable, Monitor, TaskInfo};
///
/// let conn = InMemoryConnection::new();
/// let task = conn.register_task("RenameTask");
/// conn.set_info(&task.id, TaskInfo::success()).unwrap();
///
/// let monitor = Monitor::new(&conn);
/// monitor.wait(&task, &mut DispatchTable::new()).unwrap();
/// assert!(!monitor.is_alive(&task).unwrap());
/// ```
pub struct Monitor<'c, C: Connection + ?Sized> {
    conn: &'c C,
    config: MonitorConfig,
    cancel: Option<CancellationToken>,
}

impl<'c, C: Connection + ?Sized> Monitor<'c, C> {
    /// A monitor with the default config.
    #[must_use]
    pub fn new(conn: &'c C) -> Self {
        Self {
            conn,
            config: MonitorConfig::default(),
            cancel: None,
        }
    }

    /// A monitor with a validated config.
    pub fn with_config(conn: &'c C, config: MonitorConfig) -> MonitorResult<Self> {
        config.validate()?;
        Ok(Self {
            conn,
            config,
            cancel: None,
        })
    }

    /// Make every run started from this monitor cancellable through `token`.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The config runs started here use.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// The event waiter bound to this monitor's connection.
    #[must_use]
    pub fn waiter(&self) -> EventWaiter<'c, C> {
        let waiter = EventWaiter::with_config(self.conn, self.config.clone());
        match &self.cancel {
            Some(token) => waiter.with_cancellation(token.clone()),
            None => waiter,
        }
    }

    /// A poller bound to this monitor's connection.
    #[must_use]
    pub fn poller(&self, interval: Option<Duration>) -> Poller<'c, C> {
        let poller = Poller::new(self.conn, interval);
        match &self.cancel {
            Some(token) => poller.with_cancellation(token.clone()),
            None => poller,
        }
    }

    /// Block on change notifications until the task is terminal.
    pub fn wait(&self, handle: &TaskHandle, table: &mut DispatchTable<'_>) -> MonitorResult<()> {
        self.run(Strategy::Wait, handle, table)
    }

    /// Poll every `interval` until the task is terminal.
    pub fn poll(
        &self,
        handle: &TaskHandle,
        interval: Option<Duration>,
        table: &mut DispatchTable<'_>,
    ) -> MonitorResult<()> {
        self.run(Strategy::Poll(interval), handle, table)
    }

    /// Poll using the configured interval.
    pub fn poll_configured(&self, handle: &TaskHandle, table: &mut DispatchTable<'_>) -> MonitorResult<()> {
        self.run(Strategy::Poll(self.config.poll_interval()), handle, table)
    }

    /// Run the chosen strategy.
    pub fn run(
        &self,
        strategy: Strategy,
        handle: &TaskHandle,
        table: &mut DispatchTable<'_>,
    ) -> MonitorResult<()> {
        debug!(task = %handle, strategy = ?strategy, "monitoring task");
        match strategy {
            Strategy::Wait => self.waiter().run(handle, table),
            Strategy::Poll(interval) => self.poller(interval).run(handle, table),
        }
    }

    /// Check once, then return.
    ///
    /// Runs a single poll iteration with fresh observation state, so the
    /// current known state always fires its handler.
    pub fn check(&self, handle: &TaskHandle, table: &mut DispatchTable<'_>) -> MonitorResult<Progress> {
        self.poller(None).step(&mut PollState::new(), handle, table)
    }

    /// True while the task has not reached a terminal state.
    ///
    /// Unknown states count as alive.
    pub fn is_alive(&self, handle: &TaskHandle) -> MonitorResult<bool> {
        let info = self.conn.task_info(&handle.id)?;
        Ok(!info.state.is_terminal())
    }
}

impl<C: Connection + ?Sized> std::fmt::Debug for Monitor<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("cancellable", &self.cancel.is_some())
            .finish_non_exhaustive()
    }
}
