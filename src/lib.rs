//! # taskwatch - completion monitoring for long-running remote tasks
//!
//! A remote management API answers most mutating calls with a task handle
//! and finishes the work asynchronously. taskwatch observes such a task until
//! it is terminal, fires user callbacks once per observed state transition,
//! and returns `Ok(())` on success or the task's own error on failure.
//!
//! ## Core Concepts
//!
//! - **TaskHandle**: identifies one remote operation
//! - **DispatchTable**: `queued` / `running` / `success` / `error` / `periodic` callbacks
//! - **Poller**: re-reads the task status on a fixed interval
//! - **EventWaiter**: blocks on a property-change subscription and reacts to deltas
//! - **Monitor**: binds a connection and runs either strategy
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use taskwatch::memory::InMemoryConnection;
//! use taskwatch::{DispatchTable, Monitor, TaskInfo};
//!
//! let conn = InMemoryConnection::new();
//! let task = conn.register_task("PowerOnVM_Task");
//! conn.script(&task.id, [TaskInfo::running(Some(50)), TaskInfo::success()])?;
//!
//! let mut log = Vec::new();
//! let mut table = DispatchTable::new().on_success(|task, _| {
//!     log.push(format!("{} finished", task.kind));
//!     Ok(())
//! });
//! Monitor::new(&conn).poll(&task, Some(Duration::ZERO), &mut table)?;
//! drop(table);
//! assert_eq!(log, vec!["PowerOnVM_Task finished".to_string()]);
//! # Ok::<(), taskwatch::MonitorError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod connection;
pub mod error;
pub mod task;

// Observation and dispatch
pub mod cancel;
pub mod detector;
pub mod dispatch;
pub mod subscription;

// Strategies
pub mod monitor;
pub mod poller;
pub mod waiter;

// Reference collaborator
pub mod memory;

// Re-export primary types at crate root for convenience
pub use cancel::CancellationToken;
pub use config::MonitorConfig;
pub use connection::{
    ChangeOp, Connection, FilterId, FilterSpec, PropertyChange, StatusReader, SubscriptionService,
    UpdateBatch, Version,
};
pub use detector::{detect, TransitionRecord};
pub use dispatch::{DispatchTable, Flow};
pub use error::{ConfigError, ConnectionError, MonitorError, MonitorResult, OperationError};
pub use monitor::{Monitor, Strategy, TaskMonitor};
pub use poller::{PollState, Poller, Progress};
pub use subscription::Subscription;
pub use task::{ErrorDetail, ObservedState, TaskHandle, TaskId, TaskInfo, TaskState};
pub use waiter::EventWaiter;
