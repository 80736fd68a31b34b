// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use crate::{JobStatus, Priority, ReturnCode, UserData};

/// Identifier of a task inside one client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// Callback signature of the five task registration points.
pub type TaskFn = fn(&dyn Task) -> ReturnCode;

/// A task as seen from inside a task callback.
pub trait Task {
    /// The user data given to `add_task`.
    fn context(&self) -> Option<&UserData>;

    fn id(&self) -> TaskId;

    /// Server-assigned job handle, available from the created event on.
    fn job_handle(&self) -> Option<&str>;

    fn numerator(&self) -> u32;

    fn denominator(&self) -> u32;

    /// Payload of the last data, warning or complete packet.
    fn data(&self) -> &[u8];

    /// Error text of a failed task.
    fn error(&self) -> Option<&str>;
}

/// Submission side of the library. Not safe for concurrent use: callers must
/// serialize all access to one connection.
pub trait ClientConnection: Send {
    /// Records a server. Does not connect.
    fn add_server(&mut self, host: &str, port: u16) -> ReturnCode;

    /// Upper bound for blocking calls. `None` blocks indefinitely.
    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Adds a task that is sent with the next `run_tasks`.
    fn add_task(
        &mut self,
        function: &str,
        unique: &str,
        workload: &[u8],
        priority: Priority,
        context: Option<UserData>,
    ) -> Result<TaskId, ReturnCode>;

    /// Sends all added tasks and blocks until every outstanding task reached a
    /// terminal state. Progress is reported through the registered callbacks.
    fn run_tasks(&mut self) -> ReturnCode;

    /// Submits a job nobody listens to and returns its job handle.
    fn do_background(
        &mut self,
        function: &str,
        unique: &str,
        workload: &[u8],
        priority: Priority,
    ) -> Result<String, ReturnCode>;

    fn job_status(&mut self, job_handle: &str) -> Result<JobStatus, ReturnCode>;

    fn set_created_fn(&mut self, callback: TaskFn);

    fn set_status_fn(&mut self, callback: TaskFn);

    fn set_warning_fn(&mut self, callback: TaskFn);

    fn set_complete_fn(&mut self, callback: TaskFn);

    fn set_fail_fn(&mut self, callback: TaskFn);
}
