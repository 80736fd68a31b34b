// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::Arc;
use std::time::Duration;

use crate::{ReturnCode, UserData};

/// Worker function signature. The return value decides the outcome of the job:
/// `SUCCESS` completes it, `IN_PROGRESS` leaves it open, anything else fails it.
/// Jobs that already sent a terminal packet are left as they are.
pub type JobFn = fn(&Arc<dyn Job>, Option<&UserData>) -> ReturnCode;

/// A job fetched by a worker.
pub trait Job: Send + Sync {
    fn handle(&self) -> &str;

    fn function_name(&self) -> &str;

    fn unique(&self) -> &str;

    fn workload(&self) -> &[u8];

    fn send_data(&self, data: &[u8]) -> ReturnCode;

    fn send_warning(&self, data: &[u8]) -> ReturnCode;

    fn send_status(&self, numerator: u32, denominator: u32) -> ReturnCode;

    fn send_complete(&self, data: &[u8]) -> ReturnCode;

    fn send_exception(&self, data: &[u8]) -> ReturnCode;

    fn send_fail(&self) -> ReturnCode;

    /// True once complete, exception or fail was sent.
    fn is_finished(&self) -> bool;
}

/// Execution side of the library.
///
/// Registration calls may come from any thread. `work` must not be called
/// concurrently with itself on one connection.
pub trait WorkerConnection: Send + Sync {
    /// Records a server. Does not connect.
    fn add_server(&self, host: &str, port: u16) -> ReturnCode;

    fn set_identifier(&self, identifier: &str) -> ReturnCode;

    /// Upper bound for a single `work` call. `None` blocks indefinitely.
    fn set_timeout(&self, timeout: Option<Duration>);

    fn define_function(
        &self,
        name: &str,
        timeout_ms: u32,
        callback: JobFn,
        context: Option<UserData>,
    ) -> ReturnCode;

    /// Blocks until one job was fetched and run.
    fn work(&self) -> ReturnCode;

    /// Makes a blocked or future `work` return `SHUTDOWN`.
    fn shutdown(&self);
}
