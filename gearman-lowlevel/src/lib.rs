// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//
// The operation set of the gearman client/worker library as gearbridge uses it.
// Connections are trait objects so the bridge never depends on a concrete
// implementation; `loopback` provides one that runs entirely in-process.

pub mod client;
pub mod loopback;
pub mod return_code;
pub mod worker;

use std::any::Any;
use std::sync::Arc;

pub use client::{ClientConnection, Task, TaskFn, TaskId};
pub use return_code::{JobResponse, JobStatus, Priority, ReturnCode};
pub use worker::{Job, JobFn, WorkerConnection};

/// Opaque user data attached to a task or a worker function.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Factory for connections. One instance is created at process start.
pub trait Library: Send + Sync {
    fn create_client(&self) -> Result<Box<dyn ClientConnection>, ReturnCode>;

    fn create_worker(&self) -> Result<Arc<dyn WorkerConnection>, ReturnCode>;
}
