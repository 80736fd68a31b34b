// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use futures::future::{select, Either};
use futures::pin_mut;
use log::{debug, trace};

use crate::loopback::server::{JobUpdate, Update};
use crate::loopback::Directory;
use crate::{ClientConnection, JobStatus, Priority, ReturnCode, Task, TaskFn, TaskId, UserData};

#[derive(Clone, Copy, Default)]
struct Callbacks {
    created: Option<TaskFn>,
    status: Option<TaskFn>,
    warning: Option<TaskFn>,
    complete: Option<TaskFn>,
    fail: Option<TaskFn>,
}

pub struct LoopbackTask {
    id: TaskId,
    context: Option<UserData>,
    function: String,
    unique: String,
    workload: Vec<u8>,
    priority: Priority,
    job_handle: Option<String>,
    numerator: u32,
    denominator: u32,
    data: Vec<u8>,
    error: Option<String>,
}

impl Task for LoopbackTask {
    fn context(&self) -> Option<&UserData> {
        self.context.as_ref()
    }

    fn id(&self) -> TaskId {
        self.id
    }

    fn job_handle(&self) -> Option<&str> {
        self.job_handle.as_deref()
    }

    fn numerator(&self) -> u32 {
        self.numerator
    }

    fn denominator(&self) -> u32 {
        self.denominator
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

fn fire(callback: Option<TaskFn>, task: &LoopbackTask, event: &str) {
    if let Some(callback) = callback {
        let ret = callback(task);
        if !ret.is_success() {
            debug!("task {:?}: {} callback returned {}", task.id, event, ret);
        }
    }
}

/// Client connection of the loopback library.
pub struct LoopbackClient {
    directory: Arc<Directory>,
    servers: Vec<(String, u16)>,
    timeout: Option<Duration>,
    callbacks: Callbacks,
    next_task: u64,
    pending: Vec<LoopbackTask>,
    outstanding: HashMap<String, LoopbackTask>,
    updates_tx: Sender<Update>,
    updates_rx: Receiver<Update>,
}

impl LoopbackClient {
    pub(crate) fn new(directory: Arc<Directory>) -> Self {
        let (updates_tx, updates_rx) = async_channel::unbounded();
        Self {
            directory,
            servers: Vec::new(),
            timeout: None,
            callbacks: Callbacks::default(),
            next_task: 0,
            pending: Vec::new(),
            outstanding: HashMap::new(),
            updates_tx,
            updates_rx,
        }
    }

    /// Tasks added but not yet sent.
    pub fn pending_tasks(&self) -> usize {
        self.pending.len()
    }

    /// Tasks sent and not yet terminal.
    pub fn outstanding_tasks(&self) -> usize {
        self.outstanding.len()
    }

    fn next_update(&self, deadline: Option<Instant>) -> Option<Update> {
        let recv = self.updates_rx.recv();
        match deadline {
            None => futures::executor::block_on(recv).ok(),
            Some(deadline) => futures::executor::block_on(async {
                let timer = async_io::Timer::at(deadline);
                pin_mut!(recv);
                pin_mut!(timer);
                match select(recv, timer).await {
                    Either::Left((update, _)) => update.ok(),
                    Either::Right(_) => None,
                }
            }),
        }
    }

    fn apply(&mut self, update: Update) {
        let callbacks = self.callbacks;
        let Update { job_handle, kind } = update;
        trace!("{}: {:?}", job_handle, kind);
        if kind.is_terminal() {
            let Some(mut task) = self.outstanding.remove(&job_handle) else {
                debug!("{}: update for unknown task dropped", job_handle);
                return;
            };
            match kind {
                JobUpdate::Complete(data) => {
                    task.data = data;
                    fire(callbacks.complete, &task, "complete");
                }
                JobUpdate::Exception(data) => {
                    task.error = Some(String::from_utf8_lossy(&data).into_owned());
                    fire(callbacks.fail, &task, "fail");
                }
                _ => {
                    task.error = Some("job failed".to_string());
                    fire(callbacks.fail, &task, "fail");
                }
            }
            return;
        }

        let Some(task) = self.outstanding.get_mut(&job_handle) else {
            debug!("{}: update for unknown task dropped", job_handle);
            return;
        };
        match kind {
            JobUpdate::Status(numerator, denominator) => {
                task.numerator = numerator;
                task.denominator = denominator;
                fire(callbacks.status, task, "status");
            }
            JobUpdate::Warning(data) => {
                task.data = data;
                fire(callbacks.warning, task, "warning");
            }
            JobUpdate::Data(data) => {
                task.data = data;
            }
            _ => {}
        }
    }
}

impl ClientConnection for LoopbackClient {
    fn add_server(&mut self, host: &str, port: u16) -> ReturnCode {
        let host = if host.is_empty() { "localhost" } else { host };
        self.servers.push((host.to_string(), port));
        ReturnCode::SUCCESS
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn add_task(
        &mut self,
        function: &str,
        unique: &str,
        workload: &[u8],
        priority: Priority,
        context: Option<UserData>,
    ) -> Result<TaskId, ReturnCode> {
        if function.is_empty() {
            return Err(ReturnCode::INVALID_FUNCTION_NAME);
        }
        self.next_task += 1;
        let id = TaskId(self.next_task);
        self.pending.push(LoopbackTask {
            id,
            context,
            function: function.to_string(),
            unique: unique.to_string(),
            workload: workload.to_vec(),
            priority,
            job_handle: None,
            numerator: 0,
            denominator: 0,
            data: Vec::new(),
            error: None,
        });
        Ok(id)
    }

    fn run_tasks(&mut self) -> ReturnCode {
        let callbacks = self.callbacks;
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            match self.directory.resolve(&self.servers) {
                Err(code) => {
                    for mut task in pending {
                        task.error = Some(code.to_string());
                        fire(callbacks.fail, &task, "fail");
                    }
                    return code;
                }
                Ok(server) => {
                    for mut task in pending {
                        let job_handle = server.submit(
                            &task.function,
                            &task.unique,
                            &task.workload,
                            task.priority,
                            Some(self.updates_tx.clone()),
                        );
                        task.job_handle = Some(job_handle.clone());
                        fire(callbacks.created, &task, "created");
                        self.outstanding.insert(job_handle, task);
                    }
                }
            }
        }

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        while !self.outstanding.is_empty() {
            match self.next_update(deadline) {
                Some(update) => self.apply(update),
                None => return ReturnCode::TIMEOUT,
            }
        }
        ReturnCode::SUCCESS
    }

    fn do_background(
        &mut self,
        function: &str,
        unique: &str,
        workload: &[u8],
        priority: Priority,
    ) -> Result<String, ReturnCode> {
        if function.is_empty() {
            return Err(ReturnCode::INVALID_FUNCTION_NAME);
        }
        let server = self.directory.resolve(&self.servers)?;
        Ok(server.submit(function, unique, workload, priority, None))
    }

    fn job_status(&mut self, job_handle: &str) -> Result<JobStatus, ReturnCode> {
        let server = self.directory.resolve(&self.servers)?;
        Ok(server.job_status(job_handle))
    }

    fn set_created_fn(&mut self, callback: TaskFn) {
        self.callbacks.created = Some(callback);
    }

    fn set_status_fn(&mut self, callback: TaskFn) {
        self.callbacks.status = Some(callback);
    }

    fn set_warning_fn(&mut self, callback: TaskFn) {
        self.callbacks.warning = Some(callback);
    }

    fn set_complete_fn(&mut self, callback: TaskFn) {
        self.callbacks.complete = Some(callback);
    }

    fn set_fail_fn(&mut self, callback: TaskFn) {
        self.callbacks.fail = Some(callback);
    }
}
