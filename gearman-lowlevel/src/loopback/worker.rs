// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_channel::Sender;
use log::{debug, warn};

use crate::loopback::server::{JobUpdate, QueuedJob, Update};
use crate::loopback::{Directory, LoopbackServer};
use crate::{Job, JobFn, ReturnCode, UserData, WorkerConnection};

/// A job fetched by a loopback worker.
pub struct LoopbackJob {
    handle: String,
    function: String,
    unique: String,
    workload: Vec<u8>,
    listener: Option<Sender<Update>>,
    server: LoopbackServer,
    finished: AtomicBool,
}

impl LoopbackJob {
    pub(crate) fn new(queued: QueuedJob, server: LoopbackServer) -> Self {
        Self {
            handle: queued.handle,
            function: queued.function,
            unique: queued.unique,
            workload: queued.workload,
            listener: queued.listener,
            server,
            finished: AtomicBool::new(false),
        }
    }

    fn send(&self, update: JobUpdate) -> ReturnCode {
        if update.is_terminal() {
            if self.finished.swap(true, Ordering::SeqCst) {
                return ReturnCode::UNKNOWN_STATE;
            }
        } else if self.finished.load(Ordering::SeqCst) {
            return ReturnCode::UNKNOWN_STATE;
        }

        self.server.report(&self.handle, &update);
        if let Some(listener) = &self.listener {
            let update = Update {
                job_handle: self.handle.clone(),
                kind: update,
            };
            if listener.send_blocking(update).is_err() {
                // the submitting client is gone; the server side is still updated
                debug!("{}: client no longer listening", self.handle);
            }
        }
        ReturnCode::SUCCESS
    }
}

impl Job for LoopbackJob {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn function_name(&self) -> &str {
        &self.function
    }

    fn unique(&self) -> &str {
        &self.unique
    }

    fn workload(&self) -> &[u8] {
        &self.workload
    }

    fn send_data(&self, data: &[u8]) -> ReturnCode {
        self.send(JobUpdate::Data(data.to_vec()))
    }

    fn send_warning(&self, data: &[u8]) -> ReturnCode {
        self.send(JobUpdate::Warning(data.to_vec()))
    }

    fn send_status(&self, numerator: u32, denominator: u32) -> ReturnCode {
        self.send(JobUpdate::Status(numerator, denominator))
    }

    fn send_complete(&self, data: &[u8]) -> ReturnCode {
        self.send(JobUpdate::Complete(data.to_vec()))
    }

    fn send_exception(&self, data: &[u8]) -> ReturnCode {
        self.send(JobUpdate::Exception(data.to_vec()))
    }

    fn send_fail(&self) -> ReturnCode {
        self.send(JobUpdate::Fail)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct FunctionEntry {
    callback: JobFn,
    context: Option<UserData>,
}

#[derive(Default)]
struct WorkerState {
    servers: Vec<(String, u16)>,
    identifier: Option<String>,
    timeout: Option<Duration>,
    functions: HashMap<String, FunctionEntry>,
}

/// Worker connection of the loopback library.
pub struct LoopbackWorker {
    directory: Arc<Directory>,
    state: Mutex<WorkerState>,
    // server of the last `work` call, used to wake it up on shutdown
    server: Mutex<Option<LoopbackServer>>,
    shutdown: AtomicBool,
}

impl LoopbackWorker {
    pub(crate) fn new(directory: Arc<Directory>) -> Self {
        Self {
            directory,
            state: Mutex::new(WorkerState::default()),
            server: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn function_names(&self) -> Vec<String> {
        self.lock().functions.keys().cloned().collect()
    }

    fn wake(&self) {
        let server = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(server) = server {
            server.wake_workers();
        }
    }

    pub fn identifier(&self) -> Option<String> {
        self.lock().identifier.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl WorkerConnection for LoopbackWorker {
    fn add_server(&self, host: &str, port: u16) -> ReturnCode {
        let host = if host.is_empty() { "localhost" } else { host };
        self.lock().servers.push((host.to_string(), port));
        ReturnCode::SUCCESS
    }

    fn set_identifier(&self, identifier: &str) -> ReturnCode {
        if identifier.is_empty() {
            return ReturnCode::INVALID_ARGUMENT;
        }
        self.lock().identifier = Some(identifier.to_string());
        ReturnCode::SUCCESS
    }

    fn set_timeout(&self, timeout: Option<Duration>) {
        self.lock().timeout = timeout;
    }

    fn define_function(
        &self,
        name: &str,
        timeout_ms: u32,
        callback: JobFn,
        context: Option<UserData>,
    ) -> ReturnCode {
        if name.is_empty() {
            return ReturnCode::INVALID_FUNCTION_NAME;
        }
        self.lock()
            .functions
            .insert(name.to_string(), FunctionEntry { callback, context });
        debug!("function {} defined (timeout {} ms)", name, timeout_ms);
        // a worker blocked in `work` has to pick up the new function
        self.wake();
        ReturnCode::SUCCESS
    }

    fn work(&self) -> ReturnCode {
        if self.shutdown.load(Ordering::SeqCst) {
            return ReturnCode::SHUTDOWN;
        }
        let (servers, timeout) = {
            let state = self.lock();
            (state.servers.clone(), state.timeout)
        };
        let server = match self.directory.resolve(&servers) {
            Ok(server) => server,
            Err(code) => return code,
        };
        *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(server.clone());

        if self.function_names().is_empty() {
            return ReturnCode::NO_REGISTERED_FUNCTIONS;
        }

        let queued = match server.take_job(&|| self.function_names(), &self.shutdown, timeout) {
            Ok(queued) => queued,
            Err(code) => return code,
        };
        let entry = self.lock().functions.get(&queued.function).cloned();
        let job: Arc<dyn Job> = Arc::new(LoopbackJob::new(queued, server));

        let Some(entry) = entry else {
            warn!("{}: no function {} defined", job.handle(), job.function_name());
            job.send_fail();
            return ReturnCode::SUCCESS;
        };

        let result = (entry.callback)(&job, entry.context.as_ref());
        if result == ReturnCode::IN_PROGRESS {
            debug!("{}: left in progress", job.handle());
        } else if !job.is_finished() {
            if result.is_success() {
                job.send_complete(&[]);
            } else {
                job.send_fail();
            }
        }
        ReturnCode::SUCCESS
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake();
    }
}
