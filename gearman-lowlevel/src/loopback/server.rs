// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_channel::Sender;
use log::debug;

use crate::{JobStatus, Priority, ReturnCode};

/// Packet sent by a worker for a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobUpdate {
    Status(u32, u32),
    Warning(Vec<u8>),
    Data(Vec<u8>),
    Complete(Vec<u8>),
    Exception(Vec<u8>),
    Fail,
}

impl JobUpdate {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobUpdate::Complete(_) | JobUpdate::Exception(_) | JobUpdate::Fail
        )
    }
}

#[derive(Debug)]
pub(crate) struct Update {
    pub job_handle: String,
    pub kind: JobUpdate,
}

/// A job waiting in a function queue.
#[derive(Debug)]
pub(crate) struct QueuedJob {
    pub handle: String,
    pub function: String,
    pub unique: String,
    pub workload: Vec<u8>,
    pub listener: Option<Sender<Update>>,
}

#[derive(Debug, Default)]
struct ServerState {
    next_job: u64,
    // index 0 = high, 1 = normal, 2 = low
    queues: HashMap<String, [VecDeque<QueuedJob>; 3]>,
    status: HashMap<String, JobStatus>,
    shutdown: bool,
}

impl ServerState {
    fn pop_for(&mut self, functions: &[String]) -> Option<QueuedJob> {
        for level in 0..3 {
            for function in functions {
                if let Some(queues) = self.queues.get_mut(function) {
                    if let Some(job) = queues[level].pop_front() {
                        return Some(job);
                    }
                }
            }
        }
        None
    }
}

struct Shared {
    host: String,
    port: u16,
    state: Mutex<ServerState>,
    work_available: Condvar,
}

/// Handle to one in-process server. Clones refer to the same server.
#[derive(Clone)]
pub struct LoopbackServer {
    shared: Arc<Shared>,
}

impl fmt::Debug for LoopbackServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackServer")
            .field("host", &self.shared.host)
            .field("port", &self.shared.port)
            .finish()
    }
}

fn queue_index(priority: Priority) -> usize {
    match priority {
        Priority::High => 0,
        Priority::Normal => 1,
        Priority::Low => 2,
    }
}

impl LoopbackServer {
    pub(crate) fn new(host: &str, port: u16) -> Self {
        Self {
            shared: Arc::new(Shared {
                host: host.to_string(),
                port,
                state: Mutex::new(ServerState::default()),
                work_available: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn host(&self) -> &str {
        &self.shared.host
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    /// Number of jobs waiting for a worker of `function`.
    pub fn queued(&self, function: &str) -> usize {
        self.lock()
            .queues
            .get(function)
            .map(|queues| queues.iter().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    /// Makes every blocked and future `work` call on this server return `SHUTDOWN`.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.shared.work_available.notify_all();
    }

    pub(crate) fn wake_workers(&self) {
        // taking the lock orders the wakeup after a worker's last check
        drop(self.lock());
        self.shared.work_available.notify_all();
    }

    pub(crate) fn submit(
        &self,
        function: &str,
        unique: &str,
        workload: &[u8],
        priority: Priority,
        listener: Option<Sender<Update>>,
    ) -> String {
        let mut state = self.lock();
        state.next_job += 1;
        let handle = format!("H:{}:{}", self.shared.host, state.next_job);
        state.status.insert(
            handle.clone(),
            JobStatus {
                known: true,
                running: false,
                numerator: 0,
                denominator: 0,
            },
        );
        state.queues.entry(function.to_string()).or_default()[queue_index(priority)].push_back(
            QueuedJob {
                handle: handle.clone(),
                function: function.to_string(),
                unique: unique.to_string(),
                workload: workload.to_vec(),
                listener,
            },
        );
        drop(state);
        debug!("{}: queued for {} ({:?})", handle, function, priority);
        self.shared.work_available.notify_all();
        handle
    }

    /// Blocks until a job for one of the functions is available. The function
    /// list is re-read on every wakeup so that functions defined while waiting
    /// are served.
    pub(crate) fn take_job(
        &self,
        functions: &dyn Fn() -> Vec<String>,
        worker_shutdown: &AtomicBool,
        timeout: Option<Duration>,
    ) -> Result<QueuedJob, ReturnCode> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if state.shutdown || worker_shutdown.load(Ordering::SeqCst) {
                return Err(ReturnCode::SHUTDOWN);
            }
            if let Some(job) = state.pop_for(&functions()) {
                if let Some(status) = state.status.get_mut(&job.handle) {
                    status.running = true;
                }
                return Ok(job);
            }
            state = match deadline {
                None => self
                    .shared
                    .work_available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ReturnCode::TIMEOUT);
                    }
                    self.shared
                        .work_available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    pub(crate) fn report(&self, job_handle: &str, update: &JobUpdate) {
        let mut state = self.lock();
        if update.is_terminal() {
            state.status.remove(job_handle);
        } else if let JobUpdate::Status(numerator, denominator) = update {
            if let Some(status) = state.status.get_mut(job_handle) {
                status.numerator = *numerator;
                status.denominator = *denominator;
            }
        }
    }

    pub(crate) fn job_status(&self, job_handle: &str) -> JobStatus {
        self.lock()
            .status
            .get(job_handle)
            .copied()
            .unwrap_or_default()
    }
}
