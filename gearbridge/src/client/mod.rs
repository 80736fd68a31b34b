// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//
// Submission side. The host thread only stages tasks; everything that blocks
// on the server runs on the dispatcher thread of the client.
//
//   host thread                     dispatcher thread
//   -----------                     -----------------
//   client_add_task ──enqueue──▶ [ submission queue ] ──▶ add_task × n
//                                                         run_tasks
//                                                           └─▶ marshal ─▶ host callbacks

pub mod task;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use gearman_lowlevel::{ClientConnection, JobStatus, Priority, ReturnCode};
use log::debug;

use crate::config::BridgeConfig;
use crate::dispatch::{Dispatcher, Enqueued};
use crate::error::{BridgeError, Result};
use crate::handles::{HandleObject, HandleType, Teardown};
use crate::host::{FuncId, PluginContext};
use crate::marshal;

pub use task::{Submission, TaskContext, TaskEvent};

/// A client connection shared between the host and the dispatcher thread.
/// `None` once the client was closed.
pub type SharedConnection = Arc<Mutex<Option<Box<dyn ClientConnection>>>>;

pub struct ClientContext {
    plugin: Arc<dyn PluginContext>,
    connection: SharedConnection,
    created_func: Mutex<Option<FuncId>>,
    dispatcher: Dispatcher,
    closed: AtomicBool,
}

impl ClientContext {
    pub fn new(
        plugin: Arc<dyn PluginContext>,
        mut connection: Box<dyn ClientConnection>,
        config: &BridgeConfig,
    ) -> Arc<Self> {
        connection.set_timeout(config.client_timeout());
        marshal::install_task_callbacks(connection.as_mut());
        let connection: SharedConnection = Arc::new(Mutex::new(Some(connection)));
        Arc::new(Self {
            plugin,
            dispatcher: Dispatcher::new(connection.clone(), config),
            connection,
            created_func: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn plugin(&self) -> &Arc<dyn PluginContext> {
        &self.plugin
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn created_callback(&self) -> Option<FuncId> {
        *self.created_func.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_created_callback(&self, func: Option<FuncId>) {
        *self.created_func.lock().unwrap_or_else(PoisonError::into_inner) = func;
    }

    /// Runs `op` on the connection from the host thread.
    ///
    /// The host must not wait for a flush pass, so a connection that is busy
    /// on the dispatcher thread reports `IO_WAIT` instead of blocking. This
    /// also keeps task callbacks from deadlocking on their own client.
    fn with_connection<R>(
        &self,
        op: impl FnOnce(&mut dyn ClientConnection) -> R,
    ) -> std::result::Result<R, ReturnCode> {
        let mut guard = match self.connection.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("client connection busy with a flush pass");
                return Err(ReturnCode::IO_WAIT);
            }
        };
        match guard.as_mut() {
            Some(connection) => Ok(op(connection.as_mut())),
            None => Err(ReturnCode::LOST_CONNECTION),
        }
    }

    pub fn add_server(&self, host: &str, port: u16) -> ReturnCode {
        self.with_connection(|connection| connection.add_server(host, port))
            .unwrap_or_else(|code| code)
    }

    /// Stages a task for the next flush pass.
    pub fn submit(&self, task: Arc<TaskContext>) -> Result<Enqueued> {
        if self.is_closed() {
            return Err(BridgeError::DispatcherStopped);
        }
        self.dispatcher.enqueue(task)
    }

    /// Submits a background job on the calling thread and returns the job
    /// handle the server assigned.
    pub fn do_background(
        &self,
        function: &str,
        unique: &str,
        workload: &[u8],
        priority: Priority,
    ) -> std::result::Result<String, ReturnCode> {
        self.with_connection(|connection| {
            connection.do_background(function, unique, workload, priority)
        })?
    }

    pub fn job_status(&self, job_handle: &str) -> std::result::Result<JobStatus, ReturnCode> {
        self.with_connection(|connection| connection.job_status(job_handle))?
    }
}

fn release_connection(mut guard: MutexGuard<'_, Option<Box<dyn ClientConnection>>>) {
    let connection = guard.take();
    drop(guard);
    // dropping the connection drops the contexts of its in-flight tasks
    drop(connection);
}

impl HandleObject for ClientContext {
    const TYPE: HandleType = HandleType::Client;
}

impl Teardown for ClientContext {
    fn on_handle_destroy(&self) {
        self.closed.store(true, Ordering::Release);
        self.dispatcher.stop();
        match self.connection.try_lock() {
            Ok(guard) => release_connection(guard),
            Err(TryLockError::Poisoned(poisoned)) => release_connection(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                // the dispatcher thread drops it when the running pass ends
                debug!("client closed during a flush pass");
            }
        }
    }
}
