// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//
// Execution side. Each worker connection gets exactly one thread, started by
// the first function that was defined successfully. The thread loops on
// `work()`; jobs reach the host through `marshal::call_worker`.

pub mod job;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;

use gearman_lowlevel::{ReturnCode, UserData, WorkerConnection};
use log::{debug, info};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::handles::{HandleObject, HandleRegistry, HandleType, Teardown};
use crate::host::{FuncId, PluginContext};
use crate::log_limit::LogOnce;
use crate::marshal;

pub use job::{JobContext, JobSource};

static NEXT_WORKER: AtomicUsize = AtomicUsize::new(1);

/// Join handles of all worker threads of one bridge.
pub type WorkerThreads = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Binding of a function name to a host function. Passed to the library as
/// user data of the function.
pub struct WorkerFunction {
    plugin: Arc<dyn PluginContext>,
    registry: Weak<HandleRegistry>,
    name: String,
    callback: FuncId,
}

impl WorkerFunction {
    pub(crate) fn new(
        plugin: Arc<dyn PluginContext>,
        registry: Weak<HandleRegistry>,
        name: &str,
        callback: FuncId,
    ) -> Arc<Self> {
        Arc::new(Self {
            plugin,
            registry,
            name: name.to_string(),
            callback,
        })
    }

    pub fn plugin(&self) -> &Arc<dyn PluginContext> {
        &self.plugin
    }

    pub fn registry(&self) -> Option<Arc<HandleRegistry>> {
        self.registry.upgrade()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn callback(&self) -> FuncId {
        self.callback
    }
}

impl fmt::Debug for WorkerFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerFunction")
            .field("name", &self.name)
            .field("callback", &self.callback)
            .finish()
    }
}

pub struct WorkerContext {
    plugin: Arc<dyn PluginContext>,
    connection: Arc<dyn WorkerConnection>,
    registry: Weak<HandleRegistry>,
    functions: Mutex<HashMap<String, Arc<WorkerFunction>>>,
    thread_started: Mutex<bool>,
    threads_started: AtomicUsize,
    threads: WorkerThreads,
    start_error: LogOnce,
    config: BridgeConfig,
}

impl WorkerContext {
    pub fn new(
        plugin: Arc<dyn PluginContext>,
        connection: Arc<dyn WorkerConnection>,
        registry: &Arc<HandleRegistry>,
        threads: WorkerThreads,
        config: &BridgeConfig,
    ) -> Arc<Self> {
        connection.set_timeout(config.worker_timeout());
        Arc::new(Self {
            plugin,
            connection,
            registry: Arc::downgrade(registry),
            functions: Mutex::new(HashMap::new()),
            thread_started: Mutex::new(false),
            threads_started: AtomicUsize::new(0),
            threads,
            start_error: LogOnce::new(),
            config: config.clone(),
        })
    }

    pub fn plugin(&self) -> &Arc<dyn PluginContext> {
        &self.plugin
    }

    pub fn connection(&self) -> &Arc<dyn WorkerConnection> {
        &self.connection
    }

    pub fn add_server(&self, host: &str, port: u16) -> ReturnCode {
        self.connection.add_server(host, port)
    }

    pub fn set_identifier(&self, identifier: &str) -> ReturnCode {
        self.connection.set_identifier(identifier)
    }

    /// Names of the functions defined so far.
    pub fn functions(&self) -> Vec<String> {
        let functions = self.functions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of worker threads this context started. Never more than one.
    pub fn threads_started(&self) -> usize {
        self.threads_started.load(Ordering::Acquire)
    }

    /// Defines `name` on the connection and makes sure the worker thread runs.
    /// Library failures are returned as status, a thread that cannot be
    /// started is an error.
    pub fn register_function(
        &self,
        name: &str,
        callback: FuncId,
        timeout_ms: u32,
    ) -> Result<ReturnCode> {
        let function =
            WorkerFunction::new(self.plugin.clone(), self.registry.clone(), name, callback);
        let context: UserData = function.clone();
        let ret = self
            .connection
            .define_function(name, timeout_ms, marshal::call_worker, Some(context));
        if !ret.is_success() {
            debug!("defining {} failed: {}", name, ret);
            return Ok(ret);
        }
        self.functions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), function);

        self.ensure_thread()?;
        Ok(ret)
    }

    fn ensure_thread(&self) -> Result<()> {
        let mut started = self
            .thread_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *started {
            return Ok(());
        }

        let n = NEXT_WORKER.fetch_add(1, Ordering::Relaxed);
        let builder = self
            .config
            .thread_builder("worker", n, self.config.worker_stack_size);
        let connection = self.connection.clone();
        match builder.spawn(move || work_loop(connection)) {
            Ok(handle) => {
                *started = true;
                self.threads_started.fetch_add(1, Ordering::AcqRel);
                let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
                threads.retain(|thread| !thread.is_finished());
                threads.push(handle);
                Ok(())
            }
            Err(e) => {
                self.start_error
                    .error(format_args!("unable to start worker thread: {}", e));
                Err(BridgeError::ThreadStart {
                    what: "worker",
                    source: e,
                })
            }
        }
    }
}

fn work_loop(connection: Arc<dyn WorkerConnection>) {
    info!("worker thread running");
    loop {
        debug!("looking for work");
        let ret = connection.work();
        if !ret.is_success() {
            info!("worker thread ended: {}", ret);
            break;
        }
    }
}

impl HandleObject for WorkerContext {
    const TYPE: HandleType = HandleType::Worker;
}

impl Teardown for WorkerContext {
    fn on_handle_destroy(&self) {
        // wakes a blocked work(), the thread then ends by itself
        self.connection.shutdown();
        self.functions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.start_error.reset();
    }
}
