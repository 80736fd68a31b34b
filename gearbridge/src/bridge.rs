// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Mutex, PoisonError};

use gearman_lowlevel::{JobResponse, JobStatus, Library, Priority, ReturnCode};
use log::{debug, info, warn};

use crate::client::{ClientContext, Submission, TaskContext, TaskEvent};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::handles::{Handle, HandleObject, HandleRegistry, Teardown};
use crate::host::{Cell, FuncId, PluginContext};
use crate::worker::{JobContext, WorkerContext, WorkerThreads};

/// The bridge between one host and the job queue library. Created once at
/// startup and passed to every native.
pub struct Gearbridge {
    library: Arc<dyn Library>,
    config: BridgeConfig,
    registry: Arc<HandleRegistry>,
    worker_threads: WorkerThreads,
}

pub(crate) fn port_from_cell(port: Cell) -> Result<u16> {
    u16::try_from(port)
        .map_err(|_| BridgeError::InvalidArgument(format!("invalid port {}", port)))
}

impl Gearbridge {
    pub fn new(library: Arc<dyn Library>, config: BridgeConfig) -> Self {
        Self {
            library,
            config,
            registry: Arc::new(HandleRegistry::new()),
            worker_threads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn default_priority(&self) -> Priority {
        self.config.default_priority.into()
    }

    fn read<T: HandleObject>(
        &self,
        plugin: &Arc<dyn PluginContext>,
        handle: Handle,
    ) -> Result<Arc<T>> {
        Ok(self.registry.read::<T>(handle, Some(plugin.identity()))?)
    }

    fn create<T: HandleObject + Teardown>(
        &self,
        plugin: &Arc<dyn PluginContext>,
        object: Arc<T>,
    ) -> Result<Handle> {
        Ok(self.registry.create(object, plugin.identity())?)
    }

    /// Looks up a client handle for the bridge's own use.
    pub fn client(
        &self,
        plugin: &Arc<dyn PluginContext>,
        client: Handle,
    ) -> Result<Arc<ClientContext>> {
        self.read(plugin, client)
    }

    pub fn worker(
        &self,
        plugin: &Arc<dyn PluginContext>,
        worker: Handle,
    ) -> Result<Arc<WorkerContext>> {
        self.read(plugin, worker)
    }

    pub fn task(&self, plugin: &Arc<dyn PluginContext>, task: Handle) -> Result<Arc<TaskContext>> {
        self.read(plugin, task)
    }

    pub fn job(&self, plugin: &Arc<dyn PluginContext>, job: Handle) -> Result<Arc<JobContext>> {
        self.read(plugin, job)
    }

    /// Returns `Handle::BAD` if the library cannot create a connection.
    pub fn client_create(&self, plugin: &Arc<dyn PluginContext>) -> Handle {
        let connection = match self.library.create_client() {
            Ok(connection) => connection,
            Err(code) => {
                warn!("unable to create client: {}", code);
                return Handle::BAD;
            }
        };
        let client = ClientContext::new(plugin.clone(), connection, &self.config);
        match self.create(plugin, client) {
            Ok(handle) => {
                debug!("client {} created", handle);
                handle
            }
            Err(e) => {
                warn!("unable to register client: {}", e);
                Handle::BAD
            }
        }
    }

    pub fn client_add_server(
        &self,
        plugin: &Arc<dyn PluginContext>,
        client: Handle,
        host: &str,
        port: Cell,
    ) -> Result<ReturnCode> {
        let client = self.client(plugin, client)?;
        let port = port_from_cell(port)?;
        Ok(client.add_server(host, port))
    }

    /// Stages a task and returns its handle at once. The task is sent by the
    /// client's dispatcher thread.
    pub fn client_add_task(
        &self,
        plugin: &Arc<dyn PluginContext>,
        client: Handle,
        function: &str,
        workload: &[u8],
        complete: Option<FuncId>,
        priority: Priority,
    ) -> Result<Handle> {
        let client = self.client(plugin, client)?;
        if client.is_closed() {
            return Err(BridgeError::DispatcherStopped);
        }
        let submission = Submission {
            function: function.to_string(),
            unique: String::new(),
            workload: workload.to_vec(),
            priority,
        };
        let task = TaskContext::new(
            plugin.clone(),
            client.clone(),
            &self.registry,
            submission,
            complete,
        );
        let handle = self.create(plugin, task.clone())?;
        task.assign_handle(handle);

        if let Err(e) = client.submit(task) {
            if let Err(destroy_error) = self.registry.destroy(handle, None) {
                debug!("task {}: {}", handle, destroy_error);
            }
            return Err(e);
        }
        Ok(handle)
    }

    /// Returns a `GearmanJob` handle for the background job, or `Handle::BAD`
    /// if the library refused it.
    pub fn client_do_background(
        &self,
        plugin: &Arc<dyn PluginContext>,
        client: Handle,
        function: &str,
        unique: &str,
        workload: &[u8],
        priority: Priority,
    ) -> Result<Handle> {
        let client = self.client(plugin, client)?;
        match client.do_background(function, unique, workload, priority) {
            Ok(job_handle) => {
                debug!("background job {} submitted", job_handle);
                self.create(plugin, JobContext::background(job_handle))
            }
            Err(code) => {
                debug!("background job for {} refused: {}", function, code);
                Ok(Handle::BAD)
            }
        }
    }

    pub fn client_set_created_callback(
        &self,
        plugin: &Arc<dyn PluginContext>,
        client: Handle,
        func: Option<FuncId>,
    ) -> Result<()> {
        self.client(plugin, client)?.set_created_callback(func);
        Ok(())
    }

    /// Polls the server for a job handle returned by `client_do_background`.
    pub fn client_job_status(
        &self,
        plugin: &Arc<dyn PluginContext>,
        client: Handle,
        job: Handle,
    ) -> Result<(ReturnCode, JobStatus)> {
        let client = self.client(plugin, client)?;
        let job = self.job(plugin, job)?;
        Ok(match client.job_status(job.job_handle()) {
            Ok(status) => (ReturnCode::SUCCESS, status),
            Err(code) => (code, JobStatus::default()),
        })
    }

    pub fn worker_create(&self, plugin: &Arc<dyn PluginContext>) -> Handle {
        let connection = match self.library.create_worker() {
            Ok(connection) => connection,
            Err(code) => {
                warn!("unable to create worker: {}", code);
                return Handle::BAD;
            }
        };
        let worker = WorkerContext::new(
            plugin.clone(),
            connection,
            &self.registry,
            self.worker_threads.clone(),
            &self.config,
        );
        match self.create(plugin, worker) {
            Ok(handle) => {
                debug!("worker {} created", handle);
                handle
            }
            Err(e) => {
                warn!("unable to register worker: {}", e);
                Handle::BAD
            }
        }
    }

    pub fn worker_add_server(
        &self,
        plugin: &Arc<dyn PluginContext>,
        worker: Handle,
        host: &str,
        port: Cell,
    ) -> Result<ReturnCode> {
        let worker = self.worker(plugin, worker)?;
        let port = port_from_cell(port)?;
        Ok(worker.add_server(host, port))
    }

    pub fn worker_add_function(
        &self,
        plugin: &Arc<dyn PluginContext>,
        worker: Handle,
        name: &str,
        callback: FuncId,
        timeout_ms: u32,
    ) -> Result<ReturnCode> {
        self.worker(plugin, worker)?
            .register_function(name, callback, timeout_ms)
    }

    pub fn worker_set_identifier(
        &self,
        plugin: &Arc<dyn PluginContext>,
        worker: Handle,
        identifier: &str,
    ) -> Result<ReturnCode> {
        Ok(self.worker(plugin, worker)?.set_identifier(identifier))
    }

    pub fn job_send(
        &self,
        plugin: &Arc<dyn PluginContext>,
        job: Handle,
        data: &[u8],
        kind: JobResponse,
    ) -> Result<ReturnCode> {
        self.job(plugin, job)?.send(data, kind)
    }

    pub fn job_send_fail(
        &self,
        plugin: &Arc<dyn PluginContext>,
        job: Handle,
    ) -> Result<ReturnCode> {
        self.job(plugin, job)?.send_fail()
    }

    pub fn job_send_status(
        &self,
        plugin: &Arc<dyn PluginContext>,
        job: Handle,
        numerator: u32,
        denominator: u32,
    ) -> Result<ReturnCode> {
        self.job(plugin, job)?.send_status(numerator, denominator)
    }

    pub fn job_function_name(
        &self,
        plugin: &Arc<dyn PluginContext>,
        job: Handle,
    ) -> Result<Option<String>> {
        Ok(self.job(plugin, job)?.function_name().map(str::to_string))
    }

    pub fn job_unique(
        &self,
        plugin: &Arc<dyn PluginContext>,
        job: Handle,
    ) -> Result<Option<String>> {
        Ok(self.job(plugin, job)?.unique().map(str::to_string))
    }

    pub fn job_workload(
        &self,
        plugin: &Arc<dyn PluginContext>,
        job: Handle,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self.job(plugin, job)?.workload().map(<[u8]>::to_vec))
    }

    pub fn job_workload_size(&self, plugin: &Arc<dyn PluginContext>, job: Handle) -> Result<usize> {
        Ok(self.job(plugin, job)?.workload_size())
    }

    pub fn job_handle(&self, plugin: &Arc<dyn PluginContext>, job: Handle) -> Result<String> {
        Ok(self.job(plugin, job)?.job_handle().to_string())
    }

    pub fn task_set_callback(
        &self,
        plugin: &Arc<dyn PluginContext>,
        task: Handle,
        event: TaskEvent,
        func: Option<FuncId>,
    ) -> Result<()> {
        self.task(plugin, task)?.set_callback(event, func);
        Ok(())
    }

    /// Server job handle of a task, known once its created event ran.
    pub fn task_job_handle(
        &self,
        plugin: &Arc<dyn PluginContext>,
        task: Handle,
    ) -> Result<Option<String>> {
        Ok(self.task(plugin, task)?.job_handle())
    }

    pub fn close_handle(&self, plugin: &Arc<dyn PluginContext>, handle: Handle) -> Result<()> {
        Ok(self.registry.destroy(handle, Some(plugin.identity()))?)
    }

    /// Destroys every live handle and waits for the worker threads to end.
    pub fn unload(&self) {
        let destroyed = self.registry.destroy_all();
        let threads: Vec<_> = self
            .worker_threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for thread in threads {
            if thread.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        info!("gearbridge unloaded, {} handles destroyed", destroyed);
    }
}
