// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use gearman_lowlevel::{ClientConnection, Priority, ReturnCode, TaskId, UserData};
use log::{debug, trace};

use crate::client::ClientContext;
use crate::handles::{Handle, HandleError, HandleObject, HandleRegistry, HandleType, Teardown};
use crate::host::{FuncId, PluginContext};

/// The five task lifecycle events a host function can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskEvent {
    Created,
    Status,
    Warning,
    Complete,
    Fail,
}

impl TaskEvent {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskEvent::Complete | TaskEvent::Fail)
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskEvent::Created => "created",
            TaskEvent::Status => "status",
            TaskEvent::Warning => "warning",
            TaskEvent::Complete => "complete",
            TaskEvent::Fail => "fail",
        };
        f.write_str(name)
    }
}

/// What the host asked to run. Handed to the library by the dispatcher.
#[derive(Debug, Clone)]
pub struct Submission {
    pub function: String,
    pub unique: String,
    pub workload: Vec<u8>,
    pub priority: Priority,
}

#[derive(Debug, Default, Clone, Copy)]
struct TaskCallbacks {
    created: Option<FuncId>,
    status: Option<FuncId>,
    warning: Option<FuncId>,
    complete: Option<FuncId>,
    fail: Option<FuncId>,
}

impl TaskCallbacks {
    fn slot(&mut self, event: TaskEvent) -> &mut Option<FuncId> {
        match event {
            TaskEvent::Created => &mut self.created,
            TaskEvent::Status => &mut self.status,
            TaskEvent::Warning => &mut self.warning,
            TaskEvent::Complete => &mut self.complete,
            TaskEvent::Fail => &mut self.fail,
        }
    }
}

/// One submitted unit of work, from staging until its terminal event.
///
/// The library holds the context as user data of its task, so it stays alive
/// while the task is in flight even if the host closed the handle.
pub struct TaskContext {
    plugin: Arc<dyn PluginContext>,
    client: Arc<ClientContext>,
    registry: Weak<HandleRegistry>,
    submission: Submission,
    callbacks: Mutex<TaskCallbacks>,
    handle: OnceLock<Handle>,
    task_id: OnceLock<TaskId>,
    job_handle: Mutex<Option<String>>,
    terminated: AtomicBool,
    abandoned: AtomicBool,
}

impl TaskContext {
    pub fn new(
        plugin: Arc<dyn PluginContext>,
        client: Arc<ClientContext>,
        registry: &Arc<HandleRegistry>,
        submission: Submission,
        complete: Option<FuncId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            plugin,
            client,
            registry: Arc::downgrade(registry),
            submission,
            callbacks: Mutex::new(TaskCallbacks {
                complete,
                ..Default::default()
            }),
            handle: OnceLock::new(),
            task_id: OnceLock::new(),
            job_handle: Mutex::new(None),
            terminated: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
        })
    }

    pub fn plugin(&self) -> &Arc<dyn PluginContext> {
        &self.plugin
    }

    pub fn client(&self) -> &Arc<ClientContext> {
        &self.client
    }

    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    /// The host handle, `Handle::BAD` until it was assigned.
    pub fn handle(&self) -> Handle {
        self.handle.get().copied().unwrap_or(Handle::BAD)
    }

    pub(crate) fn assign_handle(&self, handle: Handle) {
        if self.handle.set(handle).is_err() {
            debug!("task {} already has a handle", self.handle());
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id.get().copied()
    }

    pub fn job_handle(&self) -> Option<String> {
        self.job_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_job_handle(&self, job_handle: &str) {
        *self.job_handle.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(job_handle.to_string());
    }

    pub fn set_callback(&self, event: TaskEvent, func: Option<FuncId>) {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        *callbacks.slot(event) = func;
    }

    /// Host function bound to `event`. The created event falls back to the
    /// binding of the owning client.
    pub fn callback(&self, event: TaskEvent) -> Option<FuncId> {
        let own = *self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slot(event);
        match (own, event) {
            (None, TaskEvent::Created) => self.client.created_callback(),
            (own, _) => own,
        }
    }

    /// Hands the staged submission to the library, with this context as the
    /// task's user data.
    pub(crate) fn add_to(
        self: &Arc<Self>,
        connection: &mut dyn ClientConnection,
    ) -> Result<TaskId, ReturnCode> {
        let context: UserData = self.clone();
        let submission = &self.submission;
        let id = connection.add_task(
            &submission.function,
            &submission.unique,
            &submission.workload,
            submission.priority,
            Some(context),
        )?;
        trace!("task {} added as {:?}", self.handle(), id);
        let _ = self.task_id.set(id);
        Ok(id)
    }

    /// Claims the single terminal event of this task. Only the first caller
    /// gets `true`.
    pub(crate) fn terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Destroys the host handle after a terminal event. The host may have
    /// closed it already.
    pub(crate) fn release(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let handle = self.handle();
        match registry.destroy(handle, None) {
            Ok(()) => trace!("task {} released", handle),
            Err(HandleError::Unknown(_)) => trace!("task {} was closed by the host", handle),
            Err(e) => debug!("task {} not released: {}", handle, e),
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("handle", &self.handle())
            .field("function", &self.submission.function)
            .field("task_id", &self.task_id())
            .field("terminated", &self.is_terminated())
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

impl HandleObject for TaskContext {
    const TYPE: HandleType = HandleType::Task;
}

impl Teardown for TaskContext {
    fn on_handle_destroy(&self) {
        // events that still arrive are acknowledged without running host code
        self.abandon();
    }
}
