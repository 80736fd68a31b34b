// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//
// Turns library callbacks into host function calls. Runs on the dispatcher and
// worker threads. Argument layouts:
//
//   created  (task)
//   status   (task, numerator, denominator)
//   warning  (task)
//   complete (task, data, data_size)
//   fail     (task, error)
//   worker   (job, workload, workload_size)

use std::sync::Arc;

use gearman_lowlevel::{ClientConnection, Job, ReturnCode, Task, UserData};
use log::{debug, trace, warn};

use crate::client::{TaskContext, TaskEvent};
use crate::handles::HandleError;
use crate::host::{CallFrame, Cell, FuncId, HostError, PluginContext};
use crate::worker::{JobContext, WorkerFunction};

pub fn install_task_callbacks(connection: &mut dyn ClientConnection) {
    connection.set_created_fn(on_created);
    connection.set_status_fn(on_status);
    connection.set_warning_fn(on_warning);
    connection.set_complete_fn(on_complete);
    connection.set_fail_fn(on_fail);
}

fn saturating_cell(value: u32) -> Cell {
    Cell::try_from(value).unwrap_or(Cell::MAX)
}

fn length_cell(len: usize) -> Cell {
    Cell::try_from(len).unwrap_or(Cell::MAX)
}

fn task_context(task: &dyn Task) -> Option<Arc<TaskContext>> {
    task.context()?.clone().downcast::<TaskContext>().ok()
}

fn call_host(plugin: &Arc<dyn PluginContext>, func: FuncId, frame: CallFrame) -> ReturnCode {
    match plugin.execute(func, frame) {
        Ok(result) => ReturnCode::from_cell(result),
        Err(HostError::FunctionNotFound(func)) => {
            debug!("host function {:?} is gone", func);
            ReturnCode::SUCCESS
        }
        Err(e) => {
            warn!("host callback failed: {}", e);
            ReturnCode::SUCCESS
        }
    }
}

/// Runs the host function bound to `event`. `push_args` adds everything after
/// the task handle. Terminal events run at most once per task and release the
/// task handle afterwards.
fn deliver(
    ctx: &TaskContext,
    event: TaskEvent,
    push_args: impl FnOnce(&mut CallFrame),
) -> ReturnCode {
    if event.is_terminal() && !ctx.terminate() {
        debug!("task {}: {} after terminal event ignored", ctx.handle(), event);
        return ReturnCode::SUCCESS;
    }

    let ret = if ctx.is_abandoned() {
        trace!("task {}: {} for abandoned task", ctx.handle(), event);
        ReturnCode::SUCCESS
    } else if let Some(func) = ctx.callback(event) {
        let mut frame = CallFrame::new();
        frame.push_handle(ctx.handle());
        push_args(&mut frame);
        call_host(ctx.plugin(), func, frame)
    } else {
        ReturnCode::SUCCESS
    };

    if event.is_terminal() {
        ctx.release();
    }
    ret
}

fn on_created(task: &dyn Task) -> ReturnCode {
    let Some(ctx) = task_context(task) else {
        return ReturnCode::FAIL;
    };
    if let Some(job_handle) = task.job_handle() {
        ctx.set_job_handle(job_handle);
    }
    deliver(&ctx, TaskEvent::Created, |_| {})
}

fn on_status(task: &dyn Task) -> ReturnCode {
    let Some(ctx) = task_context(task) else {
        return ReturnCode::FAIL;
    };
    deliver(&ctx, TaskEvent::Status, |frame| {
        frame
            .push_cell(saturating_cell(task.numerator()))
            .push_cell(saturating_cell(task.denominator()));
    })
}

fn on_warning(task: &dyn Task) -> ReturnCode {
    let Some(ctx) = task_context(task) else {
        return ReturnCode::FAIL;
    };
    deliver(&ctx, TaskEvent::Warning, |_| {})
}

fn on_complete(task: &dyn Task) -> ReturnCode {
    let Some(ctx) = task_context(task) else {
        return ReturnCode::FAIL;
    };
    deliver(&ctx, TaskEvent::Complete, |frame| {
        let data = task.data();
        frame.push_bytes(data).push_cell(length_cell(data.len()));
    })
}

fn on_fail(task: &dyn Task) -> ReturnCode {
    let Some(ctx) = task_context(task) else {
        return ReturnCode::FAIL;
    };
    deliver(&ctx, TaskEvent::Fail, |frame| {
        frame.push_string(task.error().unwrap_or("unknown error"));
    })
}

/// Delivers the fail event of a task the library refused to add.
pub(crate) fn reject_task(ctx: &TaskContext, code: ReturnCode) -> ReturnCode {
    deliver(ctx, TaskEvent::Fail, |frame| {
        frame.push_string(code.to_string());
    })
}

/// Worker function entry point. The job gets a handle for the duration of the
/// host call; if the host answers `IN_PROGRESS` the handle stays open until
/// the host closes it.
pub fn call_worker(job: &Arc<dyn Job>, context: Option<&UserData>) -> ReturnCode {
    let Some(function) = context.and_then(|c| c.clone().downcast::<WorkerFunction>().ok()) else {
        return ReturnCode::FAIL;
    };
    let Some(registry) = function.registry() else {
        return ReturnCode::FAIL;
    };

    let job_context = JobContext::fetched(job.clone());
    let handle = match registry.create(job_context.clone(), function.plugin().identity()) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("job {}: {}", job.handle(), e);
            return ReturnCode::FAIL;
        }
    };

    let workload = job.workload();
    let mut frame = CallFrame::new();
    frame
        .push_handle(handle)
        .push_bytes(workload)
        .push_cell(length_cell(workload.len()));
    trace!("job {} -> {}", job.handle(), function.name());

    let ret = match function.plugin().execute(function.callback(), frame) {
        Ok(result) => ReturnCode::from_cell(result),
        Err(e) => {
            warn!("worker function {}: {}", function.name(), e);
            ReturnCode::FAIL
        }
    };

    if ret == ReturnCode::IN_PROGRESS {
        job_context.defer();
    } else {
        match registry.destroy(handle, None) {
            Ok(()) | Err(HandleError::Unknown(_)) => {}
            Err(e) => debug!("job {} not released: {}", handle, e),
        }
    }
    ret
}
