// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//
// The functions the host can call. Arguments arrive as cells; strings are
// passed by address and output strings go into host buffers of explicit size.
// An `Err` is raised in the host as a runtime error.

use std::sync::Arc;

use gearman_lowlevel::{JobResponse, Priority};

use crate::bridge::Gearbridge;
use crate::client::TaskEvent;
use crate::error::{BridgeError, Result};
use crate::handles::Handle;
use crate::host::{Cell, FuncId, PluginContext};

pub type NativeFn = fn(&Gearbridge, &Arc<dyn PluginContext>, &[Cell]) -> Result<Cell>;

#[derive(Clone, Copy)]
pub struct NativeInfo {
    pub name: &'static str,
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeInfo").field("name", &self.name).finish()
    }
}

pub static NATIVES: &[NativeInfo] = &[
    native("GearmanClient_Create", client_create),
    native("GearmanClient_AddServer", client_add_server),
    native("GearmanClient_AddTask", client_add_task),
    native("GearmanClient_DoBackground", client_do_background),
    native("GearmanClient_SetCreatedCallback", client_set_created_callback),
    native("GearmanClient_JobStatus", client_job_status),
    native("GearmanWorker_Create", worker_create),
    native("GearmanWorker_AddServer", worker_add_server),
    native("GearmanWorker_AddFunction", worker_add_function),
    native("GearmanWorker_SetIdentifier", worker_set_identifier),
    native("GearmanJob_Send", job_send),
    native("GearmanJob_SendFail", job_send_fail),
    native("GearmanJob_SendStatus", job_send_status),
    native("GearmanJob_FunctionName", job_function_name),
    native("GearmanJob_Unique", job_unique),
    native("GearmanJob_Workload", job_workload),
    native("GearmanJob_WorkloadSize", job_workload_size),
    native("GearmanJob_Handle", job_handle),
    native("GearmanTask_SetCreatedCallback", task_set_created_callback),
    native("GearmanTask_SetStatusCallback", task_set_status_callback),
    native("GearmanTask_SetFailCallback", task_set_fail_callback),
    native("GearmanTask_SetWarningCallback", task_set_warning_callback),
    native("GearmanTask_JobHandle", task_job_handle),
    native("CloseHandle", close_handle),
];

const fn native(name: &'static str, func: NativeFn) -> NativeInfo {
    NativeInfo { name, func }
}

pub fn find_native(name: &str) -> Option<&'static NativeInfo> {
    NATIVES.iter().find(|info| info.name == name)
}

fn arg(args: &[Cell], index: usize) -> Result<Cell> {
    args.get(index)
        .copied()
        .ok_or_else(|| BridgeError::InvalidArgument(format!("missing argument {}", index)))
}

fn handle_arg(args: &[Cell], index: usize) -> Result<Handle> {
    Ok(Handle::from_cell(arg(args, index)?))
}

fn func_arg(args: &[Cell], index: usize) -> Result<Option<FuncId>> {
    Ok(FuncId::from_cell(arg(args, index)?))
}

fn unsigned_arg(args: &[Cell], index: usize, what: &str) -> Result<u32> {
    let value = arg(args, index)?;
    u32::try_from(value)
        .map_err(|_| BridgeError::InvalidArgument(format!("invalid {} {}", what, value)))
}

fn string_arg(plugin: &Arc<dyn PluginContext>, args: &[Cell], index: usize) -> Result<String> {
    Ok(plugin.local_to_string(arg(args, index)?)?)
}

/// Optional priority argument; the configured default when omitted.
fn priority_arg(bridge: &Gearbridge, args: &[Cell], index: usize) -> Result<Priority> {
    match args.get(index) {
        None => Ok(bridge.default_priority()),
        Some(&value) => Priority::from_cell(value)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("invalid priority {}", value))),
    }
}

/// Copies `value` into the buffer at `args[index]` of size `args[index + 1]`.
/// Returns the length of `value`, or -1 if there is none.
fn write_string(
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
    index: usize,
    value: Option<&str>,
) -> Result<Cell> {
    let addr = arg(args, index)?;
    let maxlen = unsigned_arg(args, index + 1, "buffer size")?;
    let Some(value) = value else {
        return Ok(-1);
    };
    plugin.string_to_local_utf8(addr, maxlen as usize, value)?;
    Ok(length_cell(value.len()))
}

/// Like `write_string`, for payloads that need not be valid UTF-8.
fn write_bytes(
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
    index: usize,
    value: Option<&[u8]>,
) -> Result<Cell> {
    let addr = arg(args, index)?;
    let maxlen = unsigned_arg(args, index + 1, "buffer size")?;
    let Some(value) = value else {
        return Ok(-1);
    };
    plugin.bytes_to_local(addr, maxlen as usize, value)?;
    Ok(length_cell(value.len()))
}

fn length_cell(len: usize) -> Cell {
    Cell::try_from(len).unwrap_or(Cell::MAX)
}

// native GearmanClient_Create()
fn client_create(bridge: &Gearbridge, plugin: &Arc<dyn PluginContext>, _: &[Cell]) -> Result<Cell> {
    Ok(bridge.client_create(plugin).as_cell())
}

// native GearmanClient_AddServer(client, host[], port)
fn client_add_server(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let client = handle_arg(args, 0)?;
    let port = arg(args, 2)?;
    // range check before the host string is even read
    crate::bridge::port_from_cell(port)?;
    let host = string_arg(plugin, args, 1)?;
    Ok(bridge
        .client_add_server(plugin, client, &host, port)?
        .as_cell())
}

// native GearmanClient_AddTask(client, function[], workload[], complete, priority = default)
fn client_add_task(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let client = handle_arg(args, 0)?;
    let function = string_arg(plugin, args, 1)?;
    let workload = string_arg(plugin, args, 2)?;
    let complete = func_arg(args, 3)?;
    let priority = priority_arg(bridge, args, 4)?;
    let task = bridge.client_add_task(
        plugin,
        client,
        &function,
        workload.as_bytes(),
        complete,
        priority,
    )?;
    Ok(task.as_cell())
}

// native GearmanClient_DoBackground(client, function[], workload[],
//                                   priority = default, unique[] = "")
fn client_do_background(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let client = handle_arg(args, 0)?;
    let function = string_arg(plugin, args, 1)?;
    let workload = string_arg(plugin, args, 2)?;
    let priority = priority_arg(bridge, args, 3)?;
    let unique = match args.get(4) {
        Some(_) => string_arg(plugin, args, 4)?,
        None => String::new(),
    };
    let job = bridge.client_do_background(
        plugin,
        client,
        &function,
        &unique,
        workload.as_bytes(),
        priority,
    )?;
    Ok(job.as_cell())
}

// native GearmanClient_SetCreatedCallback(client, created)
fn client_set_created_callback(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    bridge.client_set_created_callback(plugin, handle_arg(args, 0)?, func_arg(args, 1)?)?;
    Ok(1)
}

// native GearmanClient_JobStatus(client, job, &known, &running, &numerator, &denominator)
fn client_job_status(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let client = handle_arg(args, 0)?;
    let job = handle_arg(args, 1)?;
    let outputs = [arg(args, 2)?, arg(args, 3)?, arg(args, 4)?, arg(args, 5)?];
    let (ret, status) = bridge.client_job_status(plugin, client, job)?;
    let values = [
        status.known as Cell,
        status.running as Cell,
        status.numerator as Cell,
        status.denominator as Cell,
    ];
    for (addr, value) in outputs.into_iter().zip(values) {
        plugin.write_cell(addr, value)?;
    }
    Ok(ret.as_cell())
}

// native GearmanWorker_Create()
fn worker_create(bridge: &Gearbridge, plugin: &Arc<dyn PluginContext>, _: &[Cell]) -> Result<Cell> {
    Ok(bridge.worker_create(plugin).as_cell())
}

// native GearmanWorker_AddServer(worker, host[], port)
fn worker_add_server(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let worker = handle_arg(args, 0)?;
    let port = arg(args, 2)?;
    crate::bridge::port_from_cell(port)?;
    let host = string_arg(plugin, args, 1)?;
    Ok(bridge
        .worker_add_server(plugin, worker, &host, port)?
        .as_cell())
}

// native GearmanWorker_AddFunction(worker, name[], callback, timeout = 0)
fn worker_add_function(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let worker = handle_arg(args, 0)?;
    let name = string_arg(plugin, args, 1)?;
    let callback = func_arg(args, 2)?
        .ok_or_else(|| BridgeError::InvalidArgument("worker callback missing".to_string()))?;
    let timeout = match args.get(3) {
        Some(_) => unsigned_arg(args, 3, "timeout")?,
        None => 0,
    };
    Ok(bridge
        .worker_add_function(plugin, worker, &name, callback, timeout)?
        .as_cell())
}

// native GearmanWorker_SetIdentifier(worker, identifier[])
fn worker_set_identifier(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let worker = handle_arg(args, 0)?;
    let identifier = string_arg(plugin, args, 1)?;
    Ok(bridge
        .worker_set_identifier(plugin, worker, &identifier)?
        .as_cell())
}

// native GearmanJob_Send(job, data[], type = GearmanResp_Data)
fn job_send(bridge: &Gearbridge, plugin: &Arc<dyn PluginContext>, args: &[Cell]) -> Result<Cell> {
    let job = handle_arg(args, 0)?;
    let data = string_arg(plugin, args, 1)?;
    let kind = match args.get(2) {
        None => JobResponse::Data,
        Some(&value) => JobResponse::from_cell(value).ok_or_else(|| {
            BridgeError::InvalidArgument(format!("invalid response type {}", value))
        })?,
    };
    Ok(bridge.job_send(plugin, job, data.as_bytes(), kind)?.as_cell())
}

// native GearmanJob_SendFail(job)
fn job_send_fail(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    Ok(bridge.job_send_fail(plugin, handle_arg(args, 0)?)?.as_cell())
}

// native GearmanJob_SendStatus(job, numerator, denominator)
fn job_send_status(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let job = handle_arg(args, 0)?;
    let numerator = unsigned_arg(args, 1, "numerator")?;
    let denominator = unsigned_arg(args, 2, "denominator")?;
    Ok(bridge
        .job_send_status(plugin, job, numerator, denominator)?
        .as_cell())
}

// native GearmanJob_FunctionName(job, buffer[], maxlen)
fn job_function_name(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let name = bridge.job_function_name(plugin, handle_arg(args, 0)?)?;
    write_string(plugin, args, 1, name.as_deref())
}

// native GearmanJob_Unique(job, buffer[], maxlen)
fn job_unique(bridge: &Gearbridge, plugin: &Arc<dyn PluginContext>, args: &[Cell]) -> Result<Cell> {
    let unique = bridge.job_unique(plugin, handle_arg(args, 0)?)?;
    write_string(plugin, args, 1, unique.as_deref())
}

// native GearmanJob_Workload(job, buffer[], maxlen)
fn job_workload(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let workload = bridge.job_workload(plugin, handle_arg(args, 0)?)?;
    write_bytes(plugin, args, 1, workload.as_deref())
}

// native GearmanJob_WorkloadSize(job)
fn job_workload_size(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let size = bridge.job_workload_size(plugin, handle_arg(args, 0)?)?;
    Ok(length_cell(size))
}

// native GearmanJob_Handle(job, buffer[], maxlen)
fn job_handle(bridge: &Gearbridge, plugin: &Arc<dyn PluginContext>, args: &[Cell]) -> Result<Cell> {
    let job_handle = bridge.job_handle(plugin, handle_arg(args, 0)?)?;
    write_string(plugin, args, 1, Some(&job_handle))
}

fn set_task_callback(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
    event: TaskEvent,
) -> Result<Cell> {
    bridge.task_set_callback(plugin, handle_arg(args, 0)?, event, func_arg(args, 1)?)?;
    Ok(1)
}

// native GearmanTask_SetCreatedCallback(task, created)
fn task_set_created_callback(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    set_task_callback(bridge, plugin, args, TaskEvent::Created)
}

// native GearmanTask_SetStatusCallback(task, status)
fn task_set_status_callback(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    set_task_callback(bridge, plugin, args, TaskEvent::Status)
}

// native GearmanTask_SetFailCallback(task, fail)
fn task_set_fail_callback(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    set_task_callback(bridge, plugin, args, TaskEvent::Fail)
}

// native GearmanTask_SetWarningCallback(task, warning)
fn task_set_warning_callback(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    set_task_callback(bridge, plugin, args, TaskEvent::Warning)
}

// native GearmanTask_JobHandle(task, buffer[], maxlen)
fn task_job_handle(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    let job_handle = bridge.task_job_handle(plugin, handle_arg(args, 0)?)?;
    write_string(plugin, args, 1, job_handle.as_deref())
}

// native CloseHandle(handle)
fn close_handle(
    bridge: &Gearbridge,
    plugin: &Arc<dyn PluginContext>,
    args: &[Cell],
) -> Result<Cell> {
    bridge.close_handle(plugin, handle_arg(args, 0)?)?;
    Ok(1)
}
