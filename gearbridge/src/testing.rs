// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use gearman_lowlevel::{
    ClientConnection, JobStatus, Priority, ReturnCode, TaskFn, TaskId, UserData,
};

use crate::host::{CallFrame, Cell, FuncId, HostArg, HostError, Identity, PluginContext};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Plugin that records every call and answers with a fixed result.
pub(crate) struct RecordingPlugin {
    pub identity: Identity,
    pub result: Mutex<Cell>,
    pub calls: Mutex<Vec<(FuncId, Vec<HostArg>)>>,
}

impl RecordingPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            identity: Identity(1),
            result: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(FuncId, Vec<HostArg>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn answer(&self, result: Cell) {
        *self.result.lock().unwrap() = result;
    }
}

impl PluginContext for RecordingPlugin {
    fn identity(&self) -> Identity {
        self.identity
    }

    fn execute(&self, func: FuncId, frame: CallFrame) -> Result<Cell, HostError> {
        if func == FuncId(404) {
            return Err(HostError::FunctionNotFound(func));
        }
        self.calls.lock().unwrap().push((func, frame.into_args()));
        Ok(*self.result.lock().unwrap())
    }

    fn local_to_string(&self, addr: Cell) -> Result<String, HostError> {
        Err(HostError::BadAddress(addr))
    }

    fn string_to_local_utf8(
        &self,
        addr: Cell,
        _maxlen: usize,
        _value: &str,
    ) -> Result<usize, HostError> {
        Err(HostError::BadAddress(addr))
    }

    fn bytes_to_local(
        &self,
        addr: Cell,
        _maxlen: usize,
        _value: &[u8],
    ) -> Result<usize, HostError> {
        Err(HostError::BadAddress(addr))
    }

    fn write_cell(&self, addr: Cell, _value: Cell) -> Result<(), HostError> {
        Err(HostError::BadAddress(addr))
    }
}

#[derive(Default)]
pub(crate) struct GateState {
    pub closed: bool,
    pub added: Vec<UserData>,
    /// Number of tasks each `run_tasks` call found added.
    pub passes: Vec<usize>,
    pub reject_next: Option<ReturnCode>,
}

/// Client connection whose `run_tasks` blocks while the gate is closed.
#[derive(Clone, Default)]
pub(crate) struct GatedConnection {
    pub state: Arc<(Mutex<GateState>, Condvar)>,
}

impl GatedConnection {
    pub fn close_gate(&self) {
        self.state.0.lock().unwrap().closed = true;
    }

    pub fn open_gate(&self) {
        let (state, cond) = &*self.state;
        state.lock().unwrap().closed = false;
        cond.notify_all();
    }

    pub fn passes(&self) -> Vec<usize> {
        self.state.0.lock().unwrap().passes.clone()
    }

    /// Waits until `run_tasks` was entered `count` times.
    pub fn wait_for_passes(&self, count: usize) -> bool {
        let (state, cond) = &*self.state;
        let guard = state.lock().unwrap();
        let (guard, _) = cond
            .wait_timeout_while(guard, Duration::from_secs(5), |s| s.passes.len() < count)
            .unwrap();
        guard.passes.len() >= count
    }

    /// Waits until the `run_tasks` calls have seen `count` tasks in total.
    pub fn wait_for_tasks(&self, count: usize) -> bool {
        let (state, cond) = &*self.state;
        let seen = |s: &GateState| s.passes.iter().sum::<usize>();
        let guard = state.lock().unwrap();
        let (guard, _) = cond
            .wait_timeout_while(guard, Duration::from_secs(5), |s| seen(s) < count)
            .unwrap();
        seen(&guard) >= count
    }
}

impl ClientConnection for GatedConnection {
    fn add_server(&mut self, _host: &str, _port: u16) -> ReturnCode {
        ReturnCode::SUCCESS
    }

    fn set_timeout(&mut self, _timeout: Option<Duration>) {}

    fn add_task(
        &mut self,
        _function: &str,
        _unique: &str,
        _workload: &[u8],
        _priority: Priority,
        context: Option<UserData>,
    ) -> Result<TaskId, ReturnCode> {
        let mut state = self.state.0.lock().unwrap();
        if let Some(code) = state.reject_next.take() {
            return Err(code);
        }
        if let Some(context) = context {
            state.added.push(context);
        }
        Ok(TaskId(state.added.len() as u64))
    }

    fn run_tasks(&mut self) -> ReturnCode {
        let (state, cond) = &*self.state;
        let mut guard = state.lock().unwrap();
        let added = std::mem::take(&mut guard.added);
        guard.passes.push(added.len());
        cond.notify_all();
        let _guard = cond.wait_while(guard, |s| s.closed).unwrap();
        ReturnCode::SUCCESS
    }

    fn do_background(
        &mut self,
        _function: &str,
        _unique: &str,
        _workload: &[u8],
        _priority: Priority,
    ) -> Result<String, ReturnCode> {
        Ok("H:gated:1".to_string())
    }

    fn job_status(&mut self, _job_handle: &str) -> Result<JobStatus, ReturnCode> {
        Ok(JobStatus::default())
    }

    fn set_created_fn(&mut self, _callback: TaskFn) {}

    fn set_status_fn(&mut self, _callback: TaskFn) {}

    fn set_warning_fn(&mut self, _callback: TaskFn) {}

    fn set_complete_fn(&mut self, _callback: TaskFn) {}

    fn set_fail_fn(&mut self, _callback: TaskFn) {}
}
