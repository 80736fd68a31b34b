// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//
// A stand-in for the scripting host: functions are Rust closures, strings and
// by-reference cells live in address maps, and every call is logged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gearbridge::{
    find_native, BridgeError, CallFrame, Cell, FuncId, Gearbridge, HostArg, HostError, Identity,
    PluginContext,
};
use log::debug;

use crate::test_log::{LoggedArg, LoggedCall, TestLog};

pub type ScriptFn = dyn Fn(&[HostArg]) -> Cell + Send + Sync;

struct Script {
    name: String,
    body: Arc<ScriptFn>,
}

#[derive(Default)]
struct Memory {
    strings: HashMap<Cell, String>,
    buffers: HashMap<Cell, Vec<u8>>,
    cells: HashMap<Cell, Cell>,
}

pub struct ScriptedHost {
    identity: Identity,
    scripts: Mutex<HashMap<FuncId, Script>>,
    next_func: AtomicU32,
    memory: Mutex<Memory>,
    next_addr: AtomicI32,
    log: Mutex<TestLog>,
    logged: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedHost {
    pub fn new(identity: u64) -> Arc<Self> {
        Arc::new(Self {
            identity: Identity(identity),
            scripts: Mutex::new(HashMap::new()),
            next_func: AtomicU32::new(1),
            memory: Mutex::new(Memory::default()),
            // address 0 stays invalid
            next_addr: AtomicI32::new(0x100),
            log: Mutex::new(TestLog::default()),
            logged: Condvar::new(),
        })
    }

    pub fn as_plugin(self: &Arc<Self>) -> Arc<dyn PluginContext> {
        self.clone()
    }

    /// Registers a function and returns the id to pass to natives.
    pub fn register<F>(&self, name: &str, body: F) -> FuncId
    where
        F: Fn(&[HostArg]) -> Cell + Send + Sync + 'static,
    {
        let id = FuncId(self.next_func.fetch_add(1, Ordering::SeqCst));
        lock(&self.scripts).insert(
            id,
            Script {
                name: name.to_string(),
                body: Arc::new(body),
            },
        );
        id
    }

    fn allocate(&self) -> Cell {
        self.next_addr.fetch_add(0x10, Ordering::SeqCst)
    }

    /// Places a string argument in host memory.
    pub fn string(&self, value: &str) -> Cell {
        let addr = self.allocate();
        lock(&self.memory).strings.insert(addr, value.to_string());
        addr
    }

    /// An empty output buffer.
    pub fn buffer(&self) -> Cell {
        let addr = self.allocate();
        lock(&self.memory).buffers.insert(addr, Vec::new());
        addr
    }

    pub fn buffer_contents(&self, addr: Cell) -> Option<String> {
        self.buffer_bytes(addr)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn buffer_bytes(&self, addr: Cell) -> Option<Vec<u8>> {
        lock(&self.memory).buffers.get(&addr).cloned()
    }

    /// A by-reference cell, initialised to -1.
    pub fn cell(&self) -> Cell {
        let addr = self.allocate();
        lock(&self.memory).cells.insert(addr, -1);
        addr
    }

    pub fn cell_value(&self, addr: Cell) -> Option<Cell> {
        lock(&self.memory).cells.get(&addr).copied()
    }

    /// Calls a native by name, the way a plugin would.
    pub fn call_native(
        self: &Arc<Self>,
        bridge: &Gearbridge,
        name: &str,
        args: &[Cell],
    ) -> Result<Cell, BridgeError> {
        let info = find_native(name)
            .ok_or_else(|| BridgeError::InvalidArgument(format!("no native {}", name)))?;
        (info.func)(bridge, &self.as_plugin(), args)
    }

    pub fn calls(&self) -> Vec<LoggedCall> {
        lock(&self.log).calls.clone()
    }

    pub fn calls_to(&self, function: &str) -> Vec<LoggedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.function == function)
            .collect()
    }

    /// Waits until `function` was called at least `count` times.
    pub fn wait_for(&self, function: &str, count: usize, timeout: Duration) -> bool {
        let log = lock(&self.log);
        let (log, _) = self
            .logged
            .wait_timeout_while(log, timeout, |log| {
                log.calls.iter().filter(|call| call.function == function).count() < count
            })
            .unwrap_or_else(PoisonError::into_inner);
        log.calls.iter().filter(|call| call.function == function).count() >= count
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*lock(&self.log))
    }
}

impl PluginContext for ScriptedHost {
    fn identity(&self) -> Identity {
        self.identity
    }

    fn execute(&self, func: FuncId, frame: CallFrame) -> Result<Cell, HostError> {
        let (name, body) = {
            let scripts = lock(&self.scripts);
            let script = scripts.get(&func).ok_or(HostError::FunctionNotFound(func))?;
            (script.name.clone(), script.body.clone())
        };
        // scripts may call natives, which may call back into the host
        let result = body(frame.args());
        let call = LoggedCall {
            function: name,
            args: frame.args().iter().map(LoggedArg::from).collect(),
            result,
            thread: std::thread::current().name().unwrap_or("unnamed").to_string(),
        };
        debug!("host call {:?}", call);
        lock(&self.log).calls.push(call);
        self.logged.notify_all();
        Ok(result)
    }

    fn local_to_string(&self, addr: Cell) -> Result<String, HostError> {
        lock(&self.memory)
            .strings
            .get(&addr)
            .cloned()
            .ok_or(HostError::BadAddress(addr))
    }

    fn string_to_local_utf8(
        &self,
        addr: Cell,
        maxlen: usize,
        value: &str,
    ) -> Result<usize, HostError> {
        let mut memory = lock(&self.memory);
        let buffer = memory
            .buffers
            .get_mut(&addr)
            .ok_or(HostError::BadAddress(addr))?;
        // one byte is reserved for the terminator
        let mut end = value.len().min(maxlen.saturating_sub(1));
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        *buffer = value.as_bytes()[..end].to_vec();
        Ok(end)
    }

    fn bytes_to_local(&self, addr: Cell, maxlen: usize, value: &[u8]) -> Result<usize, HostError> {
        let mut memory = lock(&self.memory);
        let buffer = memory
            .buffers
            .get_mut(&addr)
            .ok_or(HostError::BadAddress(addr))?;
        let end = value.len().min(maxlen);
        *buffer = value[..end].to_vec();
        Ok(end)
    }

    fn write_cell(&self, addr: Cell, value: Cell) -> Result<(), HostError> {
        let mut memory = lock(&self.memory);
        let cell = memory.cells.get_mut(&addr).ok_or(HostError::BadAddress(addr))?;
        *cell = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_truncates_on_char_boundary() {
        let host = ScriptedHost::new(1);
        let buffer = host.buffer();
        assert_eq!(host.string_to_local_utf8(buffer, 4, "häh").unwrap(), 3);
        assert_eq!(host.buffer_contents(buffer).as_deref(), Some("hä"));
        assert_eq!(host.string_to_local_utf8(buffer, 0, "x").unwrap(), 0);
        assert!(host.string_to_local_utf8(0, 4, "x").is_err());
    }

    #[test]
    fn test_bytes_are_copied_unchanged() {
        let host = ScriptedHost::new(1);
        let buffer = host.buffer();
        assert_eq!(host.bytes_to_local(buffer, 8, &[0xff, 0x00, 0xfe]).unwrap(), 3);
        assert_eq!(host.buffer_bytes(buffer), Some(vec![0xff, 0x00, 0xfe]));
        assert_eq!(host.bytes_to_local(buffer, 1, &[0xff, 0x00]).unwrap(), 1);
        assert_eq!(host.buffer_bytes(buffer), Some(vec![0xff]));
    }

    #[test]
    fn test_unknown_function() {
        let host = ScriptedHost::new(1);
        assert_eq!(
            host.execute(FuncId(99), CallFrame::new()),
            Err(HostError::FunctionNotFound(FuncId(99)))
        );
    }

    #[test]
    fn test_calls_are_logged() {
        let host = ScriptedHost::new(1);
        let func = host.register("double", |args| match args {
            [HostArg::Cell(value)] => value * 2,
            _ => -1,
        });
        let mut frame = CallFrame::new();
        frame.push_cell(21);
        assert_eq!(host.execute(func, frame), Ok(42));
        assert!(host.wait_for("double", 1, Duration::from_millis(10)));
        assert_eq!(host.calls()[0].args, vec![LoggedArg::Cell(21)]);
    }
}
