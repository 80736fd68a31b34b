// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//
// Boundary to the embedding scripting host. The host owns function tables and
// string memory; the bridge only ever talks to it through `PluginContext`.

use thiserror::Error;

use crate::handles::Handle;

/// A host integer value.
pub type Cell = i32;

/// Host-side identifier of a function a plugin passed in as a callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

impl FuncId {
    /// 0 means "no function" on the host side.
    pub fn from_cell(cell: Cell) -> Option<FuncId> {
        match cell {
            0 => None,
            id => Some(FuncId(id as u32)),
        }
    }
}

/// Security identity of a plugin. Handles remember the identity that created them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Identity(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostArg {
    Cell(Cell),
    Handle(Handle),
    String(String),
    Bytes(Vec<u8>),
}

/// Arguments pushed for one host function call, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallFrame {
    args: Vec<HostArg>,
}

impl CallFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_cell(&mut self, value: Cell) -> &mut Self {
        self.args.push(HostArg::Cell(value));
        self
    }

    pub fn push_handle(&mut self, handle: Handle) -> &mut Self {
        self.args.push(HostArg::Handle(handle));
        self
    }

    pub fn push_string(&mut self, value: impl Into<String>) -> &mut Self {
        self.args.push(HostArg::String(value.into()));
        self
    }

    pub fn push_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.args.push(HostArg::Bytes(value.to_vec()));
        self
    }

    pub fn args(&self) -> &[HostArg] {
        &self.args
    }

    pub fn into_args(self) -> Vec<HostArg> {
        self.args
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("function {0:?} not found")]
    FunctionNotFound(FuncId),

    #[error("host function failed: {0}")]
    Execution(String),

    #[error("invalid host address {0}")]
    BadAddress(Cell),
}

/// One loaded plugin of the host.
///
/// Callbacks are executed on the dispatcher and worker threads, never on the
/// host's own thread, and calls from different background threads may overlap.
/// Implementations must be prepared for that (hence `Send + Sync`).
pub trait PluginContext: Send + Sync {
    fn identity(&self) -> Identity;

    /// Runs a plugin function synchronously and returns its result.
    fn execute(&self, func: FuncId, frame: CallFrame) -> Result<Cell, HostError>;

    /// Reads a string argument passed by address.
    fn local_to_string(&self, addr: Cell) -> Result<String, HostError>;

    /// Writes `value` into a plugin buffer of `maxlen` bytes (terminator
    /// included). Returns the number of bytes written.
    fn string_to_local_utf8(&self, addr: Cell, maxlen: usize, value: &str)
        -> Result<usize, HostError>;

    /// Copies raw bytes into a plugin buffer of `maxlen` bytes. Returns the
    /// number of bytes written.
    fn bytes_to_local(&self, addr: Cell, maxlen: usize, value: &[u8]) -> Result<usize, HostError>;

    /// Writes a by-reference cell argument.
    fn write_cell(&self, addr: Cell, value: Cell) -> Result<(), HostError>;
}
