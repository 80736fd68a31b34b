// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use gearbridge::HostArg;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum LoggedArg {
    Cell(i32),
    Handle(u32),
    String(String),
    Bytes(Vec<u8>),
}

impl From<&HostArg> for LoggedArg {
    fn from(arg: &HostArg) -> Self {
        match arg {
            HostArg::Cell(value) => LoggedArg::Cell(*value),
            HostArg::Handle(handle) => LoggedArg::Handle(handle.as_cell() as u32),
            HostArg::String(value) => LoggedArg::String(value.clone()),
            HostArg::Bytes(value) => LoggedArg::Bytes(value.clone()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggedCall {
    /// Name the function was registered under.
    pub function: String,

    pub args: Vec<LoggedArg>,

    pub result: i32,

    /// Name of the thread the call ran on.
    pub thread: String,
}

impl LoggedCall {
    pub fn handle(&self, index: usize) -> Option<u32> {
        match self.args.get(index) {
            Some(LoggedArg::Handle(handle)) => Some(*handle),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TestLog {
    pub calls: Vec<LoggedCall>,
}
