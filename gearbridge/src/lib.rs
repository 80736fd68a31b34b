// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # gearbridge
//!
//! Lets a single-threaded scripting host use the gearman job queue without
//! ever blocking its own thread.
//!
//! - Native objects are handed to the host as generation-checked `Handle`s.
//! - Tasks are staged on the host thread and flushed by one dispatcher thread
//!   per client.
//! - Each worker connection runs one thread that fetches jobs.
//! - Library events are turned into host function calls by `marshal`, on the
//!   background thread that received them.
//!
//! Host callbacks therefore run on the bridge's threads, possibly several at
//! once. A host embedding the bridge must allow that; `PluginContext` is
//! `Send + Sync` for this reason.

pub mod bridge;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handles;
pub mod host;
pub mod log_limit;
pub mod marshal;
pub mod natives;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::Gearbridge;
pub use client::{ClientContext, TaskContext, TaskEvent};
pub use config::{BridgeConfig, PriorityArg};
pub use dispatch::{Dispatcher, Enqueued};
pub use error::{BridgeError, Result};
pub use handles::{Handle, HandleError, HandleRegistry, HandleType};
pub use host::{CallFrame, Cell, FuncId, HostArg, HostError, Identity, PluginContext};
pub use natives::{find_native, NativeFn, NativeInfo, NATIVES};
pub use worker::{JobContext, WorkerContext};
