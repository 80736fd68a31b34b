// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # In-process job server
//!
//! A complete job-queue round trip without a network: `LoopbackLibrary::listen`
//! creates a server reachable under a host/port pair, and clients and workers
//! created by the same library find it through the shared directory once they
//! were told about that address with `add_server`.
//!
//! ```text
//!         +--------+  submit   +-------------------+  take_job  +--------+
//!         | client | --------> | queues (per func) | ---------> | worker |
//!         +--------+           +-------------------+            +--------+
//!             ^                                                     |
//!             |          status / warning / complete / fail         |
//!             +-----------------------------------------------------+
//! ```
//!
//! Updates travel from the job object straight to the submitting client's
//! channel; the server only keeps the queues and the pollable job status.

pub mod client;
pub mod server;
pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{ClientConnection, Library, ReturnCode, WorkerConnection};

pub use client::LoopbackClient;
pub use server::LoopbackServer;
pub use worker::{LoopbackJob, LoopbackWorker};

/// Address book shared by all connections of one library.
#[derive(Debug, Default)]
pub(crate) struct Directory {
    servers: Mutex<HashMap<(String, u16), LoopbackServer>>,
}

impl Directory {
    /// Returns the first listening server of the list.
    pub(crate) fn resolve(&self, servers: &[(String, u16)]) -> Result<LoopbackServer, ReturnCode> {
        if servers.is_empty() {
            return Err(ReturnCode::NO_SERVERS);
        }
        let map = self.servers.lock().unwrap_or_else(PoisonError::into_inner);
        servers
            .iter()
            .find_map(|address| map.get(address).cloned())
            .ok_or(ReturnCode::COULD_NOT_CONNECT)
    }
}

#[derive(Debug, Default)]
pub struct LoopbackLibrary {
    directory: Arc<Directory>,
}

impl LoopbackLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a server reachable at `host:port`. Listening twice on the same
    /// address returns the existing server.
    pub fn listen(&self, host: &str, port: u16) -> LoopbackServer {
        let mut map = self
            .directory
            .servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        map.entry((host.to_string(), port))
            .or_insert_with(|| LoopbackServer::new(host, port))
            .clone()
    }

    pub fn client(&self) -> LoopbackClient {
        LoopbackClient::new(self.directory.clone())
    }

    pub fn worker(&self) -> LoopbackWorker {
        LoopbackWorker::new(self.directory.clone())
    }
}

impl Library for LoopbackLibrary {
    fn create_client(&self) -> Result<Box<dyn ClientConnection>, ReturnCode> {
        Ok(Box::new(self.client()))
    }

    fn create_worker(&self) -> Result<Arc<dyn WorkerConnection>, ReturnCode> {
        Ok(Arc::new(self.worker()))
    }
}
