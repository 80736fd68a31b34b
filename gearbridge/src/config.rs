// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use clap::ValueEnum;
use gearman_lowlevel::Priority;
use serde::Deserialize;

/// Priority used when a submission does not name one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Deserialize, Default)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PriorityArg {
    Low,
    #[default]
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
        }
    }
}

/// Settings of one `Gearbridge` instance. Missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Prefix of the dispatcher and worker thread names.
    pub thread_name_prefix: String,
    pub default_priority: PriorityArg,
    pub worker_stack_size: Option<usize>,
    pub dispatcher_stack_size: Option<usize>,
    /// Upper bound of one flush pass. Unset blocks until every task is done.
    pub client_timeout_ms: Option<u64>,
    /// Upper bound of one blocking fetch. Unset blocks until a job arrives.
    pub worker_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "gearman".to_string(),
            default_priority: PriorityArg::Normal,
            worker_stack_size: None,
            dispatcher_stack_size: None,
            client_timeout_ms: None,
            worker_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn client_timeout(&self) -> Option<Duration> {
        self.client_timeout_ms.map(Duration::from_millis)
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn thread_builder(
        &self,
        role: &str,
        n: usize,
        stack_size: Option<usize>,
    ) -> std::thread::Builder {
        let builder =
            std::thread::Builder::new().name(format!("{}-{}-{}", self.thread_name_prefix, role, n));
        match stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}
