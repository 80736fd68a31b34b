// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use gearman_lowlevel::ReturnCode;
use thiserror::Error;

use crate::handles::HandleError;
use crate::host::HostError;

/// Errors raised to the host as runtime errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    InvalidHandle(#[from] HandleError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("library call failed: {0}")]
    Native(ReturnCode),

    #[error("unable to start {what} thread: {source}")]
    ThreadStart {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("dispatcher already stopped")]
    DispatcherStopped,

    #[error(transparent)]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
