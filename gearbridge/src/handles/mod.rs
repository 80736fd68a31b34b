// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod registry;

use std::fmt;

use thiserror::Error;

use crate::host::Cell;

pub use registry::HandleRegistry;

/// Opaque identifier handed to the host in place of a native object.
///
/// The low 16 bits hold the slot index + 1, the next 15 bits the slot
/// generation. Generations start at 1, so a valid handle is never 0 and
/// always a positive host cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

impl Handle {
    pub const BAD: Handle = Handle(0);

    pub(crate) const MAX_SLOTS: usize = 0xFFFF;
    pub(crate) const MAX_GENERATION: u16 = 0x7FFF;

    pub(crate) fn new(index: usize, generation: u16) -> Handle {
        Handle(((generation as u32) << 16) | (index as u32 + 1))
    }

    pub(crate) fn index(self) -> Option<usize> {
        match self.0 & 0xFFFF {
            0 => None,
            slot => Some(slot as usize - 1),
        }
    }

    pub(crate) fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn from_cell(cell: Cell) -> Handle {
        Handle(cell as u32)
    }

    pub fn as_cell(self) -> Cell {
        self.0 as Cell
    }

    pub fn is_bad(self) -> bool {
        self == Handle::BAD
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    Client,
    Worker,
    Job,
    Task,
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleType::Client => "GearmanClient",
            HandleType::Worker => "GearmanWorker",
            HandleType::Job => "GearmanJob",
            HandleType::Task => "GearmanTask",
        };
        f.write_str(name)
    }
}

/// Objects that can be stored in the registry.
pub trait HandleObject: Send + Sync + 'static {
    const TYPE: HandleType;
}

/// Type-specific cleanup, run once when the handle is destroyed.
///
/// Other threads may still hold a reference to the object afterwards; the
/// teardown must leave it in a state they can cope with.
pub trait Teardown: Send + Sync {
    fn on_handle_destroy(&self);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandleError {
    #[error("invalid {expected} handle: {handle}")]
    NotFound { handle: Handle, expected: HandleType },

    #[error("unknown handle: {0}")]
    Unknown(Handle),

    #[error("access to handle {0} denied")]
    AccessDenied(Handle),

    #[error("no free handle slots left")]
    Exhausted,
}
