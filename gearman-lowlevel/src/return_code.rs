// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;

/// Status code of a library call.
///
/// This is a newtype rather than an enum because host callbacks hand back
/// arbitrary integers that are forwarded to the server unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReturnCode(pub i32);

impl ReturnCode {
    pub const SUCCESS: ReturnCode = ReturnCode(0);
    pub const IO_WAIT: ReturnCode = ReturnCode(1);
    pub const SHUTDOWN: ReturnCode = ReturnCode(2);
    pub const ERRNO: ReturnCode = ReturnCode(4);
    pub const NO_SERVERS: ReturnCode = ReturnCode(13);
    pub const LOST_CONNECTION: ReturnCode = ReturnCode(14);
    pub const WORK_DATA: ReturnCode = ReturnCode(20);
    pub const WORK_WARNING: ReturnCode = ReturnCode(21);
    pub const WORK_STATUS: ReturnCode = ReturnCode(22);
    pub const WORK_EXCEPTION: ReturnCode = ReturnCode(23);
    pub const WORK_FAIL: ReturnCode = ReturnCode(24);
    pub const COULD_NOT_CONNECT: ReturnCode = ReturnCode(26);
    pub const INVALID_FUNCTION_NAME: ReturnCode = ReturnCode(31);
    pub const NO_REGISTERED_FUNCTIONS: ReturnCode = ReturnCode(34);
    pub const NO_JOBS: ReturnCode = ReturnCode(35);
    pub const UNKNOWN_STATE: ReturnCode = ReturnCode(39);
    pub const TIMEOUT: ReturnCode = ReturnCode(47);
    pub const INVALID_ARGUMENT: ReturnCode = ReturnCode(49);
    pub const IN_PROGRESS: ReturnCode = ReturnCode(50);

    pub const FAIL: ReturnCode = ReturnCode::WORK_FAIL;

    pub fn from_cell(value: i32) -> Self {
        ReturnCode(value)
    }

    pub fn as_cell(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == ReturnCode::SUCCESS
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            ReturnCode::SUCCESS => "SUCCESS",
            ReturnCode::IO_WAIT => "IO_WAIT",
            ReturnCode::SHUTDOWN => "SHUTDOWN",
            ReturnCode::ERRNO => "ERRNO",
            ReturnCode::NO_SERVERS => "NO_SERVERS",
            ReturnCode::LOST_CONNECTION => "LOST_CONNECTION",
            ReturnCode::WORK_DATA => "WORK_DATA",
            ReturnCode::WORK_WARNING => "WORK_WARNING",
            ReturnCode::WORK_STATUS => "WORK_STATUS",
            ReturnCode::WORK_EXCEPTION => "WORK_EXCEPTION",
            ReturnCode::WORK_FAIL => "WORK_FAIL",
            ReturnCode::COULD_NOT_CONNECT => "COULD_NOT_CONNECT",
            ReturnCode::INVALID_FUNCTION_NAME => "INVALID_FUNCTION_NAME",
            ReturnCode::NO_REGISTERED_FUNCTIONS => "NO_REGISTERED_FUNCTIONS",
            ReturnCode::NO_JOBS => "NO_JOBS",
            ReturnCode::UNKNOWN_STATE => "UNKNOWN_STATE",
            ReturnCode::TIMEOUT => "TIMEOUT",
            ReturnCode::INVALID_ARGUMENT => "INVALID_ARGUMENT",
            ReturnCode::IN_PROGRESS => "IN_PROGRESS",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "RETURN_CODE({})", self.0),
        }
    }
}

/// Queue priority of a submitted task. There are exactly three levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn from_cell(value: i32) -> Option<Self> {
        match value {
            0 => Some(Priority::Low),
            1 => Some(Priority::Normal),
            2 => Some(Priority::High),
            _ => None,
        }
    }

    pub fn as_cell(self) -> i32 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }
}

/// Packet kinds a worker can send for a job it is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobResponse {
    Data,
    Warning,
    Complete,
    Exception,
}

impl JobResponse {
    pub fn from_cell(value: i32) -> Option<Self> {
        match value {
            0 => Some(JobResponse::Data),
            1 => Some(JobResponse::Warning),
            2 => Some(JobResponse::Complete),
            3 => Some(JobResponse::Exception),
            _ => None,
        }
    }
}

/// Server-side view of a job polled by its job handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct JobStatus {
    pub known: bool,
    pub running: bool,
    pub numerator: u32,
    pub denominator: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_survive_the_round_trip() {
        let code = ReturnCode::from_cell(4711);
        assert_eq!(code.as_cell(), 4711);
        assert_eq!(code.name(), None);
        assert_eq!(code.to_string(), "RETURN_CODE(4711)");
    }

    #[test]
    fn fail_is_work_fail() {
        assert_eq!(ReturnCode::FAIL, ReturnCode::WORK_FAIL);
        assert_eq!(ReturnCode::FAIL.to_string(), "WORK_FAIL");
    }

    #[test]
    fn priority_rejects_out_of_range_cells() {
        assert_eq!(Priority::from_cell(2), Some(Priority::High));
        assert_eq!(Priority::from_cell(3), None);
        assert_eq!(Priority::from_cell(-1), None);
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
