// DbgRPC - Remote Debugger Protocol Engine
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Status codes returned by debugger operations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, CodecResult};

/// Result classification of a debugger operation.
///
/// Positive values are successes, [`Drc::None`] is the soft "nothing to do /
/// not applicable" outcome and negative values are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Drc {
    /// Success, events are pending
    Events = 3,
    /// Success, checksum mismatch reported
    Crc = 2,
    /// Success
    Ok = 1,
    /// Nothing was done or the operation is not applicable
    None = 0,
    /// Generic failure
    Failed = -1,
    /// Network failure, the session is unusable
    NetErr = -2,
    /// File not found
    NoFile = -3,
    /// Use the database segmentation
    IdbSeg = -4,
    /// The process does not exist anymore
    NoProc = -5,
    /// No changes since the previous call
    NoChg = -6,
    /// Unclassified error
    Error = -7,
}

impl Drc {
    /// Map a raw status received from the peer.
    pub fn from_raw(raw: i32) -> CodecResult<Self> {
        Ok(match raw {
            3 => Self::Events,
            2 => Self::Crc,
            1 => Self::Ok,
            0 => Self::None,
            -1 => Self::Failed,
            -2 => Self::NetErr,
            -3 => Self::NoFile,
            -4 => Self::IdbSeg,
            -5 => Self::NoProc,
            -6 => Self::NoChg,
            -7 => Self::Error,
            other => {
                return Err(CodecError::InvalidValue { what: "status code", value: other as i64 })
            }
        })
    }

    /// Raw wire value.
    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Whether this is a hard failure.
    pub fn is_failure(self) -> bool {
        self.raw() < 0
    }
}

impl fmt::Display for Drc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Events => "events pending",
            Self::Crc => "checksum mismatch",
            Self::Ok => "ok",
            Self::None => "none",
            Self::Failed => "failed",
            Self::NetErr => "network error",
            Self::NoFile => "file not found",
            Self::IdbSeg => "use database segments",
            Self::NoProc => "no process",
            Self::NoChg => "no changes",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome of a request for the next debug event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum GetEventCode {
    /// The server failed to fetch events
    Error = -1,
    /// No event is available
    NoEvent = 0,
    /// One event follows
    OneEvent = 1,
    /// One event follows and more are queued
    ManyEvents = 2,
}

impl GetEventCode {
    /// Map a raw code received from the peer.
    pub fn from_raw(raw: i32) -> CodecResult<Self> {
        Ok(match raw {
            -1 => Self::Error,
            0 => Self::NoEvent,
            1 => Self::OneEvent,
            2 => Self::ManyEvents,
            other => {
                return Err(CodecError::InvalidValue { what: "event code", value: other as i64 })
            }
        })
    }

    /// Whether an event record follows in the reply.
    pub fn has_event(self) -> bool {
        matches!(self, Self::OneEvent | Self::ManyEvents)
    }
}

/// How a thread should resume execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ResumeMode {
    /// Plain continue
    None = 0,
    /// Single step into calls
    Into = 1,
    /// Step over calls
    Over = 2,
    /// Run until the current function returns
    Out = 3,
    /// Source level step into
    SrcInto = 4,
    /// Source level step over
    SrcOver = 5,
    /// Source level step out
    SrcOut = 6,
    /// Step until a user-defined condition
    User = 7,
    /// Step into the exception handler
    Handle = 8,
    /// Step backwards into
    BackInto = 9,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drc_mapping() {
        for drc in [Drc::Events, Drc::Ok, Drc::None, Drc::NetErr, Drc::IdbSeg, Drc::Error] {
            assert_eq!(Drc::from_raw(drc.raw()).unwrap(), drc);
        }
        assert!(Drc::from_raw(42).is_err());
        assert!(Drc::Failed.is_failure());
        assert!(!Drc::None.is_failure());
    }

    #[test]
    fn test_event_code_presence() {
        assert!(GetEventCode::from_raw(2).unwrap().has_event());
        assert!(!GetEventCode::from_raw(0).unwrap().has_event());
        assert!(GetEventCode::from_raw(5).is_err());
    }
}
