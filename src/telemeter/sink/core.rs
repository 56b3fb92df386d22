// Telemeter - Sensor readings exporter for Prometheus and MQTT
//
// Copyright 2026 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::reading::Reading;
use std::error::Error;
use std::fmt::{self, Formatter};

/// Kinds of sinks, ordered by the priority they are published to in each cycle.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Clone, Copy)]
pub enum SinkKind {
    Metrics,
    Mqtt,
    LogFile,
}

impl SinkKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SinkKind::Metrics => "metrics",
            SinkKind::Mqtt => "mqtt",
            SinkKind::LogFile => "log_file",
        }
    }
}

/// Potential kinds of errors that can be encountered publishing a reading
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SinkErrorKind {
    PublishFailed,
    WriteFailed,
}

impl SinkErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SinkErrorKind::PublishFailed => "publish_failed",
            SinkErrorKind::WriteFailed => "write_failed",
        }
    }
}

/// Error publishing a reading to a sink. Errors only affect the sink that returned
/// them and the cycle they were returned in.
#[derive(Debug)]
pub enum SinkError {
    KindMsg(SinkErrorKind, &'static str),
    KindMsgCause(SinkErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SinkError {
    pub fn kind(&self) -> SinkErrorKind {
        match self {
            SinkError::KindMsg(kind, _) => *kind,
            SinkError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::KindMsg(_, msg) => msg.fmt(f),
            SinkError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SinkError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Something that makes readings observable outside of this process.
///
/// Sinks must not depend on each other: a sink failing to publish a reading
/// has no effect on any other sink.
pub trait Sink: Send {
    fn kind(&self) -> SinkKind;

    fn name(&self) -> &str {
        self.kind().as_label()
    }

    fn publish(&mut self, reading: &Reading) -> Result<(), SinkError>;
}
