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

/// Potential kinds of errors that can be encountered polling a sensor
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SourceErrorKind {
    Unavailable,
    InvalidData,
    Timeout,
}

impl SourceErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SourceErrorKind::Unavailable => "unavailable",
            SourceErrorKind::InvalidData => "invalid_data",
            SourceErrorKind::Timeout => "timeout",
        }
    }
}

/// Error polling a sensor. All kinds of errors are recoverable, the next poll
/// cycle is expected to try again.
#[derive(Debug)]
pub enum SourceError {
    KindMsg(SourceErrorKind, &'static str),
    KindDetail(SourceErrorKind, &'static str, String),
    KindMsgCause(SourceErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::KindMsg(kind, _) => *kind,
            SourceError::KindDetail(kind, _, _) => *kind,
            SourceError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::KindMsg(_, msg) => msg.fmt(f),
            SourceError::KindDetail(_, msg, detail) => write!(f, "{}: {}", msg, detail),
            SourceError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SourceError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Something that produces a `Reading` on demand.
///
/// Polling is synchronous and may block for as long as the sensor needs to warm
/// up or settle. Every field the sensor declares must be present in a successful
/// reading, partial reads are returned as `SourceErrorKind::InvalidData` errors.
pub trait SensorSource: Send {
    fn poll(&mut self) -> Result<Reading, SourceError>;
}

impl<S> SensorSource for Box<S>
where
    S: SensorSource + ?Sized,
{
    fn poll(&mut self) -> Result<Reading, SourceError> {
        self.as_mut().poll()
    }
}

/// Return an error if any of the `required` fields are missing from `reading`.
pub(crate) fn require_fields<S: AsRef<str>>(reading: &Reading, required: &[S]) -> Result<(), SourceError> {
    let missing: Vec<&str> = required
        .iter()
        .map(|f| f.as_ref())
        .filter(|f| reading.get(f).is_none())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SourceError::KindDetail(
            SourceErrorKind::InvalidData,
            "reading is missing required fields",
            missing.join(","),
        ))
    }
}
