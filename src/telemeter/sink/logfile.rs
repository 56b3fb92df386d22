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
use crate::sink::core::{Sink, SinkError, SinkErrorKind, SinkKind};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Format a reading as a single CSV line: the local time the reading was taken
/// followed by the value of each column. Columns missing from the reading are
/// left empty. If no columns are given, every field is written in name order.
pub(crate) fn format_line<S: AsRef<str>>(reading: &Reading, columns: &[S]) -> String {
    let timestamp: DateTime<Local> = reading.timestamp().into();
    let mut line = timestamp.format(TIMESTAMP_FORMAT).to_string();

    if columns.is_empty() {
        for value in reading.fields().values() {
            line.push(',');
            line.push_str(&value.to_string());
        }
    } else {
        for column in columns {
            line.push(',');
            if let Some(v) = reading.get(column.as_ref()) {
                line.push_str(&v.to_string());
            }
        }
    }

    line.push('\n');
    line
}

/// Sink that appends each reading as a line to a CSV file.
///
/// The file is opened, written, and closed for every reading so that it may be
/// rotated or truncated by other programs while the exporter is running.
#[derive(Debug)]
pub struct LogFileSink {
    path: PathBuf,
    columns: Vec<String>,
}

impl LogFileSink {
    pub fn new<P, C>(path: P, columns: C) -> Self
    where
        P: Into<PathBuf>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        LogFileSink {
            path: path.into(),
            columns: columns.into_iter().map(|c| c.into()).collect(),
        }
    }
}

impl Sink for LogFileSink {
    fn kind(&self) -> SinkKind {
        SinkKind::LogFile
    }

    fn publish(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let line = format_line(reading, self.columns.as_slice());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SinkError::KindMsgCause(SinkErrorKind::WriteFailed, "unable to open log file", Box::new(e)))?;

        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| SinkError::KindMsgCause(SinkErrorKind::WriteFailed, "unable to write log file", Box::new(e)))
    }
}
