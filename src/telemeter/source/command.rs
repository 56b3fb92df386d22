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
use crate::source::core::{require_fields, SensorSource, SourceError, SourceErrorKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Single value emitted by a driver. Booleans (alarm status, for example) are
/// converted to `1.0` or `0.0`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DriverValue {
    Number(f64),
    Flag(bool),
}

impl From<DriverValue> for f64 {
    fn from(v: DriverValue) -> Self {
        match v {
            DriverValue::Number(n) => n,
            DriverValue::Flag(true) => 1.0,
            DriverValue::Flag(false) => 0.0,
        }
    }
}

/// Parse the stdout of a driver program into a `Reading`.
///
/// Output must be a single JSON object where each value is a number or boolean,
/// for example `{"pm25": 12.3, "pm10": 20.1}`. All `required` fields must be present.
pub(crate) fn parse_output<S: AsRef<str>>(output: &[u8], required: &[S]) -> Result<Reading, SourceError> {
    let raw: BTreeMap<String, DriverValue> = serde_json::from_slice(output).map_err(|e| {
        SourceError::KindMsgCause(
            SourceErrorKind::InvalidData,
            "unable to parse driver output",
            Box::new(e),
        )
    })?;

    let mut fields = BTreeMap::new();
    for (name, value) in raw {
        let value = f64::from(value);
        if !value.is_finite() {
            return Err(SourceError::KindDetail(
                SourceErrorKind::InvalidData,
                "driver emitted a non-finite value",
                name,
            ));
        }

        fields.insert(name, value);
    }

    let reading = Reading::new(fields);
    require_fields(&reading, required)?;

    tracing::debug!(message = "parsed driver output", reading = %reading);
    Ok(reading)
}

/// Poll a sensor by running an external driver program.
///
/// The program is run once per poll and must print a single JSON object to stdout
/// before exiting successfully. A program that runs longer than the configured timeout
/// is killed and the poll fails.
pub struct CommandSource {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    required: Vec<String>,
}

impl CommandSource {
    pub fn new<P, R>(program: P, args: Vec<String>, timeout: Duration, required: R) -> Self
    where
        P: Into<PathBuf>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        CommandSource {
            program: program.into(),
            args,
            timeout,
            required: required.into_iter().map(|f| f.into()).collect(),
        }
    }

    fn wait_with_timeout(&self, child: &mut Child) -> Result<ExitStatus, SourceError> {
        let deadline = Instant::now() + self.timeout;

        loop {
            let status = child.try_wait().map_err(|e| {
                SourceError::KindMsgCause(
                    SourceErrorKind::Unavailable,
                    "unable to wait for driver",
                    Box::new(e),
                )
            })?;

            if let Some(status) = status {
                return Ok(status);
            }

            if Instant::now() >= deadline {
                // The driver may be wedged talking to the device, don't leave it around
                let _ = child.kill();
                let _ = child.wait();
                return Err(SourceError::KindMsg(
                    SourceErrorKind::Timeout,
                    "timeout waiting for driver to exit",
                ));
            }

            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

/// Read everything written to a pipe of the driver on a separate thread so that a
/// driver writing more than the pipe buffer doesn't block before exiting.
fn drain<R>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            p.read_to_end(&mut buf)?;
        }

        Ok(buf)
    })
}

fn join_output(reader: JoinHandle<io::Result<Vec<u8>>>) -> Result<Vec<u8>, SourceError> {
    match reader.join() {
        Ok(Ok(buf)) => Ok(buf),
        Ok(Err(e)) => Err(SourceError::KindMsgCause(
            SourceErrorKind::Unavailable,
            "unable to read driver output",
            Box::new(e),
        )),
        Err(_) => Err(SourceError::KindMsg(
            SourceErrorKind::Unavailable,
            "driver output reader panicked",
        )),
    }
}

impl SensorSource for CommandSource {
    fn poll(&mut self) -> Result<Reading, SourceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SourceError::KindMsgCause(SourceErrorKind::Unavailable, "unable to run driver", Box::new(e))
            })?;

        // Readers finish on their own once the killed driver closes its pipes
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait_with_timeout(&mut child)?;

        let stdout = join_output(stdout)?;
        let stderr = join_output(stderr).unwrap_or_default();

        if !status.success() {
            return Err(SourceError::KindDetail(
                SourceErrorKind::Unavailable,
                "driver exited unsuccessfully",
                format!("{}: {}", status, String::from_utf8_lossy(&stderr).trim()),
            ));
        }

        parse_output(&stdout, self.required.as_slice())
    }
}

impl Debug for CommandSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSource")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("timeout", &self.timeout)
            .finish()
    }
}
