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

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Named numeric values captured from a sensor during one poll cycle.
///
/// A `Reading` is never modified after it has been created. Sources that derive
/// additional values (averages, air quality indexes) build a new `Reading` instead.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    timestamp: SystemTime,
    fields: BTreeMap<String, f64>,
}

impl Reading {
    /// Create a new reading captured at the current time.
    pub fn new(fields: BTreeMap<String, f64>) -> Self {
        Self::with_timestamp(SystemTime::now(), fields)
    }

    pub fn with_timestamp(timestamp: SystemTime, fields: BTreeMap<String, f64>) -> Self {
        Reading { timestamp, fields }
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn fields(&self) -> &BTreeMap<String, f64> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a new reading with the same timestamp and all existing fields plus
    /// `extra`. Fields in `extra` replace existing fields with the same name.
    pub fn extended<I>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let mut fields = self.fields.clone();
        fields.extend(extra);
        Self::with_timestamp(self.timestamp, fields)
    }
}

impl<'a> FromIterator<(&'a str, f64)> for Reading {
    fn from_iter<T: IntoIterator<Item = (&'a str, f64)>>(iter: T) -> Self {
        Reading::new(iter.into_iter().map(|(k, v)| (k.to_owned(), v)).collect())
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.fields.iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={}", name, value)?;
            first = false;
        }

        Ok(())
    }
}
