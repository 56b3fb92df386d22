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
use crate::source::core::{SensorSource, SourceError, SourceErrorKind};
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

/// Take several consecutive samples from a sensor and average them into a single reading.
///
/// Particulate matter sensors need time to spin up their fan before readings are accurate
/// and individual readings are noisy. This source waits for `warmup` then takes `samples`
/// readings from the wrapped source, pausing `delay` after each one. If any of the samples
/// fail, the entire poll fails.
#[derive(Debug)]
pub struct AveragingSource<S> {
    inner: S,
    samples: u32,
    warmup: Duration,
    delay: Duration,
}

impl<S> AveragingSource<S>
where
    S: SensorSource,
{
    pub fn new(inner: S, samples: u32, warmup: Duration, delay: Duration) -> Self {
        AveragingSource {
            inner,
            samples: samples.max(1),
            warmup,
            delay,
        }
    }
}

impl<S> SensorSource for AveragingSource<S>
where
    S: SensorSource,
{
    fn poll(&mut self) -> Result<Reading, SourceError> {
        if !self.warmup.is_zero() {
            thread::sleep(self.warmup);
        }

        let mut sums: BTreeMap<String, f64> = BTreeMap::new();
        let mut last: Option<Reading> = None;

        for i in 0..self.samples {
            let sample = self.inner.poll()?;

            if i == 0 {
                sums = sample.fields().clone();
            } else {
                if sample.len() != sums.len() || sample.fields().keys().any(|k| !sums.contains_key(k)) {
                    return Err(SourceError::KindMsg(
                        SourceErrorKind::InvalidData,
                        "samples have differing fields",
                    ));
                }

                for (name, value) in sample.fields() {
                    if let Some(sum) = sums.get_mut(name) {
                        *sum += value;
                    }
                }
            }

            tracing::trace!(message = "took sample", sample = i + 1, of = self.samples, reading = %sample);
            last = Some(sample);

            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }

        let timestamp = match last {
            Some(r) => r.timestamp(),
            None => return Err(SourceError::KindMsg(SourceErrorKind::InvalidData, "no samples taken")),
        };

        let count = self.samples as f64;
        let averages = sums.into_iter().map(|(k, v)| (k, v / count)).collect();
        Ok(Reading::with_timestamp(timestamp, averages))
    }
}
