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
use crate::source::FieldSpec;
use std::sync::{Arc, PoisonError, RwLock};

/// The most recent reading stored in a `MetricRegistry` and the generation it was
/// stored as. Generations start at one and increase by one for each update.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub generation: u64,
    pub reading: Reading,
}

/// Latest value of every field read from a sensor.
///
/// The registry is written once per poll cycle and read by anything that needs
/// current values, most importantly the Prometheus exposition endpoint. Updates
/// replace the entire snapshot at once so readers always see every field from the
/// same reading. The registry keeps only the latest reading, there is no history.
#[derive(Debug)]
pub struct MetricRegistry {
    declared: Vec<FieldSpec>,
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl MetricRegistry {
    pub fn new(declared: &[FieldSpec]) -> Self {
        MetricRegistry {
            declared: declared.to_vec(),
            current: RwLock::new(None),
        }
    }

    /// Fields exposed as metrics, in the order they were declared.
    pub fn declared(&self) -> &[FieldSpec] {
        &self.declared
    }

    /// Replace the current snapshot with `reading`, returning the new generation.
    pub fn update(&self, reading: &Reading) -> u64 {
        // The lock only guards a pointer swap so a panic while holding it can't leave
        // a partially written snapshot behind. Recover from poisoning.
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = current.as_ref().map(|s| s.generation).unwrap_or(0) + 1;

        *current = Some(Arc::new(Snapshot {
            generation,
            reading: reading.clone(),
        }));

        generation
    }

    /// Get the most recent snapshot or `None` if there hasn't been a successful
    /// reading yet.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod test {
    use super::MetricRegistry;
    use crate::reading::Reading;
    use crate::source::SensorKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_registry_empty() {
        let registry = MetricRegistry::new(SensorKind::Power.fields());
        assert!(registry.snapshot().is_none());
        assert_eq!(7, registry.declared().len());
    }

    #[test]
    fn test_registry_update_snapshot_same_fields() {
        let registry = MetricRegistry::new(SensorKind::Power.fields());
        let reading: Reading = vec![("voltage", 230.1), ("current", 0.5), ("power", 115.05)]
            .into_iter()
            .collect();

        let generation = registry.update(&reading);
        let snapshot = registry.snapshot().unwrap();

        assert_eq!(1, generation);
        assert_eq!(1, snapshot.generation);
        assert_eq!(reading.fields(), snapshot.reading.fields());
        assert_eq!(reading.timestamp(), snapshot.reading.timestamp());
    }

    #[test]
    fn test_registry_keeps_latest_only() {
        let registry = MetricRegistry::new(SensorKind::Gas.fields());
        let first: Reading = vec![("co2", 400.0), ("tvoc", 1.0)].into_iter().collect();
        let second: Reading = vec![("co2", 800.0)].into_iter().collect();

        registry.update(&first);
        registry.update(&second);
        let snapshot = registry.snapshot().unwrap();

        assert_eq!(2, snapshot.generation);
        assert_eq!(second.fields(), snapshot.reading.fields());
        assert_eq!(None, snapshot.reading.get("tvoc"));
    }

    #[test]
    fn test_registry_readers_see_complete_snapshots() {
        let registry = Arc::new(MetricRegistry::new(SensorKind::Power.fields()));
        let writer = {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    let v = i as f64;
                    let reading: Reading = vec![("voltage", v), ("current", v)].into_iter().collect();
                    registry.update(&reading);
                }
            })
        };

        for _ in 0..1000 {
            if let Some(s) = registry.snapshot() {
                assert_eq!(s.reading.get("voltage"), s.reading.get("current"));
            }
        }

        writer.join().unwrap();
        assert_eq!(1000, registry.snapshot().unwrap().generation);
    }
}
