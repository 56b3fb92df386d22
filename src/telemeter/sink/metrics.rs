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

use crate::metrics::ParticulateHistograms;
use crate::reading::Reading;
use crate::registry::MetricRegistry;
use crate::sink::core::{Sink, SinkError, SinkKind};
use std::sync::Arc;

/// Sink that makes readings available for Prometheus scrapes by updating the
/// shared `MetricRegistry`, and optionally observes particulate matter histograms.
#[derive(Debug)]
pub struct MetricsSink {
    registry: Arc<MetricRegistry>,
    histograms: Option<ParticulateHistograms>,
}

impl MetricsSink {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        MetricsSink {
            registry,
            histograms: None,
        }
    }

    pub fn with_histograms(mut self, histograms: ParticulateHistograms) -> Self {
        self.histograms = Some(histograms);
        self
    }
}

impl Sink for MetricsSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Metrics
    }

    fn publish(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let generation = self.registry.update(reading);
        if let Some(h) = &self.histograms {
            h.observe(reading);
        }

        tracing::debug!(message = "updated metric registry", generation = generation);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::MetricsSink;
    use crate::metrics::ParticulateHistograms;
    use crate::reading::Reading;
    use crate::registry::MetricRegistry;
    use crate::sink::core::Sink;
    use crate::source::SensorKind;
    use prometheus::Registry;
    use std::sync::Arc;

    #[test]
    fn test_metrics_sink_updates_registry() {
        let registry = Arc::new(MetricRegistry::new(SensorKind::AirQuality.fields()));
        let mut sink = MetricsSink::new(registry.clone());
        let reading: Reading = vec![("pm25", 8.5), ("pm10", 12.0), ("aqi", 35.0), ("aqic", 35.0)]
            .into_iter()
            .collect();

        sink.publish(&reading).unwrap();

        assert_eq!("metrics", sink.name());
        assert_eq!(reading.fields(), registry.snapshot().unwrap().reading.fields());
    }

    #[test]
    fn test_metrics_sink_observes_histograms() {
        let registry = Arc::new(MetricRegistry::new(SensorKind::AirQuality.fields()));
        let histograms = ParticulateHistograms::new(&Registry::new()).unwrap();
        let mut sink = MetricsSink::new(registry).with_histograms(histograms.clone());
        let reading: Reading = vec![("pm25", 8.5), ("pm10", 12.0)].into_iter().collect();

        sink.publish(&reading).unwrap();
        sink.publish(&reading).unwrap();

        assert_eq!(2, histograms.observations());
    }
}
