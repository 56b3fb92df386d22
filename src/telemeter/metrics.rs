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
use crate::registry::MetricRegistry;
use crate::sink::SinkKind;
use crate::source::SourceErrorKind;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

/// Prometheus Collector implementation that exposes the latest reading stored in a
/// `MetricRegistry`. Each declared field is emitted as a gauge, along with the time
/// of the most recent successful reading.
///
/// Values are read from the registry on each scrape. If the sensor can't be read the
/// last successful values continue to be exposed.
pub struct ReadingCollector {
    registry: Arc<MetricRegistry>,
    fields: Vec<(&'static str, Gauge)>,
    last_reading: Gauge,
}

impl ReadingCollector {
    pub fn new(registry: Arc<MetricRegistry>) -> Result<Self, prometheus::Error> {
        let mut fields = Vec::with_capacity(registry.declared().len());
        for spec in registry.declared() {
            fields.push((spec.name, Gauge::new(spec.metric, spec.help)?));
        }

        let last_reading = Gauge::new("telemeter_last_read_timestamp", "Timestamp of last successful read")?;

        Ok(Self {
            registry,
            fields,
            last_reading,
        })
    }
}

impl Collector for ReadingCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        for (_, gauge) in self.fields.iter() {
            descs.extend(gauge.desc());
        }

        descs.extend(self.last_reading.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut mfs = Vec::new();

        // Nothing to expose until the sensor has been read successfully at least once
        let snapshot = match self.registry.snapshot() {
            Some(s) => s,
            None => return mfs,
        };

        for (name, gauge) in self.fields.iter() {
            if let Some(v) = snapshot.reading.get(name) {
                gauge.set(v);
                mfs.extend(gauge.collect());
            }
        }

        // If we can't get the number of seconds since the epoch, skip the update
        let _ = snapshot
            .reading
            .timestamp()
            .duration_since(UNIX_EPOCH)
            .map(|d| self.last_reading.set(d.as_secs_f64()));

        mfs.extend(self.last_reading.collect());
        mfs
    }
}

/// Counters for the outcome of each poll cycle and how long reading the sensor takes.
#[derive(Clone)]
pub struct PollMetrics {
    collections: Counter,
    errors: CounterVec,
    sink_errors: CounterVec,
    poll_duration: Histogram,
}

impl PollMetrics {
    pub fn new(reg: &Registry) -> Result<Self, prometheus::Error> {
        let collections = Counter::new("telemeter_collections_total", "Number of attempted reads")?;
        let errors = CounterVec::new(
            Opts::new("telemeter_errors_total", "Number of failed reads by type"),
            &["kind"],
        )?;
        let sink_errors = CounterVec::new(
            Opts::new("telemeter_sink_errors_total", "Number of failed publishes by sink"),
            &["sink"],
        )?;

        // Averaging several samples after a warm-up can take the better part of a minute
        let poll_duration = Histogram::with_opts(
            HistogramOpts::new("telemeter_poll_duration_seconds", "Time spent reading the sensor")
                .buckets(prometheus::exponential_buckets(0.01, 2.0, 14)?),
        )?;

        reg.register(Box::new(collections.clone()))?;
        reg.register(Box::new(errors.clone()))?;
        reg.register(Box::new(sink_errors.clone()))?;
        reg.register(Box::new(poll_duration.clone()))?;

        Ok(Self {
            collections,
            errors,
            sink_errors,
            poll_duration,
        })
    }

    pub fn record_collection(&self) {
        self.collections.inc();
    }

    pub fn record_source_error(&self, kind: SourceErrorKind) {
        self.errors.with_label_values(&[kind.as_label()]).inc();
    }

    pub fn record_sink_error(&self, sink: SinkKind) {
        self.sink_errors.with_label_values(&[sink.as_label()]).inc();
    }

    pub fn observe_poll_duration(&self, elapsed: Duration) {
        self.poll_duration.observe(elapsed.as_secs_f64());
    }

    pub fn collections(&self) -> u64 {
        self.collections.get() as u64
    }

    pub fn source_errors(&self, kind: SourceErrorKind) -> u64 {
        self.errors.with_label_values(&[kind.as_label()]).get() as u64
    }

    pub fn sink_errors(&self, sink: SinkKind) -> u64 {
        self.sink_errors.with_label_values(&[sink.as_label()]).get() as u64
    }

    /// Number of sensor reads that have been timed, successful or not
    pub fn poll_durations(&self) -> u64 {
        self.poll_duration.get_sample_count()
    }
}

impl fmt::Debug for PollMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollMetrics")
            .field("collections", &self.collections())
            .finish()
    }
}

/// Distribution of particulate matter concentrations from an air quality sensor.
///
/// `pm25_measurements` observes fine particles (PM2.5) and `pm10_measurements` observes
/// coarse particles, the part of PM10 that isn't also PM2.5. Buckets cover 0 to 100 ug/m3
/// in steps of 5.
#[derive(Clone)]
pub struct ParticulateHistograms {
    pm25: Histogram,
    pm10: Histogram,
}

impl ParticulateHistograms {
    pub fn new(reg: &Registry) -> Result<Self, prometheus::Error> {
        let buckets = prometheus::linear_buckets(0.0, 5.0, 21)?;
        let pm25 = Histogram::with_opts(
            HistogramOpts::new(
                "pm25_measurements",
                "Histogram of Particulate Matter of diameter less than 2.5 micron measurements",
            )
            .buckets(buckets.clone()),
        )?;
        let pm10 = Histogram::with_opts(
            HistogramOpts::new(
                "pm10_measurements",
                "Histogram of Particulate Matter of diameter less than 10 micron measurements",
            )
            .buckets(buckets),
        )?;

        reg.register(Box::new(pm25.clone()))?;
        reg.register(Box::new(pm10.clone()))?;

        Ok(Self { pm25, pm10 })
    }

    /// Observe the concentrations in a reading. Readings without both `pm25` and
    /// `pm10` fields are ignored.
    pub fn observe(&self, reading: &Reading) {
        if let (Some(pm25), Some(pm10)) = (reading.get("pm25"), reading.get("pm10")) {
            self.pm25.observe(pm25);
            self.pm10.observe((pm10 - pm25).max(0.0));
        }
    }

    pub fn observations(&self) -> u64 {
        self.pm25.get_sample_count()
    }
}

impl fmt::Debug for ParticulateHistograms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticulateHistograms")
            .field("observations", &self.observations())
            .finish()
    }
}

/// Error exposing Prometheus metrics in the text exposition format.
#[derive(Debug)]
pub enum ExpositionError {
    Encoding(&'static str, Box<dyn Error + Send + Sync + 'static>),
}

impl fmt::Display for ExpositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpositionError::Encoding(msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for ExpositionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExpositionError::Encoding(_, ref e) => Some(e.as_ref()),
        }
    }
}

/// Wrapper that exposes metrics from a Prometheus registry in the text exposition format.
///
/// Gathering only reads values already stored in memory so it is cheap enough to
/// run directly in the HTTP request path.
#[derive(Debug)]
pub struct MetricsExposition {
    registry: Registry,
}

impl MetricsExposition {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Collect all metrics from the registry and encode them in the Prometheus text exposition
    /// format, returning an error if metrics couldn't be encoded for some reason.
    pub fn encoded_text(&self) -> Result<Vec<u8>, ExpositionError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        tracing::debug!(
            message = "encoding metric families to text exposition format",
            num_metrics = metric_families.len(),
        );

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| ExpositionError::Encoding("unable to encode Prometheus metrics", Box::new(e)))
            .map(|_| buffer)
    }
}

#[cfg(test)]
mod test {
    use super::{MetricsExposition, ParticulateHistograms, PollMetrics, ReadingCollector};
    use crate::reading::Reading;
    use crate::registry::MetricRegistry;
    use crate::sink::SinkKind;
    use crate::source::{SensorKind, SourceErrorKind};
    use prometheus::Registry;
    use std::sync::Arc;
    use std::time::Duration;

    fn exposition(registry: Arc<MetricRegistry>) -> (MetricsExposition, PollMetrics) {
        let reg = Registry::new();
        reg.register(Box::new(ReadingCollector::new(registry).unwrap())).unwrap();
        let metrics = PollMetrics::new(&reg).unwrap();
        (MetricsExposition::new(reg), metrics)
    }

    #[test]
    fn test_exposition_before_first_reading() {
        let registry = Arc::new(MetricRegistry::new(SensorKind::Power.fields()));
        let (exposition, _) = exposition(registry);

        let text = String::from_utf8(exposition.encoded_text().unwrap()).unwrap();
        assert!(!text.contains("voltage"));
        assert!(!text.contains("telemeter_last_read_timestamp"));
    }

    #[test]
    fn test_exposition_declared_fields() {
        let registry = Arc::new(MetricRegistry::new(SensorKind::AirQuality.fields()));
        let (exposition, _) = exposition(registry.clone());
        let reading: Reading = vec![("pm25", 12.5), ("pm10", 30.0), ("aqi", 52.0), ("aqic", 52.0), ("extra", 1.0)]
            .into_iter()
            .collect();

        registry.update(&reading);
        let text = String::from_utf8(exposition.encoded_text().unwrap()).unwrap();

        assert!(text.contains("# HELP AQI AQI value"));
        assert!(text.contains("# TYPE PM25 gauge"));
        assert!(text.contains("PM25 12.5"));
        assert!(text.contains("PM10 30"));
        assert!(text.contains("AQIc 52"));
        assert!(text.contains("telemeter_last_read_timestamp"));
        assert!(!text.contains("extra"));
    }

    #[test]
    fn test_poll_metrics_counters() {
        let registry = Arc::new(MetricRegistry::new(SensorKind::Gas.fields()));
        let (exposition, metrics) = exposition(registry);

        metrics.record_collection();
        metrics.record_collection();
        metrics.record_source_error(SourceErrorKind::Timeout);
        metrics.record_sink_error(SinkKind::Mqtt);

        assert_eq!(2, metrics.collections());
        assert_eq!(1, metrics.source_errors(SourceErrorKind::Timeout));
        assert_eq!(0, metrics.source_errors(SourceErrorKind::InvalidData));
        assert_eq!(1, metrics.sink_errors(SinkKind::Mqtt));

        let text = String::from_utf8(exposition.encoded_text().unwrap()).unwrap();
        assert!(text.contains("telemeter_collections_total 2"));
        assert!(text.contains("telemeter_errors_total{kind=\"timeout\"} 1"));
        assert!(text.contains("telemeter_sink_errors_total{sink=\"mqtt\"} 1"));
    }

    #[test]
    fn test_poll_metrics_duration() {
        let registry = Arc::new(MetricRegistry::new(SensorKind::Power.fields()));
        let (exposition, metrics) = exposition(registry);

        metrics.observe_poll_duration(Duration::from_millis(250));
        metrics.observe_poll_duration(Duration::from_secs(30));

        assert_eq!(2, metrics.poll_durations());

        let text = String::from_utf8(exposition.encoded_text().unwrap()).unwrap();
        assert!(text.contains("# TYPE telemeter_poll_duration_seconds histogram"));
        assert!(text.contains("telemeter_poll_duration_seconds_count 2"));
        assert!(text.contains("telemeter_poll_duration_seconds_sum 30.25"));
    }

    #[test]
    fn test_particulate_histograms() {
        let reg = Registry::new();
        let histograms = ParticulateHistograms::new(&reg).unwrap();
        let exposition = MetricsExposition::new(reg);

        let reading: Reading = vec![("pm25", 7.5), ("pm10", 20.0)].into_iter().collect();
        histograms.observe(&reading);
        let reading: Reading = vec![("pm25", 12.0), ("pm10", 10.0)].into_iter().collect();
        histograms.observe(&reading);
        let reading: Reading = vec![("co2", 410.0)].into_iter().collect();
        histograms.observe(&reading);

        assert_eq!(2, histograms.observations());

        let text = String::from_utf8(exposition.encoded_text().unwrap()).unwrap();
        assert!(text.contains("pm25_measurements_bucket{le=\"5\"} 0"));
        assert!(text.contains("pm25_measurements_bucket{le=\"10\"} 1"));
        assert!(text.contains("pm25_measurements_bucket{le=\"100\"} 2"));
        assert!(text.contains("pm25_measurements_sum 19.5"));
        // Coarse particles: 20 - 7.5 and a negative difference clamped to zero
        assert!(text.contains("pm10_measurements_bucket{le=\"0\"} 1"));
        assert!(text.contains("pm10_measurements_sum 12.5"));
    }
}
