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

use crate::metrics::PollMetrics;
use crate::reading::Reading;
use crate::sink::{Sink, SinkError, SinkKind};
use crate::source::{SensorSource, SourceError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::watch;
use tokio::task;
use tracing::{Instrument, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
}

/// Result of publishing a reading to a single sink during one cycle
#[derive(Debug)]
pub struct SinkOutcome {
    pub sink: SinkKind,
    pub name: String,
    pub result: Result<(), SinkError>,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// The sensor couldn't be read, nothing was published
    PollFailed(SourceError),
    /// The sensor was read and published to each sink, successfully or not
    Published(Reading, Vec<SinkOutcome>),
}

/// What happened during a single poll cycle. Only used for logging and tests,
/// no decisions are made based on the outcome of a cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Published(_, _))
    }

    /// Sink outcomes that were failures
    pub fn sink_failures(&self) -> impl Iterator<Item = &SinkOutcome> {
        let outcomes: &[SinkOutcome] = match &self.outcome {
            CycleOutcome::Published(_, outcomes) => outcomes,
            CycleOutcome::PollFailed(_) => &[],
        };

        outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Read a sensor and publish the reading to each configured sink.
///
/// Sinks are always published to in priority order: metrics first so that the
/// exposition endpoint reflects the latest reading even if other sinks fail, then
/// MQTT, then the log file. Failures reading the sensor or publishing to a sink are
/// logged and counted but never stop the scheduler.
pub struct PollScheduler {
    source: Box<dyn SensorSource>,
    sinks: Vec<Box<dyn Sink>>,
    metrics: PollMetrics,
    state: SchedulerState,
    cycles: u64,
}

impl PollScheduler {
    pub fn new(source: Box<dyn SensorSource>, mut sinks: Vec<Box<dyn Sink>>, metrics: PollMetrics) -> Self {
        // Stable so that sinks of the same kind keep the order they were given in
        sinks.sort_by_key(|s| s.kind());

        PollScheduler {
            source,
            sinks,
            metrics,
            state: SchedulerState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run a single cycle: poll the sensor and, if successful, publish the reading
    /// to every sink. The scheduler is always `Idle` once this returns.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.state = SchedulerState::Polling;
        self.cycles += 1;
        self.metrics.record_collection();

        let cycle = self.cycles;
        let start = Instant::now();
        let polled = self.source.poll();
        self.metrics.observe_poll_duration(start.elapsed());

        let outcome = match polled {
            Ok(reading) => {
                tracing::debug!(message = "read sensor", cycle = cycle, reading = %reading);
                let outcomes = self.publish(cycle, &reading);
                CycleOutcome::Published(reading, outcomes)
            }
            Err(e) => {
                self.metrics.record_source_error(e.kind());
                tracing::error!(
                    message = "unable to read sensor",
                    cycle = cycle,
                    timestamp = ?SystemTime::now(),
                    kind = e.kind().as_label(),
                    error = %e,
                );
                CycleOutcome::PollFailed(e)
            }
        };

        self.state = SchedulerState::Idle;
        CycleReport { cycle, outcome }
    }

    /// Return to `Idle` after a cycle was abandoned part way through because
    /// the source or one of the sinks panicked.
    pub fn abandon_cycle(&mut self) {
        self.state = SchedulerState::Idle;
    }

    fn publish(&mut self, cycle: u64, reading: &Reading) -> Vec<SinkOutcome> {
        let mut outcomes = Vec::with_capacity(self.sinks.len());

        for sink in self.sinks.iter_mut() {
            let result = sink.publish(reading);
            if let Err(e) = &result {
                self.metrics.record_sink_error(sink.kind());
                tracing::error!(
                    message = "unable to publish reading",
                    cycle = cycle,
                    timestamp = ?reading.timestamp(),
                    sink = sink.name(),
                    kind = e.kind().as_label(),
                    error = %e,
                );
            }

            outcomes.push(SinkOutcome {
                sink: sink.kind(),
                name: sink.name().to_owned(),
                result,
            });
        }

        outcomes
    }
}

/// Run poll cycles until `shutdown` is set to `true` or its sender is dropped.
///
/// Each cycle runs on the blocking thread pool since reading the sensor may take
/// several seconds. After each cycle completes the loop sleeps for `interval`. Time
/// spent in the cycle itself is not subtracted from the interval. A cycle that has
/// started always runs to completion before shutdown. A cycle that panics is logged
/// and the next one runs as usual.
pub async fn run_poll_loop(
    scheduler: Arc<Mutex<PollScheduler>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let scheduler_ref = scheduler.clone();
        let res = task::spawn_blocking(move || {
            let mut s = scheduler_ref.lock().unwrap_or_else(PoisonError::into_inner);
            s.run_cycle()
        })
        .instrument(tracing::span!(Level::DEBUG, "poll_cycle"))
        .await;

        match res {
            Ok(report) => {
                tracing::debug!(message = "finished poll cycle", cycle = report.cycle, success = report.is_success());
            }
            Err(e) => {
                let mut s = scheduler.lock().unwrap_or_else(PoisonError::into_inner);
                tracing::error!(message = "poll cycle did not complete", cycle = s.cycles(), error = %e);
                s.abandon_cycle();
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            res = shutdown.changed() => {
                // Sender is gone, nothing can signal shutdown anymore
                if res.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!(message = "poll loop stopped");
}

#[cfg(test)]
mod test {
    use super::{run_poll_loop, CycleOutcome, PollScheduler, SchedulerState};
    use crate::config::TopicLayout;
    use crate::metrics::PollMetrics;
    use crate::reading::Reading;
    use crate::registry::MetricRegistry;
    use crate::sink::test::{MockMqttClient, RecordingSink};
    use crate::sink::{LogFileSink, MetricsSink, MqttSink, Sink, SinkErrorKind, SinkKind};
    use crate::source::test::{FailingSource, FlakySource};
    use crate::source::{SensorKind, SensorSource, SourceError, SourceErrorKind};
    use prometheus::Registry;
    use rumqttc::QoS;
    use std::fs;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;
    use tokio::sync::watch;

    const POWER: &[(&str, f64)] = &[("voltage", 230.1), ("current", 0.5), ("power", 115.05)];

    fn poll_metrics() -> PollMetrics {
        PollMetrics::new(&Registry::new()).unwrap()
    }

    #[test]
    fn test_scheduler_sink_priority_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn Sink>> = vec![
            Box::new(RecordingSink::new(SinkKind::LogFile, "log", false, calls.clone())),
            Box::new(RecordingSink::new(SinkKind::Mqtt, "mqtt", false, calls.clone())),
            Box::new(RecordingSink::new(SinkKind::Metrics, "metrics", false, calls.clone())),
        ];

        let source = FlakySource::new(u32::MAX, POWER.to_vec());
        let mut scheduler = PollScheduler::new(Box::new(source), sinks, poll_metrics());
        let report = scheduler.run_cycle();

        assert!(report.is_success());
        assert_eq!(vec!["metrics", "mqtt", "log"], *calls.lock().unwrap());
    }

    #[test]
    fn test_scheduler_failing_sink_isolated() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn Sink>> = vec![
            Box::new(RecordingSink::new(SinkKind::Metrics, "metrics", false, calls.clone())),
            Box::new(RecordingSink::new(SinkKind::Mqtt, "mqtt", true, calls.clone())),
            Box::new(RecordingSink::new(SinkKind::LogFile, "log", false, calls.clone())),
        ];

        let metrics = poll_metrics();
        let source = FlakySource::new(u32::MAX, POWER.to_vec());
        let mut scheduler = PollScheduler::new(Box::new(source), sinks, metrics.clone());
        let report = scheduler.run_cycle();

        let failures: Vec<&str> = report.sink_failures().map(|o| o.name.as_str()).collect();
        assert_eq!(vec!["mqtt"], failures);
        assert_eq!(vec!["metrics", "mqtt", "log"], *calls.lock().unwrap());
        assert_eq!(1, metrics.sink_errors(SinkKind::Mqtt));
        assert_eq!(SchedulerState::Idle, scheduler.state());
    }

    #[test]
    fn test_scheduler_failed_poll_skips_sinks() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(RecordingSink::new(
            SinkKind::Metrics,
            "metrics",
            false,
            calls.clone(),
        ))];

        let metrics = poll_metrics();
        let mut scheduler = PollScheduler::new(Box::new(FailingSource), sinks, metrics.clone());
        let report = scheduler.run_cycle();

        assert!(!report.is_success());
        assert!(matches!(report.outcome, CycleOutcome::PollFailed(ref e) if e.kind() == SourceErrorKind::Unavailable));
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(1, metrics.source_errors(SourceErrorKind::Unavailable));
        assert_eq!(SchedulerState::Idle, scheduler.state());
    }

    #[test]
    fn test_scheduler_every_nth_poll_fails() {
        let n = 4;
        let cycles = 20;
        let registry = Arc::new(MetricRegistry::new(SensorKind::Power.fields()));
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(MetricsSink::new(registry.clone()))];
        let metrics = poll_metrics();
        let source = FlakySource::new(n, POWER.to_vec());
        let mut scheduler = PollScheduler::new(Box::new(source), sinks, metrics.clone());

        let mut failed = Vec::new();
        for _ in 0..cycles {
            let report = scheduler.run_cycle();
            if !report.is_success() {
                failed.push(report.cycle);
            }
        }

        assert_eq!(vec![4, 8, 12, 16, 20], failed);
        assert_eq!(cycles as u64, metrics.collections());
        assert_eq!(cycles as u64, metrics.poll_durations());
        assert_eq!(5, metrics.source_errors(SourceErrorKind::Timeout));
        assert_eq!(15, registry.snapshot().unwrap().generation);
    }

    #[test]
    fn test_scheduler_three_cycles_registry_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("power.csv");
        let registry = Arc::new(MetricRegistry::new(SensorKind::Power.fields()));
        let sinks: Vec<Box<dyn Sink>> = vec![
            Box::new(LogFileSink::new(&path, vec!["voltage", "current", "power"])),
            Box::new(MetricsSink::new(registry.clone())),
        ];

        let source = FlakySource::new(u32::MAX, POWER.to_vec());
        let mut scheduler = PollScheduler::new(Box::new(source), sinks, poll_metrics());

        let mut last = None;
        for _ in 0..3 {
            if let CycleOutcome::Published(reading, _) = scheduler.run_cycle().outcome {
                last = Some(reading);
            }
        }

        let last = last.unwrap();
        let snapshot = registry.snapshot().unwrap();
        assert_eq!(last.fields(), snapshot.reading.fields());
        assert_eq!(last.timestamp(), snapshot.reading.timestamp());

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(3, contents.lines().count());
        assert!(contents.lines().all(|l| l.ends_with(",230.1,0.5,115.05")));
    }

    #[test]
    fn test_scheduler_broker_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("power.csv");
        let registry = Arc::new(MetricRegistry::new(SensorKind::Power.fields()));
        let client = MockMqttClient::new(true);
        let connection = client.connection();
        let published = client.published();

        let sinks: Vec<Box<dyn Sink>> = vec![
            Box::new(MetricsSink::new(registry.clone())),
            Box::new(MqttSink::new(client, "electric", TopicLayout::Json, QoS::AtMostOnce, false)),
            Box::new(LogFileSink::new(&path, Vec::<String>::new())),
        ];

        let metrics = poll_metrics();
        let source = FlakySource::new(u32::MAX, POWER.to_vec());
        let mut scheduler = PollScheduler::new(Box::new(source), sinks, metrics.clone());

        let mut mqtt_failures = 0;
        for cycle in 1..=5 {
            connection.store(!(2..=4).contains(&cycle), Ordering::SeqCst);
            let report = scheduler.run_cycle();

            for failure in report.sink_failures() {
                assert_eq!(SinkKind::Mqtt, failure.sink);
                match &failure.result {
                    Err(e) => assert_eq!(SinkErrorKind::PublishFailed, e.kind()),
                    Ok(_) => unreachable!(),
                }
                mqtt_failures += 1;
            }
        }

        assert_eq!(3, mqtt_failures);
        assert_eq!(3, metrics.sink_errors(SinkKind::Mqtt));
        assert_eq!(0, metrics.sink_errors(SinkKind::Metrics));
        assert_eq!(0, metrics.sink_errors(SinkKind::LogFile));
        assert_eq!(2, published.lock().unwrap().len());
        assert_eq!(5, registry.snapshot().unwrap().generation);
        assert_eq!(5, fs::read_to_string(&path).unwrap().lines().count());
    }

    /// SensorSource implementation that requests shutdown after a number of polls,
    /// optionally panicking on one of them
    struct ShutdownSource {
        polls: u32,
        stop_after: u32,
        panic_on: Option<u32>,
        shutdown: watch::Sender<bool>,
    }

    impl ShutdownSource {
        fn new(stop_after: u32, panic_on: Option<u32>, shutdown: watch::Sender<bool>) -> Self {
            ShutdownSource {
                polls: 0,
                stop_after,
                panic_on,
                shutdown,
            }
        }
    }

    impl SensorSource for ShutdownSource {
        fn poll(&mut self) -> Result<Reading, SourceError> {
            self.polls += 1;
            if self.polls >= self.stop_after {
                let _ = self.shutdown.send(true);
            }

            if self.panic_on == Some(self.polls) {
                panic!("driver state corrupted on poll {}", self.polls);
            }

            Ok(POWER.iter().copied().collect())
        }
    }

    #[tokio::test]
    async fn test_run_poll_loop_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let registry = Arc::new(MetricRegistry::new(SensorKind::Power.fields()));
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(MetricsSink::new(registry.clone()))];
        let metrics = poll_metrics();
        let source = ShutdownSource::new(3, None, tx);

        let scheduler = Arc::new(Mutex::new(PollScheduler::new(Box::new(source), sinks, metrics.clone())));
        tokio::time::timeout(
            Duration::from_secs(5),
            run_poll_loop(scheduler, Duration::from_millis(10), rx),
        )
        .await
        .unwrap();

        assert_eq!(3, metrics.collections());
        assert_eq!(3, registry.snapshot().unwrap().generation);
    }

    #[tokio::test]
    async fn test_run_poll_loop_continues_after_panic() {
        let (tx, rx) = watch::channel(false);
        let registry = Arc::new(MetricRegistry::new(SensorKind::Power.fields()));
        let sinks: Vec<Box<dyn Sink>> = vec![Box::new(MetricsSink::new(registry.clone()))];
        let metrics = poll_metrics();
        let source = ShutdownSource::new(4, Some(2), tx);

        let scheduler = Arc::new(Mutex::new(PollScheduler::new(Box::new(source), sinks, metrics.clone())));
        tokio::time::timeout(
            Duration::from_secs(5),
            run_poll_loop(scheduler.clone(), Duration::from_millis(10), rx),
        )
        .await
        .unwrap();

        let scheduler = scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(4, scheduler.cycles());
        assert_eq!(SchedulerState::Idle, scheduler.state());
        assert_eq!(4, metrics.collections());
        assert_eq!(3, registry.snapshot().unwrap().generation);
    }
}
