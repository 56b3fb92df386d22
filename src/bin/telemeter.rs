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

use clap::Parser;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use std::{io, process};
use telemeter::config::{DriverConfig, ExporterConfig, MqttSettings, SamplingConfig, TopicLayout};
use telemeter::http::{http_route, RequestContext};
use telemeter::metrics::{MetricsExposition, ParticulateHistograms, PollMetrics, ReadingCollector};
use telemeter::registry::MetricRegistry;
use telemeter::scheduler::{run_poll_loop, PollScheduler};
use telemeter::sink::{BrokerClient, LogFileSink, MetricsSink, MqttSink, Sink};
use telemeter::source::{AirQualitySource, AveragingSource, CommandSource, SensorKind, SensorSource};
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::watch;
use tracing::{Instrument, Level};

const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_DRIVER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SAMPLES: u32 = 1;
const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8002);
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_TOPIC: &str = "telemeter";
const DEFAULT_MQTT_CLIENT_ID: &str = "telemeter";

/// Expose readings from a hardware sensor as Prometheus metrics, MQTT messages, and a CSV log
///
/// Read a power meter, particulate matter sensor, or gas sensor cluster at a fixed
/// interval using a driver program and publish each reading. The driver program must
/// print a single JSON object containing a numeric value for each field of the sensor
/// and exit successfully.
///
/// Readings are always exposed as Prometheus metrics. Readings are also published to
/// an MQTT broker if one is given and appended to a CSV file if one is given.
#[derive(Debug, Parser)]
#[clap(name = "telemeter", version = clap::crate_version!())]
struct TelemeterApplication {
    /// Kind of sensor being read. Allowed values are 'power', 'air-quality', and 'gas'
    #[clap(long)]
    sensor: SensorKind,

    /// Program to run to read the sensor
    #[clap(long)]
    driver: PathBuf,

    /// Argument to pass to the driver program, may be given multiple times
    #[clap(long, allow_hyphen_values = true)]
    driver_arg: Vec<String>,

    /// Kill the driver program if it runs longer than this, in seconds
    #[clap(long, default_value_t = DEFAULT_DRIVER_TIMEOUT_SECS)]
    driver_timeout_secs: u64,

    /// Read the sensor at this interval, in seconds
    #[clap(long, default_value_t = DEFAULT_INTERVAL_SECS)]
    interval_secs: u64,

    /// Average this many consecutive samples into each reading
    #[clap(long, default_value_t = DEFAULT_SAMPLES)]
    samples: u32,

    /// Seconds to let the sensor start before taking samples
    #[clap(long, default_value_t = 0)]
    warmup_secs: u64,

    /// Seconds to pause after each sample
    #[clap(long, default_value_t = 0)]
    sample_delay_secs: u64,

    /// IP address or hostname of an MQTT broker to publish readings to
    #[clap(long)]
    mqtt_broker: Option<String>,

    /// Port number of the MQTT broker
    #[clap(long, default_value_t = DEFAULT_MQTT_PORT)]
    mqtt_port: u16,

    /// MQTT topic to publish readings to
    #[clap(long, default_value_t = DEFAULT_MQTT_TOPIC.to_owned())]
    mqtt_topic: String,

    /// Connect to the MQTT broker using TLS
    #[clap(long)]
    mqtt_tls: bool,

    /// Username for the MQTT broker
    #[clap(long)]
    mqtt_username: Option<String>,

    /// Password for the MQTT broker
    #[clap(long)]
    mqtt_password: Option<String>,

    /// Client ID to use when connecting to the MQTT broker
    #[clap(long, default_value_t = DEFAULT_MQTT_CLIENT_ID.to_owned())]
    mqtt_client_id: String,

    /// Quality of service for published messages: 0, 1, or 2
    #[clap(long, default_value_t = 0)]
    mqtt_qos: u8,

    /// Ask the broker to retain published messages
    #[clap(long)]
    mqtt_retain: bool,

    /// Publish a JSON object to the topic ('json') or each field to '<topic>/<field>' ('split')
    #[clap(long)]
    mqtt_layout: Option<TopicLayout>,

    /// Path to a CSV file that each reading will be appended to
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to. By default, telemeter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

impl TelemeterApplication {
    fn into_config(self) -> Result<ExporterConfig, telemeter::config::ConfigError> {
        let mqtt = MqttSettings {
            broker: self.mqtt_broker,
            port: self.mqtt_port,
            topic: self.mqtt_topic,
            client_id: self.mqtt_client_id,
            tls: self.mqtt_tls,
            username: self.mqtt_username,
            password: self.mqtt_password,
            qos: self.mqtt_qos,
            retain: self.mqtt_retain,
            layout: self.mqtt_layout,
        }
        .resolve()?;

        ExporterConfig {
            bind: self.bind,
            interval: Duration::from_secs(self.interval_secs),
            sensor: self.sensor,
            driver: DriverConfig {
                program: self.driver,
                args: self.driver_arg,
                timeout: Duration::from_secs(self.driver_timeout_secs),
            },
            sampling: SamplingConfig {
                samples: self.samples,
                warmup: Duration::from_secs(self.warmup_secs),
                delay: Duration::from_secs(self.sample_delay_secs),
            },
            mqtt,
            log_file: self.log_file,
        }
        .validate()
    }
}

fn build_source(config: &ExporterConfig) -> Box<dyn SensorSource> {
    let driver = CommandSource::new(
        config.driver.program.clone(),
        config.driver.args.clone(),
        config.driver.timeout,
        config.sensor.driver_fields(),
    );

    let source: Box<dyn SensorSource> = if config.sampling.is_single() {
        Box::new(driver)
    } else {
        Box::new(AveragingSource::new(
            driver,
            config.sampling.samples,
            config.sampling.warmup,
            config.sampling.delay,
        ))
    };

    match config.sensor {
        SensorKind::AirQuality => Box::new(AirQualitySource::new(source)),
        _ => source,
    }
}

fn build_sinks(
    config: &ExporterConfig,
    registry: Arc<MetricRegistry>,
    histograms: Option<ParticulateHistograms>,
) -> Vec<Box<dyn Sink>> {
    let metrics = match histograms {
        Some(h) => MetricsSink::new(registry).with_histograms(h),
        None => MetricsSink::new(registry),
    };

    let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(metrics)];

    if let Some(mqtt) = &config.mqtt {
        let client = BrokerClient::connect(mqtt);
        sinks.push(Box::new(MqttSink::from_config(client, mqtt)));
    }

    if let Some(path) = &config.log_file {
        let columns = config.sensor.fields().iter().map(|f| f.name);
        sinks.push(Box::new(LogFileSink::new(path.clone(), columns)));
    }

    sinks
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = TelemeterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let config = opts.into_config().unwrap_or_else(|e| {
        tracing::error!(message = "invalid configuration", error = %e);
        process::exit(1)
    });

    let startup = Instant::now();
    let registry = Arc::new(MetricRegistry::new(config.sensor.fields()));
    let reg = prometheus::default_registry().clone();

    let collector = ReadingCollector::new(registry.clone()).unwrap_or_else(|e| {
        tracing::error!(message = "failed to declare sensor metrics", sensor = %config.sensor, error = %e);
        process::exit(1)
    });

    reg.register(Box::new(collector)).unwrap_or_else(|e| {
        tracing::error!(message = "failed to register sensor metric collector", error = %e);
        process::exit(1)
    });

    let poll_metrics = PollMetrics::new(&reg).unwrap_or_else(|e| {
        tracing::error!(message = "failed to register poll metrics", error = %e);
        process::exit(1)
    });

    let histograms = match config.sensor {
        SensorKind::AirQuality => Some(ParticulateHistograms::new(&reg).unwrap_or_else(|e| {
            tracing::error!(message = "failed to register particulate matter histograms", error = %e);
            process::exit(1)
        })),
        _ => None,
    };

    let sinks = build_sinks(&config, registry, histograms);
    let scheduler = Arc::new(Mutex::new(PollScheduler::new(build_source(&config), sinks, poll_metrics)));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        // Wait for either SIGTERM or SIGINT to shutdown
        tokio::select! {
            _ = sigterm() => {}
            _ = sigint() => {}
        }

        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let poller = tokio::spawn(run_poll_loop(scheduler, config.interval, shutdown_rx.clone()));

    let context = Arc::new(RequestContext::new(MetricsExposition::new(reg)));
    let service = make_service_fn(move |_| {
        let context = context.clone();

        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                http_route(req, context.clone()).instrument(tracing::span!(Level::DEBUG, "telemeter_request"))
            }))
        }
    });

    let server = Server::try_bind(&config.bind).unwrap_or_else(|e| {
        tracing::error!(message = "server failed to start", address = %config.bind, error = %e);
        process::exit(1)
    });

    tracing::info!(
        message = "server started",
        address = %config.bind,
        sensor = %config.sensor,
        interval_secs = config.interval.as_secs(),
        mqtt = config.mqtt.is_some(),
        log_file = config.log_file.is_some(),
    );

    let mut server_shutdown = shutdown_rx;
    server
        .serve(service)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await?;

    // Let any cycle in progress finish publishing before exiting
    poller.await?;

    tracing::info!(message = "server shutdown", runtime_secs = %startup.elapsed().as_secs());
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
