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

//! Poll a hardware sensor and publish readings as Prometheus metrics, MQTT messages, and a CSV log.
//!
//! ## Features
//!
//! Telemeter polls a single sensor at a fixed interval and fans each reading out to several
//! independent sinks. It's meant to be run on a Raspberry PI (or similar) with a power meter,
//! particulate matter sensor, or gas sensor cluster attached. A failure in one sink (an MQTT
//! broker being down, for example) never affects any of the others, and a failure reading the
//! sensor only skips the current cycle.
//!
//! Sensors are read by a driver program that prints a single JSON object with the value of
//! each field, for example `{"pm25": 12.3, "pm10": 20.1}`. Supported kinds of sensors are:
//!
//! * `power` - `voltage`, `current`, `watts`, `energy`, `frequency`, `power_factor`, and `alarm`.
//! * `air-quality` - `pm25` and `pm10`. `aqi` (US EPA) and `aqic` are computed from these.
//! * `gas` - `co2`, `tvoc`, `temperature`, `humidity`, `voc_index`, and `raw_gas`.
//!
//! Each field is exported as a gauge, along with:
//!
//! * `telemeter_last_read_timestamp` - UNIX timestamp of the last time the sensor was correctly read.
//! * `telemeter_collections_total` - Total number of attempts to read the sensor.
//! * `telemeter_errors_total` - Total errors by type while trying to read the sensor.
//! * `telemeter_sink_errors_total` - Total errors by sink while trying to publish readings.
//! * `telemeter_poll_duration_seconds` - Histogram of time spent reading the sensor.
//! * `pm25_measurements`, `pm10_measurements` - Histograms of fine and coarse particulate
//!   matter concentrations, air quality sensors only.
//!
//! ## Sinks
//!
//! * Metrics - always enabled, exposed on port `8002` at `/metrics` by default.
//! * MQTT - enabled with `--mqtt-broker`. Readings are published as a JSON object to the topic
//!   given by `--mqtt-topic`, or with `--mqtt-layout split` as one topic per field.
//! * Log file - enabled with `--log-file`. One CSV line is appended per reading.
//!
//! ### Prometheus
//!
//! Sensors are read in the background, *not* in response to Prometheus scrapes. Scrapes more
//! frequent than the poll interval (`5s` by default) don't have any benefit.
//!
//! ```yaml
//! scrape_configs:
//!   - job_name: telemeter
//!     static_configs:
//!       - targets: ['example:8002']
//! ```
//!

pub mod config;
pub mod http;
pub mod metrics;
pub mod reading;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod source;
