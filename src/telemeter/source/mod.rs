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

mod aqi;
mod average;
mod command;
mod core;
mod profile;

pub use crate::source::aqi::{pm10_index, pm25_index, round_concentration, AirQualitySource};
pub use crate::source::average::AveragingSource;
pub use crate::source::command::CommandSource;
pub use crate::source::core::{SensorSource, SourceError, SourceErrorKind};
pub use crate::source::profile::{FieldSpec, SensorKind};
