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

use std::fmt;
use std::str::FromStr;

/// A field produced by a sensor along with how it is exposed as a Prometheus gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub metric: &'static str,
    pub help: &'static str,
}

impl FieldSpec {
    pub const fn new(name: &'static str, metric: &'static str, help: &'static str) -> Self {
        FieldSpec { name, metric, help }
    }
}

const POWER_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("voltage", "voltage", "Voltage measured (V)"),
    FieldSpec::new("current", "current", "Current measured in amps (A)"),
    FieldSpec::new("watts", "watts", "Power consumption measured (W)"),
    FieldSpec::new("energy", "energy", "Energy measured (W-hr)"),
    FieldSpec::new("frequency", "frequency", "AC frequency measured (Hz)"),
    FieldSpec::new("power_factor", "power_factor", "Power efficiency (%)"),
    FieldSpec::new("alarm", "alarm", "Alarm status (boolean)"),
];

const AIR_QUALITY_FIELDS: &[FieldSpec] = &[
    FieldSpec::new(
        "pm25",
        "PM25",
        "Particulate Matter of diameter less than 2.5 microns. Measured in micrograms per cubic metre (ug/m3)",
    ),
    FieldSpec::new(
        "pm10",
        "PM10",
        "Particulate Matter of diameter less than 10 microns. Measured in micrograms per cubic metre (ug/m3)",
    ),
    FieldSpec::new("aqi", "AQI", "AQI value"),
    FieldSpec::new("aqic", "AQIc", "AQIc value"),
];

const GAS_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("co2", "ccs811_co2", "CO2 level, ppm"),
    FieldSpec::new("tvoc", "ccs811_tvoc", "Total Volatile Organic Compounds level, ppm"),
    FieldSpec::new("temperature", "bme680_temp", "Air Temperature, C"),
    FieldSpec::new("humidity", "bme680_humidity", "Relative Humidity %"),
    FieldSpec::new("voc_index", "sgp40_voc_index", "Volatile Organic Compounds Index, int"),
    FieldSpec::new("raw_gas", "sgp40_raw_gas", "Compensated voc index resistance readings, ohms"),
];

/// Family of sensor being polled, determines the fields that are expected in each reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// PZEM-004T / PZEM-016 style AC power meter
    Power,
    /// SDS011 style particulate matter sensor
    AirQuality,
    /// CCS811 + BME680 + SGP40 gas, temperature, and humidity cluster
    Gas,
}

impl SensorKind {
    /// All fields exposed for this kind of sensor, in display order.
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            SensorKind::Power => POWER_FIELDS,
            SensorKind::AirQuality => AIR_QUALITY_FIELDS,
            SensorKind::Gas => GAS_FIELDS,
        }
    }

    /// Fields the sensor driver itself must supply. Anything else in `fields()`
    /// is derived from these.
    pub fn driver_fields(&self) -> Vec<&'static str> {
        match self {
            SensorKind::AirQuality => vec!["pm25", "pm10"],
            _ => self.fields().iter().map(|f| f.name).collect(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Power => "power",
            SensorKind::AirQuality => "air-quality",
            SensorKind::Gas => "gas",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "power" => Ok(SensorKind::Power),
            "air-quality" | "air_quality" => Ok(SensorKind::AirQuality),
            "gas" => Ok(SensorKind::Gas),
            _ => Err(format!(
                "unknown sensor kind '{}', expected 'power', 'air-quality', or 'gas'",
                s
            )),
        }
    }
}
