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
use crate::source::core::{require_fields, SensorSource, SourceError, SourceErrorKind};

/// Concentration range and the index range it maps to
struct Breakpoint {
    c_low: f64,
    c_high: f64,
    i_low: f64,
    i_high: f64,
}

const fn bp(c_low: f64, c_high: f64, i_low: f64, i_high: f64) -> Breakpoint {
    Breakpoint {
        c_low,
        c_high,
        i_low,
        i_high,
    }
}

// US EPA breakpoints, 24 hour average, ug/m3
const PM25_BREAKPOINTS: &[Breakpoint] = &[
    bp(0.0, 12.0, 0.0, 50.0),
    bp(12.1, 35.4, 51.0, 100.0),
    bp(35.5, 55.4, 101.0, 150.0),
    bp(55.5, 150.4, 151.0, 200.0),
    bp(150.5, 250.4, 201.0, 300.0),
    bp(250.5, 350.4, 301.0, 400.0),
    bp(350.5, 500.4, 401.0, 500.0),
];

const PM10_BREAKPOINTS: &[Breakpoint] = &[
    bp(0.0, 54.0, 0.0, 50.0),
    bp(55.0, 154.0, 51.0, 100.0),
    bp(155.0, 254.0, 101.0, 150.0),
    bp(255.0, 354.0, 151.0, 200.0),
    bp(355.0, 424.0, 201.0, 300.0),
    bp(425.0, 504.0, 301.0, 400.0),
    bp(505.0, 604.0, 401.0, 500.0),
];

const MAX_INDEX: f64 = 500.0;

/// Round a concentration to the 0.1 ug/m3 resolution the sensor reports in. Averages
/// of several samples are rounded so that a value like `10.699999999999998` is treated
/// (and exposed) as `10.7` rather than being truncated to `10.6`.
pub fn round_concentration(concentration: f64) -> f64 {
    (concentration * 10.0).round() / 10.0
}

fn sub_index(concentration: f64, breakpoints: &[Breakpoint]) -> f64 {
    for b in breakpoints {
        if concentration <= b.c_high {
            let index = (b.i_high - b.i_low) / (b.c_high - b.c_low) * (concentration - b.c_low) + b.i_low;
            return index.round();
        }
    }

    MAX_INDEX
}

/// AQI sub-index for a PM2.5 concentration. Concentrations are truncated to one decimal
/// place before the breakpoint lookup.
pub fn pm25_index(concentration: f64) -> f64 {
    sub_index((concentration * 10.0).trunc() / 10.0, PM25_BREAKPOINTS)
}

/// AQI sub-index for a PM10 concentration. Concentrations are truncated to an integer
/// before the breakpoint lookup.
pub fn pm10_index(concentration: f64) -> f64 {
    sub_index(concentration.trunc(), PM10_BREAKPOINTS)
}

/// Add air quality index values to readings from a particulate matter sensor.
///
/// Readings from the wrapped source must include `pm25` and `pm10` fields. Both are
/// rounded to one decimal place and replaced in the reading. The PM2.5 sub-index is added
/// as `aqi` and the larger of the PM2.5 and PM10 sub-indexes is added as `aqic`.
#[derive(Debug)]
pub struct AirQualitySource<S> {
    inner: S,
}

impl<S> AirQualitySource<S>
where
    S: SensorSource,
{
    pub fn new(inner: S) -> Self {
        AirQualitySource { inner }
    }
}

impl<S> SensorSource for AirQualitySource<S>
where
    S: SensorSource,
{
    fn poll(&mut self) -> Result<Reading, SourceError> {
        let reading = self.inner.poll()?;
        require_fields(&reading, &["pm25", "pm10"])?;

        let (pm25, pm10) = match (reading.get("pm25"), reading.get("pm10")) {
            (Some(pm25), Some(pm10)) if pm25 >= 0.0 && pm10 >= 0.0 => {
                (round_concentration(pm25), round_concentration(pm10))
            }
            _ => {
                return Err(SourceError::KindMsg(
                    SourceErrorKind::InvalidData,
                    "negative particulate matter concentration",
                ))
            }
        };

        let aqi = pm25_index(pm25);
        let aqic = aqi.max(pm10_index(pm10));

        tracing::debug!(message = "computed air quality index", pm25 = pm25, pm10 = pm10, aqi = aqi, aqic = aqic);
        Ok(reading.extended(vec![
            ("pm25".to_owned(), pm25),
            ("pm10".to_owned(), pm10),
            ("aqi".to_owned(), aqi),
            ("aqic".to_owned(), aqic),
        ]))
    }
}
