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

use crate::source::SensorKind;
use rumqttc::QoS;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Invalid combination of options. Only ever returned at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid(&'static str),
    InvalidValue(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid(msg) => msg.fmt(f),
            ConfigError::InvalidValue(msg, value) => write!(f, "{}: {}", msg, value),
        }
    }
}

impl Error for ConfigError {}

/// How readings are laid out when published to an MQTT broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicLayout {
    /// All fields as a single JSON object on one topic
    Json,
    /// One topic for each field, `<topic>/<field>`
    Split,
}

impl FromStr for TopicLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(TopicLayout::Json),
            "split" => Ok(TopicLayout::Split),
            _ => Err(format!("unknown topic layout '{}', expected 'json' or 'split'", s)),
        }
    }
}

impl fmt::Display for TopicLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TopicLayout::Json => "json".fmt(f),
            TopicLayout::Split => "split".fmt(f),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub tls: bool,
    pub credentials: Option<Credentials>,
    pub qos: QoS,
    pub retain: bool,
    pub layout: TopicLayout,
}

/// MQTT related options as given on the command line, before validation.
#[derive(Debug, Clone, Default)]
pub struct MqttSettings {
    pub broker: Option<String>,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
    pub retain: bool,
    pub layout: Option<TopicLayout>,
}

impl MqttSettings {
    /// Validate the settings and turn them into configuration for an MQTT sink, or
    /// `None` if no broker was given.
    pub fn resolve(self) -> Result<Option<MqttConfig>, ConfigError> {
        let host = match self.broker {
            Some(host) if !host.trim().is_empty() => host,
            Some(_) => return Err(ConfigError::Invalid("mqtt broker must not be empty")),
            None => {
                return if self.tls || self.username.is_some() || self.password.is_some() {
                    Err(ConfigError::Invalid("mqtt options given without an mqtt broker"))
                } else {
                    Ok(None)
                };
            }
        };

        if self.port == 0 {
            return Err(ConfigError::Invalid("mqtt port must be greater than zero"));
        }

        let topic = self.topic.trim_end_matches('/');
        if topic.is_empty() {
            return Err(ConfigError::Invalid("mqtt topic must not be empty"));
        }

        if self.client_id.is_empty() {
            return Err(ConfigError::Invalid("mqtt client id must not be empty"));
        }

        let credentials = match (self.username, self.password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Invalid("mqtt username given without a password")),
            (None, Some(_)) => return Err(ConfigError::Invalid("mqtt password given without a username")),
        };

        let qos = match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            v => return Err(ConfigError::InvalidValue("mqtt qos must be 0, 1, or 2", v.to_string())),
        };

        Ok(Some(MqttConfig {
            host,
            port: self.port,
            topic: topic.to_owned(),
            client_id: self.client_id,
            tls: self.tls,
            credentials,
            qos,
            retain: self.retain,
            layout: self.layout.unwrap_or(TopicLayout::Json),
        }))
    }
}

/// External program used to read the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// How many samples are averaged into each reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingConfig {
    pub samples: u32,
    pub warmup: Duration,
    pub delay: Duration,
}

impl SamplingConfig {
    /// Whether samples need to be averaged or a sensor can be read directly
    pub fn is_single(&self) -> bool {
        self.samples == 1 && self.warmup.is_zero() && self.delay.is_zero()
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            samples: 1,
            warmup: Duration::ZERO,
            delay: Duration::ZERO,
        }
    }
}

/// Everything needed to run the exporter. Built once at startup and never changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    pub bind: SocketAddr,
    pub interval: Duration,
    pub sensor: SensorKind,
    pub driver: DriverConfig,
    pub sampling: SamplingConfig,
    pub mqtt: Option<MqttConfig>,
    pub log_file: Option<PathBuf>,
}

impl ExporterConfig {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("poll interval must be greater than zero"));
        }

        if self.driver.program.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("sensor driver program must not be empty"));
        }

        if self.driver.timeout.is_zero() {
            return Err(ConfigError::Invalid("sensor driver timeout must be greater than zero"));
        }

        if self.sampling.samples == 0 {
            return Err(ConfigError::Invalid("number of samples must be greater than zero"));
        }

        if let Some(path) = &self.log_file {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("log file path must not be empty"));
            }
        }

        Ok(self)
    }
}

#[cfg(test)]
mod test {
    use super::{ConfigError, DriverConfig, ExporterConfig, MqttSettings, SamplingConfig, TopicLayout};
    use crate::source::SensorKind;
    use rumqttc::QoS;
    use std::str::FromStr;
    use std::time::Duration;

    fn settings() -> MqttSettings {
        MqttSettings {
            broker: Some("192.168.0.103".to_owned()),
            port: 1883,
            topic: "electric/".to_owned(),
            client_id: "telemeter".to_owned(),
            ..Default::default()
        }
    }

    fn config() -> ExporterConfig {
        ExporterConfig {
            bind: ([0, 0, 0, 0], 8002).into(),
            interval: Duration::from_secs(5),
            sensor: SensorKind::Power,
            driver: DriverConfig {
                program: "/usr/local/bin/pzem-read".into(),
                args: vec!["/dev/ttyUSB0".to_owned()],
                timeout: Duration::from_secs(10),
            },
            sampling: SamplingConfig::default(),
            mqtt: None,
            log_file: None,
        }
    }

    #[test]
    fn test_mqtt_settings_no_broker() {
        let s = MqttSettings {
            broker: None,
            ..settings()
        };

        assert_eq!(Ok(None), s.resolve());
    }

    #[test]
    fn test_mqtt_settings_tls_without_broker() {
        let s = MqttSettings {
            broker: None,
            tls: true,
            ..settings()
        };

        assert!(s.resolve().is_err());
    }

    #[test]
    fn test_mqtt_settings_defaults() {
        let c = settings().resolve().unwrap().unwrap();

        assert_eq!("electric", c.topic);
        assert_eq!(QoS::AtMostOnce, c.qos);
        assert_eq!(TopicLayout::Json, c.layout);
        assert!(c.credentials.is_none());
    }

    #[test]
    fn test_mqtt_settings_username_without_password() {
        let s = MqttSettings {
            username: Some("pi".to_owned()),
            ..settings()
        };

        assert_eq!(
            Err(ConfigError::Invalid("mqtt username given without a password")),
            s.resolve()
        );
    }

    #[test]
    fn test_mqtt_settings_credentials() {
        let s = MqttSettings {
            username: Some("pi".to_owned()),
            password: Some("secret".to_owned()),
            ..settings()
        };

        let c = s.resolve().unwrap().unwrap();
        let creds = c.credentials.unwrap();
        assert_eq!("pi", creds.username);
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn test_mqtt_settings_invalid_qos() {
        let s = MqttSettings { qos: 3, ..settings() };
        assert!(s.resolve().is_err());
    }

    #[test]
    fn test_mqtt_settings_empty_topic() {
        let s = MqttSettings {
            topic: "/".to_owned(),
            ..settings()
        };

        assert!(s.resolve().is_err());
    }

    #[test]
    fn test_exporter_config_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_exporter_config_zero_interval() {
        let c = ExporterConfig {
            interval: Duration::ZERO,
            ..config()
        };

        assert!(c.validate().is_err());
    }

    #[test]
    fn test_exporter_config_zero_samples() {
        let c = ExporterConfig {
            sampling: SamplingConfig {
                samples: 0,
                ..SamplingConfig::default()
            },
            ..config()
        };

        assert!(c.validate().is_err());
    }

    #[test]
    fn test_topic_layout_from_str() {
        assert_eq!(TopicLayout::Split, TopicLayout::from_str("SPLIT").unwrap());
        assert!(TopicLayout::from_str("xml").is_err());
    }
}
