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

use crate::config::{MqttConfig, TopicLayout};
use crate::reading::Reading;
use crate::sink::core::{Sink, SinkError, SinkErrorKind, SinkKind};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, Transport};
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_CAPACITY: usize = 32;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Abstraction around an MQTT client connection to allow for easier testing.
pub trait MqttClient: Send {
    fn is_connected(&self) -> bool;
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<(), SinkError>;
}

/// MQTT client connected to a broker.
///
/// The connection is driven by a background task on the tokio runtime which reconnects
/// whenever the broker becomes unreachable. Publishes are queued without blocking and
/// fail immediately while there is no connection to the broker.
pub struct BrokerClient {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    host: String,
    port: u16,
}

impl BrokerClient {
    /// Create a client and start its connection task. Must be called from within
    /// a tokio runtime.
    pub fn connect(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(KEEP_ALIVE);

        if let Some(creds) = &config.credentials {
            options.set_credentials(&creds.username, &creds.password);
        }

        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let state = connected.clone();
        let host = config.host.clone();
        let port = config.port;

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            state.store(true, Ordering::SeqCst);
                            tracing::info!(message = "connected to mqtt broker", host = %host, port = port);
                        } else {
                            state.store(false, Ordering::SeqCst);
                            tracing::error!(message = "mqtt broker refused connection", host = %host, port = port, code = ?ack.code);
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                    Ok(Event::Outgoing(outgoing)) => {
                        tracing::trace!(message = "mqtt outgoing", packet = ?outgoing);
                    }
                    Ok(Event::Incoming(incoming)) => {
                        tracing::trace!(message = "mqtt incoming", packet = ?incoming);
                    }
                    Err(e) => {
                        if state.swap(false, Ordering::SeqCst) {
                            tracing::warn!(message = "lost connection to mqtt broker", host = %host, port = port, error = %e);
                        } else {
                            tracing::debug!(message = "unable to connect to mqtt broker", host = %host, port = port, error = %e);
                        }

                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        BrokerClient {
            client,
            connected,
            host: config.host.clone(),
            port: config.port,
        }
    }
}

impl MqttClient for BrokerClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<(), SinkError> {
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(|e| SinkError::KindMsgCause(SinkErrorKind::PublishFailed, "unable to queue mqtt message", Box::new(e)))
    }
}

impl Debug for BrokerClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClient")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Sink that publishes readings to an MQTT broker.
///
/// With `TopicLayout::Json` the fields of each reading are published as a single JSON
/// object to the configured topic. With `TopicLayout::Split` the value of each field is
/// published as text to its own topic, `<topic>/<field>`.
///
/// Split messages are queued one at a time. If the client's request queue fills up part
/// way through a reading, the fields already queued are still sent to the broker and the
/// publish fails for the rest.
#[derive(Debug)]
pub struct MqttSink<C> {
    client: C,
    topic: String,
    layout: TopicLayout,
    qos: QoS,
    retain: bool,
}

impl<C> MqttSink<C>
where
    C: MqttClient,
{
    pub fn new(client: C, topic: &str, layout: TopicLayout, qos: QoS, retain: bool) -> Self {
        MqttSink {
            client,
            topic: topic.trim_end_matches('/').to_owned(),
            layout,
            qos,
            retain,
        }
    }

    pub fn from_config(client: C, config: &MqttConfig) -> Self {
        Self::new(client, &config.topic, config.layout, config.qos, config.retain)
    }

    /// Topics and payloads to publish for a reading.
    fn messages(&self, reading: &Reading) -> Result<Vec<(String, Vec<u8>)>, SinkError> {
        match self.layout {
            TopicLayout::Json => {
                let payload = serde_json::to_vec(reading.fields()).map_err(|e| {
                    SinkError::KindMsgCause(SinkErrorKind::PublishFailed, "unable to serialize reading", Box::new(e))
                })?;

                Ok(vec![(self.topic.clone(), payload)])
            }
            TopicLayout::Split => Ok(reading
                .fields()
                .iter()
                .map(|(name, value)| (format!("{}/{}", self.topic, name), value.to_string().into_bytes()))
                .collect()),
        }
    }
}

impl<C> Sink for MqttSink<C>
where
    C: MqttClient,
{
    fn kind(&self) -> SinkKind {
        SinkKind::Mqtt
    }

    fn publish(&mut self, reading: &Reading) -> Result<(), SinkError> {
        if !self.client.is_connected() {
            return Err(SinkError::KindMsg(
                SinkErrorKind::PublishFailed,
                "not connected to mqtt broker",
            ));
        }

        let messages = self.messages(reading)?;
        let total = messages.len();

        for (sent, (topic, payload)) in messages.into_iter().enumerate() {
            if let Err(e) = self.client.publish(&topic, payload, self.qos, self.retain) {
                if sent > 0 {
                    tracing::warn!(message = "partially published reading to mqtt", topic = %self.topic, sent = sent, total = total);
                }

                return Err(e);
            }
        }

        tracing::debug!(message = "published reading to mqtt", topic = %self.topic);
        Ok(())
    }
}
