use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing;

use crate::config::TelemetryConfig;
use crate::engine::ChannelStatus;

/// MQTT message received from a subscription
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Something the connection produced: a message or a status transition
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(MqttMessage),
    StatusChanged(ChannelStatus),
}

/// Trait for MQTT client operations
///
/// This trait allows for mocking the MQTT client for testing purposes
#[async_trait]
pub trait MqttClient: Send + Sync {
    /// Connect to the MQTT broker
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>>;

    /// Subscribe to an MQTT topic
    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>>;

    /// Poll for the next event from the connection
    ///
    /// Returns None if no event is available or if the client should stop
    async fn poll_event(&mut self) -> Option<ChannelEvent>;
}

/// Mock MQTT client for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockMqttClient {
    pub events: Vec<ChannelEvent>,
    pub subscriptions: Vec<String>,
    pub is_connected: bool,
}

#[cfg(test)]
#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        self.is_connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn poll_event(&mut self) -> Option<ChannelEvent> {
        if self.events.is_empty() {
            None
        } else {
            Some(self.events.remove(0))
        }
    }
}

#[cfg(test)]
impl MockMqttClient {
    /// Create a new mock MQTT client
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message event, delivered in insertion order
    pub fn add_message(&mut self, topic: &str, payload: &[u8]) {
        self.events.push(ChannelEvent::Message(MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }));
    }

    /// Queue a connection status event
    pub fn add_status(&mut self, status: ChannelStatus) {
        self.events.push(ChannelEvent::StatusChanged(status));
    }
}

/// Real MQTT client implementation using rumqttc
pub struct RumqttcClient {
    /// MQTT connection options (stored for lazy initialization)
    mqtt_options: MqttOptions,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Event receiver (created in connect())
    event_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,
}

impl RumqttcClient {
    /// Create a new RumqttcClient from configuration
    pub fn new(config: &TelemetryConfig) -> anyhow::Result<Self> {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);

        // Set keep-alive interval
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        // Set credentials if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        Ok(Self {
            mqtt_options,
            client: None,
            event_rx: None,
            event_loop_task: None,
        })
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        // Create client and event loop
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options.clone(), 10);

        // Create channel for events
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Spawn background task to poll event loop
        let task = tokio::spawn(async move {
            loop {
                let event = match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        ChannelEvent::StatusChanged(ChannelStatus::Connected)
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        ChannelEvent::Message(MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                        })
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        ChannelEvent::StatusChanged(ChannelStatus::Disconnected)
                    }
                    Ok(_) => {
                        // Ignore other events (puback, pingresp, etc.)
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("MQTT event loop error: {}", e);
                        if event_tx
                            .send(ChannelEvent::StatusChanged(ChannelStatus::Reconnecting))
                            .is_err()
                        {
                            break;
                        }
                        // rumqttc reconnects on the next poll; sleep briefly
                        // before retrying
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                // Send to channel; if receiver dropped, exit
                if event_tx.send(event).is_err() {
                    break;
                }
            }
            tracing::info!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.event_rx = Some(event_rx);
        self.event_loop_task = Some(task);

        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "MQTT client not connected. Call connect() first.",
                ))
            })?;

        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)?;

        Ok(())
    }

    async fn poll_event(&mut self) -> Option<ChannelEvent> {
        match &mut self.event_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}
