use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::ChannelEvent;
use super::client::MqttClient;
use crate::config::TelemetryConfig;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::SensorReading;
use crate::engine::ToIntegrationMessage;

/// Telemetry integration for ventd
///
/// Subscribes to the device's sensor topic and streams decoded readings and
/// connection status changes to the engine.
pub struct TelemetryIntegration<C: MqttClient> {
    client: Arc<Mutex<C>>,
    config: TelemetryConfig,
    /// Handle to the background event pump task
    event_task: Option<JoinHandle<()>>,
}

impl<C: MqttClient + 'static> TelemetryIntegration<C> {
    /// Create a new telemetry integration
    pub fn new(client: C, config: &TelemetryConfig) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            config: config.clone(),
            event_task: None,
        }
    }

    /// Pump client events to the engine
    ///
    /// This is spawned as a separate tokio task in setup() so that
    /// handle_message() stays responsive.
    async fn pump_events_task(
        client: Arc<Mutex<C>>,
        topic: String,
        to_engine: FromIntegrationSender,
    ) {
        loop {
            // Poll with a bounded lock hold; poll_event may wait a long
            // time between events
            let event = {
                let mut client_guard = client.lock().await;
                tokio::time::timeout(
                    std::time::Duration::from_millis(100),
                    client_guard.poll_event(),
                )
                .await
                .unwrap_or_default()
            };

            match event {
                Some(ChannelEvent::Message(msg)) => {
                    if msg.topic != topic {
                        debug!("Ignoring message on unexpected topic: {}", msg.topic);
                        continue;
                    }

                    let reading = match SensorReading::from_slice(&msg.payload) {
                        Ok(reading) => reading,
                        Err(e) => {
                            warn!("Discarding undecodable telemetry payload: {}", e);
                            continue;
                        }
                    };

                    if to_engine
                        .send(FromIntegrationMessage::ReadingReceived { reading })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(ChannelEvent::StatusChanged(status)) => {
                    if to_engine
                        .send(FromIntegrationMessage::ChannelStatusChanged { status })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                None => {
                    // No event available, yield to allow other tasks
                    tokio::task::yield_now().await;
                }
            }
        }
        info!("Telemetry event pump exiting");
    }
}

#[async_trait]
impl<C: MqttClient + 'static> Integration for TelemetryIntegration<C> {
    fn name(&self) -> &str {
        "telemetry"
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        // Connect to the MQTT broker
        info!(
            "Connecting to MQTT broker at {}:{}",
            self.config.broker, self.config.port
        );
        {
            let mut client = self.client.lock().await;
            client.connect().await?;
        }

        // Subscribe to the device's sensor topic
        info!("Subscribing to telemetry topic: {}", self.config.topic);
        {
            let mut client = self.client.lock().await;
            client.subscribe(&self.config.topic).await?;
        }

        // Spawn background task to pump client events to the engine
        let client = self.client.clone();
        let topic = self.config.topic.clone();
        let task = tokio::spawn(async move {
            Self::pump_events_task(client, topic, tx).await;
        });
        self.event_task = Some(task);

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        // The telemetry channel is receive-only; commands go to the servo.
        warn!("Telemetry integration cannot handle command: {:?}", msg);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Telemetry integration shutting down");
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::ChannelStatus;
    use crate::integrations::mqtt::client::MockMqttClient;

    fn test_config() -> TelemetryConfig {
        TelemetryConfig {
            broker: "localhost".to_string(),
            port: 1883,
            client_id: "test".to_string(),
            topic: "home/sensors".to_string(),
            username: None,
            password: None,
        }
    }

    #[tokio::test]
    async fn test_setup_connects_and_subscribes() {
        let client = MockMqttClient::new();
        let mut integration = TelemetryIntegration::new(client, &test_config());
        let (tx, _rx) = mpsc::channel(16);

        integration.setup(tx).await.unwrap();

        let client = integration.client.lock().await;
        assert!(client.is_connected);
        assert_eq!(client.subscriptions, vec!["home/sensors".to_string()]);
    }

    #[tokio::test]
    async fn test_pump_decodes_and_filters_events() {
        let mut client = MockMqttClient::new();
        client.add_status(ChannelStatus::Connected);
        client.add_message("home/sensors", br#"{"temperature": 21.5}"#);
        client.add_message("home/other", br#"{"temperature": 99.0}"#);
        client.add_message("home/sensors", b"not json");
        client.add_message("home/sensors", br#"{"humidity": 60.0}"#);

        let mut integration = TelemetryIntegration::new(client, &test_config());
        let (tx, mut rx) = mpsc::channel(16);
        integration.setup(tx).await.unwrap();

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::ChannelStatusChanged { status } => {
                assert_eq!(status, ChannelStatus::Connected);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::ReadingReceived { reading } => {
                assert_eq!(reading.temperature, Some(21.5));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // The off-topic and undecodable payloads are skipped over.
        match rx.recv().await.unwrap() {
            FromIntegrationMessage::ReadingReceived { reading } => {
                assert_eq!(reading.humidity, Some(60.0));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        integration.shutdown().await.unwrap();
    }
}
