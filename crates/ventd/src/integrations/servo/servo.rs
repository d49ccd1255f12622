use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::info;
use tracing::warn;

use super::client::ServoClient;
use crate::engine;
use crate::engine::CommandReply;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;
use crate::engine::VentCommand;
use crate::engine::VentOutcome;

/// Integration that drives the vent servo controller
///
/// Commands run concurrently, each in its own task. Resolutions are stamped
/// with a sequence number at completion time, so whichever command finishes
/// last carries the highest number and wins the cached angle.
pub struct ServoIntegration {
    client: Arc<ServoClient>,
    to_engine: Option<FromIntegrationSender>,
    resolution_seq: Arc<AtomicU64>,
}

impl ServoIntegration {
    /// Create a new ServoIntegration around a constructed client
    pub fn new(client: ServoClient) -> Self {
        Self {
            client: Arc::new(client),
            to_engine: None,
            resolution_seq: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Execute one command against the device and shape the outcome message.
async fn execute(client: &ServoClient, command: &VentCommand) -> CommandReply {
    match command {
        VentCommand::SetAngle { angle } => {
            let confirmed = client.set_angle(*angle).await?;
            Ok(VentOutcome::Confirmed {
                angle: confirmed.angle,
                message: format!("Angle set to {}°", confirmed.angle),
            })
        }
        VentCommand::SetPreset { position } => {
            let confirmed = client.set_preset(*position).await?;
            Ok(VentOutcome::Confirmed {
                angle: confirmed.angle,
                message: format!(
                    "Moved to {} position ({}°)",
                    position.label(),
                    confirmed.angle
                ),
            })
        }
        VentCommand::Sweep { params } => {
            let ack = client.start_sweep(params).await?;
            Ok(VentOutcome::Acknowledged {
                message: format!("Sweep completed: {}° to {}°", ack.start, ack.end),
            })
        }
    }
}

async fn run_command_task(
    client: Arc<ServoClient>,
    resolution_seq: Arc<AtomicU64>,
    to_engine: FromIntegrationSender,
    command: VentCommand,
    reply: oneshot::Sender<CommandReply>,
) {
    let result = execute(&client, &command).await;

    let outcome = match &result {
        Ok(outcome) => outcome.clone(),
        Err(e) => VentOutcome::Failed {
            message: e.to_string(),
        },
    };

    // Stamped at resolution time, so later resolutions always carry higher
    // numbers than earlier ones.
    let seq = resolution_seq.fetch_add(1, Ordering::SeqCst) + 1;
    if to_engine
        .send(FromIntegrationMessage::CommandResolved { seq, outcome })
        .await
        .is_err()
    {
        warn!("Engine gone, dropping vent command resolution");
    }

    let sweep_succeeded = matches!((&command, &result), (VentCommand::Sweep { .. }, Ok(_)));

    // The caller may have stopped waiting; the cached state update above
    // does not depend on this reply being received.
    let _ = reply.send(result);

    if sweep_succeeded {
        refresh_angle(&client, &resolution_seq, &to_engine).await;
    }
}

/// Fetch the authoritative angle and report it as a refresh.
async fn refresh_angle(
    client: &ServoClient,
    resolution_seq: &AtomicU64,
    to_engine: &FromIntegrationSender,
) {
    match client.fetch_current_angle().await {
        Ok(angle) => {
            let seq = resolution_seq.fetch_add(1, Ordering::SeqCst) + 1;
            if to_engine
                .send(FromIntegrationMessage::AngleRefreshed { seq, angle })
                .await
                .is_err()
            {
                warn!("Engine gone, dropping vent angle refresh");
            }
        }
        Err(e) => {
            warn!("Failed to fetch vent angle: {}", e);
        }
    }
}

#[async_trait]
impl Integration for ServoIntegration {
    fn name(&self) -> &str {
        engine::SERVO_INTEGRATION
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        info!("Vent controller at {}", self.client.base_url());
        self.to_engine = Some(tx.clone());

        // Initialise the displayed angle from device truth. A failure here
        // is not fatal; telemetry or the first command will fill it in.
        let client = self.client.clone();
        let resolution_seq = self.resolution_seq.clone();
        tokio::spawn(async move {
            refresh_angle(&client, &resolution_seq, &tx).await;
        });

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        let ToIntegrationMessage::VentCommand { command, reply } = msg;
        info!("Dispatching vent command: {:?}", command);

        let Some(to_engine) = self.to_engine.clone() else {
            warn!("Vent command received before setup, dropping");
            return Ok(());
        };

        // Each command runs in its own task so overlapping commands never
        // block one another.
        tokio::spawn(run_command_task(
            self.client.clone(),
            self.resolution_seq.clone(),
            to_engine,
            command,
            reply,
        ));

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Servo integration shutting down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::Json;
    use axum::Router;
    use axum::routing::get;
    use axum::routing::post;
    use serde_json::Value;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::super::client::stub::spawn_device;
    use super::*;
    use crate::config::ServoConfig;
    use crate::engine::CommandError;
    use crate::engine::SweepParams;

    fn integration_for(base_url: &str) -> ServoIntegration {
        let client = ServoClient::new(&ServoConfig {
            base_url: base_url.to_string(),
            timeout_secs: 2,
        })
        .unwrap();
        ServoIntegration::new(client)
    }

    async fn dispatch(
        integration: &mut ServoIntegration,
        command: VentCommand,
    ) -> oneshot::Receiver<CommandReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        integration
            .handle_message(ToIntegrationMessage::VentCommand {
                command,
                reply: reply_tx,
            })
            .await
            .unwrap();
        reply_rx
    }

    #[tokio::test]
    async fn invalid_commands_resolve_as_failures_without_a_device() {
        let mut integration = integration_for("http://127.0.0.1:1");
        let (tx, mut rx) = mpsc::channel(16);
        integration.to_engine = Some(tx);

        let reply_rx = dispatch(&mut integration, VentCommand::SetAngle { angle: 240 }).await;

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::CommandResolved { seq, outcome } => {
                assert_eq!(seq, 1);
                assert_eq!(
                    outcome,
                    VentOutcome::Failed {
                        message: CommandError::AngleOutOfRange(240).to_string(),
                    }
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(
            reply_rx.await.unwrap(),
            Err(CommandError::AngleOutOfRange(240))
        );
    }

    #[tokio::test]
    async fn successful_commands_resolve_with_the_device_angle() {
        let router = Router::new().route(
            "/api/set_angle",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "status": "success", "angle": body["angle"] }))
            }),
        );
        let base = spawn_device(router).await;

        let mut integration = integration_for(&base);
        let (tx, mut rx) = mpsc::channel(16);
        integration.to_engine = Some(tx);

        let reply_rx = dispatch(&mut integration, VentCommand::SetAngle { angle: 135 }).await;

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::CommandResolved { seq, outcome } => {
                assert_eq!(seq, 1);
                assert_eq!(
                    outcome,
                    VentOutcome::Confirmed {
                        angle: 135,
                        message: "Angle set to 135°".to_string(),
                    }
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(reply_rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn sweeps_acknowledge_then_refresh_the_angle() {
        let router = Router::new()
            .route(
                "/api/sweep",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({
                        "status": "success",
                        "start": body["start"],
                        "end": body["end"],
                    }))
                }),
            )
            .route(
                "/api/get_angle",
                get(|| async { Json(json!({ "angle": 180 })) }),
            );
        let base = spawn_device(router).await;

        let mut integration = integration_for(&base);
        let (tx, mut rx) = mpsc::channel(16);
        integration.to_engine = Some(tx);

        let reply_rx = dispatch(
            &mut integration,
            VentCommand::Sweep {
                params: SweepParams {
                    start: 0,
                    end: 180,
                    step: 10,
                    delay: 0.05,
                },
            },
        )
        .await;

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::CommandResolved { seq, outcome } => {
                assert_eq!(seq, 1);
                assert_eq!(
                    outcome,
                    VentOutcome::Acknowledged {
                        message: "Sweep completed: 0° to 180°".to_string(),
                    }
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(reply_rx.await.unwrap().is_ok());

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::AngleRefreshed { seq, angle } => {
                assert_eq!(seq, 2);
                assert_eq!(angle, 180);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn setup_reports_the_startup_angle() {
        let router = Router::new().route(
            "/api/get_angle",
            get(|| async { Json(json!({ "angle": 90 })) }),
        );
        let base = spawn_device(router).await;

        let mut integration = integration_for(&base);
        let (tx, mut rx) = mpsc::channel(16);
        integration.setup(tx).await.unwrap();

        match rx.recv().await.unwrap() {
            FromIntegrationMessage::AngleRefreshed { seq, angle } => {
                assert_eq!(seq, 1);
                assert_eq!(angle, 90);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
