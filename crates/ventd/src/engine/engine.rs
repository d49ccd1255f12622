use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::command::CommandError;
use super::command::VentCommand;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::CommandReply;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::message::VentOutcome;
use super::reducer;
use super::reducer::Effect;
use super::state::DashboardState;
use super::timer::DecayTimer;
use crate::engine::IntegrationContext;

/// ventd engine
///
/// This structure handles the flow of events, folding them into the
/// dashboard state, routing vent commands to the servo integration, and
/// maintaining a view of the world with DashboardState.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<DashboardState>,

    /// Communication channels to integrations (for commands)
    integration_channels: HashMap<String, ToIntegrationSender>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations and timers to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Handles for integration tasks
    integration_handles: Vec<JoinHandle<()>>,

    /// Vent commands dispatched but not yet resolved
    inflight_commands: AtomicUsize,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// How often the elapsed-motion label is re-rendered between readings
const LABEL_REFRESH_PERIOD: Duration = Duration::from_secs(60);

/// Registry name the vent servo integration answers to
pub(crate) const SERVO_INTEGRATION: &str = "servo";

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            integration_channels: HashMap::new(),
            message_rx: Mutex::new(message_rx),
            message_tx,
            integration_handles: Vec::new(),
            inflight_commands: AtomicUsize::new(0),
        }
    }

    /// Register integrations from configuration
    ///
    /// This is a convenience method that checks the config and registers
    /// any enabled integrations.
    pub fn register_integrations_from_config(
        &mut self,
        cfg: &crate::config::Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }

        Ok(())
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        self.integration_channels
            .insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles.push(handle);
    }

    /// Validate a vent command and dispatch it to the servo integration.
    ///
    /// Returns a receiver that resolves once the device confirms or the
    /// command fails. Invalid commands are rejected here without being
    /// dispatched and without touching the in-flight count.
    pub fn send_vent_command(
        &self,
        command: VentCommand,
    ) -> Result<oneshot::Receiver<CommandReply>, CommandError> {
        command.validate()?;

        let tx = self
            .integration_channels
            .get(SERVO_INTEGRATION)
            .ok_or(CommandError::Unavailable)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.inflight_commands.fetch_add(1, Ordering::SeqCst);
        if tx
            .send(ToIntegrationMessage::VentCommand {
                command,
                reply: reply_tx,
            })
            .is_err()
        {
            // The integration task is gone, so no resolution will arrive.
            let _ = self
                .inflight_commands
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            return Err(CommandError::Unavailable);
        }
        Ok(reply_rx)
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        // Periodic nudge so "N minutes ago" stays fresh between readings
        let ticker = {
            let tx = self.message_tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(LABEL_REFRESH_PERIOD);
                // interval's first tick completes immediately; skip it
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if tx
                        .send(FromIntegrationMessage::LabelRefreshTick)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };

        // Main event loop - only receives FromIntegration messages
        let mut decay_timer = DecayTimer::new();
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg, &mut decay_timer);
        }

        ticker.abort();
        info!("Engine shutting down");
        Ok(())
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<DashboardState> {
        self.state.load_full()
    }

    /// Handle an event from an integration or timer
    fn handle_event(&self, msg: FromIntegrationMessage, decay_timer: &mut DecayTimer) {
        match msg {
            FromIntegrationMessage::ReadingReceived { reading } => {
                debug!("Reading received: {:?}", reading);
                let vent_busy = self.inflight_commands.load(Ordering::SeqCst) > 0;

                let effects = {
                    let mut state = DashboardState::clone(&self.state.load());
                    let effects =
                        reducer::apply_reading(&mut state, &reading, Utc::now(), vent_busy);
                    self.state.store(Arc::new(state));
                    effects
                };

                for effect in effects {
                    match effect {
                        Effect::CancelMotionDecay => decay_timer.cancel(),
                        Effect::ScheduleMotionDecay { after } => {
                            decay_timer.schedule(after, &self.message_tx)
                        }
                    }
                }
            }
            FromIntegrationMessage::ChannelStatusChanged { status } => {
                if self.state.load().channel == status {
                    return;
                }
                info!("Telemetry channel {}", status);

                let mut state = DashboardState::clone(&self.state.load());
                state.channel = status;
                self.state.store(Arc::new(state));
            }
            FromIntegrationMessage::CommandResolved { seq, outcome } => {
                // One decrement per resolution; a resolution this engine
                // never counted leaves the count at zero.
                let _ = self
                    .inflight_commands
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

                match &outcome {
                    VentOutcome::Failed { message } => warn!("Vent command failed: {}", message),
                    VentOutcome::Confirmed { message, .. }
                    | VentOutcome::Acknowledged { message } => {
                        info!("Vent command resolved: {}", message)
                    }
                }

                let mut state = DashboardState::clone(&self.state.load());
                if state.vent.record_resolution(seq, &outcome) {
                    self.state.store(Arc::new(state));
                } else {
                    debug!("Dropping stale vent resolution (seq {})", seq);
                }
            }
            FromIntegrationMessage::AngleRefreshed { seq, angle } => {
                let mut state = DashboardState::clone(&self.state.load());
                if state.vent.record_refresh(seq, angle) {
                    debug!("Vent angle refreshed: {}°", angle);
                    self.state.store(Arc::new(state));
                } else {
                    debug!("Dropping stale vent angle refresh (seq {})", seq);
                }
            }
            FromIntegrationMessage::MotionDecayElapsed { generation } => {
                if !decay_timer.is_current(generation) {
                    debug!("Dropping superseded motion decay fire");
                    return;
                }

                let mut state = DashboardState::clone(&self.state.load());
                reducer::apply_motion_decay(&mut state, Utc::now());
                self.state.store(Arc::new(state));
            }
            FromIntegrationMessage::LabelRefreshTick => {
                if self.state.load().motion.last_active_at.is_none() {
                    return;
                }

                let mut state = DashboardState::clone(&self.state.load());
                reducer::refresh_motion_label(&mut state, Utc::now());
                self.state.store(Arc::new(state));
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::engine::reading::SensorReading;
    use crate::engine::state::ChannelStatus;

    /// Servo stand-in that accepts commands and never resolves them.
    struct NullServo;

    #[async_trait]
    impl Integration for NullServo {
        fn name(&self) -> &str {
            SERVO_INTEGRATION
        }

        async fn setup(&mut self, _tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
            Ok(())
        }

        async fn handle_message(
            &mut self,
            _msg: ToIntegrationMessage,
        ) -> Result<(), Box<dyn Error + Send>> {
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
            Ok(())
        }
    }

    fn reading(value: serde_json::Value) -> FromIntegrationMessage {
        FromIntegrationMessage::ReadingReceived {
            reading: SensorReading::from_value(&value),
        }
    }

    fn confirmed(angle: u16) -> VentOutcome {
        VentOutcome::Confirmed {
            angle,
            message: format!("Angle set to {}°", angle),
        }
    }

    #[test]
    fn vent_commands_require_a_registered_controller() {
        let engine = Engine::new();
        let err = engine
            .send_vent_command(VentCommand::SetAngle { angle: 90 })
            .unwrap_err();
        assert_eq!(err, CommandError::Unavailable);
    }

    #[tokio::test]
    async fn invalid_commands_fail_before_dispatch() {
        let mut engine = Engine::new();
        engine.register_integration(SERVO_INTEGRATION.to_string(), Box::new(NullServo));
        let mut timer = DecayTimer::new();

        let err = engine
            .send_vent_command(VentCommand::SetAngle { angle: 200 })
            .unwrap_err();
        assert_eq!(err, CommandError::AngleOutOfRange(200));

        // A rejected command is not in flight, so telemetry still lands.
        engine.handle_event(reading(json!({"vent_angle": 70})), &mut timer);
        assert_eq!(engine.state_snapshot().vent.angle, Some(70));
    }

    #[tokio::test]
    async fn inflight_command_suppresses_telemetry_angle() {
        let mut engine = Engine::new();
        engine.register_integration(SERVO_INTEGRATION.to_string(), Box::new(NullServo));
        let mut timer = DecayTimer::new();

        let _reply = engine
            .send_vent_command(VentCommand::SetAngle { angle: 90 })
            .unwrap();

        engine.handle_event(reading(json!({"vent_angle": 40})), &mut timer);
        assert_eq!(engine.state_snapshot().vent.angle, None);

        engine.handle_event(
            FromIntegrationMessage::CommandResolved {
                seq: 1,
                outcome: confirmed(90),
            },
            &mut timer,
        );
        assert_eq!(engine.state_snapshot().vent.angle, Some(90));

        // Resolved, so the stream owns the angle again.
        engine.handle_event(reading(json!({"vent_angle": 40})), &mut timer);
        assert_eq!(engine.state_snapshot().vent.angle, Some(40));
    }

    #[tokio::test]
    async fn resolutions_apply_in_sequence_order() {
        let engine = Engine::new();
        let mut timer = DecayTimer::new();

        engine.handle_event(
            FromIntegrationMessage::CommandResolved {
                seq: 2,
                outcome: confirmed(135),
            },
            &mut timer,
        );
        engine.handle_event(
            FromIntegrationMessage::CommandResolved {
                seq: 1,
                outcome: confirmed(45),
            },
            &mut timer,
        );

        let state = engine.state_snapshot();
        assert_eq!(state.vent.angle, Some(135));
        assert_eq!(
            state.vent.status_message.as_deref(),
            Some("Angle set to 135°")
        );

        // Uncounted resolutions must not leave a phantom in-flight command.
        engine.handle_event(reading(json!({"vent_angle": 10})), &mut timer);
        assert_eq!(engine.state_snapshot().vent.angle, Some(10));
    }

    #[tokio::test]
    async fn channel_status_changes_are_stored() {
        let engine = Engine::new();
        let mut timer = DecayTimer::new();
        assert_eq!(engine.state_snapshot().channel, ChannelStatus::Disconnected);

        engine.handle_event(
            FromIntegrationMessage::ChannelStatusChanged {
                status: ChannelStatus::Connected,
            },
            &mut timer,
        );
        assert_eq!(engine.state_snapshot().channel, ChannelStatus::Connected);

        engine.handle_event(
            FromIntegrationMessage::ChannelStatusChanged {
                status: ChannelStatus::Reconnecting,
            },
            &mut timer,
        );
        assert_eq!(engine.state_snapshot().channel, ChannelStatus::Reconnecting);
    }

    #[tokio::test]
    async fn repeated_channel_status_leaves_state_untouched() {
        let engine = Engine::new();
        let mut timer = DecayTimer::new();

        engine.handle_event(
            FromIntegrationMessage::ChannelStatusChanged {
                status: ChannelStatus::Reconnecting,
            },
            &mut timer,
        );
        let before = engine.state_snapshot();

        // The channel client reports Reconnecting on every retry tick.
        engine.handle_event(
            FromIntegrationMessage::ChannelStatusChanged {
                status: ChannelStatus::Reconnecting,
            },
            &mut timer,
        );
        let after = engine.state_snapshot();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test(start_paused = true)]
    async fn motion_decays_after_the_quiet_period() {
        let engine = Engine::new();
        let mut timer = DecayTimer::new();

        engine.handle_event(reading(json!({"motion": true})), &mut timer);
        assert!(engine.state_snapshot().motion.active);

        // The armed timer delivers its fire through the engine channel.
        let fire = engine.message_rx.lock().await.recv().await.unwrap();
        engine.handle_event(fire, &mut timer);

        let state = engine.state_snapshot();
        assert!(!state.motion.active);
        assert!(state.motion.last_active_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_decay_fires_are_ignored() {
        let engine = Engine::new();
        let mut timer = DecayTimer::new();

        engine.handle_event(reading(json!({"motion": true})), &mut timer);

        // The first fire reaches the queue just as a renewed reading
        // replaces its schedule.
        let stale_fire = engine.message_rx.lock().await.recv().await.unwrap();
        engine.handle_event(reading(json!({"motion": true})), &mut timer);
        engine.handle_event(stale_fire, &mut timer);
        assert!(engine.state_snapshot().motion.active);

        // The renewed schedule still decays on time.
        let live_fire = engine.message_rx.lock().await.recv().await.unwrap();
        engine.handle_event(live_fire, &mut timer);
        assert!(!engine.state_snapshot().motion.active);
    }

    #[tokio::test]
    async fn label_tick_is_a_noop_before_any_motion() {
        let engine = Engine::new();
        let mut timer = DecayTimer::new();

        engine.handle_event(FromIntegrationMessage::LabelRefreshTick, &mut timer);
        assert_eq!(engine.state_snapshot().motion.last_active_label, None);
    }
}
