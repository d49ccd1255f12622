//! Type-safe message system for ventd
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use tokio::sync::oneshot;

use super::command::CommandError;
use super::command::VentCommand;
use super::reading::SensorReading;
use super::state::ChannelStatus;

/// Outcome of a vent command, applied to the cached vent state in
/// resolution-sequence order.
#[derive(Debug, Clone, PartialEq)]
pub enum VentOutcome {
    /// The device confirmed the command and reported its angle.
    Confirmed { angle: u16, message: String },

    /// The device accepted the command without reporting an authoritative
    /// angle (sweeps; the angle is fetched separately afterwards).
    Acknowledged { message: String },

    /// The command failed. The cached angle is left untouched.
    Failed { message: String },
}

/// Reply delivered to the original caller of a vent command.
pub type CommandReply = Result<VentOutcome, CommandError>;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug)]
pub enum FromIntegrationMessage {
    /// A telemetry payload arrived on the sensor channel.
    ReadingReceived { reading: SensorReading },

    /// The telemetry transport changed connection state.
    ChannelStatusChanged { status: ChannelStatus },

    /// A vent command resolved, successfully or not.
    CommandResolved { seq: u64, outcome: VentOutcome },

    /// An authoritative angle fetch completed (startup, post-sweep).
    AngleRefreshed { seq: u64, angle: u16 },

    /// The motion decay timer fired.
    MotionDecayElapsed { generation: u64 },

    /// Periodic nudge to re-render the elapsed-motion label.
    LabelRefreshTick,
}

/// Messages FROM the engine TO integrations (commands)
pub enum ToIntegrationMessage {
    /// Execute a vent command against the device and report the resolution.
    VentCommand {
        command: VentCommand,
        reply: oneshot::Sender<CommandReply>,
    },
}

impl std::fmt::Debug for ToIntegrationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToIntegrationMessage::VentCommand { command, .. } => f
                .debug_struct("VentCommand")
                .field("command", command)
                .field("reply", &"<oneshot>")
                .finish(),
        }
    }
}
