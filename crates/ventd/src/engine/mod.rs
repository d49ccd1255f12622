mod command;
mod engine;
mod integration;
mod message;
mod reading;
mod reducer;
pub mod state;
mod timer;

pub use command::CommandError;
pub use command::PresetPosition;
pub use command::SweepParams;
pub use command::VentCommand;
pub use command::validate_angle;
pub use engine::Engine;
pub(crate) use engine::SERVO_INTEGRATION;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::CommandReply;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use message::VentOutcome;
pub use reading::SensorReading;
pub use state::ChannelStatus;
pub use state::DashboardState;
