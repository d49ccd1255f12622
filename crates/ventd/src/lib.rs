pub mod api;
pub mod config;
mod engine;
mod integrations;

pub use config::Config;
pub use config::LogLevel;
pub use engine::ChannelStatus;
pub use engine::CommandError;
pub use engine::CommandReply;
pub use engine::DashboardState;
pub use engine::Engine;
pub use engine::PresetPosition;
pub use engine::SensorReading;
pub use engine::SweepParams;
pub use engine::VentCommand;
pub use engine::VentOutcome;
