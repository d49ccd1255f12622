//! Vent command vocabulary and client-side validation.
//!
//! Commands are validated before they are dispatched anywhere; an invalid
//! command never reaches the network.

use serde::Deserialize;
use serde::Serialize;
use strum::Display;

/// Servo range, in degrees.
pub const MIN_ANGLE: i64 = 0;
pub const MAX_ANGLE: i64 = 180;

/// Largest sweep step, in degrees.
pub const MAX_SWEEP_STEP: i64 = 45;

/// Bounds for the per-step sweep delay, in seconds.
pub const MIN_SWEEP_DELAY: f64 = 0.01;
pub const MAX_SWEEP_DELAY: f64 = 1.0;

/// Named servo positions offered by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PresetPosition {
    FarLeft,
    Left,
    Center,
    Right,
    FarRight,
}

impl PresetPosition {
    /// Human-readable label used in status messages.
    pub fn label(&self) -> &'static str {
        match self {
            PresetPosition::FarLeft => "Far Left",
            PresetPosition::Left => "Left",
            PresetPosition::Center => "Center",
            PresetPosition::Right => "Right",
            PresetPosition::FarRight => "Far Right",
        }
    }

    /// Angle the device maps this position to.
    pub fn angle(&self) -> u16 {
        match self {
            PresetPosition::FarLeft => 0,
            PresetPosition::Left => 45,
            PresetPosition::Center => 90,
            PresetPosition::Right => 135,
            PresetPosition::FarRight => 180,
        }
    }
}

/// Parameters for a sweep between two angles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepParams {
    pub start: i64,
    pub end: i64,
    pub step: i64,
    pub delay: f64,
}

impl SweepParams {
    /// Bounds check: angles within the servo range, step in (0, 45], delay
    /// in [0.01, 1.0] seconds.
    pub fn validate(&self) -> Result<(), CommandError> {
        validate_angle(self.start)?;
        validate_angle(self.end)?;
        if self.step <= 0 || self.step > MAX_SWEEP_STEP {
            return Err(CommandError::StepOutOfRange(self.step));
        }
        if !(MIN_SWEEP_DELAY..=MAX_SWEEP_DELAY).contains(&self.delay) {
            return Err(CommandError::DelayOutOfRange(self.delay));
        }
        Ok(())
    }
}

/// Check a requested angle against the servo's range.
pub fn validate_angle(angle: i64) -> Result<(), CommandError> {
    if !(MIN_ANGLE..=MAX_ANGLE).contains(&angle) {
        return Err(CommandError::AngleOutOfRange(angle));
    }
    Ok(())
}

/// A command addressed to the vent servo.
#[derive(Debug, Clone, PartialEq)]
pub enum VentCommand {
    SetAngle { angle: i64 },
    SetPreset { position: PresetPosition },
    Sweep { params: SweepParams },
}

impl VentCommand {
    /// Client-side validation, applied before any dispatch.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            VentCommand::SetAngle { angle } => validate_angle(*angle),
            VentCommand::SetPreset { .. } => Ok(()),
            VentCommand::Sweep { params } => params.validate(),
        }
    }
}

/// Why a vent command could not be completed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("Angle must be between 0 and 180 degrees, got {0}")]
    AngleOutOfRange(i64),

    #[error("Sweep step must be between 1 and 45 degrees, got {0}")]
    StepOutOfRange(i64),

    #[error("Sweep delay must be between 0.01 and 1 seconds, got {0}")]
    DelayOutOfRange(f64),

    #[error("Vent controller unreachable: {0}")]
    Transport(String),

    #[error("Vent controller rejected the command: {0}")]
    Rejected(String),

    #[error("Unexpected reply from vent controller: {0}")]
    Malformed(String),

    #[error("No vent controller is configured")]
    Unavailable,
}

impl CommandError {
    /// True for validation failures that never produced a network call.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            CommandError::AngleOutOfRange(_)
                | CommandError::StepOutOfRange(_)
                | CommandError::DelayOutOfRange(_)
        )
    }
}
