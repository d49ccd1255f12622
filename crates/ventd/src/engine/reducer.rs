//! State transitions from inbound telemetry to the display state.
//!
//! The reducer is pure: it mutates the given state and returns timer
//! instructions for the engine to interpret, never spawning or sleeping
//! itself. Every transition is unit-testable with a synthetic clock.

use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use super::reading::SensorReading;
use super::state::DashboardState;
use super::state::LogEntry;

/// Quiet period after the last truthy motion reading before the motion flag
/// decays back to inactive.
pub const MOTION_PERSISTENCE: Duration = Duration::from_secs(10);

/// Timer instructions returned by [`apply_reading`], interpreted by the
/// engine against its single-slot decay timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Drop any pending motion decay.
    CancelMotionDecay,

    /// Arm the motion decay timer, replacing any previous schedule.
    ScheduleMotionDecay { after: Duration },
}

/// Interpret a raw motion value as a boolean.
///
/// Device firmwares disagree on how to encode this field: booleans, numbers
/// and strings have all been seen on the wire. Booleans pass through,
/// numbers are truthy when nonzero, and strings only when they spell "true"
/// (any case) or "1".
pub fn normalize_motion(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => {
            let s = s.to_lowercase();
            s == "true" || s == "1"
        }
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render "N seconds/minutes/hours ago" from integer-floor elapsed time.
///
/// Seconds are always rendered in the plural form; minutes and hours are
/// singularised at exactly one.
pub fn elapsed_label(last_active: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - last_active).num_seconds().max(0);
    if secs < 60 {
        format!("{} seconds ago", secs)
    } else if secs < 3600 {
        let minutes = secs / 60;
        format!(
            "{} minute{} ago",
            minutes,
            if minutes == 1 { "" } else { "s" }
        )
    } else {
        let hours = secs / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    }
}

/// Wall-clock label attached to chart points and log entries.
fn time_label(now: DateTime<Utc>) -> String {
    now.format("%H:%M:%S").to_string()
}

fn format_reading_summary(reading: &SensorReading, motion: bool) -> String {
    let temperature = match reading.temperature {
        Some(t) => format!("{:.1}°C", t),
        None => "N/A".to_string(),
    };
    let humidity = match reading.humidity {
        Some(h) => format!("{:.1}%", h),
        None => "N/A".to_string(),
    };
    format!(
        "Temp: {}, Humidity: {}, Motion: {}, Gas: {}",
        temperature,
        humidity,
        if motion { "Detected" } else { "None" },
        if reading.gas.unwrap_or(false) {
            "Detected"
        } else {
            "None"
        },
    )
}

/// Fold one telemetry reading into the display state.
///
/// `vent_busy` suppresses telemetry angle updates while a vent command is
/// in flight, so the device's stream cannot fight a pending adjustment.
pub fn apply_reading(
    state: &mut DashboardState,
    reading: &SensorReading,
    now: DateTime<Utc>,
    vent_busy: bool,
) -> Vec<Effect> {
    let mut effects = Vec::new();
    let motion = reading.motion.as_ref().is_some_and(normalize_motion);

    if motion {
        effects.push(Effect::CancelMotionDecay);
        state.motion.active = true;
        state.motion.last_active_at = Some(now);
        effects.push(Effect::ScheduleMotionDecay {
            after: MOTION_PERSISTENCE,
        });
    }
    refresh_motion_label(state, now);

    let label = time_label(now);
    if let Some(temperature) = reading.temperature {
        state.latest.temperature = Some(temperature);
        state.temperature_series.push(label.clone(), temperature);
    }
    if let Some(humidity) = reading.humidity {
        state.latest.humidity = Some(humidity);
        state.humidity_series.push(label.clone(), humidity);
    }
    if let Some(gas) = reading.gas {
        state.latest.gas = Some(gas);
    }

    // Every reading is logged, even an empty one.
    state.events.push(LogEntry {
        time: label,
        message: format_reading_summary(reading, motion),
    });

    if let Some(angle) = reading.vent_angle {
        if !(0..=180).contains(&angle) {
            warn!("Ignoring out-of-range telemetry vent angle: {}", angle);
        } else if vent_busy {
            debug!("Vent command in flight, ignoring telemetry angle {}", angle);
        } else {
            state.vent.record_telemetry(angle as u16);
        }
    }

    effects
}

/// Decay-timer fire action: lower the motion flag.
pub fn apply_motion_decay(state: &mut DashboardState, now: DateTime<Utc>) {
    state.motion.active = false;
    refresh_motion_label(state, now);
}

/// Re-render the "last detected" label. Idempotent, and a no-op until
/// motion has been seen at least once.
pub fn refresh_motion_label(state: &mut DashboardState, now: DateTime<Utc>) {
    if let Some(last_active) = state.motion.last_active_at {
        state.motion.last_active_label = Some(elapsed_label(last_active, now));
    }
}
