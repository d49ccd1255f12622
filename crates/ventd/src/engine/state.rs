use std::collections::VecDeque;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use strum::Display;

use super::message::VentOutcome;

/// Maximum number of points kept per chart series.
pub const MAX_SERIES_POINTS: usize = 20;

/// Maximum number of entries kept in the event log.
pub const MAX_LOG_ENTRIES: usize = 50;

/// Most recently seen value of each plain sensor field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatestReadings {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas: Option<bool>,
}

/// Motion flag with its decay bookkeeping.
///
/// `active` is raised by any truthy motion reading and lowered by the decay
/// timer after ten quiet seconds. The pending timer itself lives in the
/// engine; this is only the serialisable view of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MotionState {
    pub active: bool,
    pub last_active_at: Option<DateTime<Utc>>,
    pub last_active_label: Option<String>,
}

/// Paired labels/values buffer for charting, bounded to the most recent
/// [`MAX_SERIES_POINTS`] insertions, oldest evicted first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeSeries {
    labels: Vec<String>,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Append a point, evicting the oldest once the buffer is full.
    ///
    /// Labels and values only ever move together, so the two sides cannot
    /// drift out of step.
    pub fn push(&mut self, label: String, value: f64) {
        self.labels.push(label);
        self.values.push(value);
        if self.labels.len() > MAX_SERIES_POINTS {
            self.labels.remove(0);
            self.values.remove(0);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// One rendered line in the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub time: String,
    pub message: String,
}

/// Rolling event log, newest entry first, bounded to [`MAX_LOG_ENTRIES`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
}

impl EventLog {
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(MAX_LOG_ENTRIES);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest entry, if any.
    pub fn newest(&self) -> Option<&LogEntry> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

/// Connection state of the telemetry channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelStatus {
    Connected,
    Reconnecting,
    #[default]
    Disconnected,
}

/// Cached view of the servo vent. The remote device owns the real angle.
///
/// The angle is only ever written from confirmed sources: a command
/// resolution, an authoritative angle fetch, or telemetry. Resolutions are
/// ordered by the sequence number stamped when they resolve; anything older
/// than the newest applied resolution is dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VentState {
    /// Confirmed angle in degrees, `None` until the first confirmation.
    pub angle: Option<u16>,

    /// Outcome of the most recent command, for display.
    pub status_message: Option<String>,

    /// Sequence number of the newest applied resolution.
    #[serde(skip)]
    last_seq: u64,
}

impl VentState {
    /// Apply a command resolution. Returns false if it was stale.
    pub fn record_resolution(&mut self, seq: u64, outcome: &VentOutcome) -> bool {
        if seq <= self.last_seq {
            return false;
        }
        self.last_seq = seq;
        match outcome {
            VentOutcome::Confirmed { angle, message } => {
                self.angle = Some(*angle);
                self.status_message = Some(message.clone());
            }
            VentOutcome::Acknowledged { message } => {
                self.status_message = Some(message.clone());
            }
            // A failure never touches the cached angle.
            VentOutcome::Failed { message } => {
                self.status_message = Some(message.clone());
            }
        }
        true
    }

    /// Apply an authoritative angle fetch. Returns false if it was stale.
    ///
    /// Unlike a command resolution this leaves the status message alone.
    pub fn record_refresh(&mut self, seq: u64, angle: u16) -> bool {
        if seq <= self.last_seq {
            return false;
        }
        self.last_seq = seq;
        self.angle = Some(angle);
        true
    }

    /// Overwrite the angle from telemetry. Telemetry carries no sequence
    /// number; the device is authoritative, so the latest wire value wins.
    pub fn record_telemetry(&mut self, angle: u16) {
        self.angle = Some(angle);
    }
}

/// Centralized snapshot of the entire dashboard state.
///
/// Published by the engine as an immutable snapshot after every event;
/// readers never observe a half-applied update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardState {
    pub latest: LatestReadings,
    pub motion: MotionState,
    pub temperature_series: TimeSeries,
    pub humidity_series: TimeSeries,
    pub events: EventLog,
    pub channel: ChannelStatus,
    pub vent: VentState,
}
