use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::config::ServoConfig;
use crate::engine::CommandError;
use crate::engine::PresetPosition;
use crate::engine::SweepParams;
use crate::engine::validate_angle;

/// Angle confirmed by the device after a set or preset command
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedAngle {
    pub angle: u16,

    /// Preset name echoed back by the device, when one was requested
    #[allow(dead_code)]
    pub position: Option<String>,
}

/// Acknowledgement of a completed sweep; the final angle is not included
/// and has to be fetched separately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepAck {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Deserialize)]
struct AngleReply {
    angle: i64,
}

/// Reply shape shared by the set_angle and preset endpoints. The device
/// reports outcomes in the status field and uses HTTP status codes only
/// for unroutable requests.
#[derive(Debug, Deserialize)]
struct CommandWireReply {
    status: String,
    #[serde(default)]
    angle: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    position: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SweepWireReply {
    status: String,
    #[serde(default)]
    start: Option<i64>,
    #[serde(default)]
    end: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the vent servo controller
///
/// Commands are validated before anything touches the network, and no
/// request is ever retried; a failure is reported and the caller decides.
pub struct ServoClient {
    http: reqwest::Client,
    base_url: String,
}

impl ServoClient {
    /// Create a new ServoClient from configuration
    pub fn new(config: &ServoConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the authoritative angle from the device.
    pub async fn fetch_current_angle(&self) -> Result<u16, CommandError> {
        let reply: AngleReply = self
            .http
            .get(format!("{}/api/get_angle", self.base_url))
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|e| CommandError::Malformed(e.to_string()))?;

        angle_from_wire(reply.angle)
    }

    /// Command the servo to a specific angle.
    pub async fn set_angle(&self, angle: i64) -> Result<ConfirmedAngle, CommandError> {
        validate_angle(angle)?;

        let reply = self
            .post_command("/api/set_angle", &serde_json::json!({ "angle": angle }))
            .await?;
        confirmed_from_wire(reply, None)
    }

    /// Command the servo to a named preset position. A success reply that
    /// omits the angle falls back to the preset's nominal mapping.
    pub async fn set_preset(
        &self,
        position: PresetPosition,
    ) -> Result<ConfirmedAngle, CommandError> {
        let reply = self
            .post_command("/api/preset", &serde_json::json!({ "position": position }))
            .await?;
        confirmed_from_wire(reply, Some(position.angle()))
    }

    /// Run a sweep between two angles.
    pub async fn start_sweep(&self, params: &SweepParams) -> Result<SweepAck, CommandError> {
        params.validate()?;

        let reply: SweepWireReply = self
            .http
            .post(format!("{}/api/sweep", self.base_url))
            .json(params)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|e| CommandError::Malformed(e.to_string()))?;

        if reply.status != "success" {
            return Err(rejection(reply.message));
        }

        Ok(SweepAck {
            start: reply.start.unwrap_or(params.start),
            end: reply.end.unwrap_or(params.end),
        })
    }

    async fn post_command(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<CommandWireReply, CommandError> {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|e| CommandError::Malformed(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> CommandError {
    CommandError::Transport(e.to_string())
}

fn rejection(message: Option<String>) -> CommandError {
    CommandError::Rejected(message.unwrap_or_else(|| "no reason given".to_string()))
}

fn angle_from_wire(angle: i64) -> Result<u16, CommandError> {
    if !(0..=180).contains(&angle) {
        return Err(CommandError::Malformed(format!(
            "angle {} outside the servo range",
            angle
        )));
    }
    Ok(angle as u16)
}

fn confirmed_from_wire(
    reply: CommandWireReply,
    fallback: Option<u16>,
) -> Result<ConfirmedAngle, CommandError> {
    if reply.status != "success" {
        return Err(rejection(reply.message));
    }

    let angle = match (reply.angle, fallback) {
        (Some(angle), _) => angle_from_wire(angle)?,
        (None, Some(angle)) => angle,
        (None, None) => {
            return Err(CommandError::Malformed(
                "success reply without an angle".to_string(),
            ));
        }
    };

    Ok(ConfirmedAngle {
        angle,
        position: reply.position,
    })
}
