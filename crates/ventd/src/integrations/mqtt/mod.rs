mod client;
mod telemetry;

use anyhow::Context;
use linkme::distributed_slice;
pub use telemetry::TelemetryIntegration;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_telemetry(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let telemetry_config = if let Some(c) = &ctx.config.telemetry {
        c
    } else {
        return Ok(None);
    };

    let client =
        client::RumqttcClient::new(telemetry_config).context("Failed to create MQTT client")?;
    Ok(Some(Box::new(TelemetryIntegration::new(
        client,
        telemetry_config,
    ))))
}
