mod client;
#[allow(clippy::module_inception)]
mod servo;

use anyhow::Context;
use linkme::distributed_slice;
pub use servo::ServoIntegration;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_servo(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let servo_config = if let Some(c) = &ctx.config.servo {
        c
    } else {
        return Ok(None);
    };

    let client = client::ServoClient::new(servo_config).context("Failed to create servo client")?;
    Ok(Some(Box::new(ServoIntegration::new(client))))
}
