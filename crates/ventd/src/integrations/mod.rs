#[cfg(feature = "integration_mqtt")]
pub mod mqtt;
#[cfg(feature = "integration_servo")]
pub mod servo;
