//! HomeKit accessory exporter.
//!
//! Every light is exposed as a lightbulb accessory on a bridge. The HAP
//! protocol itself is served by an external accessory server; this module
//! announces the bridge over MQTT and answers the server's characteristic
//! reads and writes by calling into the [`LightsService`](crate::lights::LightsService).

mod accessory;
mod client;
mod exporter;

use anyhow::Context;
use linkme::distributed_slice;

pub use accessory::CharacteristicKind;
pub use exporter::HomeKitIntegration;

use crate::integration;
use crate::lights::LightsError;

/// Credentials shipped in the sample configuration; refused at startup
pub const PLACEHOLDER_MAC_ADDRESS: &str = "00:00:00:00:00:00";
pub const PLACEHOLDER_PIN: &str = "000-00-000";

#[derive(Debug, thiserror::Error)]
pub enum HomeKitError {
    #[error("Please change the default HOMEKIT mac_address in the configuration")]
    PlaceholderMacAddress,

    #[error("Please change the default HOMEKIT pin in the configuration")]
    PlaceholderPin,

    #[error("Invalid value for {characteristic}: {payload}")]
    InvalidValue {
        characteristic: CharacteristicKind,
        payload: String,
    },

    #[error("Unknown accessory topic: {0}")]
    UnknownTopic(String),

    #[error(transparent)]
    Lights(#[from] LightsError),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error("MQTT error: {0}")]
    Transport(String),
}

#[distributed_slice(integration::REGISTRY)]
fn init_homekit(ctx: &integration::IntegrationContext) -> integration::IntegrationFactoryResult {
    let homekit_config = if let Some(c) = &ctx.config.integrations.homekit {
        c
    } else {
        return Ok(None);
    };

    let client = client::RumqttcClient::new(homekit_config).context("Failed to create MQTT client")?;
    let integration = HomeKitIntegration::new(client, homekit_config, ctx.lights.clone())?;
    Ok(Some(Box::new(integration)))
}
