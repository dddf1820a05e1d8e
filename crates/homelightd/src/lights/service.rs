use std::sync::Arc;

use futures::future::try_join_all;
use tracing::info;

use super::Light;
use super::LightBridge;
use super::LightsError;

/// Aggregation layer shared by the REST API and the accessory exporter.
pub struct LightsService {
    bridge: Arc<dyn LightBridge>,
}

impl LightsService {
    pub fn new(bridge: Arc<dyn LightBridge>) -> Self {
        Self { bridge }
    }

    pub async fn status(&self, name: &str) -> Result<Light, LightsError> {
        info!("Getting status for {}", name);
        self.bridge.light(name).await
    }

    pub async fn status_all(&self) -> Result<Vec<Light>, LightsError> {
        info!("Getting status for all");
        self.bridge.lights().await
    }

    /// Majority toggle: when at least half of the lights are on, switch those
    /// off; otherwise switch the remaining ones on.
    ///
    /// Returns every light with its new on/off value.
    pub async fn toggle_all(&self) -> Result<Vec<Light>, LightsError> {
        info!("Toggling all lights on/off");

        let lights = self.bridge.lights().await?;
        let on_count = lights.iter().filter(|light| light.on).count();
        let target = on_count < lights.len() - on_count;

        try_join_all(
            lights
                .iter()
                .filter(|light| light.on != target)
                .map(|light| self.set_on_off(&light.name, target)),
        )
        .await?;

        Ok(lights
            .into_iter()
            .map(|light| Light { on: target, ..light })
            .collect())
    }

    pub async fn store(&self) -> Result<(), LightsError> {
        info!("Storing status");
        self.bridge.store_state(None).await
    }

    pub async fn set_on_off(&self, name: &str, on: bool) -> Result<bool, LightsError> {
        info!("Set light {} to {}", name, if on { "on" } else { "off" });
        self.bridge.set_on_off(name, on).await
    }

    /// Set brightness, `value` in 1-100
    pub async fn set_brightness(&self, name: &str, value: u8) -> Result<u8, LightsError> {
        info!("Set light {} brightness to {}", name, value);
        self.bridge.set_brightness(name, value).await
    }

    pub async fn toggle(&self, name: &str) -> Result<bool, LightsError> {
        info!("Toggling light {} on/off", name);
        self.bridge.toggle(name).await
    }
}
