use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::client::BridgeClient;
use super::model::brightness_to_bridge;
use super::model::BridgeLight;
use super::model::LightSnapshot;
use super::model::StatePayload;
use super::model::StoredState;
use super::store::StateStore;
use super::BridgeError;
use crate::lights::Light;
use crate::lights::LightBridge;
use crate::lights::LightsError;

/// Adapter between a lighting bridge and the domain model.
///
/// The first call connects to the bridge. Concurrent callers share that single
/// connection attempt; a failed attempt leaves the adapter disconnected and the
/// next call tries again.
pub struct HueAdapter<C: BridgeClient> {
    client: C,
    store: StateStore,

    /// Switch every light off once connected
    reset_on_connect: bool,

    connection: OnceCell<()>,
}

impl<C: BridgeClient> HueAdapter<C> {
    pub fn new(client: C, store: StateStore, reset_on_connect: bool) -> Self {
        Self {
            client,
            store,
            reset_on_connect,
            connection: OnceCell::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// Connect if needed; returns whether the bridge is usable
    async fn ensure_connected(&self) -> bool {
        let result = self
            .connection
            .get_or_try_init(|| async {
                info!("Connecting to bridge...");
                self.client.connect().await?;
                info!("Connected!");

                if self.reset_on_connect {
                    if let Err(e) = self.reset().await {
                        warn!("Failed to reset lights: {}", e);
                    }
                }
                Ok::<(), BridgeError>(())
            })
            .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                error!("Error connecting to bridge: {}", e);
                false
            }
        }
    }

    /// Switch off every light that is on, restoring stored parameters
    async fn reset(&self) -> Result<(), BridgeError> {
        info!("Resetting lights");

        let lights = self.client.get_lights().await?;
        let results = join_all(
            lights
                .iter()
                .filter(|light| light.state.on)
                .map(|light| self.send_on_off(light, false)),
        )
        .await;

        results.into_iter().collect()
    }

    /// Raw bridge lights; empty while the bridge is unreachable
    async fn bridge_lights(&self) -> Result<Vec<BridgeLight>, LightsError> {
        if !self.ensure_connected().await {
            return Ok(Vec::new());
        }

        Ok(self.client.get_lights().await?)
    }

    async fn find(&self, name: &str) -> Result<BridgeLight, LightsError> {
        self.bridge_lights()
            .await?
            .into_iter()
            .find(|light| light.to_light().matches(name))
            .ok_or_else(|| LightsError::NotFound(name.to_string()))
    }

    async fn send_on_off(&self, light: &BridgeLight, on: bool) -> Result<(), BridgeError> {
        let kind = light.kind();
        let params = self
            .store
            .get(&light.id)
            .await
            .unwrap_or_else(LightSnapshot::defaults)
            .for_kind(&kind);

        self.client
            .set_light_state(&light.id, &StatePayload::on_off(on, params))
            .await
    }

    async fn apply_on_off(&self, light: &BridgeLight, on: bool) -> Result<bool, LightsError> {
        if light.state.on == on {
            return Ok(on);
        }

        self.send_on_off(light, on).await?;
        Ok(on)
    }
}

#[async_trait]
impl<C: BridgeClient> LightBridge for HueAdapter<C> {
    async fn lights(&self) -> Result<Vec<Light>, LightsError> {
        Ok(self
            .bridge_lights()
            .await?
            .iter()
            .map(BridgeLight::to_light)
            .collect())
    }

    async fn light(&self, name: &str) -> Result<Light, LightsError> {
        Ok(self.find(name).await?.to_light())
    }

    async fn set_on_off(&self, name: &str, on: bool) -> Result<bool, LightsError> {
        let light = self.find(name).await?;
        self.apply_on_off(&light, on).await
    }

    async fn set_brightness(&self, name: &str, value: u8) -> Result<u8, LightsError> {
        let value = value.clamp(1, 100);
        let light = self.find(name).await?;

        if !light.state.on {
            self.apply_on_off(&light, true).await?;
        }

        self.client
            .set_light_state(&light.id, &StatePayload::brightness(brightness_to_bridge(value)))
            .await?;

        Ok(value)
    }

    async fn toggle(&self, name: &str) -> Result<bool, LightsError> {
        let light = self.find(name).await?;
        self.apply_on_off(&light, !light.state.on).await
    }

    async fn store_state(&self, snapshot: Option<Vec<BridgeLight>>) -> Result<(), LightsError> {
        let lights = match snapshot {
            Some(lights) => lights,
            None => self.bridge_lights().await?,
        };

        let updates: Vec<(String, LightSnapshot)> = lights
            .iter()
            .filter(|light| light.state.on)
            .map(|light| (light.id.clone(), LightSnapshot::capture(&light.kind(), &light.state)))
            .collect();

        info!(
            "Storing state of {} lights to {}",
            updates.len(),
            self.store.path().display()
        );
        self.store.merge(updates).await?;
        Ok(())
    }

    async fn stored_state(&self) -> StoredState {
        self.store.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::bridge::client::test_light;
    use crate::bridge::client::MockBridgeClient;

    struct Fixture {
        adapter: Arc<HueAdapter<MockBridgeClient>>,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn client(&self) -> &MockBridgeClient {
            &self.adapter.client
        }
    }

    fn fixture(lights: Vec<BridgeLight>, reset_on_connect: bool) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::load(dir.path().join("state.json")).unwrap();
        let client = MockBridgeClient::with_lights(lights);
        Fixture {
            adapter: Arc::new(HueAdapter::new(client, store, reset_on_connect)),
            _dir: dir,
        }
    }

    fn two_lights() -> Vec<BridgeLight> {
        vec![
            test_light("1", "Desk", "Dimmable light", true),
            test_light("2", "Living Room", "Extended color light", false),
        ]
    }

    #[tokio::test]
    async fn test_lights_are_normalized() {
        let f = fixture(two_lights(), false);

        let lights = f.adapter.lights().await.unwrap();
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].id, "1");
        assert_eq!(lights[0].name, "Desk");
        assert!(lights[0].on);
        assert_eq!(lights[0].brightness, 79);
        assert!(!lights[1].on);
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let f = fixture(two_lights(), false);

        let light = f.adapter.light("LIVING room").await.unwrap();
        assert_eq!(light.id, "2");
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found_everywhere() {
        let f = fixture(two_lights(), false);
        let a = &f.adapter;

        assert!(matches!(a.light("Attic").await, Err(LightsError::NotFound(_))));
        assert!(matches!(a.set_on_off("Attic", true).await, Err(LightsError::NotFound(_))));
        assert!(matches!(a.set_brightness("Attic", 50).await, Err(LightsError::NotFound(_))));
        assert!(matches!(a.toggle("Attic").await, Err(LightsError::NotFound(_))));
        assert_eq!(f.client().command_count(), 0);
    }

    #[tokio::test]
    async fn test_set_on_off_same_value_sends_nothing() {
        let f = fixture(two_lights(), false);

        assert!(f.adapter.set_on_off("desk", true).await.unwrap());
        assert!(!f.adapter.set_on_off("living room", false).await.unwrap());
        assert_eq!(f.client().command_count(), 0);
    }

    #[tokio::test]
    async fn test_set_on_off_uses_defaults_filtered_by_kind() {
        let f = fixture(two_lights(), false);

        assert!(!f.adapter.set_on_off("desk", false).await.unwrap());

        let commands = f.client().commands.lock().unwrap().clone();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "1");
        assert_eq!(
            commands[0].1,
            StatePayload::on_off(
                false,
                LightSnapshot {
                    bri: Some(254),
                    ..Default::default()
                }
            )
        );
    }

    #[tokio::test]
    async fn test_set_on_off_restores_stored_parameters() {
        let f = fixture(two_lights(), false);
        f.adapter.store_state(None).await.unwrap();

        f.adapter.set_on_off("desk", false).await.unwrap();
        f.adapter.set_on_off("desk", true).await.unwrap();

        let commands = f.client().commands.lock().unwrap().clone();
        assert_eq!(commands[1].1.on, Some(true));
        assert_eq!(commands[1].1.params.bri, Some(200));
    }

    #[tokio::test]
    async fn test_set_brightness_turns_light_on_first() {
        let f = fixture(two_lights(), false);

        assert_eq!(f.adapter.set_brightness("living room", 100).await.unwrap(), 100);

        let commands = f.client().commands.lock().unwrap().clone();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].1.on, Some(true));
        assert_eq!(commands[1].1, StatePayload::brightness(254));

        let light = f.adapter.light("living room").await.unwrap();
        assert!(light.on);
        assert_eq!(light.brightness, 100);
    }

    #[tokio::test]
    async fn test_set_brightness_clamps() {
        let f = fixture(two_lights(), false);

        assert_eq!(f.adapter.set_brightness("desk", 0).await.unwrap(), 1);
        assert_eq!(f.adapter.set_brightness("desk", 250).await.unwrap(), 100);

        let commands = f.client().commands.lock().unwrap().clone();
        assert_eq!(commands[0].1, StatePayload::brightness(1));
        assert_eq!(commands[1].1, StatePayload::brightness(254));
    }

    #[tokio::test]
    async fn test_toggle_flips_state() {
        let f = fixture(two_lights(), false);

        assert!(!f.adapter.toggle("desk").await.unwrap());
        assert!(f.adapter.toggle("desk").await.unwrap());
        assert!(f.adapter.toggle("living room").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_state_keeps_only_lights_that_are_on() {
        let mut lights = two_lights();
        lights.push(test_light("3", "Hallway", "Extended color light", true));
        let f = fixture(lights, false);

        f.adapter.store_state(None).await.unwrap();

        let stored = f.adapter.stored_state().await;
        assert_eq!(stored.len(), 2);
        assert!(!stored.contains_key("2"));

        // Dimmable lights keep brightness only
        assert_eq!(
            stored["1"],
            LightSnapshot {
                bri: Some(200),
                ..Default::default()
            }
        );

        // Color lights keep everything
        let hallway = &stored["3"];
        assert_eq!(hallway.bri, Some(200));
        assert_eq!(hallway.hue, Some(10000));
        assert_eq!(hallway.sat, Some(150));
        assert_eq!(hallway.effect.as_deref(), Some("none"));
        assert_eq!(hallway.ct, Some(350));
    }

    #[tokio::test]
    async fn test_store_state_merges_given_snapshot() {
        let f = fixture(two_lights(), false);
        f.adapter.store_state(None).await.unwrap();

        let mut kitchen = test_light("7", "Kitchen", "Dimmable light", true);
        kitchen.state.bri = Some(12);
        f.adapter.store_state(Some(vec![kitchen])).await.unwrap();

        let stored = f.adapter.stored_state().await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored["1"].bri, Some(200));
        assert_eq!(stored["7"].bri, Some(12));
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_connect_once() {
        let f = fixture(two_lights(), false);

        let calls = (0..8).map(|_| {
            let adapter = f.adapter.clone();
            tokio::spawn(async move { adapter.lights().await.unwrap().len() })
        });
        for call in join_all(calls).await {
            assert_eq!(call.unwrap(), 2);
        }

        assert_eq!(f.client().connects.load(Ordering::SeqCst), 1);
        assert!(f.adapter.is_connected());
    }

    #[tokio::test]
    async fn test_failed_connect_reads_empty_and_retries() {
        let f = fixture(two_lights(), false);
        f.client().fail_connect.store(true, Ordering::SeqCst);

        assert!(f.adapter.lights().await.unwrap().is_empty());
        assert!(matches!(f.adapter.light("desk").await, Err(LightsError::NotFound(_))));
        assert!(!f.adapter.is_connected());

        f.client().fail_connect.store(false, Ordering::SeqCst);
        assert_eq!(f.adapter.lights().await.unwrap().len(), 2);
        assert_eq!(f.client().connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reset_on_connect_turns_lights_off() {
        let mut lights = two_lights();
        lights.push(test_light("3", "Hallway", "Extended color light", true));
        let f = fixture(lights, true);

        let lights = f.adapter.lights().await.unwrap();
        assert!(lights.iter().all(|light| !light.on));
        assert_eq!(f.client().command_count(), 2);
    }

    #[tokio::test]
    async fn test_development_mode_leaves_lights_alone() {
        let f = fixture(two_lights(), false);

        let lights = f.adapter.lights().await.unwrap();
        assert!(lights[0].on);
        assert_eq!(f.client().command_count(), 0);
    }
}
