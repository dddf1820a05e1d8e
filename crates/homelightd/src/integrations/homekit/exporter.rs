use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use super::accessory::bridge_uuid;
use super::accessory::parse_characteristic_topic;
use super::accessory::value_topic;
use super::accessory::Accessory;
use super::accessory::AccessoryInfo;
use super::accessory::Request;
use super::client::MqttClient;
use super::client::MqttMessage;
use super::HomeKitError;
use super::PLACEHOLDER_MAC_ADDRESS;
use super::PLACEHOLDER_PIN;
use crate::config::HomeKitConfig;
use crate::integration::Integration;
use crate::lights::LightsService;

const MANUFACTURER: &str = "Grumpy Old Man";
const MODEL: &str = "GOMBridge";

/// Accessories keyed by their uuid, fixed once setup has run
type AccessoryMap = Arc<HashMap<Uuid, Accessory>>;

/// Retained message describing the bridge to the accessory server
#[derive(Debug, Serialize)]
struct BridgeAnnouncement<'a> {
    uuid: Uuid,
    name: &'a str,
    username: &'a str,
    pincode: &'a str,
    port: u16,
    category: &'static str,
    manufacturer: &'static str,
    model: &'static str,
    firmware: &'static str,
    accessories: Vec<AccessoryInfo>,
}

fn transport(e: Box<dyn Error + Send>) -> HomeKitError {
    HomeKitError::Transport(e.to_string())
}

fn boxed(e: HomeKitError) -> Box<dyn Error + Send> {
    Box::new(e)
}

/// Exports every light as a HomeKit lightbulb accessory
pub struct HomeKitIntegration<C: MqttClient> {
    client: Arc<Mutex<C>>,
    config: HomeKitConfig,
    lights: Arc<LightsService>,
    /// Handle to the background message processing task
    message_task: Option<JoinHandle<()>>,
}

impl<C: MqttClient + 'static> HomeKitIntegration<C> {
    /// Create the exporter, refusing the placeholder pairing credentials
    pub fn new(
        client: C,
        config: &HomeKitConfig,
        lights: Arc<LightsService>,
    ) -> Result<Self, HomeKitError> {
        if config.mac_address == PLACEHOLDER_MAC_ADDRESS {
            return Err(HomeKitError::PlaceholderMacAddress);
        }
        if config.pin == PLACEHOLDER_PIN {
            return Err(HomeKitError::PlaceholderPin);
        }

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            config: config.clone(),
            lights,
            message_task: None,
        })
    }

    fn bridge_topic(&self) -> String {
        format!("{}/bridge", self.config.topic_prefix)
    }

    async fn create_accessories(&self) -> Result<AccessoryMap, HomeKitError> {
        info!("Creating HAP lights");

        let lights = self.lights.status_all().await?;
        if lights.is_empty() {
            warn!("No lights found, announcing a bridge without accessories");
        }

        let accessories = lights
            .iter()
            .map(|light| {
                let accessory = Accessory::lightbulb(light, &self.lights);
                (accessory.uuid, accessory)
            })
            .collect();

        Ok(Arc::new(accessories))
    }

    fn announcement(&self, accessories: &AccessoryMap) -> Result<Vec<u8>, HomeKitError> {
        let mut infos: Vec<AccessoryInfo> = accessories.values().map(Accessory::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));

        let announcement = BridgeAnnouncement {
            uuid: bridge_uuid(),
            name: &self.config.name,
            username: &self.config.mac_address,
            pincode: &self.config.pin,
            port: self.config.port,
            category: "bridge",
            manufacturer: MANUFACTURER,
            model: MODEL,
            firmware: env!("CARGO_PKG_VERSION"),
            accessories: infos,
        };

        Ok(serde_json::to_vec(&announcement)?)
    }

    /// Answer characteristic requests until the message stream closes
    async fn process_messages_task(client: Arc<Mutex<C>>, prefix: String, accessories: AccessoryMap) {
        loop {
            // Only hold the lock for a short poll so replies can be published
            let msg = {
                let mut client_guard = client.lock().await;
                tokio::time::timeout(Duration::from_millis(100), client_guard.poll_message()).await
            };

            match msg {
                Ok(Some(msg)) => {
                    debug!("Received message on topic: {}", msg.topic);

                    if let Err(e) = Self::handle_message(&msg, &prefix, &client, &accessories).await {
                        warn!("Error handling message on {}: {}", msg.topic, e);
                    }
                }
                Ok(None) => {
                    info!("HomeKit message stream closed");
                    break;
                }
                Err(_) => tokio::task::yield_now().await,
            }
        }
    }

    async fn handle_message(
        msg: &MqttMessage,
        prefix: &str,
        client: &Arc<Mutex<C>>,
        accessories: &AccessoryMap,
    ) -> Result<(), HomeKitError> {
        let (uuid, kind, request) = parse_characteristic_topic(&msg.topic, prefix)
            .ok_or_else(|| HomeKitError::UnknownTopic(msg.topic.clone()))?;

        let characteristic = accessories
            .get(&uuid)
            .and_then(|accessory| accessory.characteristic(kind))
            .ok_or_else(|| HomeKitError::UnknownTopic(msg.topic.clone()))?;

        let value = match request {
            Request::Get => characteristic.read().await?,
            Request::Set => {
                let value = kind.parse(&msg.payload)?;
                characteristic.update(value).await?;
                value
            }
        };

        let payload = serde_json::to_vec(&value)?;
        client
            .lock()
            .await
            .publish(&value_topic(prefix, &uuid, kind), &payload, false)
            .await
            .map_err(transport)
    }
}

#[async_trait]
impl<C: MqttClient + 'static> Integration for HomeKitIntegration<C> {
    fn name(&self) -> &str {
        "homekit"
    }

    async fn setup(&mut self) -> Result<(), Box<dyn Error + Send>> {
        let accessories = self.create_accessories().await.map_err(boxed)?;
        let announcement = self.announcement(&accessories).map_err(boxed)?;
        let prefix = self.config.topic_prefix.clone();

        {
            let mut client = self.client.lock().await;
            client.connect().await?;
            client.subscribe(&format!("{}/+/+/get", prefix)).await?;
            client.subscribe(&format!("{}/+/+/set", prefix)).await?;
            client.publish(&self.bridge_topic(), &announcement, true).await?;
        }

        info!(
            "Published HomeKit bridge '{}' with {} accessories",
            self.config.name,
            accessories.len()
        );

        let task = tokio::spawn(Self::process_messages_task(
            self.client.clone(),
            prefix,
            accessories,
        ));
        self.message_task = Some(task);

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        let Some(task) = self.message_task.take() else {
            return Ok(());
        };
        task.abort();

        info!("Withdrawing HomeKit bridge '{}'", self.config.name);
        let mut client = self.client.lock().await;
        client.publish(&self.bridge_topic(), &[], true).await?;
        client.disconnect().await
    }
}
