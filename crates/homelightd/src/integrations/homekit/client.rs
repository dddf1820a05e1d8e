use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::LastWill;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::HomeKitConfig;

/// Message received on one of the characteristic topics
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Transport between the exporter and the accessory server
///
/// Kept as a trait so the exporter can run against a mock in tests.
#[async_trait]
pub trait MqttClient: Send + Sync {
    /// Open the broker connection and start receiving messages
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>>;

    /// Subscribe to a topic filter, wildcards included
    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>>;

    /// Publish a payload; retained messages outlive the connection
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// Next message from the subscribed topics
    ///
    /// Returns None once the connection is gone for good.
    async fn poll_message(&mut self) -> Option<MqttMessage>;

    /// Close the broker connection
    async fn disconnect(&mut self) -> Result<(), Box<dyn Error + Send>>;
}

/// In-memory client that records subscriptions and publishes
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockMqttClient {
    /// Messages handed out by `poll_message`, oldest first
    pub messages: Vec<MqttMessage>,
    pub subscriptions: Vec<String>,
    /// (topic, payload, retain) of every publish
    pub published: Vec<(String, Vec<u8>, bool)>,
    pub is_connected: bool,
}

#[cfg(test)]
#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        self.is_connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>> {
        self.published
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    async fn poll_message(&mut self) -> Option<MqttMessage> {
        if self.messages.is_empty() {
            None
        } else {
            Some(self.messages.remove(0))
        }
    }

    async fn disconnect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        self.is_connected = false;
        Ok(())
    }
}

#[cfg(test)]
impl MockMqttClient {
    /// Disconnected client with nothing queued
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message; messages are delivered in the order they were added
    pub fn add_message(&mut self, topic: impl Into<String>, payload: &[u8]) {
        self.messages.push(MqttMessage {
            topic: topic.into(),
            payload: payload.to_vec(),
        });
    }
}

/// Error for operations attempted before `connect`
fn not_connected() -> Box<dyn Error + Send> {
    Box::new(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "MQTT client not connected. Call connect() first.",
    ))
}

/// MQTT client backed by rumqttc
pub struct RumqttcClient {
    /// Connection options, used when connect() is called
    mqtt_options: MqttOptions,

    /// Handle for requests, created by connect()
    client: Option<AsyncClient>,

    /// Incoming publishes forwarded by the event loop task
    message_rx: Option<mpsc::UnboundedReceiver<MqttMessage>>,

    /// Task driving the rumqttc event loop; aborted on drop
    event_loop_task: Option<JoinHandle<()>>,
}

impl RumqttcClient {
    /// Build the connection options from the exporter config
    ///
    /// Nothing connects until [`MqttClient::connect`] is called.
    pub fn new(config: &HomeKitConfig) -> anyhow::Result<Self> {
        let client_id = match &config.client_id {
            Some(id) => id.clone(),
            None => format!("homelightd-{}", hostname::get()?.to_string_lossy()),
        };

        let mut mqtt_options =
            MqttOptions::new(client_id, config.broker.clone(), config.broker_port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        // The accessory server drops the bridge when this retained message is cleared
        mqtt_options.set_last_will(LastWill::new(
            format!("{}/bridge", config.topic_prefix),
            Vec::new(),
            QoS::AtLeastOnce,
            true,
        ));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        Ok(Self {
            mqtt_options,
            client: None,
            message_rx: None,
            event_loop_task: None,
        })
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options.clone(), 10);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        // rumqttc reconnects from inside poll(); errors only pause the loop
        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                        };

                        if message_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    // Acks and pings
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            tracing::info!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.message_rx = Some(message_rx);
        self.event_loop_task = Some(task);

        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Box<dyn Error + Send>> {
        let client = self.client.as_ref().ok_or_else(not_connected)?;

        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), Box<dyn Error + Send>> {
        let client = self.client.as_ref().ok_or_else(not_connected)?;

        client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)
    }

    async fn poll_message(&mut self) -> Option<MqttMessage> {
        match &mut self.message_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn disconnect(&mut self) -> Result<(), Box<dyn Error + Send>> {
        if let Some(client) = self.client.take() {
            client
                .disconnect()
                .await
                .map_err(|e| Box::new(e) as Box<dyn Error + Send>)?;
        }
        Ok(())
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}
