//! Domain model for lights and the service the presentation layers talk to.

mod service;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::bridge::BridgeError;
use crate::bridge::BridgeLight;
use crate::bridge::StoreError;
use crate::bridge::StoredState;

pub use service::LightsService;

#[cfg(test)]
pub(crate) use service::tests::service_with;

/// A light as seen by callers, independent of the bridge that controls it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Light {
    /// Bridge-assigned identifier
    pub id: String,

    /// Human-readable name, matched case-insensitively on lookup
    pub name: String,

    pub on: bool,

    /// Brightness in percent (1-100)
    pub brightness: u8,
}

impl Light {
    /// Case-insensitive name comparison used for every lookup
    pub fn matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LightsError {
    #[error("Light not found")]
    NotFound(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Operations a lighting bridge adapter provides to the service layer
#[async_trait]
pub trait LightBridge: Send + Sync {
    /// All lights known to the bridge
    async fn lights(&self) -> Result<Vec<Light>, LightsError>;

    /// A single light, looked up by name
    async fn light(&self, name: &str) -> Result<Light, LightsError>;

    /// Switch a light on or off, returning the applied value
    async fn set_on_off(&self, name: &str, on: bool) -> Result<bool, LightsError>;

    /// Set the brightness (1-100) of a light, returning the applied value
    async fn set_brightness(&self, name: &str, value: u8) -> Result<u8, LightsError>;

    /// Flip a light, returning its new on/off value
    async fn toggle(&self, name: &str) -> Result<bool, LightsError>;

    /// Snapshot the lights that are on (all bridge lights unless a list is given)
    async fn store_state(&self, snapshot: Option<Vec<BridgeLight>>) -> Result<(), LightsError>;

    /// Copy of the snapshots kept so far
    async fn stored_state(&self) -> StoredState;
}
