//! Lighting bridge adapter.
//!
//! Talks to the bridge through a [`BridgeClient`], normalizes bridge lights
//! into [`crate::lights::Light`] and keeps per-light snapshots on disk so
//! lights come back the way they were.

mod adapter;
mod client;
mod model;
mod store;

pub use adapter::HueAdapter;
pub use client::BridgeClient;
pub use client::HueClient;
pub use model::brightness_from_bridge;
pub use model::brightness_to_bridge;
pub use model::BridgeLight;
pub use model::BridgeLightState;
pub use model::LightKind;
pub use model::LightSnapshot;
pub use model::StatePayload;
pub use model::StoredState;
pub use store::StateStore;
pub use store::StoreError;

#[cfg(test)]
pub(crate) use client::test_light;
#[cfg(test)]
pub(crate) use client::MockBridgeClient;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Bridge request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bridge error {kind} at {address}: {description}")]
    Api {
        kind: u32,
        address: String,
        description: String,
    },

    #[error("Unexpected bridge response: {0}")]
    Payload(#[from] serde_json::Error),
}
