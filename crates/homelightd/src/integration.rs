use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::lights::LightsService;

/// Result type for integration factory functions
pub type IntegrationFactoryResult = anyhow::Result<Option<Box<dyn Integration>>>;

pub struct IntegrationContext<'a> {
    pub config: &'a Config,
    pub lights: Arc<LightsService>,
}

#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// Integration trait that all presentation integrations implement
#[async_trait]
pub trait Integration: Send + Sync {
    /// Get the name/identifier of this integration
    fn name(&self) -> &str;

    /// Set up the integration - connect, publish accessories, start background tasks
    async fn setup(&mut self) -> Result<(), Box<dyn Error + Send>>;

    /// Shut down the integration gracefully
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}

/// The integrations enabled by the configuration
#[derive(Default)]
pub struct Integrations {
    integrations: Vec<Box<dyn Integration>>,
}

impl Integrations {
    /// Build every registered integration that the configuration enables
    ///
    /// A factory error (e.g. placeholder credentials) aborts startup.
    pub fn from_config(ctx: &IntegrationContext) -> anyhow::Result<Self> {
        let mut integrations = Vec::new();
        for constr in REGISTRY {
            if let Some(integration) = constr(ctx)? {
                info!("Registered integration: {}", integration.name());
                integrations.push(integration);
            }
        }

        Ok(Self { integrations })
    }

    pub fn len(&self) -> usize {
        self.integrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integrations.is_empty()
    }

    /// Set up every integration; failures are logged and leave the others running
    pub async fn setup(&mut self) {
        for integration in &mut self.integrations {
            if let Err(e) = integration.setup().await {
                warn!("Integration '{}' setup failed: {}", integration.name(), e);
            }
        }
    }

    pub async fn shutdown(&mut self) {
        for integration in &mut self.integrations {
            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", integration.name(), e);
            }
        }
    }
}
