pub mod api;
pub mod bridge;
pub mod config;
pub mod integration;
pub mod integrations;
pub mod lights;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use config::Mode;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::Integrations;
pub use lights::Light;
pub use lights::LightsError;
pub use lights::LightsService;
