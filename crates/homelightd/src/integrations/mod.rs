//! Optional presentation integrations, each behind its own cargo feature.

#[cfg(feature = "integration_homekit")]
pub mod homekit;
