//! Virtual accessories exposed to home-automation clients.
//!
//! Each light becomes a lightbulb accessory with an `on` and a `brightness`
//! characteristic. Reads always go back to the [`LightsService`]; nothing is
//! cached here.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use sha1::Digest;
use sha1::Sha1;
use strum::Display;
use strum::EnumString;
use uuid::Uuid;

use super::HomeKitError;
use crate::lights::Light;
use crate::lights::LightsError;
use crate::lights::LightsService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CharacteristicKind {
    On,
    Brightness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CharacteristicValue {
    Bool(bool),
    Int(u8),
}

impl CharacteristicValue {
    pub fn as_bool(&self) -> bool {
        match *self {
            CharacteristicValue::Bool(b) => b,
            CharacteristicValue::Int(n) => n != 0,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match *self {
            CharacteristicValue::Bool(b) => u8::from(b),
            CharacteristicValue::Int(n) => n,
        }
    }
}

impl CharacteristicKind {
    /// Inclusive value bounds, for numeric characteristics
    pub fn bounds(&self) -> Option<(u8, u8)> {
        match self {
            CharacteristicKind::On => None,
            CharacteristicKind::Brightness => Some((1, 100)),
        }
    }

    fn format(&self) -> &'static str {
        match self {
            CharacteristicKind::On => "bool",
            CharacteristicKind::Brightness => "int",
        }
    }

    /// Parse a JSON payload written to this characteristic
    pub fn parse(&self, payload: &[u8]) -> Result<CharacteristicValue, HomeKitError> {
        let invalid = || HomeKitError::InvalidValue {
            characteristic: *self,
            payload: String::from_utf8_lossy(payload).into_owned(),
        };

        let value: serde_json::Value = serde_json::from_slice(payload).map_err(|_| invalid())?;

        match (self, self.bounds()) {
            (CharacteristicKind::On, _) => match value {
                serde_json::Value::Bool(b) => Ok(CharacteristicValue::Bool(b)),
                serde_json::Value::Number(n) => n
                    .as_i64()
                    .map(|n| CharacteristicValue::Bool(n != 0))
                    .ok_or_else(invalid),
                _ => Err(invalid()),
            },
            (_, Some((min, max))) => value
                .as_f64()
                .filter(|v| v.is_finite())
                .map(|v| CharacteristicValue::Int(v.round().clamp(f64::from(min), f64::from(max)) as u8))
                .ok_or_else(invalid),
            (_, None) => Err(invalid()),
        }
    }
}

type OnRead = Box<dyn Fn() -> BoxFuture<'static, Result<CharacteristicValue, LightsError>> + Send + Sync>;
type OnUpdate =
    Box<dyn Fn(CharacteristicValue) -> BoxFuture<'static, Result<(), LightsError>> + Send + Sync>;

/// A readable and writable property of an accessory
pub struct Characteristic {
    pub kind: CharacteristicKind,
    on_read: OnRead,
    on_update: OnUpdate,
}

impl Characteristic {
    /// Build a characteristic whose callbacks run against the lights service
    fn for_light<R, RF, U, UF>(
        kind: CharacteristicKind,
        lights: &Arc<LightsService>,
        name: &str,
        read: R,
        update: U,
    ) -> Self
    where
        R: Fn(Arc<LightsService>, String) -> RF + Send + Sync + 'static,
        RF: Future<Output = Result<CharacteristicValue, LightsError>> + Send + 'static,
        U: Fn(Arc<LightsService>, String, CharacteristicValue) -> UF + Send + Sync + 'static,
        UF: Future<Output = Result<(), LightsError>> + Send + 'static,
    {
        let (read_lights, read_name) = (lights.clone(), name.to_string());
        let (update_lights, update_name) = (lights.clone(), name.to_string());

        Self {
            kind,
            on_read: Box::new(move || read(read_lights.clone(), read_name.clone()).boxed()),
            on_update: Box::new(move |value| {
                update(update_lights.clone(), update_name.clone(), value).boxed()
            }),
        }
    }

    pub async fn read(&self) -> Result<CharacteristicValue, LightsError> {
        (self.on_read)().await
    }

    pub async fn update(&self, value: CharacteristicValue) -> Result<(), LightsError> {
        (self.on_update)(value).await
    }
}

/// Description of a characteristic, as announced to the accessory server
#[derive(Debug, Serialize)]
pub struct CharacteristicInfo {
    pub kind: CharacteristicKind,
    pub format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct AccessoryInfo {
    pub uuid: Uuid,
    pub name: String,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Derive a HAP identifier from a string
///
/// Same derivation as hap-nodejs `uuid.generate`: the SHA-1 hex digest fills
/// the nibbles in order, skipping the version nibble (fixed to 4) and masking
/// the variant nibble to 8-b. Accessories keep their identity across servers.
pub fn hap_uuid(data: &str) -> Uuid {
    let digest = Sha1::digest(data.as_bytes());
    let mut digest_nibbles = digest.iter().flat_map(|byte| [byte >> 4, byte & 0x0f]);

    let mut nibbles = [0u8; 32];
    for (i, nibble) in nibbles.iter_mut().enumerate() {
        *nibble = match i {
            12 => 4,
            16 => digest_nibbles.next().unwrap_or(0) & 0x3 | 0x8,
            _ => digest_nibbles.next().unwrap_or(0),
        };
    }

    let mut bytes = [0u8; 16];
    for (byte, pair) in bytes.iter_mut().zip(nibbles.chunks_exact(2)) {
        *byte = pair[0] << 4 | pair[1];
    }
    Uuid::from_bytes(bytes)
}

/// Identifier of the bridge itself
pub fn bridge_uuid() -> Uuid {
    hap_uuid("hap.hub")
}

/// Stable identifier of the accessory for a light name
pub fn accessory_uuid(name: &str) -> Uuid {
    hap_uuid(&format!("hap.hub.{}", name))
}

pub struct Accessory {
    pub uuid: Uuid,
    pub name: String,
    pub characteristics: Vec<Characteristic>,
}

impl Accessory {
    /// Lightbulb accessory for a light
    pub fn lightbulb(light: &Light, lights: &Arc<LightsService>) -> Self {
        let on = Characteristic::for_light(
            CharacteristicKind::On,
            lights,
            &light.name,
            |lights, name| async move {
                Ok(CharacteristicValue::Bool(lights.status(&name).await?.on))
            },
            |lights, name, value| async move {
                lights.set_on_off(&name, value.as_bool()).await?;
                Ok(())
            },
        );

        let brightness = Characteristic::for_light(
            CharacteristicKind::Brightness,
            lights,
            &light.name,
            |lights, name| async move {
                Ok(CharacteristicValue::Int(lights.status(&name).await?.brightness))
            },
            |lights, name, value| async move {
                lights.set_brightness(&name, value.as_u8()).await?;
                Ok(())
            },
        );

        Self {
            uuid: accessory_uuid(&light.name),
            name: light.name.clone(),
            characteristics: vec![on, brightness],
        }
    }

    pub fn characteristic(&self, kind: CharacteristicKind) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.kind == kind)
    }

    pub fn info(&self) -> AccessoryInfo {
        AccessoryInfo {
            uuid: self.uuid,
            name: self.name.clone(),
            characteristics: self
                .characteristics
                .iter()
                .map(|c| CharacteristicInfo {
                    kind: c.kind,
                    format: c.kind.format(),
                    min: c.kind.bounds().map(|(min, _)| min),
                    max: c.kind.bounds().map(|(_, max)| max),
                })
                .collect(),
        }
    }
}

/// What a client asks of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Request {
    Get,
    Set,
}

/// Parse a characteristic topic
///
/// Format: `<prefix>/<accessory-uuid>/<characteristic>/<get|set>`
pub fn parse_characteristic_topic(
    topic: &str,
    prefix: &str,
) -> Option<(Uuid, CharacteristicKind, Request)> {
    let without_prefix = topic.strip_prefix(prefix)?.strip_prefix('/')?;

    let parts: Vec<&str> = without_prefix.split('/').collect();
    if parts.len() != 3 {
        return None;
    }

    let uuid = Uuid::parse_str(parts[0]).ok()?;
    let kind = parts[1].parse().ok()?;
    let request = parts[2].parse().ok()?;

    Some((uuid, kind, request))
}

/// Topic a characteristic's current value is published on
pub fn value_topic(prefix: &str, uuid: &Uuid, kind: CharacteristicKind) -> String {
    format!("{}/{}/{}", prefix, uuid, kind)
}
