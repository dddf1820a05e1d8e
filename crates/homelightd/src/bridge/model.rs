use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use strum::EnumString;

use crate::lights::Light;

/// Light as reported by `GET /api/<user>/lights`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BridgeLight {
    /// Map key of the bridge response; not part of the light object itself
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(rename = "type", default)]
    pub light_type: String,

    pub state: BridgeLightState,
}

/// Current state of a bridge light
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BridgeLightState {
    pub on: bool,

    /// Brightness (1-254)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    /// Color temperature in mireds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachable: Option<bool>,
}

/// Capabilities of a light, derived from the bridge `type` string
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
pub enum LightKind {
    #[strum(serialize = "On/Off light", serialize = "On/Off plug-in unit")]
    OnOff,
    #[strum(serialize = "Dimmable light")]
    Dimmable,
    #[strum(serialize = "Color temperature light")]
    ColorTemperature,
    #[strum(serialize = "Color light")]
    Color,
    #[strum(serialize = "Extended color light")]
    ExtendedColor,
    #[strum(default)]
    Other(String),
}

impl LightKind {
    fn has_brightness(&self) -> bool {
        matches!(
            self,
            LightKind::Dimmable
                | LightKind::ColorTemperature
                | LightKind::Color
                | LightKind::ExtendedColor
        )
    }

    fn has_color_temperature(&self) -> bool {
        matches!(
            self,
            LightKind::ColorTemperature | LightKind::Color | LightKind::ExtendedColor
        )
    }

    fn has_color(&self) -> bool {
        matches!(self, LightKind::Color | LightKind::ExtendedColor)
    }
}

/// The subset of a light's state that is restored when it comes back on
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LightSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<u16>,
}

impl LightSnapshot {
    /// Parameters used for lights that have nothing stored
    pub fn defaults() -> Self {
        Self {
            bri: Some(254),
            hue: Some(14948),
            sat: Some(143),
            effect: Some("none".to_string()),
            ct: Some(365),
        }
    }

    /// Capture the properties a light of the given kind can restore
    pub fn capture(kind: &LightKind, state: &BridgeLightState) -> Self {
        Self {
            bri: state.bri,
            hue: state.hue,
            sat: state.sat,
            effect: state.effect.clone(),
            ct: state.ct,
        }
        .for_kind(kind)
    }

    /// Drop every property the given kind does not support
    pub fn for_kind(self, kind: &LightKind) -> Self {
        Self {
            bri: self.bri.filter(|_| kind.has_brightness()),
            hue: self.hue.filter(|_| kind.has_color()),
            sat: self.sat.filter(|_| kind.has_color()),
            effect: self.effect.filter(|_| kind.has_color()),
            ct: self.ct.filter(|_| kind.has_color_temperature()),
        }
    }
}

/// Light id -> snapshot, as persisted in the state file
pub type StoredState = BTreeMap<String, LightSnapshot>;

/// Body of `PUT /api/<user>/lights/<id>/state`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,

    #[serde(flatten)]
    pub params: LightSnapshot,
}

impl StatePayload {
    /// Restore `params` while switching the light on or off
    pub fn on_off(on: bool, params: LightSnapshot) -> Self {
        Self {
            on: Some(on),
            params,
        }
    }

    pub fn brightness(bri: u8) -> Self {
        Self {
            on: None,
            params: LightSnapshot {
                bri: Some(bri),
                ..Default::default()
            },
        }
    }
}

const BRIDGE_BRIGHTNESS_MIN: f64 = 1.0;
const BRIDGE_BRIGHTNESS_MAX: f64 = 254.0;

/// Map a 1-100 brightness onto the bridge's 1-254 range
pub fn brightness_to_bridge(value: u8) -> u8 {
    let value = f64::from(value.clamp(1, 100));
    let span = BRIDGE_BRIGHTNESS_MAX - BRIDGE_BRIGHTNESS_MIN;
    (((value - 1.0) / 99.0) * span + BRIDGE_BRIGHTNESS_MIN).round() as u8
}

/// Map a bridge brightness (1-254) back to 1-100
pub fn brightness_from_bridge(bri: u8) -> u8 {
    let bri = f64::from(bri).clamp(BRIDGE_BRIGHTNESS_MIN, BRIDGE_BRIGHTNESS_MAX);
    let span = BRIDGE_BRIGHTNESS_MAX - BRIDGE_BRIGHTNESS_MIN;
    (((bri - BRIDGE_BRIGHTNESS_MIN) / span) * 99.0 + 1.0)
        .round()
        .clamp(1.0, 100.0) as u8
}

impl BridgeLight {
    pub fn kind(&self) -> LightKind {
        // EnumString with a default variant never fails
        LightKind::from_str(&self.light_type)
            .unwrap_or_else(|_| LightKind::Other(self.light_type.clone()))
    }

    /// Normalize into the domain model
    pub fn to_light(&self) -> Light {
        Light {
            id: self.id.clone(),
            name: self.name.clone(),
            on: self.state.on,
            brightness: self.state.bri.map(brightness_from_bridge).unwrap_or(100),
        }
    }
}
