use serde::Deserialize;
use serde::Serialize;

/// Type key matched by lights.
pub const TYPE_LIGHT: &str = "light";
/// Type key matched by rolling shutters.
pub const TYPE_SHUTTER: &str = "shutter";
/// Type key matched by doors (garage doors included).
pub const TYPE_DOOR: &str = "door";
/// Type key matched by garage doors.
pub const TYPE_GARAGE: &str = "garage";

/// A remote device of the house.
///
/// Devices are immutable once fetched: every registry refresh replaces the
/// whole set, so nothing in the engine mutates a `Device` in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Opaque identifier, unique within the house.
    pub id: String,

    /// Free-form classification, e.g. "light" or "garage_door".
    #[serde(rename = "type")]
    pub kind: String,

    /// Power percentage (0-100), present on power-actuated devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<u8>,

    /// Opening percentage (0-100), present on opening-actuated devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening: Option<u8>,

    /// Commands accepted by the device, in the order the remote lists them.
    #[serde(default)]
    pub available_commands: Vec<String>,
}

/// Body of a device listing.
#[derive(Debug, Clone, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<Device>,
}

impl Device {
    /// Whether the device is powered or open.
    ///
    /// Missing fields count as zero.
    pub fn is_on(&self) -> bool {
        self.power.unwrap_or(0) > 0 || self.opening.unwrap_or(0) > 0
    }

    /// Case-insensitive containment test against a type key.
    ///
    /// A "garage_door" is both a [`TYPE_DOOR`] and a [`TYPE_GARAGE`].
    pub fn is_type(&self, key: &str) -> bool {
        self.kind.to_lowercase().contains(&key.to_lowercase())
    }

    /// Short human-readable state, preferring the opening over the power.
    pub fn state_label(&self) -> String {
        if let Some(opening) = self.opening {
            format!("Opening: {}%", opening)
        } else if let Some(power) = self.power {
            format!("Power: {}%", power)
        } else {
            format!("State: {}", if self.is_on() { 1 } else { 0 })
        }
    }
}

#[cfg(test)]
pub(crate) fn light(id: &str, power: u8) -> Device {
    Device {
        id: id.to_string(),
        kind: TYPE_LIGHT.to_string(),
        power: Some(power),
        opening: None,
        available_commands: vec!["TURN ON".to_string(), "TURN OFF".to_string()],
    }
}

#[cfg(test)]
pub(crate) fn shutter(id: &str, opening: u8) -> Device {
    Device {
        id: id.to_string(),
        kind: "rolling shutter".to_string(),
        power: None,
        opening: Some(opening),
        available_commands: vec!["OPEN".to_string(), "STOP".to_string(), "CLOSE".to_string()],
    }
}
