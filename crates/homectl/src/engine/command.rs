//! Mapping of an on/off intent onto a device's own command vocabulary.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

/// Ordered synonyms tried when activating a device.
pub const ON_CANDIDATES: [&str; 5] = ["on", "open", "up", "turn on", "turn_on"];

/// Ordered synonyms tried when deactivating a device.
pub const OFF_CANDIDATES: [&str; 5] = ["off", "close", "down", "turn off", "turn_off"];

/// Target actuation state requested by the user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Intent {
    On,
    Off,
}

impl Intent {
    pub fn is_on(self) -> bool {
        matches!(self, Intent::On)
    }

    fn candidates(self) -> &'static [&'static str] {
        match self {
            Intent::On => &ON_CANDIDATES,
            Intent::Off => &OFF_CANDIDATES,
        }
    }
}

impl From<bool> for Intent {
    fn from(on: bool) -> Self {
        if on {
            Intent::On
        } else {
            Intent::Off
        }
    }
}

fn normalize(command: &str) -> String {
    command.to_lowercase().replace('_', " ").trim().to_string()
}

/// Pick the command to send for `intent`, or `None` when the device cannot
/// be actuated that way.
///
/// The candidate list decides precedence, not the device's own ordering. When
/// two device commands normalize to the same form, the later one is kept.
pub fn resolve_command(commands: &[String], intent: Intent) -> Option<&str> {
    let by_normalized: HashMap<String, &str> = commands
        .iter()
        .map(|c| (normalize(c), c.as_str()))
        .collect();

    intent
        .candidates()
        .iter()
        .find_map(|candidate| by_normalized.get(&normalize(candidate)).copied())
}

/// Whether at least one of on/off resolves.
pub fn has_action(commands: &[String]) -> bool {
    resolve_command(commands, Intent::On).is_some()
        || resolve_command(commands, Intent::Off).is_some()
}
