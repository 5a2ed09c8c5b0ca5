use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;

use super::device::Device;
use super::device::TYPE_DOOR;
use super::device::TYPE_GARAGE;
use super::device::TYPE_LIGHT;
use super::device::TYPE_SHUTTER;

/// Selector value that disables a predicate.
pub const FILTER_ALL: &str = "all";

/// Device type selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TypeFilter {
    #[default]
    All,
    /// Exact, case-sensitive match on the device type.
    Exact(String),
}

impl TypeFilter {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Exact(kind) => device.kind == *kind,
        }
    }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeFilter::All => f.write_str(FILTER_ALL),
            TypeFilter::Exact(kind) => f.write_str(kind),
        }
    }
}

impl FromStr for TypeFilter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s == FILTER_ALL {
            TypeFilter::All
        } else {
            TypeFilter::Exact(s.to_string())
        })
    }
}

impl Serialize for TypeFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_default())
    }
}

/// Device state selector.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StateFilter {
    #[default]
    All,
    /// Powered lights.
    On,
    /// Lights at zero power.
    Off,
    /// Anything with a non-zero opening.
    Open,
    /// Anything fully closed.
    Closed,
}

impl StateFilter {
    /// Devices lacking the inspected field never match, whatever the value
    /// of the other field.
    pub fn matches(self, device: &Device) -> bool {
        match self {
            StateFilter::All => true,
            StateFilter::On => device.power.is_some_and(|p| p > 0),
            StateFilter::Off => device.power == Some(0),
            StateFilter::Open => device.opening.is_some_and(|o| o > 0),
            StateFilter::Closed => device.opening == Some(0),
        }
    }
}

/// The (type, state) pair driving the displayed list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type", default)]
    pub kind: TypeFilter,
    #[serde(default)]
    pub state: StateFilter,
}

impl Filter {
    pub fn matches(&self, device: &Device) -> bool {
        self.kind.matches(device) && self.state.matches(device)
    }

    /// Devices passing the filter, in snapshot order.
    pub fn apply<'a>(&self, devices: &'a [Device]) -> Vec<&'a Device> {
        devices.iter().filter(|d| self.matches(d)).collect()
    }
}

/// Aggregate counters over the whole, unfiltered registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub lights_on: usize,
    pub shutters_open: usize,
    pub doors_open: usize,
    pub garage_open: usize,
}

impl Counts {
    pub fn compute(devices: &[Device]) -> Self {
        fn count(devices: &[Device], pred: impl Fn(&Device) -> bool) -> usize {
            devices.iter().filter(|d| pred(d)).count()
        }

        Self {
            lights_on: count(devices, |d| d.is_type(TYPE_LIGHT) && StateFilter::On.matches(d)),
            shutters_open: count(devices, |d| {
                d.is_type(TYPE_SHUTTER) && StateFilter::Open.matches(d)
            }),
            // Garage doors are counted once, as garages.
            doors_open: count(devices, |d| {
                d.is_type(TYPE_DOOR) && !d.is_type(TYPE_GARAGE) && StateFilter::Open.matches(d)
            }),
            garage_open: count(devices, |d| {
                d.is_type(TYPE_GARAGE) && StateFilter::Open.matches(d)
            }),
        }
    }
}
