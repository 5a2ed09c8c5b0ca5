use std::collections::BTreeSet;

use super::device::Device;

/// Last-known-good snapshot of every device in the house.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    types: Vec<String>,
}

impl DeviceRegistry {
    /// Discard the current snapshot and install `devices`.
    ///
    /// Also recomputes the sorted, deduplicated list of observed types.
    pub fn replace(&mut self, devices: Vec<Device>) {
        self.types = devices
            .iter()
            .map(|d| d.kind.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.devices = devices;
    }

    /// The current snapshot, in the order the remote returned it.
    pub fn all(&self) -> &[Device] {
        &self.devices
    }

    /// Distinct device types, sorted.
    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
