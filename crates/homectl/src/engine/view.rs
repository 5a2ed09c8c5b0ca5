use std::fmt::Write;

use serde::Serialize;

use super::filter::Counts;
use super::filter::Filter;

/// One row of the displayed device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub power: Option<u8>,
    pub opening: Option<u8>,
    /// "Opening: 40%", "Power: 0%" or "State: 1".
    pub label: String,
    /// Displayed on/off state. Follows a pending toggle while one is in flight.
    pub on: bool,
    pub selected: bool,
    /// A toggle command for this device is awaiting its result.
    pub pending: bool,
    /// Whether the device's own control accepts input right now.
    pub interactive: bool,
}

/// Snapshot handed to the presentation layer after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct View {
    pub house_id: u32,
    pub filter: Filter,
    /// Type selector options: "all" followed by every observed type.
    pub types: Vec<String>,
    pub devices: Vec<DeviceView>,
    pub selection: Vec<String>,
    pub counts: Counts,
    pub batch_running: bool,
    /// `selection non-empty AND no batch in flight`.
    pub batch_enabled: bool,
    pub select_all_enabled: bool,
    /// At least one device listing succeeded.
    pub loaded: bool,
    /// The house must be initialized remotely before devices can be listed.
    pub awaiting_init: bool,
}

impl View {
    /// Plain-text rendering used by the command line.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "House #{} | type={} state={} | {} device(s), {} selected",
            self.house_id,
            self.filter.kind,
            self.filter.state,
            self.devices.len(),
            self.selection.len()
        );
        let _ = writeln!(
            out,
            "Lights on: {} | Shutters open: {} | Doors open: {} | Garage open: {}",
            self.counts.lights_on,
            self.counts.shutters_open,
            self.counts.doors_open,
            self.counts.garage_open
        );

        for device in &self.devices {
            let mark = if device.selected { "[x]" } else { "[ ]" };
            let state = if device.on { 1 } else { 0 };
            let _ = write!(
                out,
                "{} {} (#{}) {} [{}]",
                mark, device.kind, device.id, device.label, state
            );
            if device.pending {
                out.push_str(" pending");
            } else if !device.interactive {
                out.push_str(" locked");
            }
            out.push('\n');
        }

        if self.awaiting_init {
            out.push_str("House is being initialized, retry shortly\n");
        }

        out
    }
}
