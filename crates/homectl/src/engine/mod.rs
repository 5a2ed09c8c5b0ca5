mod batch;
pub mod command;
mod device;
#[allow(clippy::module_inception)]
mod engine;
pub mod filter;
mod registry;
mod selection;
mod toggle;
mod view;

pub use batch::BatchError;
pub use batch::BatchReport;
pub use batch::CommandFailure;
pub use batch::FailureReason;
pub use command::resolve_command;
pub use command::Intent;
pub use device::Device;
pub use device::DevicesResponse;
pub use engine::Engine;
pub use engine::RefreshOutcome;
pub use engine::DEFAULT_TIMEOUT;
pub use filter::Counts;
pub use filter::Filter;
pub use filter::StateFilter;
pub use filter::TypeFilter;
pub use registry::DeviceRegistry;
pub use selection::SelectionSet;
pub use toggle::PendingIntent;
pub use toggle::ToggleError;
pub use toggle::ToggleOutcome;
pub use view::DeviceView;
pub use view::View;

#[cfg(test)]
pub(crate) use device::light;
#[cfg(test)]
pub(crate) use device::shutter;
