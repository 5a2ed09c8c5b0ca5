//! Scripted [`HouseApi`] for engine tests.

use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::HouseApi;
use super::RemoteError;
use crate::engine::command::OFF_CANDIDATES;
use crate::engine::command::ON_CANDIDATES;
use crate::engine::Device;

/// In-memory house. Accepted commands are applied to the device table so a
/// later fetch observes them, like the real service.
#[derive(Default)]
pub struct MockHouseApi {
    devices: Mutex<Vec<Device>>,
    fetch_failure: Mutex<Option<u16>>,
    rejected: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<(String, String)>>,
    fetches: AtomicUsize,
    command_gate: Option<Arc<Semaphore>>,
    fetch_gate: Option<Arc<Semaphore>>,
}

impl MockHouseApi {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Self::default()
        }
    }

    /// Commands wait for a permit on `gate` before answering.
    pub fn with_command_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.command_gate = Some(gate);
        self
    }

    /// Fetches wait for a permit on `gate` before answering.
    pub fn with_fetch_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.fetch_gate = Some(gate);
        self
    }

    pub fn fail_fetches(&self, status: Option<u16>) {
        *self.fetch_failure.lock().unwrap() = status;
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock().unwrap() = devices;
    }

    /// Commands to `device_id` answer 503.
    pub fn reject(&self, device_id: &str) {
        self.rejected.lock().unwrap().insert(device_id.to_string());
    }

    /// Commands to `device_id` never answer.
    pub fn stall(&self, device_id: &str) {
        self.stalled.lock().unwrap().insert(device_id.to_string());
    }

    /// Every (device, command) pair that reached the mock, in order.
    pub fn attempts(&self) -> Vec<(String, String)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn apply(&self, device_id: &str, command: &str) {
        let normalized = command.to_lowercase().replace('_', " ").trim().to_string();
        let level = if ON_CANDIDATES
            .iter()
            .any(|c| c.replace('_', " ") == normalized)
        {
            100
        } else if OFF_CANDIDATES
            .iter()
            .any(|c| c.replace('_', " ") == normalized)
        {
            0
        } else {
            return;
        };

        let mut devices = self.devices.lock().unwrap();
        if let Some(device) = devices.iter_mut().find(|d| d.id == device_id) {
            if device.power.is_some() {
                device.power = Some(level);
            }
            if device.opening.is_some() {
                device.opening = Some(level);
            }
        }
    }
}

#[async_trait]
impl HouseApi for MockHouseApi {
    async fn fetch_devices(&self, _house_id: u32) -> Result<Vec<Device>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.fetch_gate {
            gate.acquire().await.unwrap().forget();
        }

        let failure = *self.fetch_failure.lock().unwrap();
        if let Some(status) = failure {
            return Err(RemoteError::Status(status));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn send_command(
        &self,
        _house_id: u32,
        device_id: &str,
        command: &str,
    ) -> Result<(), RemoteError> {
        self.attempts
            .lock()
            .unwrap()
            .push((device_id.to_string(), command.to_string()));
        if let Some(gate) = &self.command_gate {
            gate.acquire().await.unwrap().forget();
        }

        let stalled = self.stalled.lock().unwrap().contains(device_id);
        if stalled {
            std::future::pending::<()>().await;
        }
        let rejected = self.rejected.lock().unwrap().contains(device_id);
        if rejected {
            return Err(RemoteError::Status(503));
        }

        self.apply(device_id, command);
        Ok(())
    }
}
