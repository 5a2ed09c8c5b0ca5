//! Boundary to the remote house service.
//!
//! The engine only talks to [`HouseApi`]; [`http::HttpHouseApi`] is the real
//! implementation and tests use a scripted mock.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;

use crate::engine::Device;

/// Status the device listing answers with while the house has not been
/// initialized on the remote side yet.
pub const HOUSE_NOT_READY_STATUS: u16 = 500;

/// Errors produced while talking to the remote service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote answered with status {0}")]
    Status(u16),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("request timed out")]
    Timeout,

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    #[error("no house available for this account")]
    NoHouse,
}

impl RemoteError {
    /// The HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status(code) => Some(*code),
            RemoteError::Unauthorized => Some(401),
            RemoteError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Device operations of one authenticated session.
///
/// Implementations report any status outside 200-299 as an error.
#[async_trait]
pub trait HouseApi: Send + Sync {
    /// Fetch the full device list of a house.
    async fn fetch_devices(&self, house_id: u32) -> Result<Vec<Device>, RemoteError>;

    /// Send one command to one device. The response body is ignored.
    async fn send_command(
        &self,
        house_id: u32,
        device_id: &str,
        command: &str,
    ) -> Result<(), RemoteError>;
}
