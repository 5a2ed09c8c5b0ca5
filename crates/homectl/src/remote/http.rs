use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use super::HouseApi;
use super::RemoteError;
use crate::engine::Device;
use crate::engine::DevicesResponse;

/// Public Polyhome service.
pub const DEFAULT_BASE_URL: &str = "https://polyhome.lesmoulinsdudev.com";

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    login: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
}

/// A house the account can access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseSummary {
    pub house_id: u32,
    #[serde(default)]
    pub owner: bool,
}

/// Choose the house to control: the configured one if the account can see
/// it, otherwise the first owned house, otherwise the first house.
pub fn pick_house(houses: &[HouseSummary], configured: Option<u32>) -> Option<u32> {
    if let Some(id) = configured {
        return houses.iter().find(|h| h.house_id == id).map(|h| h.house_id);
    }
    houses
        .iter()
        .find(|h| h.owner)
        .or_else(|| houses.first())
        .map(|h| h.house_id)
}

/// HTTP client for the house service.
///
/// Login and listing calls are bounded by `request_timeout`. Commands carry
/// no client-side deadline; the engine bounds them with its own command
/// timeout.
pub struct HttpHouseApi {
    base_url: Url,
    http: reqwest::Client,
    request_timeout: Duration,
    token: Option<String>,
}

impl HttpHouseApi {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url,
            http,
            request_timeout,
            token: None,
        })
    }

    /// Use an existing session token instead of logging in.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Page showing the house in a browser. Visiting it initializes a house
    /// the service reports as not ready.
    pub fn browser_url(&self, house_id: u32) -> String {
        let mut url = self.base_url.clone();
        url.set_query(Some(&format!("houseId={}", house_id)));
        url.to_string()
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, RemoteError> {
        let base = if self.base_url.path().ends_with('/') {
            self.base_url.clone()
        } else {
            let mut base = self.base_url.clone();
            base.set_path(&format!("{}/", self.base_url.path()));
            base
        };
        base.join(endpoint.trim_start_matches('/'))
            .map_err(|e| RemoteError::Endpoint(e.to_string()))
    }

    fn request_url(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn request(
        &self,
        method: Method,
        endpoint: &str,
    ) -> Result<reqwest::RequestBuilder, RemoteError> {
        Ok(self
            .request_url(method, self.endpoint_url(endpoint)?)
            .timeout(self.request_timeout))
    }

    async fn send(builder: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Transport(e)
            }
        })
    }

    fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(RemoteError::Unauthorized)
        } else {
            Err(RemoteError::Status(status.as_u16()))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, RemoteError> {
        let response = Self::send(self.request(Method::GET, endpoint)?).await?;
        let response = Self::check_status(response)?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Log in and keep the returned token for every later call.
    pub async fn authenticate(
        &mut self,
        login: &str,
        password: &str,
    ) -> Result<String, RemoteError> {
        let response = Self::send(
            self.request(Method::POST, "api/users/auth")?
                .json(&AuthRequest { login, password }),
        )
        .await?;
        let response = Self::check_status(response)?;
        let body = response.bytes().await?;
        let auth: AuthResponse = serde_json::from_slice(&body)?;

        if auth.token.trim().is_empty() {
            return Err(RemoteError::Unauthorized);
        }

        info!("Authenticated as {}", login);
        self.token = Some(auth.token.clone());
        Ok(auth.token)
    }

    /// Houses visible to the current account.
    pub async fn houses(&self) -> Result<Vec<HouseSummary>, RemoteError> {
        self.get_json("api/houses").await
    }

    /// Resolve the house this session controls.
    pub async fn select_house(&self, configured: Option<u32>) -> Result<u32, RemoteError> {
        let houses = self.houses().await?;
        debug!("Account has {} house(s)", houses.len());
        pick_house(&houses, configured).ok_or(RemoteError::NoHouse)
    }
}

#[async_trait]
impl HouseApi for HttpHouseApi {
    async fn fetch_devices(&self, house_id: u32) -> Result<Vec<Device>, RemoteError> {
        let response: DevicesResponse = self
            .get_json(&format!("api/houses/{}/devices", house_id))
            .await?;
        Ok(response.devices)
    }

    async fn send_command(
        &self,
        house_id: u32,
        device_id: &str,
        command: &str,
    ) -> Result<(), RemoteError> {
        let endpoint = format!("api/houses/{}/devices/", house_id);
        let mut url = self.endpoint_url(&endpoint)?;
        // Device ids contain spaces ("Light 1.1"); push them as one encoded segment.
        url.path_segments_mut()
            .map_err(|_| RemoteError::Endpoint(endpoint.clone()))?
            .pop_if_empty()
            .push(device_id)
            .push("command");

        let response = Self::send(
            self.request_url(Method::POST, url)
                .json(&CommandRequest { command }),
        )
        .await?;
        Self::check_status(response)?;
        debug!("Device {} accepted command {}", device_id, command);
        Ok(())
    }
}
