use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::{AuthInfo, VenueInfo};

/// Columns projected by the active venues query
const VENUE_COLUMNS: &str = "id,name,city,state,machine_model,serial_number";

/// Arguments of the `validate_machine_auth` procedure
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MachineAuthRequest {
    pub p_venue_id: String,
    pub p_product_key: String,
    /// Always null; the server derives the caller address itself.
    pub p_ip_address: Option<String>,
    pub p_user_agent: String,
}

impl MachineAuthRequest {
    pub fn new(venue_id: &str, product_key: &str, user_agent: &str) -> Self {
        Self {
            p_venue_id: venue_id.to_string(),
            p_product_key: product_key.to_string(),
            p_ip_address: None,
            p_user_agent: user_agent.to_string(),
        }
    }
}

/// Envelope returned by `validate_machine_auth`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct MachineAuthResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub venue: Option<VenueInfo>,
    #[serde(default)]
    pub auth: Option<AuthInfo>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Trait for the hosted backend so the session manager can run against fakes
pub trait VenueBackend {
    fn validate_machine_auth(&self, request: &MachineAuthRequest) -> Result<MachineAuthResponse>;

    /// Active venues ordered by name
    fn active_venues(&self) -> Result<Vec<VenueInfo>>;
}

/// Default user agent sent with authentication calls
pub fn default_user_agent() -> String {
    format!(
        "kiosk/{} ({})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

/// REST client for the hosted backend (PostgREST conventions)
pub struct RestClient {
    base_url: String,
    anon_key: String,
    timeout: Duration,
    agent: ureq::Agent,
}

impl RestClient {
    pub fn new(base_url: &str, anon_key: &str, timeout_ms: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            timeout: Duration::from_millis(timeout_ms),
            agent: ureq::Agent::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn rpc_url(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, name)
    }

    fn venues_url(&self) -> String {
        format!(
            "{}/rest/v1/venues?select={}&status=eq.active&order=name.asc",
            self.base_url, VENUE_COLUMNS
        )
    }

    fn authorized(&self, req: ureq::Request) -> ureq::Request {
        req.timeout(self.timeout)
            .set("apikey", &self.anon_key)
            .set("Authorization", &format!("Bearer {}", self.anon_key))
            .set("Content-Type", "application/json")
    }
}

fn into_error(err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            anyhow!("Backend error {}: {}", code, body)
        }
        e => anyhow!("Request failed: {}", e),
    }
}

impl VenueBackend for RestClient {
    fn validate_machine_auth(&self, request: &MachineAuthRequest) -> Result<MachineAuthResponse> {
        let url = self.rpc_url("validate_machine_auth");
        let resp = self
            .authorized(self.agent.post(&url))
            .send_json(serde_json::to_value(request)?)
            .map_err(into_error)?;
        let body: MachineAuthResponse = resp.into_json()?;
        Ok(body)
    }

    fn active_venues(&self) -> Result<Vec<VenueInfo>> {
        let url = self.venues_url();
        let resp = self
            .authorized(self.agent.get(&url))
            .call()
            .map_err(into_error)?;
        let venues: Vec<VenueInfo> = resp.into_json()?;
        Ok(venues)
    }
}

/// Backend selected at startup; `Unconfigured` keeps local-only commands
/// (status, logout) usable without connection settings
pub enum Backend {
    Rest(RestClient),
    Unconfigured(String),
}

impl Backend {
    /// Fail with the configuration error when no connection settings resolved
    pub fn ensure_configured(&self) -> Result<()> {
        match self {
            Backend::Rest(_) => Ok(()),
            Backend::Unconfigured(reason) => Err(anyhow!("{}", reason)),
        }
    }
}

impl VenueBackend for Backend {
    fn validate_machine_auth(&self, request: &MachineAuthRequest) -> Result<MachineAuthResponse> {
        match self {
            Backend::Rest(client) => client.validate_machine_auth(request),
            Backend::Unconfigured(reason) => Err(anyhow!("{}", reason)),
        }
    }

    fn active_venues(&self) -> Result<Vec<VenueInfo>> {
        match self {
            Backend::Rest(client) => client.active_venues(),
            Backend::Unconfigured(reason) => Err(anyhow!("{}", reason)),
        }
    }
}
