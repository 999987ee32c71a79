//! Machine session model.
//!
//! A session is the client-held record of a successful machine
//! authentication. It is stored as opaque JSON and never mutated in place:
//! it is created by a successful login and destroyed by logout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Venue details as returned by the backend
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct VenueInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub machine_model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
}

impl VenueInfo {
    /// "City, State" with empty parts left out
    pub fn location(&self) -> String {
        [self.city.as_str(), self.state.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Authorization granted to the machine
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AuthInfo {
    pub product_id: String,
    pub access_level: String,
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl AuthInfo {
    /// True when `expires_at` parses and lies before `now`.
    ///
    /// Informational only; the server enforces expiry on every privileged call.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .is_some_and(|t| t.with_timezone(&Utc) < now)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MachineSession {
    pub venue: VenueInfo,
    pub auth: AuthInfo,
    pub authenticated: bool,
}

impl MachineSession {
    pub fn new(venue: VenueInfo, auth: AuthInfo) -> Self {
        Self {
            venue,
            auth,
            authenticated: true,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
