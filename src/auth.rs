//! Machine session manager.
//!
//! Bridges a one-time credential check (venue id + product key) to a
//! durable, restorable local session. The backend and the store are
//! injected so the manager can run against fakes.
//!
//! Failures fall in three groups:
//! - the server rejects the credentials: the reason is shown verbatim
//! - the call itself fails: a generic error is shown and the cause logged
//! - the cached session is corrupt: it is discarded silently

use anyhow::Result;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::activity::ActivityLog;
use crate::backend::{default_user_agent, MachineAuthRequest, VenueBackend};
use crate::session::{MachineSession, VenueInfo};
use crate::store::LocalStore;

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const GENERIC_AUTH_ERROR: &str = "Failed to authenticate. Please try again.";
const MISSING_INPUT: &str = "Venue ID and product key are required";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

/// Transient user notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub kind: NoticeKind,
}

impl Notice {
    fn success(title: &str, description: String) -> Self {
        Self {
            title: title.to_string(),
            description,
            kind: NoticeKind::Success,
        }
    }

    fn error(title: &str, description: String) -> Self {
        Self {
            title: title.to_string(),
            description,
            kind: NoticeKind::Error,
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.description)
    }
}

/// Result of an authentication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(Notice),
    /// The server (or input validation) refused the credentials
    Rejected(Notice),
    /// The call could not be completed
    Failed(Notice),
}

impl AuthOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated(_))
    }

    pub fn notice(&self) -> &Notice {
        match self {
            AuthOutcome::Authenticated(n) | AuthOutcome::Rejected(n) | AuthOutcome::Failed(n) => n,
        }
    }
}

/// Shared view of whether an authentication call is outstanding
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Rc<Cell<bool>>);

impl BusyFlag {
    pub fn get(&self) -> bool {
        self.0.get()
    }

    fn enter(&self) -> BusyGuard<'_> {
        self.0.set(true);
        BusyGuard(self)
    }
}

/// Clears the busy flag on every exit path
struct BusyGuard<'a>(&'a BusyFlag);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        (self.0).0.set(false);
    }
}

pub struct MachineAuth<B, S> {
    backend: B,
    store: S,
    session: Option<MachineSession>,
    busy: BusyFlag,
    user_agent: String,
    activity: RefCell<Option<ActivityLog>>,
}

impl<B: VenueBackend, S: LocalStore> MachineAuth<B, S> {
    pub fn new(backend: B, store: S) -> Self {
        Self {
            backend,
            store,
            session: None,
            busy: BusyFlag::default(),
            user_agent: default_user_agent(),
            activity: RefCell::new(None),
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_activity_log(self, log: ActivityLog) -> Self {
        *self.activity.borrow_mut() = Some(log);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&MachineSession> {
        self.session.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Load the cached session, if any. Returns whether one was restored.
    ///
    /// Missing, unreadable and corrupt values all leave the manager
    /// unauthenticated; a corrupt value is also removed.
    pub fn restore(&mut self) -> bool {
        self.session = None;

        let raw = match self.store.load() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.record(|log| log.restore("absent"));
                return false;
            }
            Err(e) => {
                eprintln!("Warning: failed to read machine session: {:#}", e);
                self.record(|log| log.restore("unreadable"));
                return false;
            }
        };

        match MachineSession::from_json(&raw) {
            Ok(session) => {
                self.session = Some(session);
                self.record(|log| log.restore("found"));
                true
            }
            Err(_) => {
                if let Err(e) = self.store.clear() {
                    eprintln!("Warning: failed to discard corrupt machine session: {:#}", e);
                }
                self.record(|log| log.restore("corrupt"));
                false
            }
        }
    }

    /// Validate the credentials with the backend and cache the session on success.
    ///
    /// A failed attempt leaves any existing session and the store untouched.
    pub fn authenticate(&mut self, venue_id: &str, product_key: &str) -> AuthOutcome {
        // The key is sent exactly as entered; blank input never reaches the server
        let venue_id = venue_id.trim();
        if venue_id.is_empty() || product_key.trim().is_empty() {
            return AuthOutcome::Rejected(Notice::error(
                "Authentication Failed",
                MISSING_INPUT.to_string(),
            ));
        }

        let request = MachineAuthRequest::new(venue_id, product_key, &self.user_agent);
        let response = {
            let _busy = self.busy.enter();
            self.backend.validate_machine_auth(&request)
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Authentication error: {:#}", e);
                let message = format!("{:#}", e);
                self.record(|log| log.backend_error("validate_machine_auth", &message));
                self.record(|log| {
                    log.auth_attempt(venue_id, product_key, false, Some(GENERIC_AUTH_ERROR))
                });
                return AuthOutcome::Failed(Notice::error(
                    "Authentication Error",
                    GENERIC_AUTH_ERROR.to_string(),
                ));
            }
        };

        match (response.success, response.venue, response.auth) {
            (true, Some(venue), Some(auth)) => {
                let session = MachineSession::new(venue, auth);
                let description = format!("Welcome to {} admin panel", session.venue.name);

                // The in-memory session stands even if persisting fails, but an
                // older stored session must not come back on the next restore
                let saved = session
                    .to_json()
                    .map_err(anyhow::Error::from)
                    .and_then(|json| self.store.save(&json));
                if let Err(e) = saved {
                    eprintln!("Warning: failed to save machine session: {:#}", e);
                    if let Err(e) = self.store.clear() {
                        eprintln!("Warning: failed to remove stale machine session: {:#}", e);
                    }
                }

                self.session = Some(session);
                self.record(|log| log.auth_attempt(venue_id, product_key, true, None));
                AuthOutcome::Authenticated(Notice::success(
                    "Authentication Successful",
                    description,
                ))
            }
            _ => {
                let reason = response
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| INVALID_CREDENTIALS.to_string());
                self.record(|log| log.auth_attempt(venue_id, product_key, false, Some(&reason)));
                AuthOutcome::Rejected(Notice::error("Authentication Failed", reason))
            }
        }
    }

    /// Drop the session from memory and storage. Always succeeds.
    pub fn logout(&mut self) -> Notice {
        let previous = self.session.take();
        if let Err(e) = self.store.clear() {
            eprintln!("Warning: failed to remove machine session: {:#}", e);
        }
        let venue_id = previous.as_ref().map(|s| s.venue.id.clone());
        self.record(|log| log.logout(venue_id.as_deref()));
        Notice::success(
            "Logged Out",
            "You have been logged out successfully".to_string(),
        )
    }

    /// Active venues ordered by name; empty on any backend error
    pub fn list_active_venues(&self) -> Vec<VenueInfo> {
        match self.backend.active_venues() {
            Ok(venues) => venues,
            Err(e) => {
                eprintln!("Error fetching venues: {:#}", e);
                let message = format!("{:#}", e);
                self.record(|log| log.backend_error("active_venues", &message));
                Vec::new()
            }
        }
    }

    fn record(&self, f: impl FnOnce(&mut ActivityLog) -> Result<()>) {
        if let Some(log) = self.activity.borrow_mut().as_mut() {
            if let Err(e) = f(log) {
                eprintln!("Warning: failed to write activity log: {}", e);
            }
        }
    }
}
