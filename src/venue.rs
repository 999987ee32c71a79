//! Venue detection.
//!
//! Works out which venue the console operates on. Sources in priority order:
//! the machine session, an explicit override, then the last detected venue.
//! The winner is remembered for the next run.

use crate::session::MachineSession;
use crate::store::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueSource {
    Session,
    Override,
    Stored,
}

impl VenueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "machine session",
            Self::Override => "override",
            Self::Stored => "last used",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedVenue {
    pub id: String,
    pub source: VenueSource,
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

/// Resolve the current venue and remember it in `stored`.
///
/// Returns `None` when no source knows a venue.
pub fn detect_venue(
    session: Option<&MachineSession>,
    override_id: Option<&str>,
    stored: &impl LocalStore,
) -> Option<DetectedVenue> {
    let from_session = session
        .and_then(|s| non_empty(&s.venue.id))
        .map(|id| (id.to_string(), VenueSource::Session));
    let from_override = || {
        override_id
            .and_then(non_empty)
            .map(|id| (id.to_string(), VenueSource::Override))
    };
    let from_store = || match stored.load() {
        Ok(value) => value
            .as_deref()
            .and_then(non_empty)
            .map(|id| (id.to_string(), VenueSource::Stored)),
        Err(e) => {
            eprintln!("Warning: failed to read last venue: {:#}", e);
            None
        }
    };

    let (id, source) = from_session.or_else(from_override).or_else(from_store)?;

    if source != VenueSource::Stored {
        if let Err(e) = stored.save(&id) {
            eprintln!("Warning: failed to remember venue: {:#}", e);
        }
    }

    Some(DetectedVenue { id, source })
}
