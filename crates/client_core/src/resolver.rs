//! Classifies a [`Location`] into the one view that owns it.

use serde::{Deserialize, Serialize};
use shared::domain::{InstrumentId, Stage};
use tracing::{debug, warn};

use crate::navigation::Location;

pub const CONSULTATION_ROOT: &str = "/consultation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashRoute {
    #[default]
    Home,
    Team,
    Booking,
}

impl HashRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            HashRoute::Home => "home",
            HashRoute::Team => "team",
            HashRoute::Booking => "booking",
        }
    }

    /// Unknown or empty hashes fall back to the home section.
    pub fn from_hash(hash: Option<&str>) -> Self {
        match hash.map(|hash| hash.trim_start_matches('#')) {
            Some("team") => HashRoute::Team,
            Some("booking") => HashRoute::Booking,
            _ => HashRoute::Home,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Marketing(HashRoute),
    Consultation,
    Instrument {
        id: InstrumentId,
        /// Everything after the root, without the leading slash.
        sub_path: String,
    },
    Unmatched(String),
}

impl Route {
    pub fn instrument(&self) -> Option<InstrumentId> {
        match self {
            Route::Instrument { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// The stage encoded in the sub-path, if it names one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Route::Instrument { sub_path, .. } => Stage::from_segment(sub_path),
            _ => None,
        }
    }
}

/// Static roots, matched on a segment boundary. The longest match wins.
fn roots() -> impl Iterator<Item = (&'static str, Option<InstrumentId>)> {
    InstrumentId::ALL
        .into_iter()
        .map(|id| (id.root(), Some(id)))
        .chain(std::iter::once((CONSULTATION_ROOT, None)))
}

fn strip_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

pub fn resolve(location: &Location) -> Route {
    let path = location.path.as_str();
    if path == "/" {
        return Route::Marketing(HashRoute::from_hash(location.hash.as_deref()));
    }

    let best = roots()
        .filter_map(|(root, id)| strip_root(path, root).map(|rest| (root.len(), id, rest)))
        .max_by_key(|(len, _, _)| *len);

    match best {
        Some((_, Some(id), rest)) => {
            debug!(instrument = %id, sub_path = rest, "resolve: instrument route");
            Route::Instrument {
                id,
                sub_path: rest.to_string(),
            }
        }
        Some((_, None, _)) => Route::Consultation,
        None => {
            warn!(path, "resolve: no route matches path");
            Route::Unmatched(path.to_string())
        }
    }
}
