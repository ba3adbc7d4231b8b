//! The single writer of the address bar.
//!
//! Flows never touch the location themselves. They hand a target path to
//! [`NavigationAdapter`], which records a history entry and broadcasts one
//! [`LocationChanged`]; every consumer re-derives its state from that event.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use shared::domain::ReferralCode;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace, warn};
use url::{form_urlencoded, Url};

const REF_PARAM: &str = "ref";
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub path: String,
    pub query: Option<String>,
    pub hash: Option<String>,
}

impl Location {
    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
            query: None,
            hash: None,
        }
    }

    /// Parses a relative or absolute href. Only hrefs carrying a scheme go
    /// through [`Url`]; a leading `//` is a doubled slash, never a host.
    pub fn parse(href: &str) -> Self {
        let href = href.trim();
        if let Ok(url) = Url::parse(href) {
            return Self::from_parts(url.path(), url.query(), url.fragment());
        }

        let (rest, hash) = match href.split_once('#') {
            Some((rest, hash)) => (rest, Some(hash)),
            None => (href, None),
        };
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        Self::from_parts(path, query, hash)
    }

    fn from_parts(path: &str, query: Option<&str>, hash: Option<&str>) -> Self {
        Self {
            path: normalize_path(path),
            query: query.filter(|query| !query.is_empty()).map(str::to_string),
            hash: hash.filter(|hash| !hash.is_empty()).map(str::to_string),
        }
    }

    pub fn href(&self) -> String {
        let mut href = self.path.clone();
        if let Some(query) = &self.query {
            href.push('?');
            href.push_str(query);
        }
        if let Some(hash) = &self.hash {
            href.push('#');
            href.push_str(hash);
        }
        href
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
    }
}

/// Collapses empty segments and drops the trailing slash; the root stays `/`.
pub fn normalize_path(raw: &str) -> String {
    let segments: Vec<&str> = raw.split('/').filter(|part| !part.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationCause {
    Push,
    Replace,
    PopState,
    HashChange,
}

/// The canonical "location changed" notification.
#[derive(Debug, Clone)]
pub struct LocationChanged {
    pub seq: u64,
    pub cause: NavigationCause,
    pub location: Location,
}

struct History {
    entries: Vec<Location>,
    index: usize,
    seq: u64,
    last_dispatched: Location,
}

impl History {
    fn current(&self) -> &Location {
        &self.entries[self.index]
    }
}

pub struct NavigationAdapter {
    history: Mutex<History>,
    session_ref: Option<ReferralCode>,
    events: broadcast::Sender<LocationChanged>,
}

impl NavigationAdapter {
    /// Starts a session at `href`. The `ref` parameter is read here, once.
    pub fn mount(href: &str) -> Self {
        let location = Location::parse(href);
        let session_ref = location.query_param(REF_PARAM).and_then(|raw| {
            let parsed = ReferralCode::parse(&raw);
            if parsed.is_none() {
                warn!(raw = %raw, "nav: ignoring malformed ref parameter");
            }
            parsed
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        debug!(href = %location.href(), referral = ?session_ref, "nav: mounted");

        Self {
            history: Mutex::new(History {
                entries: vec![location.clone()],
                index: 0,
                seq: 0,
                last_dispatched: location,
            }),
            session_ref,
            events,
        }
    }

    pub fn session_ref(&self) -> Option<&ReferralCode> {
        self.session_ref.as_ref()
    }

    pub fn current_location(&self) -> Location {
        self.history().current().clone()
    }

    /// Normalized path, query and hash of the current entry.
    pub fn current_path(&self) -> String {
        self.history().current().href()
    }

    pub fn can_go_back(&self) -> bool {
        self.history().index > 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocationChanged> {
        self.events.subscribe()
    }

    /// Stream form of [`NavigationAdapter::subscribe`], covering both
    /// history pops and hash changes.
    pub fn on_change(&self) -> BroadcastStream<LocationChanged> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Writes a new history entry for `path`.
    pub fn push_stage(&self, path: &str, preserve_query: bool) -> Location {
        self.write(path, None, preserve_query, NavigationCause::Push)
    }

    pub fn push_with_hash(&self, path: &str, hash: &str, preserve_query: bool) -> Location {
        self.write(path, Some(hash), preserve_query, NavigationCause::Push)
    }

    /// Rewrites the current entry in place, e.g. for redirects that must not
    /// leave a back-button trap behind.
    pub fn replace_stage(&self, path: &str, preserve_query: bool) -> Location {
        self.write(path, None, preserve_query, NavigationCause::Replace)
    }

    pub fn set_hash(&self, hash: &str) -> Location {
        let path = self.history().current().path.clone();
        self.write(&path, Some(hash), true, NavigationCause::HashChange)
    }

    pub fn back(&self) -> bool {
        let mut history = self.history();
        if history.index == 0 {
            return false;
        }
        history.index -= 1;
        self.dispatch(&mut history, NavigationCause::PopState);
        true
    }

    pub fn forward(&self) -> bool {
        let mut history = self.history();
        if history.index + 1 >= history.entries.len() {
            return false;
        }
        history.index += 1;
        self.dispatch(&mut history, NavigationCause::PopState);
        true
    }

    fn write(
        &self,
        path: &str,
        hash: Option<&str>,
        preserve_query: bool,
        cause: NavigationCause,
    ) -> Location {
        let mut history = self.history();
        let target = Location {
            path: normalize_path(path),
            query: self.compose_query(history.current(), preserve_query),
            hash: hash
                .map(|hash| hash.trim_start_matches('#').to_string())
                .filter(|hash| !hash.is_empty()),
        };

        if &target == history.current() {
            trace!(href = %target.href(), "nav: write to current location ignored");
            return target;
        }

        match cause {
            NavigationCause::Replace => {
                let index = history.index;
                history.entries[index] = target.clone();
            }
            _ => {
                let keep = history.index + 1;
                history.entries.truncate(keep);
                history.entries.push(target.clone());
                history.index = keep;
            }
        }
        self.dispatch(&mut history, cause);
        target
    }

    fn compose_query(&self, current: &Location, preserve_query: bool) -> Option<String> {
        let mut query = if preserve_query {
            current.query.clone()
        } else {
            None
        };

        if let Some(code) = &self.session_ref {
            let has_ref = query.as_deref().is_some_and(|query| {
                form_urlencoded::parse(query.as_bytes()).any(|(name, _)| name == REF_PARAM)
            });
            if !has_ref {
                let mut serializer = form_urlencoded::Serializer::new(query.unwrap_or_default());
                serializer.append_pair(REF_PARAM, code.as_str());
                query = Some(serializer.finish());
            }
        }

        query.filter(|query| !query.is_empty())
    }

    fn dispatch(&self, history: &mut History, cause: NavigationCause) {
        let location = history.current().clone();
        if location == history.last_dispatched {
            trace!(href = %location.href(), ?cause, "nav: duplicate notification suppressed");
            return;
        }
        history.seq += 1;
        history.last_dispatched = location.clone();
        debug!(seq = history.seq, ?cause, href = %location.href(), "nav: location changed");
        // No receivers simply means nobody is rendering yet.
        let _ = self.events.send(LocationChanged {
            seq: history.seq,
            cause,
            location,
        });
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
