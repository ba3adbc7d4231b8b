//! Client-side flow engine for the quiz site.
//!
//! [`SiteRouter`] composes the [`NavigationAdapter`], the path resolver, one
//! [`FlowController`] per instrument and the [`RefreshGuard`].
//! [`SessionHandle`] runs a router on its own task for front ends that issue
//! commands concurrently.

pub mod background;
pub mod config;
pub mod error;
pub mod flow;
pub mod guard;
pub mod instruments;
pub mod navigation;
pub mod resolver;
pub mod router;
pub mod session;
pub mod sinks;

pub use config::{load_settings, load_settings_from, FlowTimings, SiteSettings};
pub use error::{BackgroundTaskError, FlowError};
pub use flow::{ContactPolicy, Flow, FlowController, FlowVariant, Instrument, Transition};
pub use guard::RefreshGuard;
pub use navigation::{Location, LocationChanged, NavigationAdapter, NavigationCause};
pub use resolver::{resolve, HashRoute, Route};
pub use router::{ActiveView, RouterDeps, SiteRouter};
pub use session::{SessionCommand, SessionHandle};
pub use sinks::{
    AnalyticsSink, Collaborators, ContactSink, DisabledAnalyticsSink, DisabledContactSink,
    DisabledResultsLog, HttpAnalyticsSink, HttpContactSink, HttpResultsLog, LoggedPaymentRedirect,
    PaymentRedirect, ResultsLog,
};

#[cfg(test)]
#[path = "tests/fixtures.rs"]
mod fixtures;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
