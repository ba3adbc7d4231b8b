//! Top-level router: one navigation adapter, four flow controllers, the
//! marketing hash routes and the refresh guard.
//!
//! Every operation follows the same loop. The controller validates and moves
//! its own stage, the router pushes the resulting path through the adapter,
//! then drains location events and re-derives the active controller from the
//! path. The path is therefore the single source of truth; a controller that
//! disagrees with it after an event is re-derived and the desync is logged.

use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Context};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use shared::{
    domain::{AnswerValue, ContactForm, ContactRecord, InstrumentId, Stage},
    protocol::{AnalyticsEvent, ContactSubmission, FormType, ResultRow},
};
use tokio::{
    sync::broadcast::{self, error::TryRecvError},
    time::Instant,
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    background::{analysing_join, BackgroundTasks, JoinOutcome},
    config::{FlowTimings, SiteSettings},
    error::FlowError,
    flow::{Flow, FlowVariant, Transition},
    guard::RefreshGuard,
    instruments::{AtmFlow, AuraFlow, GbsiFlow, MetabolicFlow},
    navigation::{Location, LocationChanged, NavigationAdapter, NavigationCause},
    resolver::{resolve, HashRoute, Route},
    sinks::Collaborators,
};

/// What the page should show right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ActiveView {
    Marketing {
        section: HashRoute,
    },
    Consultation,
    Instrument {
        instrument: InstrumentId,
        stage: Stage,
        locked: bool,
    },
    NotFound {
        path: String,
    },
}

#[derive(Clone, Default)]
pub struct RouterDeps {
    pub collaborators: Collaborators,
    pub timings: FlowTimings,
}

impl RouterDeps {
    pub fn from_settings(settings: &SiteSettings) -> anyhow::Result<Self> {
        Ok(Self {
            collaborators: Collaborators::from_settings(settings)?,
            timings: settings.timings(),
        })
    }
}

pub struct SiteRouter {
    nav: NavigationAdapter,
    events: broadcast::Receiver<LocationChanged>,
    route: Route,
    gbsi: GbsiFlow,
    aura: AuraFlow,
    atm: AtmFlow,
    metabolic: MetabolicFlow,
    guard: RefreshGuard,
    background: BackgroundTasks,
    collaborators: Collaborators,
    timings: FlowTimings,
    session_id: Uuid,
    analyzing_since: HashMap<InstrumentId, Instant>,
}

impl SiteRouter {
    /// Starts a session at `href`: resolves it, syncs the matching flow and
    /// runs the refresh guard once, so deep links to a results page land on
    /// the instrument's landing stage.
    pub fn mount(href: &str, deps: RouterDeps) -> Self {
        let nav = NavigationAdapter::mount(href);
        let events = nav.subscribe();
        let location = nav.current_location();
        let mut router = Self {
            route: Route::Marketing(HashRoute::Home),
            nav,
            events,
            gbsi: GbsiFlow::new(),
            aura: AuraFlow::new(),
            atm: AtmFlow::new(),
            metabolic: MetabolicFlow::new(),
            guard: RefreshGuard::new(),
            background: BackgroundTasks::new(),
            collaborators: deps.collaborators,
            timings: deps.timings,
            session_id: Uuid::new_v4(),
            analyzing_since: HashMap::new(),
        };
        info!(
            session_id = %router.session_id,
            href = %location.href(),
            referral = router.nav.session_ref().map(|code| code.as_str()),
            "router: mounted"
        );
        router.on_location(&location, None);
        router.emit("session_started", router.route.instrument(), None);
        router.render();
        router
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn nav(&self) -> &NavigationAdapter {
        &self.nav
    }

    pub fn current_path(&self) -> String {
        self.nav.current_path()
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn flow(&self, id: InstrumentId) -> &dyn Flow {
        match id {
            InstrumentId::Gbsi => &self.gbsi,
            InstrumentId::Aura => &self.aura,
            InstrumentId::Atm => &self.atm,
            InstrumentId::Metabolic => &self.metabolic,
        }
    }

    fn flow_mut(&mut self, id: InstrumentId) -> &mut dyn Flow {
        match id {
            InstrumentId::Gbsi => &mut self.gbsi,
            InstrumentId::Aura => &mut self.aura,
            InstrumentId::Atm => &mut self.atm,
            InstrumentId::Metabolic => &mut self.metabolic,
        }
    }

    pub fn gbsi(&self) -> &GbsiFlow {
        &self.gbsi
    }

    pub fn aura(&self) -> &AuraFlow {
        &self.aura
    }

    pub fn atm(&self) -> &AtmFlow {
        &self.atm
    }

    pub fn metabolic(&self) -> &MetabolicFlow {
        &self.metabolic
    }

    /// Calls a flow's analysing stage would still wait on.
    pub fn pending_background(&self, id: InstrumentId) -> usize {
        self.background.pending(id)
    }

    /// Runs the refresh guard over every flow, then reports the active view.
    pub fn render(&mut self) -> ActiveView {
        self.pump();
        let active = self.route.instrument();
        let flows: [&mut dyn Flow; 4] = [
            &mut self.gbsi,
            &mut self.aura,
            &mut self.atm,
            &mut self.metabolic,
        ];
        let redirects = self.guard.run(flows, active);
        for redirect in redirects {
            let id = redirect.transition.instrument;
            self.analyzing_since.remove(&id);
            if redirect.navigate {
                self.nav.replace_stage(&redirect.transition.path(), true);
            }
            self.emit("guard_redirect", Some(id), Some(&redirect.transition));
        }
        self.pump();
        self.view()
    }

    /// The view for the current route, without running the guard.
    pub fn view(&self) -> ActiveView {
        match &self.route {
            Route::Marketing(section) => ActiveView::Marketing { section: *section },
            Route::Consultation => ActiveView::Consultation,
            Route::Instrument { id, .. } => {
                let flow = self.flow(*id);
                ActiveView::Instrument {
                    instrument: *id,
                    stage: flow.stage(),
                    locked: flow.is_locked(),
                }
            }
            Route::Unmatched(path) => ActiveView::NotFound { path: path.clone() },
        }
    }

    pub fn start(&mut self, id: InstrumentId) -> Result<ActiveView, FlowError> {
        let transition = self.flow_mut(id).start()?;
        self.emit("quiz_started", Some(id), Some(&transition));
        self.apply(transition);
        Ok(self.render())
    }

    pub fn start_preview(&mut self, id: InstrumentId) -> Result<ActiveView, FlowError> {
        let transition = self.flow_mut(id).start_preview()?;
        self.emit("preview_started", Some(id), Some(&transition));
        self.apply(transition);
        Ok(self.render())
    }

    pub fn accept_terms(
        &mut self,
        id: InstrumentId,
        contact: Option<ContactForm>,
    ) -> Result<ActiveView, FlowError> {
        let contact = self.validate_contact(Some(id), contact)?;
        let transition = self.flow_mut(id).accept_terms(contact)?;
        self.emit("terms_accepted", Some(id), Some(&transition));
        self.apply(transition);
        Ok(self.render())
    }

    pub fn answer_question(
        &mut self,
        id: InstrumentId,
        question: &str,
        value: AnswerValue,
    ) -> Result<(), FlowError> {
        self.flow_mut(id).answer_question(question, value)?;
        let event = self
            .analytics_event("question_answered", Some(id), None)
            .with("question", question);
        self.send_analytics(event);
        Ok(())
    }

    pub fn answer_qualification(
        &mut self,
        id: InstrumentId,
        question: &str,
        value: AnswerValue,
    ) -> Result<(), FlowError> {
        self.flow_mut(id).answer_qualification(question, value)?;
        let event = self
            .analytics_event("qualification_answered", Some(id), None)
            .with("question", question);
        self.send_analytics(event);
        Ok(())
    }

    pub fn advance(&mut self, id: InstrumentId) -> Result<ActiveView, FlowError> {
        let transition = self.flow_mut(id).advance()?;
        self.emit("quiz_advanced", Some(id), Some(&transition));
        self.apply(transition);
        Ok(self.render())
    }

    /// Scores the flow and moves it on. Contact and result calls are fired
    /// without waiting; their outcome never affects the returned view.
    pub fn complete(
        &mut self,
        id: InstrumentId,
        contact: Option<ContactForm>,
    ) -> Result<ActiveView, FlowError> {
        let contact = self.validate_contact(Some(id), contact)?;
        let transition = self.flow_mut(id).complete(contact)?;
        self.emit("quiz_completed", Some(id), Some(&transition));
        self.apply(transition);
        self.submit_flow_contact(id);
        self.log_result(id);
        Ok(self.render())
    }

    pub fn unlock(&mut self, id: InstrumentId, contact: ContactForm) -> Result<ActiveView, FlowError> {
        let contact = self.validate_form(Some(id), &contact)?;
        self.flow_mut(id).unlock(contact)?;
        self.emit("result_unlocked", Some(id), None);
        self.submit_flow_contact(id);
        Ok(self.render())
    }

    pub fn retake(&mut self, id: InstrumentId) -> ActiveView {
        self.analyzing_since.remove(&id);
        let transition = self.flow_mut(id).retake();
        self.emit("quiz_retaken", Some(id), transition.as_ref());
        if let Some(transition) = transition {
            self.apply(transition);
        }
        self.render()
    }

    /// Holds the analysing stage until the dwell timer ran out and the
    /// flow's background calls settled (or hit the cap), then shows results.
    pub async fn settle_analysis(&mut self, id: InstrumentId) -> Result<ActiveView, FlowError> {
        let stage = self.flow(id).stage();
        if stage != Stage::Analyzing {
            return Err(FlowError::IllegalTransition {
                instrument: id,
                stage,
                operation: "settle_analysis",
            });
        }

        let since = self
            .analyzing_since
            .remove(&id)
            .unwrap_or_else(Instant::now);
        let handles = self.background.take(id);
        let outcome = analysing_join(
            handles,
            since + self.timings.analyzing_min_dwell,
            self.timings.analyzing_max_wait,
        )
        .await;
        debug!(instrument = %id, settled = outcome.settled, timed_out = outcome.timed_out, "router: analysis settled");

        if self.flow(id).stage() == Stage::Analyzing {
            let transition = self.flow_mut(id).finish_analysis()?;
            self.emit("analysis_finished", Some(id), Some(&transition));
            self.apply(transition);
        }
        Ok(self.render())
    }

    /// Waits for every call still in flight, up to the analysing cap. Run
    /// this before the runtime shuts down so nothing is cut short.
    pub async fn flush_background(&mut self) -> JoinOutcome {
        let handles = self.background.drain();
        let outcome = analysing_join(handles, Instant::now(), self.timings.analyzing_max_wait).await;
        info!(
            settled = outcome.settled,
            timed_out = outcome.timed_out,
            "router: background calls flushed"
        );
        outcome
    }

    pub fn submit_consultation(&mut self, contact: ContactForm) -> Result<ActiveView, FlowError> {
        let contact = self.validate_form(None, &contact)?;
        let submission = ContactSubmission {
            name: contact.name().to_string(),
            phone: contact.whatsapp().to_string(),
            email: contact.email().to_string(),
            form_type: FormType::Consultation,
            metadata: self.contact_metadata(&contact, Value::Null),
        };
        let sink = Arc::clone(&self.collaborators.contact);
        self.background
            .spawn_logged("consultation_submission", None, async move {
                sink.submit(&submission).await.map(|_| ())
            });
        self.emit("consultation_submitted", None, None);
        Ok(self.render())
    }

    /// Opens the checkout page for a scored flow, carrying the session `ref`.
    pub fn begin_payment(&mut self, id: InstrumentId) -> anyhow::Result<Url> {
        let mut url = self
            .collaborators
            .payment_url
            .clone()
            .context("payment url is not configured")?;
        if !self.flow(id).has_result() {
            return Err(anyhow!("{id}: payment requires a computed result"));
        }
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("instrument", id.as_str());
            if let Some(code) = self.nav.session_ref() {
                query.append_pair("ref", code.as_str());
            }
        }
        self.collaborators.payment.open(&url)?;
        self.emit("payment_started", Some(id), None);
        Ok(url)
    }

    /// Follows an in-site link.
    pub fn navigate_to(&mut self, href: &str) -> ActiveView {
        let target = Location::parse(href);
        match target.hash.as_deref() {
            Some(hash) => self.nav.push_with_hash(&target.path, hash, true),
            None => self.nav.push_stage(&target.path, true),
        };
        self.emit("navigation", None, None);
        self.render()
    }

    pub fn open_marketing(&mut self, section: HashRoute) -> ActiveView {
        if self.nav.current_location().path == "/" {
            self.nav.set_hash(section.as_str());
        } else {
            self.nav.push_with_hash("/", section.as_str(), true);
        }
        let event = self
            .analytics_event("marketing_section", None, None)
            .with("section", section.as_str());
        self.send_analytics(event);
        self.render()
    }

    pub fn back(&mut self) -> ActiveView {
        if self.nav.back() {
            self.emit("history_back", None, None);
        }
        self.render()
    }

    pub fn forward(&mut self) -> ActiveView {
        if self.nav.forward() {
            self.emit("history_forward", None, None);
        }
        self.render()
    }

    fn apply(&mut self, transition: Transition) {
        if transition.to == Stage::Analyzing {
            self.analyzing_since
                .insert(transition.instrument, Instant::now());
        }
        self.nav.push_stage(&transition.path(), true);
        self.pump();
    }

    /// Drains pending location events; the only place flows are re-derived.
    fn pump(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.on_location(&event.location, Some(event.cause)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "router: location events lagged, re-reading address bar");
                    let location = self.nav.current_location();
                    self.on_location(&location, None);
                }
            }
        }
    }

    fn on_location(&mut self, location: &Location, cause: Option<NavigationCause>) {
        let route = resolve(location);
        self.route = route.clone();

        let Route::Instrument { id, sub_path } = route else {
            return;
        };
        let flow = self.flow_mut(id);
        let before = flow.stage();
        if flow.sync_to(&sub_path) {
            let after = flow.stage();
            if matches!(cause, Some(NavigationCause::Push | NavigationCause::Replace)) {
                warn!(
                    error = %FlowError::StateDesync {
                        instrument: id,
                        path_stage: after,
                        flow_stage: before,
                    },
                    "router: flow re-derived from path"
                );
            }
            if after == Stage::Analyzing {
                self.analyzing_since.entry(id).or_insert_with(Instant::now);
            }
        }
        if Stage::from_segment(&sub_path) != Some(self.flow(id).stage()) {
            self.nav.replace_stage(id.root(), true);
        }
    }

    fn validate_form(
        &self,
        instrument: Option<InstrumentId>,
        form: &ContactForm,
    ) -> Result<ContactRecord, FlowError> {
        form.validate().map_err(|err| {
            let event = self
                .analytics_event("contact_rejected", instrument, None)
                .with("reason", err.to_string());
            self.send_analytics(event);
            FlowError::from(err)
        })
    }

    fn validate_contact(
        &self,
        instrument: Option<InstrumentId>,
        contact: Option<ContactForm>,
    ) -> Result<Option<ContactRecord>, FlowError> {
        contact
            .map(|form| self.validate_form(instrument, &form))
            .transpose()
    }

    fn contact_metadata(&self, contact: &ContactRecord, flow: Value) -> Value {
        json!({
            "session_id": self.session_id,
            "ref": self.nav.session_ref(),
            "referral_code": contact.referral_code(),
            "flow": flow,
        })
    }

    /// Sends the flow's contact once per flow, if it has one.
    fn submit_flow_contact(&mut self, id: InstrumentId) {
        let Some(contact) = self.flow(id).contact().cloned() else {
            return;
        };
        if !self.flow_mut(id).mark_contact_submitted() {
            return;
        }
        let flow = self.flow(id);
        let form_type = match (id, flow.variant()) {
            (InstrumentId::Gbsi, _) => FormType::Gbsi,
            (InstrumentId::Aura, FlowVariant::Main) => FormType::Aura,
            (InstrumentId::Aura, FlowVariant::Preview) => FormType::AuraPreview,
            (InstrumentId::Atm, _) => FormType::Atm,
            (InstrumentId::Metabolic, _) => FormType::Metabolic,
        };
        let submission = ContactSubmission {
            name: contact.name().to_string(),
            phone: contact.whatsapp().to_string(),
            email: contact.email().to_string(),
            form_type,
            metadata: self.contact_metadata(&contact, flow.metadata()),
        };
        let sink = Arc::clone(&self.collaborators.contact);
        self.background
            .spawn_for_flow("contact_submission", id, async move {
                let response = sink.submit(&submission).await?;
                debug!(message = %response.message, "sink: contact accepted");
                anyhow::Ok(())
            });
    }

    fn log_result(&mut self, id: InstrumentId) {
        let Some(mut fields) = self.flow(id).result_row_fields() else {
            return;
        };
        if let Some(code) = self.nav.session_ref() {
            fields.insert("ref".to_string(), code.to_string());
        }
        let row = ResultRow {
            instrument: id,
            session_id: self.session_id,
            recorded_at: Utc::now(),
            fields,
        };
        let log = Arc::clone(&self.collaborators.results);
        self.background
            .spawn_for_flow("results_log", id, async move { log.append(&row).await });
    }

    fn analytics_event(
        &self,
        name: &str,
        instrument: Option<InstrumentId>,
        transition: Option<&Transition>,
    ) -> AnalyticsEvent {
        let mut event = AnalyticsEvent::new(name, self.session_id)
            .with("path", self.nav.current_path());
        if let Some(id) = instrument {
            event = event.for_instrument(id);
        }
        if let Some(transition) = transition {
            event = event
                .with("from", transition.from.to_string())
                .with("to", transition.to.to_string());
        }
        if let Some(code) = self.nav.session_ref() {
            event = event.with("ref", code.as_str());
        }
        event
    }

    fn emit(&self, name: &str, instrument: Option<InstrumentId>, transition: Option<&Transition>) {
        let event = self.analytics_event(name, instrument, transition);
        self.send_analytics(event);
    }

    fn send_analytics(&self, event: AnalyticsEvent) {
        let sink = Arc::clone(&self.collaborators.analytics);
        self.background
            .spawn_logged("analytics", event.instrument, async move {
                sink.track(&event).await
            });
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
