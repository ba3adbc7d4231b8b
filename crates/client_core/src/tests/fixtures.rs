use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use shared::{
    domain::{AnswerSet, ContactForm, InstrumentId},
    error::{ApiError, ErrorCode},
    protocol::{AnalyticsEvent, ContactSubmission, ContactSubmissionResponse, ResultRow},
};
use tokio::{net::TcpListener, sync::Mutex};
use url::Url;

use crate::sinks::{AnalyticsSink, Collaborators, ContactSink, PaymentRedirect, ResultsLog};

/// A complete, unremarkable answer set for each instrument.
pub fn answers(id: InstrumentId) -> AnswerSet {
    match id {
        InstrumentId::Gbsi => AnswerSet::new()
            .with("age", 30)
            .with("alarm_signs", false)
            .with("family_history", false)
            .with("pain_frequency", 4)
            .with("stool_type", "loose")
            .with("stress_level", 3)
            .with("brain_fog", 2)
            .with("pain_linked_to_defecation", false),
        InstrumentId::Aura => AnswerSet::new()
            .with("energy", 4)
            .with("sleep", 3)
            .with("mood", 4)
            .with("focus", 3)
            .with("digestion", 2)
            .with("persistent_hopelessness", false),
        InstrumentId::Atm => AnswerSet::new()
            .with("primary_symptom", "acidity")
            .with("trigger", "stress")
            .with("duration_months", 2)
            .with("severity", 3),
        InstrumentId::Metabolic => AnswerSet::new()
            .with("age", 42)
            .with("sex", "male")
            .with("waist_cm", 84)
            .with("family_diabetes", true)
            .with("activity_days", 4)
            .with("sugar_cravings", 2)
            .with("diagnosed_diabetes", false),
    }
}

pub fn contact() -> ContactForm {
    ContactForm::new("Asha Rao", "+91 98765 43210", "Asha@Example.com")
}

pub fn bad_contact() -> ContactForm {
    ContactForm::new("Asha Rao", "12345", "asha@example.com")
}

/// What the in-process sink server received.
#[derive(Clone, Default)]
pub struct SinkServerState {
    pub contacts: Arc<Mutex<Vec<ContactSubmission>>>,
    pub rows: Arc<Mutex<Vec<Value>>>,
    pub events: Arc<Mutex<Vec<AnalyticsEvent>>>,
    pub reject_contacts: bool,
}

async fn handle_contact(
    State(state): State<SinkServerState>,
    Json(submission): Json<ContactSubmission>,
) -> Json<ContactSubmissionResponse> {
    state.contacts.lock().await.push(submission);
    Json(ContactSubmissionResponse {
        success: !state.reject_contacts,
        message: if state.reject_contacts {
            "duplicate lead".to_string()
        } else {
            "stored".to_string()
        },
    })
}

async fn handle_row(State(state): State<SinkServerState>, Json(row): Json<Value>) -> StatusCode {
    state.rows.lock().await.push(row);
    StatusCode::NO_CONTENT
}

async fn handle_event(
    State(state): State<SinkServerState>,
    Json(event): Json<AnalyticsEvent>,
) -> StatusCode {
    state.events.lock().await.push(event);
    StatusCode::ACCEPTED
}

async fn handle_broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn handle_maintenance() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiError::new(ErrorCode::Unavailable, "maintenance window")),
    )
}

pub async fn spawn_sink_server(reject_contacts: bool) -> Result<(String, SinkServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = SinkServerState {
        reject_contacts,
        ..SinkServerState::default()
    };
    let app = Router::new()
        .route("/contact", post(handle_contact))
        .route("/results", post(handle_row))
        .route("/events", post(handle_event))
        .route("/broken", post(handle_broken))
        .route("/maintenance", post(handle_maintenance))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

/// Contact sink that answers after `delay`, counting the calls it finished.
pub struct SlowContactSink {
    pub delay: Duration,
    pub finished: Arc<AtomicUsize>,
}

#[async_trait]
impl ContactSink for SlowContactSink {
    async fn submit(&self, _submission: &ContactSubmission) -> Result<ContactSubmissionResponse> {
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(ContactSubmissionResponse {
            success: true,
            message: "stored".to_string(),
        })
    }
}

#[derive(Default)]
pub struct RecordingContactSink {
    pub submissions: Arc<std::sync::Mutex<Vec<ContactSubmission>>>,
}

#[async_trait]
impl ContactSink for RecordingContactSink {
    async fn submit(&self, submission: &ContactSubmission) -> Result<ContactSubmissionResponse> {
        self.submissions
            .lock()
            .expect("submissions lock")
            .push(submission.clone());
        Ok(ContactSubmissionResponse {
            success: true,
            message: "stored".to_string(),
        })
    }
}

pub struct FailingResultsLog;

#[async_trait]
impl ResultsLog for FailingResultsLog {
    async fn append(&self, _row: &ResultRow) -> Result<()> {
        Err(anyhow!("sheet is read-only"))
    }
}

#[derive(Default)]
pub struct RecordingResultsLog {
    pub rows: Arc<std::sync::Mutex<Vec<ResultRow>>>,
}

#[async_trait]
impl ResultsLog for RecordingResultsLog {
    async fn append(&self, row: &ResultRow) -> Result<()> {
        self.rows.lock().expect("rows lock").push(row.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAnalytics {
    pub events: Arc<std::sync::Mutex<Vec<AnalyticsEvent>>>,
}

#[async_trait]
impl AnalyticsSink for RecordingAnalytics {
    async fn track(&self, event: &AnalyticsEvent) -> Result<()> {
        self.events.lock().expect("events lock").push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPaymentRedirect {
    pub opened: Arc<std::sync::Mutex<Vec<Url>>>,
}

impl PaymentRedirect for RecordingPaymentRedirect {
    fn open(&self, url: &Url) -> Result<()> {
        self.opened.lock().expect("opened lock").push(url.clone());
        Ok(())
    }
}

/// Recording collaborators plus handles to what they saw.
pub struct Recorded {
    pub collaborators: Collaborators,
    pub submissions: Arc<std::sync::Mutex<Vec<ContactSubmission>>>,
    pub rows: Arc<std::sync::Mutex<Vec<ResultRow>>>,
    pub events: Arc<std::sync::Mutex<Vec<AnalyticsEvent>>>,
    pub opened: Arc<std::sync::Mutex<Vec<Url>>>,
}

pub fn recorded() -> Recorded {
    let contact = RecordingContactSink::default();
    let results = RecordingResultsLog::default();
    let analytics = RecordingAnalytics::default();
    let payment = RecordingPaymentRedirect::default();
    Recorded {
        submissions: Arc::clone(&contact.submissions),
        rows: Arc::clone(&results.rows),
        events: Arc::clone(&analytics.events),
        opened: Arc::clone(&payment.opened),
        collaborators: Collaborators {
            contact: Arc::new(contact),
            results: Arc::new(results),
            analytics: Arc::new(analytics),
            payment: Arc::new(payment),
            payment_url: Some(Url::parse("https://pay.example.com/checkout").expect("url")),
        },
    }
}

/// Lets spawned sink calls run on the current-thread test runtime.
pub async fn drain_tasks() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
