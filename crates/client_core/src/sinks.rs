//! Outbound collaborators: contact sink, results log, analytics and the
//! payment redirect. The router only ever holds them as trait objects.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    error::{ApiError, ErrorCode, SinkError},
    protocol::{AnalyticsEvent, ContactSubmission, ContactSubmissionResponse, ResultRow},
};
use tracing::{debug, info};
use url::Url;

use crate::config::SiteSettings;

#[async_trait]
pub trait ContactSink: Send + Sync {
    async fn submit(&self, submission: &ContactSubmission) -> Result<ContactSubmissionResponse>;
}

#[async_trait]
pub trait ResultsLog: Send + Sync {
    async fn append(&self, row: &ResultRow) -> Result<()>;
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn track(&self, event: &AnalyticsEvent) -> Result<()>;
}

/// Hands the visitor off to an external checkout page.
pub trait PaymentRedirect: Send + Sync {
    fn open(&self, url: &Url) -> Result<()>;
}

pub struct HttpContactSink {
    http: Client,
    url: Url,
}

impl HttpContactSink {
    pub fn new(http: Client, url: Url) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl ContactSink for HttpContactSink {
    async fn submit(&self, submission: &ContactSubmission) -> Result<ContactSubmissionResponse> {
        let response = self
            .http
            .post(self.url.clone())
            .json(submission)
            .send()
            .await
            .with_context(|| format!("failed to reach contact sink {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.json::<ApiError>().await.unwrap_or_else(|_| {
                ApiError::new(ErrorCode::Unavailable, format!("contact sink returned {status}"))
            });
            return Err(SinkError::from(body).into());
        }
        let response: ContactSubmissionResponse = response
            .json()
            .await
            .context("contact sink returned an unreadable body")?;
        if !response.success {
            return Err(SinkError::new(ErrorCode::Rejected, response.message).into());
        }
        Ok(response)
    }
}

pub struct HttpResultsLog {
    http: Client,
    url: Url,
}

impl HttpResultsLog {
    pub fn new(http: Client, url: Url) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl ResultsLog for HttpResultsLog {
    async fn append(&self, row: &ResultRow) -> Result<()> {
        self.http
            .post(self.url.clone())
            .json(row)
            .send()
            .await
            .with_context(|| format!("failed to reach results log {}", self.url))?
            .error_for_status()?;
        Ok(())
    }
}

pub struct HttpAnalyticsSink {
    http: Client,
    url: Url,
}

impl HttpAnalyticsSink {
    pub fn new(http: Client, url: Url) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl AnalyticsSink for HttpAnalyticsSink {
    async fn track(&self, event: &AnalyticsEvent) -> Result<()> {
        self.http
            .post(self.url.clone())
            .json(event)
            .send()
            .await
            .with_context(|| format!("failed to reach analytics sink {}", self.url))?
            .error_for_status()?;
        Ok(())
    }
}

pub struct DisabledContactSink;

#[async_trait]
impl ContactSink for DisabledContactSink {
    async fn submit(&self, submission: &ContactSubmission) -> Result<ContactSubmissionResponse> {
        debug!(form_type = ?submission.form_type, "sink: contact sink not configured, dropping submission");
        Ok(ContactSubmissionResponse {
            success: true,
            message: "contact sink disabled".to_string(),
        })
    }
}

pub struct DisabledResultsLog;

#[async_trait]
impl ResultsLog for DisabledResultsLog {
    async fn append(&self, row: &ResultRow) -> Result<()> {
        debug!(instrument = %row.instrument, "sink: results log not configured, dropping row");
        Ok(())
    }
}

pub struct DisabledAnalyticsSink;

#[async_trait]
impl AnalyticsSink for DisabledAnalyticsSink {
    async fn track(&self, event: &AnalyticsEvent) -> Result<()> {
        debug!(event = %event.name, "sink: analytics not configured");
        Ok(())
    }
}

/// Logs the hand-off; a front end replaces this with a real window open.
pub struct LoggedPaymentRedirect;

impl PaymentRedirect for LoggedPaymentRedirect {
    fn open(&self, url: &Url) -> Result<()> {
        info!(%url, "payment: redirecting to checkout");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub contact: Arc<dyn ContactSink>,
    pub results: Arc<dyn ResultsLog>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub payment: Arc<dyn PaymentRedirect>,
    pub payment_url: Option<Url>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Collaborators {
    pub fn disabled() -> Self {
        Self {
            contact: Arc::new(DisabledContactSink),
            results: Arc::new(DisabledResultsLog),
            analytics: Arc::new(DisabledAnalyticsSink),
            payment: Arc::new(LoggedPaymentRedirect),
            payment_url: None,
        }
    }

    /// HTTP sinks for every configured URL, disabled ones elsewhere.
    pub fn from_settings(settings: &SiteSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.http_timeout())
            .build()
            .context("failed to build http client")?;
        let mut collaborators = Self::disabled();

        if let Some(url) = &settings.contact_sink_url {
            collaborators.contact = Arc::new(HttpContactSink::new(http.clone(), url.clone()));
        }
        if let Some(url) = &settings.results_log_url {
            collaborators.results = Arc::new(HttpResultsLog::new(http.clone(), url.clone()));
        }
        if let Some(url) = &settings.analytics_url {
            collaborators.analytics = Arc::new(HttpAnalyticsSink::new(http, url.clone()));
        }
        collaborators.payment_url = settings.payment_url.clone();

        Ok(collaborators)
    }
}

#[cfg(test)]
#[path = "tests/sinks_tests.rs"]
mod tests;
