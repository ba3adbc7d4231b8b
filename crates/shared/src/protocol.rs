//! Payloads exchanged with the external collaborators: the contact sink, the
//! results log and the analytics sink.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::{Confidence, InstrumentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormType {
    Gbsi,
    Aura,
    AuraPreview,
    Atm,
    Metabolic,
    Consultation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSubmission {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub form_type: FormType,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSubmissionResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Compact description of a computed result, common to every instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub instrument: InstrumentId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub confidence: Confidence,
    pub matched_rule: String,
}

/// One flattened row for the results log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub instrument: InstrumentId,
    pub session_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub name: String,
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<InstrumentId>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub at: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn new(name: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            name: name.into(),
            session_id,
            instrument: None,
            properties: Map::new(),
            at: Utc::now(),
        }
    }

    pub fn for_instrument(mut self, instrument: InstrumentId) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
