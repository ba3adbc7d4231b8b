use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

const MAX_NAME_CHARS: usize = 80;
const REFERRAL_PREFIX: &str = "IN";
const REFERRAL_PHONE_DIGITS: usize = 6;
const MAX_REFERRAL_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentId {
    Gbsi,
    Aura,
    Atm,
    Metabolic,
}

impl InstrumentId {
    pub const ALL: [InstrumentId; 4] = [
        InstrumentId::Gbsi,
        InstrumentId::Aura,
        InstrumentId::Atm,
        InstrumentId::Metabolic,
    ];

    /// Static path prefix owning every stage of this instrument.
    pub fn root(self) -> &'static str {
        match self {
            InstrumentId::Gbsi => "/gbsi",
            InstrumentId::Aura => "/aura",
            InstrumentId::Atm => "/atm",
            InstrumentId::Metabolic => "/metabolic",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstrumentId::Gbsi => "gbsi",
            InstrumentId::Aura => "aura",
            InstrumentId::Atm => "atm",
            InstrumentId::Metabolic => "metabolic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(raw.trim()))
    }

    /// URL for `stage` under this instrument's root.
    pub fn path_for(self, stage: Stage) -> String {
        match stage.segment() {
            "" => self.root().to_string(),
            segment => format!("{}/{segment}", self.root()),
        }
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named step of a flow. Each stage owns exactly one URL path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Landing,
    Terms,
    Quiz,
    WindDown,
    Qualification,
    Analyzing,
    Results,
    Preview,
    PreviewResults,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Landing,
        Stage::Terms,
        Stage::Quiz,
        Stage::WindDown,
        Stage::Qualification,
        Stage::Analyzing,
        Stage::Results,
        Stage::Preview,
        Stage::PreviewResults,
    ];

    pub fn segment(self) -> &'static str {
        match self {
            Stage::Landing => "",
            Stage::Terms => "terms",
            Stage::Quiz => "quiz",
            Stage::WindDown => "wind-down",
            Stage::Qualification => "qualification",
            Stage::Analyzing => "analyzing",
            Stage::Results => "results",
            Stage::Preview => "preview",
            Stage::PreviewResults => "preview-results",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.segment() == segment)
    }

    pub fn is_results(self) -> bool {
        matches!(self, Stage::Results | Stage::PreviewResults)
    }

    pub fn accepts_answers(self) -> bool {
        matches!(self, Stage::Quiz | Stage::Preview)
    }

    /// Stages that must never render without a computed result behind them.
    pub fn requires_result(self) -> bool {
        self.is_results() || self == Stage::Analyzing
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Landing => f.write_str("landing"),
            other => f.write_str(other.segment()),
        }
    }
}

/// One response. JSON `true`, `3` and `"loose"` map to flag, number and
/// choice respectively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Flag(bool),
    Number(i64),
    Choice(String),
}

impl AnswerValue {
    pub fn choice(value: impl Into<String>) -> Self {
        AnswerValue::Choice(value.into())
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            AnswerValue::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            AnswerValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            AnswerValue::Choice(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Flag(value) => write!(f, "{value}"),
            AnswerValue::Number(value) => write!(f, "{value}"),
            AnswerValue::Choice(value) => f.write_str(value),
        }
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Flag(value)
    }
}

impl From<i64> for AnswerValue {
    fn from(value: i64) -> Self {
        AnswerValue::Number(value)
    }
}

impl From<i32> for AnswerValue {
    fn from(value: i32) -> Self {
        AnswerValue::Number(i64::from(value))
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Choice(value.to_string())
    }
}

/// Responses keyed by question id. A repeated id overwrites the earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSet(BTreeMap<String, AnswerValue>);

impl AnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, question: impl Into<String>, value: AnswerValue) -> Option<AnswerValue> {
        self.0.insert(question.into(), value)
    }

    /// Builder form of [`AnswerSet::insert`].
    pub fn with(mut self, question: impl Into<String>, value: impl Into<AnswerValue>) -> Self {
        self.insert(question, value.into());
        self
    }

    pub fn get(&self, question: &str) -> Option<&AnswerValue> {
        self.0.get(question)
    }

    pub fn contains(&self, question: &str) -> bool {
        self.0.contains_key(question)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnswerValue)> {
        self.0.iter().map(|(id, value)| (id.as_str(), value))
    }

    /// Required ids with no answer yet, in the order given.
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|id| !self.0.contains_key(*id))
            .map(str::to_string)
            .collect()
    }
}

impl FromIterator<(String, AnswerValue)> for AnswerSet {
    fn from_iter<T: IntoIterator<Item = (String, AnswerValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        })
    }
}

/// Raw contact fields as typed into a form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactForm {
    pub name: String,
    pub whatsapp: String,
    pub email: String,
}

impl ContactForm {
    pub fn new(
        name: impl Into<String>,
        whatsapp: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            whatsapp: whatsapp.into(),
            email: email.into(),
        }
    }

    pub fn validate(&self) -> Result<ContactRecord, ValidationError> {
        ContactRecord::new(&self.name, &self.whatsapp, &self.email)
    }
}

/// Contact details that passed format validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactRecord {
    name: String,
    whatsapp: String,
    email: String,
}

impl ContactRecord {
    pub fn new(name: &str, whatsapp: &str, email: &str) -> Result<Self, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(ValidationError::NameTooLong {
                max: MAX_NAME_CHARS,
            });
        }
        let whatsapp = normalize_local_phone(whatsapp)?;
        let email = email.trim();
        if !is_email_shaped(email) {
            return Err(ValidationError::InvalidEmail);
        }

        Ok(Self {
            name: name.to_string(),
            whatsapp,
            email: email.to_ascii_lowercase(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ten local digits, without country prefix.
    pub fn whatsapp(&self) -> &str {
        &self.whatsapp
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn referral_code(&self) -> ReferralCode {
        ReferralCode::from_phone(&self.whatsapp).unwrap_or_else(|| ReferralCode::from_name(&self.name))
    }
}

fn normalize_local_phone(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let (plus, body) = match trimmed.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut digits = String::with_capacity(body.len());
    for ch in body.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            ' ' | '-' | '(' | ')' => {}
            _ => return Err(ValidationError::InvalidPhone),
        }
    }

    let local = if plus {
        digits
            .strip_prefix("91")
            .ok_or(ValidationError::InvalidPhone)?
    } else if digits.len() == 12 && digits.starts_with("91") {
        &digits[2..]
    } else if digits.len() == 11 && digits.starts_with('0') {
        &digits[1..]
    } else {
        digits.as_str()
    };

    let leading_ok = matches!(local.as_bytes().first(), Some(b'6'..=b'9'));
    if local.len() != 10 || !leading_ok {
        return Err(ValidationError::InvalidPhone);
    }
    Ok(local.to_string())
}

fn is_email_shaped(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Code carried as the `ref` query parameter for a whole session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferralCode(String);

impl ReferralCode {
    /// Accepts an externally supplied code, e.g. from the address bar.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_REFERRAL_LEN
            && raw
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn from_phone(phone: &str) -> Option<Self> {
        let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < REFERRAL_PHONE_DIGITS {
            return None;
        }
        let tail = &digits[digits.len() - REFERRAL_PHONE_DIGITS..];
        Some(Self(format!("{REFERRAL_PREFIX}{tail}")))
    }

    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.trim().to_lowercase().as_bytes());
        let hex: String = digest[..3].iter().map(|byte| format!("{byte:02X}")).collect();
        Self(format!("{REFERRAL_PREFIX}{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_segments_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_segment(stage.segment()), Some(stage));
        }
        assert_eq!(Stage::from_segment("bogus"), None);
    }

    #[test]
    fn path_for_landing_is_bare_root() {
        assert_eq!(InstrumentId::Gbsi.path_for(Stage::Landing), "/gbsi");
        assert_eq!(
            InstrumentId::Aura.path_for(Stage::PreviewResults),
            "/aura/preview-results"
        );
    }

    #[test]
    fn repeated_answer_keeps_last_value() {
        let mut answers = AnswerSet::new();
        answers.insert("stress_level", AnswerValue::Number(2));
        let previous = answers.insert("stress_level", AnswerValue::Number(5));
        assert_eq!(previous, Some(AnswerValue::Number(2)));
        assert_eq!(answers.get("stress_level"), Some(&AnswerValue::Number(5)));
        assert_eq!(answers.len(), 1);
    }

    #[test]
    fn answer_values_deserialize_by_shape() {
        let answers: AnswerSet =
            serde_json::from_str(r#"{"a": true, "b": 3, "c": "loose"}"#).expect("answers");
        assert_eq!(answers.get("a"), Some(&AnswerValue::Flag(true)));
        assert_eq!(answers.get("b"), Some(&AnswerValue::Number(3)));
        assert_eq!(answers.get("c"), Some(&AnswerValue::choice("loose")));
    }

    #[test]
    fn accepts_common_indian_phone_spellings() {
        for raw in ["9876543210", "+91 98765 43210", "919876543210", "09876543210", "98765-43210"] {
            let record = ContactRecord::new("Asha", raw, "asha@example.com").expect(raw);
            assert_eq!(record.whatsapp(), "9876543210");
        }
    }

    #[test]
    fn rejects_malformed_contact_fields() {
        assert_eq!(
            ContactRecord::new("  ", "9876543210", "a@b.co"),
            Err(ValidationError::EmptyName)
        );
        for phone in ["12345", "1234567890", "98765x3210", "+1 9876543210"] {
            assert_eq!(
                ContactRecord::new("Asha", phone, "a@b.co"),
                Err(ValidationError::InvalidPhone),
                "{phone}"
            );
        }
        for email in ["asha", "asha@", "@b.co", "a@b", "a@.co", "a@b.", "a b@c.co", "a@b@c.co"] {
            assert_eq!(
                ContactRecord::new("Asha", "9876543210", email),
                Err(ValidationError::InvalidEmail),
                "{email}"
            );
        }
    }

    #[test]
    fn referral_code_prefers_phone_digits() {
        let record = ContactRecord::new("Asha", "9876543210", "asha@example.com").expect("record");
        assert_eq!(record.referral_code().as_str(), "IN543210");
    }

    #[test]
    fn referral_code_from_name_is_stable_and_case_insensitive() {
        let first = ReferralCode::from_name("Asha Rao");
        let second = ReferralCode::from_name("  asha rao ");
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 8);
        assert!(first.as_str().starts_with("IN"));
    }

    #[test]
    fn referral_parse_rejects_garbage() {
        assert!(ReferralCode::parse("IN123").is_some());
        assert!(ReferralCode::parse("").is_none());
        assert!(ReferralCode::parse("<script>").is_none());
    }
}
