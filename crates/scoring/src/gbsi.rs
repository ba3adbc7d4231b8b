//! Gut-brain sensitivity index.
//!
//! Red flags (alarm signs, age, family history) triage straight to an urgent
//! referral. Otherwise a 0–3 gut-brain sub-score is banded and fed, with pain
//! frequency and stool pattern, into the subtype table.

use std::collections::BTreeMap;

use serde::Serialize;
use shared::{
    domain::{AnswerSet, Confidence, InstrumentId},
    protocol::ResultSummary,
};

use crate::{
    questions::{Answers, QuestionSpec},
    rules::{bucket, count_indicators, MatchKind, Rule, RuleTable},
    ScoredOutcome, ScoringError,
};

pub const URGENT_AGE: i64 = 50;
const FREQUENT_PAIN: i64 = 3;
const HIGH_STRESS: i64 = 4;
const FREQUENT_FOG: i64 = 3;

pub const QUESTIONS: &[QuestionSpec] = &[
    QuestionSpec::number("age", 12, 100),
    QuestionSpec::flag("alarm_signs"),
    QuestionSpec::flag("family_history"),
    QuestionSpec::scale("pain_frequency", 1, 4),
    QuestionSpec::choice("stool_type", &["hard", "loose", "alternating", "normal"]),
    QuestionSpec::scale("stress_level", 1, 5),
    QuestionSpec::scale("brain_fog", 1, 4),
    QuestionSpec::flag("pain_linked_to_defecation"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GbsiClass {
    UrgentReferral,
    HighSensitivity,
    IbsDiarrhea,
    IbsConstipation,
    IbsMixed,
    FunctionalSensitivity,
    LowConcern,
    Mixed,
}

impl GbsiClass {
    pub fn as_str(self) -> &'static str {
        match self {
            GbsiClass::UrgentReferral => "urgent_referral",
            GbsiClass::HighSensitivity => "high_sensitivity",
            GbsiClass::IbsDiarrhea => "ibs_diarrhea",
            GbsiClass::IbsConstipation => "ibs_constipation",
            GbsiClass::IbsMixed => "ibs_mixed",
            GbsiClass::FunctionalSensitivity => "functional_sensitivity",
            GbsiClass::LowConcern => "low_concern",
            GbsiClass::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityBand {
    Low,
    Medium,
    High,
}

impl SensitivityBand {
    pub fn as_str(self) -> &'static str {
        match self {
            SensitivityBand::Low => "low",
            SensitivityBand::Medium => "medium",
            SensitivityBand::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoolType {
    Hard,
    Loose,
    Alternating,
    Normal,
}

impl StoolType {
    fn parse(raw: &str) -> Self {
        match raw {
            "hard" => StoolType::Hard,
            "loose" => StoolType::Loose,
            "alternating" => StoolType::Alternating,
            _ => StoolType::Normal,
        }
    }
}

struct Context {
    age: i64,
    alarm_signs: bool,
    family_history: bool,
    pain_frequency: i64,
    stool: StoolType,
    band: SensitivityBand,
}

const BAND_BOUNDS: &[(u8, SensitivityBand)] =
    &[(1, SensitivityBand::Low), (2, SensitivityBand::Medium)];

const TABLE: RuleTable<Context, GbsiClass> = RuleTable {
    overrides: &[
        Rule {
            name: "alarm_signs",
            when: |c| c.alarm_signs,
            then: GbsiClass::UrgentReferral,
        },
        Rule {
            name: "age_threshold",
            when: |c| c.age >= URGENT_AGE,
            then: GbsiClass::UrgentReferral,
        },
        Rule {
            name: "family_history",
            when: |c| c.family_history,
            then: GbsiClass::UrgentReferral,
        },
    ],
    rules: &[
        Rule {
            name: "high_band_frequent_pain",
            when: |c| c.band == SensitivityBand::High && c.pain_frequency >= FREQUENT_PAIN,
            then: GbsiClass::HighSensitivity,
        },
        Rule {
            name: "frequent_pain_loose",
            when: |c| c.pain_frequency >= FREQUENT_PAIN && c.stool == StoolType::Loose,
            then: GbsiClass::IbsDiarrhea,
        },
        Rule {
            name: "frequent_pain_hard",
            when: |c| c.pain_frequency >= FREQUENT_PAIN && c.stool == StoolType::Hard,
            then: GbsiClass::IbsConstipation,
        },
        Rule {
            name: "frequent_pain_alternating",
            when: |c| c.pain_frequency >= FREQUENT_PAIN && c.stool == StoolType::Alternating,
            then: GbsiClass::IbsMixed,
        },
        Rule {
            name: "medium_band_recurring_pain",
            when: |c| c.band == SensitivityBand::Medium && c.pain_frequency >= 2,
            then: GbsiClass::FunctionalSensitivity,
        },
        Rule {
            name: "rare_pain_low_band",
            when: |c| c.pain_frequency <= 1 && c.band == SensitivityBand::Low,
            then: GbsiClass::LowConcern,
        },
    ],
    fallback: GbsiClass::Mixed,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GbsiResult {
    pub class: GbsiClass,
    pub sub_score: u8,
    pub band: SensitivityBand,
    pub confidence: Confidence,
    pub matched_rule: &'static str,
}

pub fn score(answers: &AnswerSet) -> Result<GbsiResult, ScoringError> {
    let answers = Answers::new(answers, QUESTIONS);

    let sub_score = count_indicators(&[
        answers.number("stress_level")? >= HIGH_STRESS,
        answers.number("brain_fog")? >= FREQUENT_FOG,
        answers.flag("pain_linked_to_defecation")?,
    ]);
    let band = bucket(sub_score, BAND_BOUNDS, SensitivityBand::High);

    let context = Context {
        age: answers.number("age")?,
        alarm_signs: answers.flag("alarm_signs")?,
        family_history: answers.flag("family_history")?,
        pain_frequency: answers.number("pain_frequency")?,
        stool: StoolType::parse(answers.choice("stool_type")?),
        band,
    };

    let verdict = TABLE.evaluate(&context);
    let confidence = match verdict.kind {
        MatchKind::Override | MatchKind::Rule(0..=3) => Confidence::High,
        MatchKind::Rule(_) => Confidence::Medium,
        MatchKind::Fallback => Confidence::Low,
    };

    Ok(GbsiResult {
        class: verdict.outcome,
        sub_score,
        band,
        confidence,
        matched_rule: verdict.rule,
    })
}

impl ScoredOutcome for GbsiResult {
    fn summary(&self) -> ResultSummary {
        ResultSummary {
            instrument: InstrumentId::Gbsi,
            label: self.class.as_str().to_string(),
            band: Some(self.band.as_str().to_string()),
            score: Some(f64::from(self.sub_score)),
            confidence: self.confidence,
            matched_rule: self.matched_rule.to_string(),
        }
    }

    fn row_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("gbsi_class".to_string(), self.class.as_str().to_string()),
            ("gbsi_sub_score".to_string(), self.sub_score.to_string()),
            ("gbsi_band".to_string(), self.band.as_str().to_string()),
            ("confidence".to_string(), self.confidence.to_string()),
            ("matched_rule".to_string(), self.matched_rule.to_string()),
        ])
    }
}
