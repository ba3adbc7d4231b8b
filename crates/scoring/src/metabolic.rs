//! Metabolic risk check.

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

const WAIST_LIMIT_MALE_CM: i64 = 90;
const WAIST_LIMIT_FEMALE_CM: i64 = 80;
const MIN_ACTIVE_DAYS: i64 = 3;
const STRONG_CRAVINGS: i64 = 4;

pub const QUESTIONS: &[QuestionSpec] = &[
    QuestionSpec::number("age", 18, 100),
    QuestionSpec::choice("sex", &["male", "female"]),
    QuestionSpec::number("waist_cm", 40, 200),
    QuestionSpec::flag("family_diabetes"),
    QuestionSpec::number("activity_days", 0, 7),
    QuestionSpec::scale("sugar_cravings", 1, 5),
    QuestionSpec::flag("diagnosed_diabetes"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Moderate,
    High,
}

impl RiskBand {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Moderate => "moderate",
            RiskBand::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetabolicClass {
    ManagedCare,
    HighRisk,
    InsulinResistancePattern,
    EarlyWarning,
    CravingDriven,
    MetabolicallyHealthy,
    Mixed,
}

impl MetabolicClass {
    pub fn as_str(self) -> &'static str {
        match self {
            MetabolicClass::ManagedCare => "managed_care",
            MetabolicClass::HighRisk => "high_risk",
            MetabolicClass::InsulinResistancePattern => "insulin_resistance_pattern",
            MetabolicClass::EarlyWarning => "early_warning",
            MetabolicClass::CravingDriven => "craving_driven",
            MetabolicClass::MetabolicallyHealthy => "metabolically_healthy",
            MetabolicClass::Mixed => "mixed",
        }
    }
}

struct Context {
    diagnosed: bool,
    band: RiskBand,
    cravings: i64,
}

const BAND_BOUNDS: &[(u8, RiskBand)] = &[(0, RiskBand::Low), (2, RiskBand::Moderate)];

const TABLE: RuleTable<Context, MetabolicClass> = RuleTable {
    overrides: &[Rule {
        name: "diagnosed_diabetes",
        when: |c| c.diagnosed,
        then: MetabolicClass::ManagedCare,
    }],
    rules: &[
        Rule {
            name: "high_band",
            when: |c| c.band == RiskBand::High,
            then: MetabolicClass::HighRisk,
        },
        Rule {
            name: "moderate_band_cravings",
            when: |c| c.band == RiskBand::Moderate && c.cravings >= STRONG_CRAVINGS,
            then: MetabolicClass::InsulinResistancePattern,
        },
        Rule {
            name: "moderate_band",
            when: |c| c.band == RiskBand::Moderate,
            then: MetabolicClass::EarlyWarning,
        },
        Rule {
            name: "low_band_cravings",
            when: |c| c.band == RiskBand::Low && c.cravings >= STRONG_CRAVINGS,
            then: MetabolicClass::CravingDriven,
        },
        Rule {
            name: "low_band",
            when: |c| c.band == RiskBand::Low,
            then: MetabolicClass::MetabolicallyHealthy,
        },
    ],
    fallback: MetabolicClass::Mixed,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetabolicResult {
    pub class: MetabolicClass,
    /// Reported only; age never changes the class.
    pub age: i64,
    pub risk_points: u8,
    pub band: RiskBand,
    pub confidence: Confidence,
    pub matched_rule: &'static str,
}

pub fn score(answers: &AnswerSet) -> Result<MetabolicResult, ScoringError> {
    let answers = Answers::new(answers, QUESTIONS);

    let waist_limit = match answers.choice("sex")? {
        "female" => WAIST_LIMIT_FEMALE_CM,
        _ => WAIST_LIMIT_MALE_CM,
    };
    let risk_points = count_indicators(&[
        answers.number("waist_cm")? >= waist_limit,
        answers.flag("family_diabetes")?,
        answers.number("activity_days")? < MIN_ACTIVE_DAYS,
    ]);
    let band = bucket(risk_points, BAND_BOUNDS, RiskBand::High);
    let age = answers.number("age")?;

    let verdict = TABLE.evaluate(&Context {
        diagnosed: answers.flag("diagnosed_diabetes")?,
        band,
        cravings: answers.number("sugar_cravings")?,
    });
    let confidence = match verdict.kind {
        MatchKind::Override | MatchKind::Rule(0) => Confidence::High,
        MatchKind::Rule(_) => Confidence::Medium,
        MatchKind::Fallback => Confidence::Low,
    };

    Ok(MetabolicResult {
        class: verdict.outcome,
        age,
        risk_points,
        band,
        confidence,
        matched_rule: verdict.rule,
    })
}

impl ScoredOutcome for MetabolicResult {
    fn summary(&self) -> ResultSummary {
        ResultSummary {
            instrument: InstrumentId::Metabolic,
            label: self.class.as_str().to_string(),
            band: Some(self.band.as_str().to_string()),
            score: Some(f64::from(self.risk_points)),
            confidence: self.confidence,
            matched_rule: self.matched_rule.to_string(),
        }
    }

    fn row_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "metabolic_class".to_string(),
                self.class.as_str().to_string(),
            ),
            (
                "metabolic_risk_points".to_string(),
                self.risk_points.to_string(),
            ),
            ("metabolic_band".to_string(), self.band.as_str().to_string()),
            ("metabolic_age".to_string(), self.age.to_string()),
            ("confidence".to_string(), self.confidence.to_string()),
            ("matched_rule".to_string(), self.matched_rule.to_string()),
        ])
    }
}
