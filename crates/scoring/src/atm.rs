//! Appetite & tension map: a two-answer pattern lookup.

use std::collections::BTreeMap;

use serde::Serialize;
use shared::{
    domain::{AnswerSet, Confidence, InstrumentId},
    protocol::ResultSummary,
};

use crate::{
    questions::{Answers, QuestionSpec},
    rules::{MatchKind, Rule, RuleTable},
    ScoredOutcome, ScoringError,
};

const CLINICAL_SEVERITY: i64 = 5;
const CLINICAL_DURATION_MONTHS: i64 = 6;

pub const QUESTIONS: &[QuestionSpec] = &[
    QuestionSpec::choice(
        "primary_symptom",
        &["bloating", "acidity", "constipation", "fatigue"],
    ),
    QuestionSpec::choice("trigger", &["stress", "food", "irregular_meals", "sleep"]),
    QuestionSpec::number("duration_months", 0, 240),
    QuestionSpec::scale("severity", 1, 5),
];

/// Lead-qualification questions asked after the quiz. They never affect the
/// pattern.
pub const QUALIFICATION: &[QuestionSpec] = &[
    QuestionSpec::flag("budget_ready"),
    QuestionSpec::choice("start_timeline", &["now", "this_month", "later"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AtmPattern {
    ClinicalReview,
    StressAcid,
    FermentationBloat,
    RhythmDisruption,
    DepletedRecovery,
    NervousGut,
    TriggerFoodReflux,
    Mixed,
}

impl AtmPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            AtmPattern::ClinicalReview => "clinical_review",
            AtmPattern::StressAcid => "stress_acid",
            AtmPattern::FermentationBloat => "fermentation_bloat",
            AtmPattern::RhythmDisruption => "rhythm_disruption",
            AtmPattern::DepletedRecovery => "depleted_recovery",
            AtmPattern::NervousGut => "nervous_gut",
            AtmPattern::TriggerFoodReflux => "trigger_food_reflux",
            AtmPattern::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Symptom {
    Bloating,
    Acidity,
    Constipation,
    Fatigue,
}

impl Symptom {
    fn parse(raw: &str) -> Self {
        match raw {
            "bloating" => Symptom::Bloating,
            "acidity" => Symptom::Acidity,
            "constipation" => Symptom::Constipation,
            _ => Symptom::Fatigue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Stress,
    Food,
    IrregularMeals,
    Sleep,
}

impl Trigger {
    fn parse(raw: &str) -> Self {
        match raw {
            "stress" => Trigger::Stress,
            "food" => Trigger::Food,
            "irregular_meals" => Trigger::IrregularMeals,
            _ => Trigger::Sleep,
        }
    }
}

struct Context {
    symptom: Symptom,
    trigger: Trigger,
    duration_months: i64,
    severity: i64,
}

impl Context {
    fn is(&self, symptom: Symptom, trigger: Trigger) -> bool {
        self.symptom == symptom && self.trigger == trigger
    }
}

const TABLE: RuleTable<Context, AtmPattern> = RuleTable {
    overrides: &[Rule {
        name: "severe_and_persistent",
        when: |c| c.severity >= CLINICAL_SEVERITY && c.duration_months >= CLINICAL_DURATION_MONTHS,
        then: AtmPattern::ClinicalReview,
    }],
    rules: &[
        Rule {
            name: "acidity_stress",
            when: |c| c.is(Symptom::Acidity, Trigger::Stress),
            then: AtmPattern::StressAcid,
        },
        Rule {
            name: "bloating_food",
            when: |c| c.is(Symptom::Bloating, Trigger::Food),
            then: AtmPattern::FermentationBloat,
        },
        Rule {
            name: "constipation_irregular_meals",
            when: |c| c.is(Symptom::Constipation, Trigger::IrregularMeals),
            then: AtmPattern::RhythmDisruption,
        },
        Rule {
            name: "fatigue_sleep",
            when: |c| c.is(Symptom::Fatigue, Trigger::Sleep),
            then: AtmPattern::DepletedRecovery,
        },
        Rule {
            name: "bloating_stress",
            when: |c| c.is(Symptom::Bloating, Trigger::Stress),
            then: AtmPattern::NervousGut,
        },
        Rule {
            name: "acidity_food",
            when: |c| c.is(Symptom::Acidity, Trigger::Food),
            then: AtmPattern::TriggerFoodReflux,
        },
    ],
    fallback: AtmPattern::Mixed,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtmResult {
    pub pattern: AtmPattern,
    pub primary_symptom: String,
    pub trigger: String,
    pub severity: i64,
    pub duration_months: i64,
    pub confidence: Confidence,
    pub matched_rule: &'static str,
}

pub fn score(answers: &AnswerSet) -> Result<AtmResult, ScoringError> {
    let answers = Answers::new(answers, QUESTIONS);
    let symptom = answers.choice("primary_symptom")?;
    let trigger = answers.choice("trigger")?;
    let duration_months = answers.number("duration_months")?;
    let severity = answers.number("severity")?;

    let verdict = TABLE.evaluate(&Context {
        symptom: Symptom::parse(symptom),
        trigger: Trigger::parse(trigger),
        duration_months,
        severity,
    });

    let confidence = match verdict.kind {
        MatchKind::Override => Confidence::High,
        MatchKind::Rule(_) if severity >= 3 => Confidence::High,
        MatchKind::Rule(_) => Confidence::Medium,
        MatchKind::Fallback => Confidence::Low,
    };

    Ok(AtmResult {
        pattern: verdict.outcome,
        primary_symptom: symptom.to_string(),
        trigger: trigger.to_string(),
        severity,
        duration_months,
        confidence,
        matched_rule: verdict.rule,
    })
}

impl ScoredOutcome for AtmResult {
    fn summary(&self) -> ResultSummary {
        ResultSummary {
            instrument: InstrumentId::Atm,
            label: self.pattern.as_str().to_string(),
            band: None,
            score: Some(self.severity as f64),
            confidence: self.confidence,
            matched_rule: self.matched_rule.to_string(),
        }
    }

    fn row_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("atm_pattern".to_string(), self.pattern.as_str().to_string()),
            ("atm_symptom".to_string(), self.primary_symptom.clone()),
            ("atm_trigger".to_string(), self.trigger.clone()),
            ("atm_severity".to_string(), self.severity.to_string()),
            (
                "atm_duration_months".to_string(),
                self.duration_months.to_string(),
            ),
            ("confidence".to_string(), self.confidence.to_string()),
            ("matched_rule".to_string(), self.matched_rule.to_string()),
        ])
    }
}
