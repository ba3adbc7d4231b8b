//! AURA wellbeing composite.
//!
//! Each 1–5 category answer is rescaled to 0–100 by a fixed multiplier; the
//! overall score is the mean of the four primary categories.

use std::collections::BTreeMap;

use serde::Serialize;
use shared::{
    domain::{AnswerSet, Confidence, InstrumentId},
    protocol::ResultSummary,
};

use crate::{
    questions::{Answers, QuestionSpec},
    rules::{Rule, RuleTable},
    ScoredOutcome, ScoringError,
};

pub const RESCALE_FACTOR: f64 = 20.0;

pub const QUESTIONS: &[QuestionSpec] = &[
    QuestionSpec::scale("energy", 1, 5),
    QuestionSpec::scale("sleep", 1, 5),
    QuestionSpec::scale("mood", 1, 5),
    QuestionSpec::scale("focus", 1, 5),
    QuestionSpec::scale("digestion", 1, 5),
    QuestionSpec::flag("persistent_hopelessness"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuraCategory {
    Energy,
    Sleep,
    Mood,
    Focus,
    Digestion,
}

impl AuraCategory {
    /// Declaration order; also the tie-break order.
    pub const ALL: [AuraCategory; 5] = [
        AuraCategory::Energy,
        AuraCategory::Sleep,
        AuraCategory::Mood,
        AuraCategory::Focus,
        AuraCategory::Digestion,
    ];

    pub const PRIMARY: [AuraCategory; 4] = [
        AuraCategory::Energy,
        AuraCategory::Sleep,
        AuraCategory::Mood,
        AuraCategory::Focus,
    ];

    pub fn question_id(self) -> &'static str {
        match self {
            AuraCategory::Energy => "energy",
            AuraCategory::Sleep => "sleep",
            AuraCategory::Mood => "mood",
            AuraCategory::Focus => "focus",
            AuraCategory::Digestion => "digestion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuraClass {
    SeekSupport,
    Radiant,
    Balanced,
    Depleted,
    Burnout,
}

impl AuraClass {
    pub fn as_str(self) -> &'static str {
        match self {
            AuraClass::SeekSupport => "seek_support",
            AuraClass::Radiant => "radiant",
            AuraClass::Balanced => "balanced",
            AuraClass::Depleted => "depleted",
            AuraClass::Burnout => "burnout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CategoryScore {
    pub category: AuraCategory,
    pub score: f64,
}

struct Context {
    overall: f64,
    hopelessness: bool,
}

const TABLE: RuleTable<Context, AuraClass> = RuleTable {
    overrides: &[Rule {
        name: "persistent_hopelessness",
        when: |c| c.hopelessness,
        then: AuraClass::SeekSupport,
    }],
    rules: &[
        Rule {
            name: "overall_80_plus",
            when: |c| c.overall >= 80.0,
            then: AuraClass::Radiant,
        },
        Rule {
            name: "overall_60_plus",
            when: |c| c.overall >= 60.0,
            then: AuraClass::Balanced,
        },
        Rule {
            name: "overall_40_plus",
            when: |c| c.overall >= 40.0,
            then: AuraClass::Depleted,
        },
    ],
    fallback: AuraClass::Burnout,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuraResult {
    pub class: AuraClass,
    pub overall: f64,
    pub categories: Vec<CategoryScore>,
    pub highest: AuraCategory,
    pub lowest: AuraCategory,
    pub confidence: Confidence,
    pub matched_rule: &'static str,
}

impl AuraResult {
    pub fn category(&self, category: AuraCategory) -> Option<f64> {
        self.categories
            .iter()
            .find(|entry| entry.category == category)
            .map(|entry| entry.score)
    }
}

pub fn rescale(value: i64) -> f64 {
    value as f64 * RESCALE_FACTOR
}

/// First category holding the extreme value under `better`; later equal
/// values never displace an earlier one.
fn extreme(scores: &[CategoryScore], better: fn(f64, f64) -> bool) -> AuraCategory {
    let mut best = scores[0];
    for entry in &scores[1..] {
        if better(entry.score, best.score) {
            best = *entry;
        }
    }
    best.category
}

pub fn score(answers: &AnswerSet) -> Result<AuraResult, ScoringError> {
    let answers = Answers::new(answers, QUESTIONS);

    let categories = AuraCategory::ALL
        .into_iter()
        .map(|category| {
            Ok(CategoryScore {
                category,
                score: rescale(answers.number(category.question_id())?),
            })
        })
        .collect::<Result<Vec<_>, ScoringError>>()?;

    let primary_total: f64 = categories
        .iter()
        .filter(|entry| AuraCategory::PRIMARY.contains(&entry.category))
        .map(|entry| entry.score)
        .sum();
    let overall = primary_total / AuraCategory::PRIMARY.len() as f64;

    let highest = extreme(&categories, |candidate, best| candidate > best);
    let lowest = extreme(&categories, |candidate, best| candidate < best);

    let context = Context {
        overall,
        hopelessness: answers.flag("persistent_hopelessness")?,
    };
    let verdict = TABLE.evaluate(&context);

    let spread = categories
        .iter()
        .map(|entry| entry.score)
        .fold(f64::MIN, f64::max)
        - categories
            .iter()
            .map(|entry| entry.score)
            .fold(f64::MAX, f64::min);
    let confidence = if spread <= 20.0 {
        Confidence::High
    } else if spread <= 40.0 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    Ok(AuraResult {
        class: verdict.outcome,
        overall,
        categories,
        highest,
        lowest,
        confidence,
        matched_rule: verdict.rule,
    })
}

impl ScoredOutcome for AuraResult {
    fn summary(&self) -> ResultSummary {
        ResultSummary {
            instrument: InstrumentId::Aura,
            label: self.class.as_str().to_string(),
            band: None,
            score: Some(self.overall),
            confidence: self.confidence,
            matched_rule: self.matched_rule.to_string(),
        }
    }

    fn row_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::from([
            ("aura_class".to_string(), self.class.as_str().to_string()),
            ("aura_overall".to_string(), format!("{:.1}", self.overall)),
            (
                "aura_highest".to_string(),
                self.highest.question_id().to_string(),
            ),
            (
                "aura_lowest".to_string(),
                self.lowest.question_id().to_string(),
            ),
            ("confidence".to_string(), self.confidence.to_string()),
            ("matched_rule".to_string(), self.matched_rule.to_string()),
        ]);
        for entry in &self.categories {
            fields.insert(
                format!("aura_{}", entry.category.question_id()),
                format!("{:.0}", entry.score),
            );
        }
        fields
    }
}
