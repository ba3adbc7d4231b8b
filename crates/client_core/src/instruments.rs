//! The four instrument descriptors plugged into [`FlowController`].

use scoring::{atm, aura, gbsi, metabolic, QuestionSpec, ScoringError};
use shared::domain::{AnswerSet, InstrumentId, Stage};

use crate::flow::{ContactPolicy, FlowController, Instrument};

pub struct Gbsi;

impl Instrument for Gbsi {
    type Outcome = gbsi::GbsiResult;

    const ID: InstrumentId = InstrumentId::Gbsi;
    const QUESTIONS: &'static [QuestionSpec] = gbsi::QUESTIONS;
    const MAIN_CHAIN: &'static [Stage] =
        &[Stage::Landing, Stage::Quiz, Stage::WindDown, Stage::Results];
    const MAIN_CONTACT: ContactPolicy = ContactPolicy::AtCompletion;

    fn score(answers: &AnswerSet) -> Result<Self::Outcome, ScoringError> {
        gbsi::score(answers)
    }
}

/// Ships two variants: contact with the terms, or a locked teaser that
/// unlocks once contact arrives.
pub struct Aura;

impl Instrument for Aura {
    type Outcome = aura::AuraResult;

    const ID: InstrumentId = InstrumentId::Aura;
    const QUESTIONS: &'static [QuestionSpec] = aura::QUESTIONS;
    const MAIN_CHAIN: &'static [Stage] = &[
        Stage::Landing,
        Stage::Terms,
        Stage::Quiz,
        Stage::Analyzing,
        Stage::Results,
    ];
    const MAIN_CONTACT: ContactPolicy = ContactPolicy::UpFront;
    const PREVIEW_CHAIN: &'static [Stage] =
        &[Stage::Landing, Stage::Preview, Stage::PreviewResults];
    const PREVIEW_CONTACT: ContactPolicy = ContactPolicy::Optional;

    fn score(answers: &AnswerSet) -> Result<Self::Outcome, ScoringError> {
        aura::score(answers)
    }
}

pub struct Atm;

impl Instrument for Atm {
    type Outcome = atm::AtmResult;

    const ID: InstrumentId = InstrumentId::Atm;
    const QUESTIONS: &'static [QuestionSpec] = atm::QUESTIONS;
    const MAIN_CHAIN: &'static [Stage] = &[
        Stage::Landing,
        Stage::Quiz,
        Stage::Qualification,
        Stage::Results,
    ];
    const MAIN_CONTACT: ContactPolicy = ContactPolicy::AtCompletion;
    const AUX_QUESTIONS: &'static [QuestionSpec] = atm::QUALIFICATION;

    fn score(answers: &AnswerSet) -> Result<Self::Outcome, ScoringError> {
        atm::score(answers)
    }
}

pub struct Metabolic;

impl Instrument for Metabolic {
    type Outcome = metabolic::MetabolicResult;

    const ID: InstrumentId = InstrumentId::Metabolic;
    const QUESTIONS: &'static [QuestionSpec] = metabolic::QUESTIONS;
    const MAIN_CHAIN: &'static [Stage] = &[Stage::Landing, Stage::Quiz, Stage::Results];
    const MAIN_CONTACT: ContactPolicy = ContactPolicy::AtCompletion;

    fn score(answers: &AnswerSet) -> Result<Self::Outcome, ScoringError> {
        metabolic::score(answers)
    }
}

pub type GbsiFlow = FlowController<Gbsi>;
pub type AuraFlow = FlowController<Aura>;
pub type AtmFlow = FlowController<Atm>;
pub type MetabolicFlow = FlowController<Metabolic>;
