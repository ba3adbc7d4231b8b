//! One generic state machine, instantiated once per instrument.
//!
//! A [`FlowController`] owns `{stage, answers, contact, result, aux}` for a
//! single instrument. Operations never write the address bar; each successful
//! stage change returns a [`Transition`] for the router to push through the
//! navigation adapter. The [`Flow`] trait is the object-safe face the router
//! uses to treat all four controllers alike.

use std::{collections::BTreeMap, fmt, marker::PhantomData};

use scoring::{questions, QuestionSpec, ScoredOutcome, ScoringError};
use serde::Serialize;
use serde_json::{json, Value};
use shared::{
    domain::{AnswerSet, AnswerValue, ContactRecord, InstrumentId, Stage},
    protocol::ResultSummary,
};
use tracing::{debug, info, warn};

use crate::error::FlowError;

/// Where an instrument collects contact details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactPolicy {
    /// Accepted together with the terms, before the quiz.
    UpFront,
    /// Required by `complete`.
    AtCompletion,
    /// Without it the result is computed but shown locked.
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowVariant {
    #[default]
    Main,
    Preview,
}

/// Static description of one instrument.
pub trait Instrument: Send + Sync + 'static {
    type Outcome: ScoredOutcome + Clone + fmt::Debug + Send + Sync + 'static;

    const ID: InstrumentId;
    const QUESTIONS: &'static [QuestionSpec];
    /// Stage order starting at [`Stage::Landing`].
    const MAIN_CHAIN: &'static [Stage];
    const MAIN_CONTACT: ContactPolicy;
    const PREVIEW_CHAIN: &'static [Stage] = &[];
    const PREVIEW_CONTACT: ContactPolicy = ContactPolicy::Optional;
    /// Extra questions asked on an intermediate stage; never scored.
    const AUX_QUESTIONS: &'static [QuestionSpec] = &[];

    fn score(answers: &AnswerSet) -> Result<Self::Outcome, ScoringError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub instrument: InstrumentId,
    pub from: Stage,
    pub to: Stage,
}

impl Transition {
    pub fn path(&self) -> String {
        self.instrument.path_for(self.to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuxFlags {
    pub terms_accepted: bool,
    pub unlocked: bool,
    pub contact_submitted: bool,
    pub qualification: AnswerSet,
}

pub trait Flow: Send + Sync {
    fn id(&self) -> InstrumentId;
    fn stage(&self) -> Stage;
    fn variant(&self) -> FlowVariant;
    fn answers(&self) -> &AnswerSet;
    fn contact(&self) -> Option<&ContactRecord>;
    fn aux(&self) -> &AuxFlags;
    fn questions(&self) -> &'static [QuestionSpec];
    fn contact_policy(&self) -> ContactPolicy;
    fn has_result(&self) -> bool;
    /// A result exists but is presented as a locked teaser.
    fn is_locked(&self) -> bool;
    fn summary(&self) -> Option<ResultSummary>;
    fn result_row_fields(&self) -> Option<BTreeMap<String, String>>;
    /// Payload forwarded to the contact sink.
    fn metadata(&self) -> Value;

    fn start(&mut self) -> Result<Transition, FlowError>;
    fn start_preview(&mut self) -> Result<Transition, FlowError>;
    fn accept_terms(&mut self, contact: Option<ContactRecord>) -> Result<Transition, FlowError>;
    fn answer_question(&mut self, id: &str, value: AnswerValue) -> Result<(), FlowError>;
    fn answer_qualification(&mut self, id: &str, value: AnswerValue) -> Result<(), FlowError>;
    /// Moves from the quiz to an intermediate stage such as wind-down.
    fn advance(&mut self) -> Result<Transition, FlowError>;
    fn complete(&mut self, contact: Option<ContactRecord>) -> Result<Transition, FlowError>;
    fn unlock(&mut self, contact: ContactRecord) -> Result<(), FlowError>;
    fn finish_analysis(&mut self) -> Result<Transition, FlowError>;
    fn retake(&mut self) -> Option<Transition>;
    fn recover_from_refresh(&mut self) -> Option<Transition>;
    /// Re-derives the stage from the path. Returns whether it changed.
    fn sync_to(&mut self, sub_path: &str) -> bool;
    /// Returns `true` only the first time, so each flow submits contact once.
    fn mark_contact_submitted(&mut self) -> bool;
}

pub struct FlowController<I: Instrument> {
    stage: Stage,
    variant: FlowVariant,
    answers: AnswerSet,
    contact: Option<ContactRecord>,
    result: Option<I::Outcome>,
    aux: AuxFlags,
    _instrument: PhantomData<I>,
}

impl<I: Instrument> Default for FlowController<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Instrument> FlowController<I> {
    pub fn new() -> Self {
        Self {
            stage: Stage::Landing,
            variant: FlowVariant::Main,
            answers: AnswerSet::new(),
            contact: None,
            result: None,
            aux: AuxFlags::default(),
            _instrument: PhantomData,
        }
    }

    pub fn result(&self) -> Option<&I::Outcome> {
        self.result.as_ref()
    }

    fn chain(&self) -> &'static [Stage] {
        match self.variant {
            FlowVariant::Main => I::MAIN_CHAIN,
            FlowVariant::Preview => I::PREVIEW_CHAIN,
        }
    }

    fn declares(stage: Stage) -> bool {
        I::MAIN_CHAIN.contains(&stage) || I::PREVIEW_CHAIN.contains(&stage)
    }

    fn next_stage(&self) -> Option<Stage> {
        let chain = self.chain();
        let index = chain.iter().position(|stage| *stage == self.stage)?;
        chain.get(index + 1).copied()
    }

    /// The stage from which `complete` is legal: the one right before the
    /// first stage that needs a result.
    fn completion_stage(&self) -> Option<Stage> {
        let chain = self.chain();
        let index = chain.iter().position(|stage| stage.requires_result())?;
        chain.get(index.checked_sub(1)?).copied()
    }

    fn illegal(&self, operation: &'static str) -> FlowError {
        FlowError::IllegalTransition {
            instrument: I::ID,
            stage: self.stage,
            operation,
        }
    }

    fn ensure_idle(&self) -> Result<(), FlowError> {
        if self.stage == Stage::Analyzing {
            return Err(FlowError::Busy { instrument: I::ID });
        }
        Ok(())
    }

    fn ensure_answers_complete(&self) -> Result<(), FlowError> {
        let missing = self
            .answers
            .missing(I::QUESTIONS.iter().map(|question| question.id));
        if missing.is_empty() {
            Ok(())
        } else {
            Err(FlowError::MissingAnswers {
                instrument: I::ID,
                missing,
            })
        }
    }

    fn enter(&mut self, to: Stage) -> Transition {
        let transition = Transition {
            instrument: I::ID,
            from: self.stage,
            to,
        };
        self.stage = to;
        debug!(instrument = %I::ID, from = %transition.from, to = %to, "flow: stage changed");
        transition
    }

    fn begin(&mut self, variant: FlowVariant) -> Result<Transition, FlowError> {
        self.ensure_idle()?;
        self.variant = variant;
        let first = self
            .chain()
            .get(1)
            .copied()
            .ok_or_else(|| self.illegal("start"))?;
        if self.result.take().is_some() {
            debug!(instrument = %I::ID, "flow: stale result cleared on start");
        }
        self.answers.clear();
        self.aux.unlocked = false;
        self.aux.qualification.clear();
        Ok(self.enter(first))
    }
}

impl<I: Instrument> Flow for FlowController<I> {
    fn id(&self) -> InstrumentId {
        I::ID
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn variant(&self) -> FlowVariant {
        self.variant
    }

    fn answers(&self) -> &AnswerSet {
        &self.answers
    }

    fn contact(&self) -> Option<&ContactRecord> {
        self.contact.as_ref()
    }

    fn aux(&self) -> &AuxFlags {
        &self.aux
    }

    fn questions(&self) -> &'static [QuestionSpec] {
        I::QUESTIONS
    }

    fn contact_policy(&self) -> ContactPolicy {
        match self.variant {
            FlowVariant::Main => I::MAIN_CONTACT,
            FlowVariant::Preview => I::PREVIEW_CONTACT,
        }
    }

    fn has_result(&self) -> bool {
        self.result.is_some()
    }

    fn is_locked(&self) -> bool {
        self.result.is_some() && !self.aux.unlocked
    }

    fn summary(&self) -> Option<ResultSummary> {
        self.result.as_ref().map(ScoredOutcome::summary)
    }

    fn result_row_fields(&self) -> Option<BTreeMap<String, String>> {
        self.result.as_ref().map(ScoredOutcome::row_fields)
    }

    fn metadata(&self) -> Value {
        json!({
            "instrument": I::ID,
            "variant": self.variant,
            "stage": self.stage,
            "answers": self.answers,
            "qualification": self.aux.qualification,
            "result": self.summary(),
        })
    }

    fn start(&mut self) -> Result<Transition, FlowError> {
        self.begin(FlowVariant::Main)
    }

    fn start_preview(&mut self) -> Result<Transition, FlowError> {
        if I::PREVIEW_CHAIN.is_empty() {
            return Err(self.illegal("start_preview"));
        }
        self.begin(FlowVariant::Preview)
    }

    fn accept_terms(&mut self, contact: Option<ContactRecord>) -> Result<Transition, FlowError> {
        if self.stage != Stage::Terms {
            return Err(self.illegal("accept_terms"));
        }
        if self.contact_policy() == ContactPolicy::UpFront
            && contact.is_none()
            && self.contact.is_none()
        {
            return Err(FlowError::ContactRequired { instrument: I::ID });
        }
        let next = self.next_stage().ok_or_else(|| self.illegal("accept_terms"))?;
        if contact.is_some() {
            self.contact = contact;
        }
        self.aux.terms_accepted = true;
        Ok(self.enter(next))
    }

    fn answer_question(&mut self, id: &str, value: AnswerValue) -> Result<(), FlowError> {
        self.ensure_idle()?;
        if self.result.is_some() {
            return Err(FlowError::ResultLocked { instrument: I::ID });
        }
        if !self.stage.accepts_answers() {
            return Err(self.illegal("answer_question"));
        }
        questions::validate_answer(I::QUESTIONS, id, &value).map_err(|source| {
            FlowError::Scoring {
                instrument: I::ID,
                source,
            }
        })?;
        self.answers.insert(id, value);
        Ok(())
    }

    fn answer_qualification(&mut self, id: &str, value: AnswerValue) -> Result<(), FlowError> {
        if self.stage != Stage::Qualification || I::AUX_QUESTIONS.is_empty() {
            return Err(self.illegal("answer_qualification"));
        }
        questions::validate_answer(I::AUX_QUESTIONS, id, &value).map_err(|source| {
            FlowError::Scoring {
                instrument: I::ID,
                source,
            }
        })?;
        self.aux.qualification.insert(id, value);
        Ok(())
    }

    fn advance(&mut self) -> Result<Transition, FlowError> {
        self.ensure_idle()?;
        let next = match self.next_stage() {
            Some(next) if self.stage.accepts_answers() && !next.requires_result() => next,
            _ => return Err(self.illegal("advance")),
        };
        self.ensure_answers_complete()?;
        Ok(self.enter(next))
    }

    fn complete(&mut self, contact: Option<ContactRecord>) -> Result<Transition, FlowError> {
        self.ensure_idle()?;
        if self.result.is_some() {
            return Err(FlowError::ResultLocked { instrument: I::ID });
        }
        let completion = self.completion_stage();
        if completion != Some(self.stage) && !self.stage.accepts_answers() {
            return Err(self.illegal("complete"));
        }
        self.ensure_answers_complete()?;
        if completion != Some(self.stage) {
            return Err(self.illegal("complete"));
        }

        let has_contact = contact.is_some() || self.contact.is_some();
        if self.contact_policy() != ContactPolicy::Optional && !has_contact {
            return Err(FlowError::ContactRequired { instrument: I::ID });
        }
        let next = self.next_stage().ok_or_else(|| self.illegal("complete"))?;

        let outcome = I::score(&self.answers).map_err(|source| FlowError::Scoring {
            instrument: I::ID,
            source,
        })?;
        if contact.is_some() {
            self.contact = contact;
        }
        self.aux.unlocked = self.contact.is_some();
        info!(
            instrument = %I::ID,
            label = %outcome.summary().label,
            locked = !self.aux.unlocked,
            "flow: result computed"
        );
        self.result = Some(outcome);
        Ok(self.enter(next))
    }

    fn unlock(&mut self, contact: ContactRecord) -> Result<(), FlowError> {
        if self.result.is_none() || !self.stage.is_results() {
            return Err(self.illegal("unlock"));
        }
        if self.aux.unlocked {
            return Ok(());
        }
        self.contact = Some(contact);
        self.aux.unlocked = true;
        info!(instrument = %I::ID, "flow: result unlocked");
        Ok(())
    }

    fn finish_analysis(&mut self) -> Result<Transition, FlowError> {
        if self.stage != Stage::Analyzing {
            return Err(self.illegal("finish_analysis"));
        }
        if self.result.is_none() {
            return Err(FlowError::MissingState { instrument: I::ID });
        }
        let next = self
            .next_stage()
            .ok_or_else(|| self.illegal("finish_analysis"))?;
        Ok(self.enter(next))
    }

    fn retake(&mut self) -> Option<Transition> {
        self.answers.clear();
        self.contact = None;
        self.result = None;
        self.aux = AuxFlags::default();
        self.variant = FlowVariant::Main;
        if self.stage == Stage::Landing {
            return None;
        }
        info!(instrument = %I::ID, "flow: retake");
        Some(self.enter(Stage::Landing))
    }

    fn recover_from_refresh(&mut self) -> Option<Transition> {
        if !self.stage.requires_result() {
            return None;
        }
        if self.result.is_some() && !self.answers.is_empty() {
            return None;
        }
        warn!(
            instrument = %I::ID,
            stage = %self.stage,
            error = %FlowError::MissingState { instrument: I::ID },
            "flow: recovering to landing"
        );
        self.result = None;
        self.aux.unlocked = false;
        Some(self.enter(Stage::Landing))
    }

    fn sync_to(&mut self, sub_path: &str) -> bool {
        let target = match Stage::from_segment(sub_path).filter(|stage| Self::declares(*stage)) {
            Some(stage) => stage,
            None => {
                warn!(instrument = %I::ID, sub_path, "flow: unknown sub-path, using landing");
                Stage::Landing
            }
        };

        if !I::MAIN_CHAIN.contains(&target) {
            self.variant = FlowVariant::Preview;
        } else if !I::PREVIEW_CHAIN.contains(&target) {
            self.variant = FlowVariant::Main;
        }

        if target == self.stage {
            return false;
        }
        debug!(instrument = %I::ID, from = %self.stage, to = %target, "flow: stage re-derived from path");
        self.stage = target;
        true
    }

    fn mark_contact_submitted(&mut self) -> bool {
        !std::mem::replace(&mut self.aux.contact_submitted, true)
    }
}

#[cfg(test)]
#[path = "tests/flow_tests.rs"]
mod tests;
