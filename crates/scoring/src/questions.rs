use shared::domain::{AnswerSet, AnswerValue};

use crate::ScoringError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    /// Likert-style integer scale, inclusive.
    Scale { min: i64, max: i64 },
    /// Free integer entry, inclusive bounds.
    Number { min: i64, max: i64 },
    Choice(&'static [&'static str]),
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionSpec {
    pub id: &'static str,
    pub kind: QuestionKind,
}

impl QuestionSpec {
    pub const fn scale(id: &'static str, min: i64, max: i64) -> Self {
        Self {
            id,
            kind: QuestionKind::Scale { min, max },
        }
    }

    pub const fn number(id: &'static str, min: i64, max: i64) -> Self {
        Self {
            id,
            kind: QuestionKind::Number { min, max },
        }
    }

    pub const fn choice(id: &'static str, options: &'static [&'static str]) -> Self {
        Self {
            id,
            kind: QuestionKind::Choice(options),
        }
    }

    pub const fn flag(id: &'static str) -> Self {
        Self {
            id,
            kind: QuestionKind::Flag,
        }
    }

    pub fn validate(&self, value: &AnswerValue) -> Result<(), ScoringError> {
        let reason = match (self.kind, value) {
            (QuestionKind::Flag, AnswerValue::Flag(_)) => return Ok(()),
            (
                QuestionKind::Scale { min, max } | QuestionKind::Number { min, max },
                AnswerValue::Number(n),
            ) => {
                if (min..=max).contains(n) {
                    return Ok(());
                }
                format!("{n} is outside {min}..={max}")
            }
            (QuestionKind::Choice(options), AnswerValue::Choice(choice)) => {
                if options.contains(&choice.as_str()) {
                    return Ok(());
                }
                format!("`{choice}` is not one of {options:?}")
            }
            (kind, other) => format!("{other:?} does not fit {kind:?}"),
        };
        Err(ScoringError::InvalidAnswer {
            question: self.id.to_string(),
            reason,
        })
    }
}

pub fn find<'a>(catalogue: &'a [QuestionSpec], id: &str) -> Option<&'a QuestionSpec> {
    catalogue.iter().find(|spec| spec.id == id)
}

/// Validates `value` against the catalogue entry for `id`.
pub fn validate_answer(
    catalogue: &[QuestionSpec],
    id: &str,
    value: &AnswerValue,
) -> Result<(), ScoringError> {
    find(catalogue, id)
        .ok_or_else(|| ScoringError::UnknownQuestion(id.to_string()))?
        .validate(value)
}

/// Typed, validated access to an answer set for one catalogue.
pub(crate) struct Answers<'a> {
    set: &'a AnswerSet,
    catalogue: &'static [QuestionSpec],
}

impl<'a> Answers<'a> {
    pub(crate) fn new(set: &'a AnswerSet, catalogue: &'static [QuestionSpec]) -> Self {
        Self { set, catalogue }
    }

    fn checked(&self, id: &str) -> Result<&'a AnswerValue, ScoringError> {
        let value = self
            .set
            .get(id)
            .ok_or_else(|| ScoringError::MissingAnswer(id.to_string()))?;
        validate_answer(self.catalogue, id, value)?;
        Ok(value)
    }

    pub(crate) fn number(&self, id: &str) -> Result<i64, ScoringError> {
        Ok(self.checked(id)?.as_number().unwrap_or_default())
    }

    pub(crate) fn flag(&self, id: &str) -> Result<bool, ScoringError> {
        Ok(self.checked(id)?.as_flag().unwrap_or_default())
    }

    pub(crate) fn choice(&self, id: &str) -> Result<&'a str, ScoringError> {
        Ok(self.checked(id)?.as_choice().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOGUE: &[QuestionSpec] = &[
        QuestionSpec::scale("stress", 1, 5),
        QuestionSpec::choice("stool", &["hard", "loose"]),
        QuestionSpec::flag("alarm"),
    ];

    #[test]
    fn validates_kind_and_bounds() {
        assert!(validate_answer(CATALOGUE, "stress", &AnswerValue::Number(5)).is_ok());
        assert!(validate_answer(CATALOGUE, "stress", &AnswerValue::Number(6)).is_err());
        assert!(validate_answer(CATALOGUE, "stress", &AnswerValue::Flag(true)).is_err());
        assert!(validate_answer(CATALOGUE, "stool", &AnswerValue::choice("loose")).is_ok());
        assert!(validate_answer(CATALOGUE, "stool", &AnswerValue::choice("watery")).is_err());
        assert!(validate_answer(CATALOGUE, "alarm", &AnswerValue::Flag(false)).is_ok());
    }

    #[test]
    fn unknown_question_is_reported() {
        assert_eq!(
            validate_answer(CATALOGUE, "mood", &AnswerValue::Number(1)),
            Err(ScoringError::UnknownQuestion("mood".into()))
        );
    }

    #[test]
    fn reader_reports_missing_answers() {
        let set = AnswerSet::new().with("stress", 3);
        let answers = Answers::new(&set, CATALOGUE);
        assert_eq!(answers.number("stress"), Ok(3));
        assert_eq!(
            answers.flag("alarm"),
            Err(ScoringError::MissingAnswer("alarm".into()))
        );
    }
}
