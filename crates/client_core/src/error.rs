use scoring::ScoringError;
use shared::{
    domain::{InstrumentId, Stage},
    error::ValidationError,
};
use thiserror::Error;

/// Why a flow operation was refused. None of these are fatal: the flow keeps
/// its previous state and the caller may retry or fall back to the landing
/// stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("contact details rejected: {0}")]
    Validation(#[from] ValidationError),
    #[error("{instrument}: `{operation}` is not allowed at stage {stage}")]
    IllegalTransition {
        instrument: InstrumentId,
        stage: Stage,
        operation: &'static str,
    },
    #[error("{instrument}: {} required answer(s) missing: {}", missing.len(), missing.join(", "))]
    MissingAnswers {
        instrument: InstrumentId,
        missing: Vec<String>,
    },
    #[error("{instrument}: contact details are required before this step")]
    ContactRequired { instrument: InstrumentId },
    #[error("{instrument}: answers are frozen until the quiz is retaken")]
    ResultLocked { instrument: InstrumentId },
    #[error("{instrument}: another step is still in progress")]
    Busy { instrument: InstrumentId },
    #[error("{instrument}: {source}")]
    Scoring {
        instrument: InstrumentId,
        source: ScoringError,
    },
    #[error("{instrument}: results stage reached without backing data")]
    MissingState { instrument: InstrumentId },
    #[error("{instrument}: address bar shows {path_stage} but flow is at {flow_stage}")]
    StateDesync {
        instrument: InstrumentId,
        path_stage: Stage,
        flow_stage: Stage,
    },
    #[error("session command loop has stopped")]
    SessionClosed,
}

/// A fire-and-forget call that failed. Only ever logged.
#[derive(Debug, Error)]
#[error("background task `{task}` failed{}: {source}", instrument.map(|id| format!(" for {id}")).unwrap_or_default())]
pub struct BackgroundTaskError {
    pub task: &'static str,
    pub instrument: Option<InstrumentId>,
    #[source]
    pub source: anyhow::Error,
}
