//! Owns a [`SiteRouter`] on its own task and feeds it one command at a time.
//!
//! Commands arriving while another is still running (including the analysing
//! join) wait in the queue, so operations on a flow never interleave.

use serde::Deserialize;
use shared::domain::{AnswerValue, ContactForm, InstrumentId, Stage};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::FlowError,
    resolver::HashRoute,
    router::{ActiveView, SiteRouter},
};

const COMMAND_QUEUE: usize = 64;
const VIEW_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SessionCommand {
    Render,
    Start {
        instrument: InstrumentId,
        #[serde(default)]
        preview: bool,
    },
    AcceptTerms {
        instrument: InstrumentId,
        contact: Option<ContactForm>,
    },
    Answer {
        instrument: InstrumentId,
        question: String,
        value: AnswerValue,
    },
    AnswerQualification {
        instrument: InstrumentId,
        question: String,
        value: AnswerValue,
    },
    Advance {
        instrument: InstrumentId,
    },
    Complete {
        instrument: InstrumentId,
        contact: Option<ContactForm>,
    },
    Unlock {
        instrument: InstrumentId,
        contact: ContactForm,
    },
    Retake {
        instrument: InstrumentId,
    },
    Navigate {
        href: String,
    },
    OpenMarketing {
        section: HashRoute,
    },
    Back,
    Forward,
    SubmitConsultation {
        contact: ContactForm,
    },
}

struct Envelope {
    command: SessionCommand,
    reply: oneshot::Sender<Result<ActiveView, FlowError>>,
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Envelope>,
    views: broadcast::Sender<ActiveView>,
}

impl SessionHandle {
    pub fn spawn(router: SiteRouter) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE);
        let (views, _) = broadcast::channel(VIEW_CAPACITY);
        let task = tokio::spawn(run(router, receiver, views.clone()));
        (Self { commands, views }, task)
    }

    /// Every view the session settles on, including the results view that
    /// follows an analysing stage.
    pub fn subscribe_views(&self) -> broadcast::Receiver<ActiveView> {
        self.views.subscribe()
    }

    pub async fn send(&self, command: SessionCommand) -> Result<ActiveView, FlowError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Envelope { command, reply })
            .await
            .map_err(|_| FlowError::SessionClosed)?;
        response.await.map_err(|_| FlowError::SessionClosed)?
    }
}

async fn run(
    mut router: SiteRouter,
    mut commands: mpsc::Receiver<Envelope>,
    views: broadcast::Sender<ActiveView>,
) {
    info!(session_id = %router.session_id(), "session: command loop started");
    while let Some(Envelope { command, reply }) = commands.recv().await {
        debug!(?command, "session: command received");
        let result = execute(&mut router, command);
        if let Ok(view) = &result {
            let _ = views.send(view.clone());
        }
        let analysing = match &result {
            Ok(ActiveView::Instrument {
                instrument,
                stage: Stage::Analyzing,
                ..
            }) => Some(*instrument),
            _ => None,
        };
        let _ = reply.send(result);

        if let Some(instrument) = analysing {
            match router.settle_analysis(instrument).await {
                Ok(view) => {
                    let _ = views.send(view);
                }
                Err(err) => warn!(%instrument, error = %err, "session: analysis did not settle"),
            }
        }
    }
    router.flush_background().await;
    info!(session_id = %router.session_id(), "session: command loop stopped");
}

fn execute(router: &mut SiteRouter, command: SessionCommand) -> Result<ActiveView, FlowError> {
    match command {
        SessionCommand::Render => Ok(router.render()),
        SessionCommand::Start {
            instrument,
            preview: false,
        } => router.start(instrument),
        SessionCommand::Start {
            instrument,
            preview: true,
        } => router.start_preview(instrument),
        SessionCommand::AcceptTerms {
            instrument,
            contact,
        } => router.accept_terms(instrument, contact),
        SessionCommand::Answer {
            instrument,
            question,
            value,
        } => {
            router.answer_question(instrument, &question, value)?;
            Ok(router.view())
        }
        SessionCommand::AnswerQualification {
            instrument,
            question,
            value,
        } => {
            router.answer_qualification(instrument, &question, value)?;
            Ok(router.view())
        }
        SessionCommand::Advance { instrument } => router.advance(instrument),
        SessionCommand::Complete {
            instrument,
            contact,
        } => router.complete(instrument, contact),
        SessionCommand::Unlock {
            instrument,
            contact,
        } => router.unlock(instrument, contact),
        SessionCommand::Retake { instrument } => Ok(router.retake(instrument)),
        SessionCommand::Navigate { href } => Ok(router.navigate_to(&href)),
        SessionCommand::OpenMarketing { section } => Ok(router.open_marketing(section)),
        SessionCommand::Back => Ok(router.back()),
        SessionCommand::Forward => Ok(router.forward()),
        SessionCommand::SubmitConsultation { contact } => router.submit_consultation(contact),
    }
}
