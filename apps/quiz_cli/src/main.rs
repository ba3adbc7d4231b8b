use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    load_settings, resolve, ActiveView, FlowError, Location, RouterDeps, SiteRouter,
};
use scoring::ScoredOutcome;
use shared::domain::{AnswerSet, ContactForm, InstrumentId, Stage};
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Drive the quiz flows from a terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which view owns an address.
    Resolve { href: String },
    /// Score an answer file without touching any flow.
    Score {
        instrument: InstrumentArg,
        #[arg(long)]
        answers: PathBuf,
    },
    /// Walk a flow from landing to results against the configured sinks.
    Walk {
        instrument: InstrumentArg,
        #[arg(long)]
        answers: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        email: String,
        #[arg(long = "ref")]
        referral: Option<String>,
        /// Take the free preview instead of the main flow.
        #[arg(long)]
        preview: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InstrumentArg {
    Gbsi,
    Aura,
    Atm,
    Metabolic,
}

impl From<InstrumentArg> for InstrumentId {
    fn from(value: InstrumentArg) -> Self {
        match value {
            InstrumentArg::Gbsi => InstrumentId::Gbsi,
            InstrumentArg::Aura => InstrumentId::Aura,
            InstrumentArg::Atm => InstrumentId::Atm,
            InstrumentArg::Metabolic => InstrumentId::Metabolic,
        }
    }
}

fn read_answers(path: &PathBuf) -> Result<AnswerSet> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read answers from '{}'", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("'{}' is not a JSON object of answers", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn score(instrument: InstrumentId, answers: &AnswerSet) -> Result<shared::protocol::ResultSummary> {
    let summary = match instrument {
        InstrumentId::Gbsi => scoring::gbsi::score(answers)?.summary(),
        InstrumentId::Aura => scoring::aura::score(answers)?.summary(),
        InstrumentId::Atm => scoring::atm::score(answers)?.summary(),
        InstrumentId::Metabolic => scoring::metabolic::score(answers)?.summary(),
    };
    Ok(summary)
}

async fn walk(
    router: &mut SiteRouter,
    instrument: InstrumentId,
    answers: &AnswerSet,
    contact: ContactForm,
    preview: bool,
) -> Result<ActiveView> {
    let mut view = if preview {
        router.start_preview(instrument)?
    } else {
        router.start(instrument)?
    };
    if matches!(view, ActiveView::Instrument { stage: Stage::Terms, .. }) {
        router.accept_terms(instrument, Some(contact.clone()))?;
    }
    for (question, value) in answers.iter() {
        router.answer_question(instrument, question, value.clone())?;
    }

    // Intermediate stages sit between the quiz and completion.
    for _ in 0..Stage::ALL.len() {
        let contact = (!preview).then(|| contact.clone());
        match router.complete(instrument, contact) {
            Ok(next) => {
                view = next;
                break;
            }
            Err(FlowError::IllegalTransition { .. }) => {
                router.advance(instrument)?;
            }
            Err(err) => return Err(err.into()),
        }
    }

    match view {
        ActiveView::Instrument {
            stage: Stage::Analyzing,
            ..
        } => Ok(router.settle_analysis(instrument).await?),
        ActiveView::Instrument { locked: true, .. } => Ok(router.unlock(instrument, contact)?),
        ActiveView::Instrument { stage, .. } if stage.is_results() => Ok(view),
        other => bail!("{instrument}: flow stopped at {other:?}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    match cli.command {
        Command::Resolve { href } => {
            let location = Location::parse(&href);
            info!(href = %location.href(), route = ?resolve(&location), "cli: resolved");
            let router = SiteRouter::mount(&href, RouterDeps::default());
            print_json(&router.view())?;
        }
        Command::Score {
            instrument,
            answers,
        } => {
            let answers = read_answers(&answers)?;
            print_json(&score(instrument.into(), &answers)?)?;
        }
        Command::Walk {
            instrument,
            answers,
            name,
            phone,
            email,
            referral,
            preview,
        } => {
            let instrument = InstrumentId::from(instrument);
            let answers = read_answers(&answers)?;
            let settings = load_settings()?;
            let deps = RouterDeps::from_settings(&settings)?;
            let href = match referral {
                Some(code) => format!("{}?ref={code}", instrument.root()),
                None => instrument.root().to_string(),
            };

            let mut router = SiteRouter::mount(&href, deps);
            let mut visited = router.nav().subscribe();
            println!("{}", router.current_path());
            let contact = ContactForm::new(name, phone, email);
            let view = walk(&mut router, instrument, &answers, contact, preview).await?;
            while let Ok(changed) = visited.try_recv() {
                println!("{}", changed.location.href());
            }
            let flushed = router.flush_background().await;
            info!(
                path = %router.nav().current_location().href(),
                settled = flushed.settled,
                timed_out = flushed.timed_out,
                "cli: walk finished"
            );
            print_json(&view)?;
            if let Some(summary) = router.flow(instrument).summary() {
                print_json(&summary)?;
            }
        }
    }

    Ok(())
}
