use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{domain::AnswerSet, error::ValidationError};

use super::*;
use crate::fixtures::{self, drain_tasks, recorded, FailingResultsLog, SlowContactSink};

fn deps(collaborators: Collaborators) -> RouterDeps {
    RouterDeps {
        collaborators,
        timings: FlowTimings {
            analyzing_min_dwell: Duration::from_secs(3),
            analyzing_max_wait: Duration::from_secs(5),
        },
    }
}

fn instrument_view(instrument: InstrumentId, stage: Stage) -> ActiveView {
    ActiveView::Instrument {
        instrument,
        stage,
        locked: false,
    }
}

fn answer_all(router: &mut SiteRouter, id: InstrumentId, answers: &AnswerSet) {
    for (question, value) in answers.iter() {
        router
            .answer_question(id, question, value.clone())
            .expect("answer");
    }
}

#[tokio::test]
async fn referral_survives_a_full_gbsi_run() {
    let recorded = recorded();
    let mut router = SiteRouter::mount("/gbsi?ref=IN123", deps(recorded.collaborators.clone()));
    assert_eq!(router.view(), instrument_view(InstrumentId::Gbsi, Stage::Landing));

    router.start(InstrumentId::Gbsi).expect("start");
    assert_eq!(router.nav().current_location().href(), "/gbsi/quiz?ref=IN123");

    answer_all(&mut router, InstrumentId::Gbsi, &fixtures::answers(InstrumentId::Gbsi));
    router.advance(InstrumentId::Gbsi).expect("advance");
    assert_eq!(router.current_path(), "/gbsi/wind-down?ref=IN123");

    let view = router
        .complete(InstrumentId::Gbsi, Some(fixtures::contact()))
        .expect("complete");
    assert_eq!(view, instrument_view(InstrumentId::Gbsi, Stage::Results));
    assert_eq!(router.nav().current_location().href(), "/gbsi/results?ref=IN123");
    assert_eq!(router.gbsi().result().map(|result| result.class), Some(scoring::gbsi::GbsiClass::IbsDiarrhea));

    drain_tasks().await;
    let submissions = recorded.submissions.lock().expect("submissions");
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].form_type, FormType::Gbsi);
    assert_eq!(submissions[0].phone, "9876543210");
    assert_eq!(submissions[0].email, "asha@example.com");
    assert_eq!(submissions[0].metadata["ref"], "IN123");
    assert_eq!(submissions[0].metadata["referral_code"], "IN543210");

    let rows = recorded.rows.lock().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].fields.get("ref").map(String::as_str), Some("IN123"));
    assert_eq!(rows[0].session_id, router.session_id());
}

#[tokio::test]
async fn referral_is_ignored_when_malformed() {
    let mut router = SiteRouter::mount("/?ref=<script>", RouterDeps::default());
    assert!(router.nav().session_ref().is_none());
    router.navigate_to("/metabolic");
    assert_eq!(router.nav().current_location().path, "/metabolic");
    assert!(router.nav().session_ref().is_none());
}

#[tokio::test]
async fn deep_link_to_results_recovers_to_landing() {
    let recorded = recorded();
    let router = SiteRouter::mount("/gbsi/results?ref=IN1", deps(recorded.collaborators.clone()));

    assert_eq!(router.view(), instrument_view(InstrumentId::Gbsi, Stage::Landing));
    assert_eq!(router.nav().current_location().href(), "/gbsi?ref=IN1");
    assert!(!router.nav().can_go_back());

    drain_tasks().await;
    let events = recorded.events.lock().expect("events");
    assert!(events.iter().any(|event| event.name == "guard_redirect"
        && event.instrument == Some(InstrumentId::Gbsi)));
}

#[tokio::test]
async fn repeated_results_deep_links_keep_the_address_bar_in_step() {
    let mut router = SiteRouter::mount("/metabolic/results?ref=IN1", RouterDeps::default());
    assert_eq!(router.current_path(), "/metabolic?ref=IN1");

    for _ in 0..2 {
        let view = router.navigate_to("/metabolic/results");
        assert_eq!(view, instrument_view(InstrumentId::Metabolic, Stage::Landing));
        assert_eq!(router.current_path(), "/metabolic?ref=IN1");
    }
}

#[tokio::test]
async fn every_results_page_is_guarded() {
    for href in [
        "/aura/results",
        "/aura/analyzing",
        "/aura/preview-results",
        "/atm/results",
        "/metabolic/results",
    ] {
        let router = SiteRouter::mount(href, RouterDeps::default());
        let ActiveView::Instrument { stage, instrument, .. } = router.view() else {
            panic!("{href} should render an instrument");
        };
        assert_eq!(stage, Stage::Landing, "{href}");
        assert_eq!(router.current_path(), instrument.root(), "{href}");
    }
}

#[tokio::test]
async fn back_and_forward_re_derive_the_flow() {
    let mut router = SiteRouter::mount("/atm", RouterDeps::default());
    router.start(InstrumentId::Atm).expect("start");
    answer_all(&mut router, InstrumentId::Atm, &fixtures::answers(InstrumentId::Atm));
    router.advance(InstrumentId::Atm).expect("advance");
    assert_eq!(router.atm().stage(), Stage::Qualification);

    assert_eq!(router.back(), instrument_view(InstrumentId::Atm, Stage::Quiz));
    assert_eq!(router.atm().stage(), Stage::Quiz);
    assert_eq!(router.atm().answers().len(), fixtures::answers(InstrumentId::Atm).len());

    assert_eq!(router.forward(), instrument_view(InstrumentId::Atm, Stage::Qualification));
    assert_eq!(router.forward(), instrument_view(InstrumentId::Atm, Stage::Qualification));
}

#[tokio::test]
async fn unknown_sub_path_is_replaced_by_the_root() {
    let mut router = SiteRouter::mount("/", RouterDeps::default());
    let view = router.navigate_to("/atm/does-not-exist");
    assert_eq!(view, instrument_view(InstrumentId::Atm, Stage::Landing));
    assert_eq!(router.current_path(), "/atm");

    let view = router.navigate_to("/metabolic/wind-down");
    assert_eq!(view, instrument_view(InstrumentId::Metabolic, Stage::Landing));
    assert_eq!(router.current_path(), "/metabolic");
}

#[tokio::test]
async fn doubled_slashes_never_change_the_instrument() {
    let mut router = SiteRouter::mount("//gbsi///", RouterDeps::default());
    assert_eq!(router.view(), instrument_view(InstrumentId::Gbsi, Stage::Landing));
    assert_eq!(router.current_path(), "/gbsi");

    let view = router.navigate_to("//aura/atm/quiz");
    assert_eq!(view, instrument_view(InstrumentId::Aura, Stage::Landing));
    assert_eq!(router.current_path(), "/aura");
}

#[tokio::test]
async fn unmatched_paths_render_not_found() {
    let mut router = SiteRouter::mount("/", RouterDeps::default());
    assert_eq!(
        router.navigate_to("/pricing"),
        ActiveView::NotFound {
            path: "/pricing".to_string()
        }
    );
    assert_eq!(router.route(), &Route::Unmatched("/pricing".to_string()));
}

#[tokio::test]
async fn marketing_sections_live_in_the_hash() {
    let mut router = SiteRouter::mount("/?ref=IN77", RouterDeps::default());
    assert_eq!(
        router.view(),
        ActiveView::Marketing {
            section: HashRoute::Home
        }
    );
    assert_eq!(
        router.open_marketing(HashRoute::Team),
        ActiveView::Marketing {
            section: HashRoute::Team
        }
    );
    assert_eq!(router.nav().current_location().href(), "/?ref=IN77#team");

    router.navigate_to("/aura");
    assert_eq!(
        router.open_marketing(HashRoute::Booking),
        ActiveView::Marketing {
            section: HashRoute::Booking
        }
    );
    assert_eq!(router.nav().current_location().href(), "/?ref=IN77#booking");
    assert_eq!(router.back(), instrument_view(InstrumentId::Aura, Stage::Landing));
}

#[tokio::test(start_paused = true)]
async fn completion_never_waits_on_slow_sinks() {
    let finished = Arc::new(AtomicUsize::new(0));
    let collaborators = Collaborators {
        contact: Arc::new(SlowContactSink {
            delay: Duration::from_secs(30),
            finished: Arc::clone(&finished),
        }),
        results: Arc::new(FailingResultsLog),
        ..Collaborators::disabled()
    };
    let mut router = SiteRouter::mount("/metabolic", deps(collaborators));
    router.start(InstrumentId::Metabolic).expect("start");
    answer_all(
        &mut router,
        InstrumentId::Metabolic,
        &fixtures::answers(InstrumentId::Metabolic),
    );

    let started = Instant::now();
    let view = router
        .complete(InstrumentId::Metabolic, Some(fixtures::contact()))
        .expect("complete");
    assert_eq!(view, instrument_view(InstrumentId::Metabolic, Stage::Results));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(router.pending_background(InstrumentId::Metabolic), 2);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(router.pending_background(InstrumentId::Metabolic), 0);
}

#[tokio::test(start_paused = true)]
async fn flush_waits_for_every_call_in_flight() {
    let finished = Arc::new(AtomicUsize::new(0));
    let collaborators = Collaborators {
        contact: Arc::new(SlowContactSink {
            delay: Duration::from_secs(2),
            finished: Arc::clone(&finished),
        }),
        ..Collaborators::disabled()
    };
    let mut router = SiteRouter::mount("/gbsi", deps(collaborators));
    router.start(InstrumentId::Gbsi).expect("start");
    answer_all(&mut router, InstrumentId::Gbsi, &fixtures::answers(InstrumentId::Gbsi));
    router.advance(InstrumentId::Gbsi).expect("advance");
    router
        .complete(InstrumentId::Gbsi, Some(fixtures::contact()))
        .expect("complete");
    router.submit_consultation(fixtures::contact()).expect("consultation");
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    let started = Instant::now();
    let outcome = router.flush_background().await;
    assert!(!outcome.timed_out);
    assert_eq!(finished.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(router.pending_background(InstrumentId::Gbsi), 0);
}

#[tokio::test(start_paused = true)]
async fn analysing_holds_for_the_dwell_time() {
    let recorded = recorded();
    let mut router = SiteRouter::mount("/aura", deps(recorded.collaborators.clone()));
    router.start(InstrumentId::Aura).expect("start");
    assert_eq!(router.current_path(), "/aura/terms");
    router
        .accept_terms(InstrumentId::Aura, Some(fixtures::contact()))
        .expect("terms");
    answer_all(&mut router, InstrumentId::Aura, &fixtures::answers(InstrumentId::Aura));

    let started = Instant::now();
    let view = router.complete(InstrumentId::Aura, None).expect("complete");
    assert_eq!(view, instrument_view(InstrumentId::Aura, Stage::Analyzing));
    assert_eq!(router.render(), view);

    let view = router
        .settle_analysis(InstrumentId::Aura)
        .await
        .expect("settle");
    assert_eq!(view, instrument_view(InstrumentId::Aura, Stage::Results));
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(router.current_path(), "/aura/results");

    let submissions = recorded.submissions.lock().expect("submissions");
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].form_type, FormType::Aura);
}

#[tokio::test(start_paused = true)]
async fn analysing_stops_waiting_at_the_cap() {
    let finished = Arc::new(AtomicUsize::new(0));
    let collaborators = Collaborators {
        contact: Arc::new(SlowContactSink {
            delay: Duration::from_secs(60),
            finished: Arc::clone(&finished),
        }),
        ..Collaborators::disabled()
    };
    let mut router = SiteRouter::mount("/aura", deps(collaborators));
    router.start(InstrumentId::Aura).expect("start");
    router
        .accept_terms(InstrumentId::Aura, Some(fixtures::contact()))
        .expect("terms");
    answer_all(&mut router, InstrumentId::Aura, &fixtures::answers(InstrumentId::Aura));
    router.complete(InstrumentId::Aura, None).expect("complete");

    let started = Instant::now();
    let view = router
        .settle_analysis(InstrumentId::Aura)
        .await
        .expect("settle");
    assert_eq!(view, instrument_view(InstrumentId::Aura, Stage::Results));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn settle_is_rejected_outside_the_analysing_stage() {
    let mut router = SiteRouter::mount("/aura", RouterDeps::default());
    assert!(matches!(
        router.settle_analysis(InstrumentId::Aura).await,
        Err(FlowError::IllegalTransition {
            stage: Stage::Landing,
            ..
        })
    ));
}

#[tokio::test]
async fn preview_unlock_submits_contact_once() {
    let recorded = recorded();
    let mut router = SiteRouter::mount("/aura?ref=IN9", deps(recorded.collaborators.clone()));
    router.start_preview(InstrumentId::Aura).expect("preview");
    assert_eq!(router.current_path(), "/aura/preview?ref=IN9");
    answer_all(&mut router, InstrumentId::Aura, &fixtures::answers(InstrumentId::Aura));

    let view = router.complete(InstrumentId::Aura, None).expect("complete");
    assert_eq!(
        view,
        ActiveView::Instrument {
            instrument: InstrumentId::Aura,
            stage: Stage::PreviewResults,
            locked: true,
        }
    );

    assert!(matches!(
        router.unlock(InstrumentId::Aura, fixtures::bad_contact()),
        Err(FlowError::Validation(ValidationError::InvalidPhone))
    ));
    let view = router
        .unlock(InstrumentId::Aura, fixtures::contact())
        .expect("unlock");
    assert_eq!(
        view,
        ActiveView::Instrument {
            instrument: InstrumentId::Aura,
            stage: Stage::PreviewResults,
            locked: false,
        }
    );
    router
        .unlock(InstrumentId::Aura, fixtures::contact())
        .expect("unlock twice");

    drain_tasks().await;
    let submissions = recorded.submissions.lock().expect("submissions");
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].form_type, FormType::AuraPreview);
    assert_eq!(submissions[0].metadata["ref"], "IN9");

    let events = recorded.events.lock().expect("events");
    assert!(events.iter().any(|event| event.name == "contact_rejected"));
}

#[tokio::test]
async fn invalid_contact_blocks_completion() {
    let mut router = SiteRouter::mount("/gbsi", RouterDeps::default());
    router.start(InstrumentId::Gbsi).expect("start");
    answer_all(&mut router, InstrumentId::Gbsi, &fixtures::answers(InstrumentId::Gbsi));
    router.advance(InstrumentId::Gbsi).expect("advance");

    let err = router
        .complete(InstrumentId::Gbsi, Some(fixtures::bad_contact()))
        .expect_err("rejected");
    assert_eq!(err, FlowError::Validation(ValidationError::InvalidPhone));
    assert_eq!(router.gbsi().stage(), Stage::WindDown);
    assert_eq!(router.current_path(), "/gbsi/wind-down");
}

#[tokio::test]
async fn retake_returns_to_landing() {
    let mut router = SiteRouter::mount("/metabolic", RouterDeps::default());
    router.start(InstrumentId::Metabolic).expect("start");
    answer_all(
        &mut router,
        InstrumentId::Metabolic,
        &fixtures::answers(InstrumentId::Metabolic),
    );
    router
        .complete(InstrumentId::Metabolic, Some(fixtures::contact()))
        .expect("complete");

    let view = router.retake(InstrumentId::Metabolic);
    assert_eq!(view, instrument_view(InstrumentId::Metabolic, Stage::Landing));
    assert!(!router.metabolic().has_result());
    assert_eq!(router.retake(InstrumentId::Metabolic), view);
    assert_eq!(router.current_path(), "/metabolic");
}

#[tokio::test]
async fn payment_link_carries_instrument_and_ref() {
    let recorded = recorded();
    let mut router = SiteRouter::mount("/atm?ref=IN42", deps(recorded.collaborators.clone()));
    assert!(router.begin_payment(InstrumentId::Atm).is_err());

    router.start(InstrumentId::Atm).expect("start");
    answer_all(&mut router, InstrumentId::Atm, &fixtures::answers(InstrumentId::Atm));
    router.advance(InstrumentId::Atm).expect("advance");
    router
        .complete(InstrumentId::Atm, Some(fixtures::contact()))
        .expect("complete");

    let url = router.begin_payment(InstrumentId::Atm).expect("payment");
    assert_eq!(
        url.as_str(),
        "https://pay.example.com/checkout?instrument=atm&ref=IN42"
    );
    assert_eq!(recorded.opened.lock().expect("opened").as_slice(), &[url]);
}

#[tokio::test]
async fn payment_needs_a_configured_url() {
    let mut router = SiteRouter::mount("/atm", RouterDeps::default());
    let err = router.begin_payment(InstrumentId::Atm).expect_err("no url");
    assert!(err.to_string().contains("payment url is not configured"));
}

#[tokio::test]
async fn consultation_submits_its_own_form_type() {
    let recorded = recorded();
    let mut router = SiteRouter::mount("/consultation?ref=IN5", deps(recorded.collaborators.clone()));
    assert_eq!(router.view(), ActiveView::Consultation);

    assert!(router
        .submit_consultation(shared::domain::ContactForm::new("", "9876543210", "a@b.co"))
        .is_err());
    let view = router
        .submit_consultation(fixtures::contact())
        .expect("submit");
    assert_eq!(view, ActiveView::Consultation);

    drain_tasks().await;
    let submissions = recorded.submissions.lock().expect("submissions");
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].form_type, FormType::Consultation);
    assert_eq!(submissions[0].metadata["ref"], "IN5");
}

#[tokio::test]
async fn one_analytics_event_per_operation() {
    let recorded = recorded();
    let mut router = SiteRouter::mount("/gbsi", deps(recorded.collaborators.clone()));
    drain_tasks().await;
    let baseline = recorded.events.lock().expect("events").len();

    router.start(InstrumentId::Gbsi).expect("start");
    router
        .answer_question(InstrumentId::Gbsi, "age", 30.into())
        .expect("answer");
    drain_tasks().await;

    let events = recorded.events.lock().expect("events");
    let names: Vec<&str> = events[baseline..]
        .iter()
        .map(|event| event.name.as_str())
        .collect();
    assert_eq!(names, ["quiz_started", "question_answered"]);
    assert_eq!(events[baseline].properties["to"], "quiz");
}
