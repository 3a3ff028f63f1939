use super::common::*;
use std::sync::Arc;

use crate::assessment::capture::{
    CaptureError, RecordingEnd, SimulatedMicrophone,
};
use crate::assessment::domain::{
    PostingId, PostingStatus, QuestionKind, RetakePolicy, SessionStep, TimeLimit, UploadKind,
};
use crate::assessment::flow::{AssessmentFlow, FlowError, FlowOptions, FlowView};
use crate::assessment::intake::IntakeViolation;
use crate::assessment::proctoring::{UnloadDecision, Visibility};
use crate::assessment::store::{MemoryBackend, SessionStore};
use crate::assessment::submission::SubmissionError;

fn sixty_char_answer() -> String {
    "Reliable systems, clear ownership, kind code review. "
        .chars()
        .cycle()
        .take(60)
        .collect()
}

fn answer_text(flow: &mut TestFlow, clock: &crate::assessment::clock::ManualClock, answer: &str) {
    let collector = flow.text_collector().expect("text question presented");
    clock.advance_secs(20);
    let response = collector.submit(answer, clock).expect("non-empty answer");
    flow.submit_response(response).expect("answer accepted");
}

#[test]
fn knockout_answer_blocks_before_any_session_is_created() {
    let gateway = Arc::new(RecordingGateway::with_posting(text_posting()));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-text");

    flow.start().expect("start");
    let blocked = flow.submit_personal_info(candidate(false), "");
    assert!(matches!(blocked, Err(FlowError::ScreeningFailed(ref q)) if q.text == SCREENING_TEXT));
    assert_eq!(
        blocked.err().map(|error| error.to_string()),
        Some(format!("screening requirement not met: {SCREENING_TEXT}"))
    );
    assert_eq!(flow.view(), &FlowView::PersonalInfo);
    assert_eq!(gateway.count(&GatewayCall::CreateSession), 0);
    assert!(flow.current_question().is_none());
}

#[test]
fn single_text_question_without_upload_seals_directly() {
    let gateway = Arc::new(RecordingGateway::with_posting(text_posting()));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-text");

    flow.start().expect("start");
    let view = flow
        .submit_personal_info(candidate(true), "Available from January.")
        .expect("screening passes")
        .clone();
    assert_eq!(
        view,
        FlowView::Question {
            index: 0,
            kind: QuestionKind::Text
        }
    );

    answer_text(&mut flow, &clock, &sixty_char_answer());
    assert!(matches!(flow.view(), FlowView::Complete(_)));
    assert_eq!(
        gateway.calls(),
        vec![
            GatewayCall::FetchPosting,
            GatewayCall::CreateSession,
            GatewayCall::RecordResponse(0),
            GatewayCall::Finalize,
        ]
    );

    let session_id = flow
        .session()
        .and_then(|session| session.session_id.clone())
        .expect("session id");
    let status = gateway.ledger().session_status(&session_id).expect("status");
    assert_eq!(status.responses[0].answer_chars, Some(60));
    assert!(status.sealed_at.is_some());

    let reopened = open_flow(&gateway, &backend, &clock, "post-text");
    assert!(
        matches!(reopened.view(), FlowView::Complete(_)),
        "sealed session is not resumable"
    );
}

#[test]
fn unanswered_voice_question_auto_submits_at_the_limit() {
    let gateway = Arc::new(RecordingGateway::with_posting(voice_posting(Some(
        TimeLimit::ThirtySeconds,
    ))));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-voice");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");

    let microphone = SimulatedMicrophone::default();
    let stats = microphone.stats();
    let mut engine = flow
        .voice_capture(Box::new(microphone))
        .expect("voice question presented");
    assert!(matches!(
        flow.voice_capture(Box::new(SimulatedMicrophone::default())),
        Err(FlowError::CaptureAlreadyIssued(0))
    ));

    engine.request_permission().expect("granted");
    engine.begin().expect("begin");
    for _ in 0..3 {
        clock.advance_secs(1);
        engine.tick().expect("countdown");
    }

    let mut outcome = None;
    for second in 1..=30 {
        clock.advance_secs(1);
        if second == 5 {
            assert!(flow.on_visibility_change(Visibility::Hidden).is_some());
        }
        if second == 7 {
            assert!(flow.on_visibility_change(Visibility::Visible).is_none());
        }
        if let Some(done) = engine.tick().expect("recording tick") {
            outcome = Some(done);
        }
    }

    let outcome = outcome.expect("limit reached");
    assert_eq!(outcome.ended_by, RecordingEnd::Timeout);
    assert!(outcome.response.is_auto_submitted);
    assert_eq!(gateway.count(&GatewayCall::Flag(0)), 1);
    assert_eq!(flow.proctoring_signals(), 1);
    assert_eq!(stats.open_streams(), 0);

    flow.submit_response(outcome.response).expect("answer accepted");
    assert!(matches!(flow.view(), FlowView::Complete(_)));
}

#[test]
fn reload_resumes_at_the_saved_question() {
    let gateway = Arc::new(RecordingGateway::with_posting(upload_posting()));
    let backend = MemoryBackend::default();
    let clock = manual_clock();

    {
        let mut flow = open_flow(&gateway, &backend, &clock, "post-upload");
        flow.start().expect("start");
        flow.submit_personal_info(candidate(true), "")
            .expect("screening passes");
        answer_text(&mut flow, &clock, "Because the team ships carefully.");
        assert_eq!(
            flow.view(),
            &FlowView::Question {
                index: 1,
                kind: QuestionKind::Text
            }
        );
    }

    let mut resumed = open_flow(&gateway, &backend, &clock, "post-upload");
    assert_eq!(
        resumed.view(),
        &FlowView::Question {
            index: 1,
            kind: QuestionKind::Text
        }
    );
    let session = resumed.session().expect("session restored");
    assert_eq!(session.step, SessionStep::Questions);
    assert_eq!(session.personal_data, Some(candidate(true)));
    assert_eq!(session.answers.len(), 1);

    answer_text(&mut resumed, &clock, "Fewer global singletons.");
    assert_eq!(resumed.view(), &FlowView::Upload);
    assert_eq!(gateway.count(&GatewayCall::RecordResponse(0)), 1);
    assert_eq!(gateway.count(&GatewayCall::CreateSession), 1);
}

#[test]
fn opening_another_posting_discards_the_stored_session() {
    let gateway = Arc::new(RecordingGateway::with_posting(upload_posting()));
    gateway
        .ledger()
        .register_posting(text_posting())
        .expect("register");
    let backend = MemoryBackend::default();
    let clock = manual_clock();

    let mut first = open_flow(&gateway, &backend, &clock, "post-upload");
    first.start().expect("start");
    drop(first);

    let other = open_flow(&gateway, &backend, &clock, "post-text");
    assert_eq!(other.view(), &FlowView::Landing { attempt: 1 });

    let back = open_flow(&gateway, &backend, &clock, "post-upload");
    assert_eq!(back.view(), &FlowView::Landing { attempt: 1 });
}

#[test]
fn upload_step_blocks_until_required_files_are_present() {
    let gateway = Arc::new(RecordingGateway::with_posting(upload_posting()));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-upload");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");
    answer_text(&mut flow, &clock, "first");
    answer_text(&mut flow, &clock, "second");
    assert_eq!(flow.view(), &FlowView::Upload);
    assert!(matches!(
        flow.on_unload_attempt(),
        UnloadDecision::Confirm { .. }
    ));

    assert!(matches!(
        flow.complete_upload(),
        Err(FlowError::MissingUpload(UploadKind::Cv))
    ));

    let mut bad = cv_file();
    bad.content_type = "not a mime".to_string();
    assert!(matches!(flow.upload(bad), Err(FlowError::InvalidUpload(_))));

    flow.back_to_last_question().expect("review last question");
    assert_eq!(flow.view(), &FlowView::ReviewLastQuestion { index: 1 });
    assert!(matches!(
        flow.submit_response(text_response(1, "revised")),
        Err(FlowError::AlreadyAnswered(1))
    ));
    flow.return_to_upload().expect("back to upload");

    let url = flow.upload(cv_file()).expect("cv uploaded");
    assert!(url.starts_with("memory://uploads/"));
    flow.complete_upload().expect("sealed");
    assert!(matches!(flow.view(), FlowView::Complete(_)));

    let session_id = flow
        .session()
        .and_then(|session| session.session_id.clone())
        .expect("session id");
    let status = gateway.ledger().session_status(&session_id).expect("status");
    assert_eq!(status.upload_urls.cv_url.as_deref(), Some(url.as_str()));
    assert_eq!(gateway.count(&GatewayCall::RecordResponse(1)), 1);
}

#[test]
fn failed_seal_is_surfaced_and_retried() {
    let gateway = Arc::new(RecordingGateway::with_posting(text_posting()).flaky_finalize(1));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-text");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");
    answer_text(&mut flow, &clock, "An answer");

    assert!(matches!(
        flow.view(),
        FlowView::Sealing { failure: Some(_) }
    ));
    assert!(!flow.session().expect("session").submitted);

    let reopened = open_flow(&gateway, &backend, &clock, "post-text");
    assert_eq!(reopened.view(), &FlowView::Sealing { failure: None });
    drop(reopened);

    flow.seal().expect("retry succeeds");
    assert!(matches!(flow.view(), FlowView::Complete(_)));
    assert!(matches!(
        flow.seal(),
        Err(FlowError::InvalidStep { .. })
    ));
    assert_eq!(gateway.count(&GatewayCall::Finalize), 2);
}

#[test]
fn undelivered_answers_are_kept_as_receipts() {
    let gateway = Arc::new(RecordingGateway::with_posting(text_posting()).failing_response(0));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-text");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");
    answer_text(&mut flow, &clock, "Dropped by the network");

    assert!(matches!(flow.view(), FlowView::Complete(_)));
    assert_eq!(
        flow.session().expect("session").undelivered_answers(),
        vec![0]
    );
}

#[test]
fn inactive_and_missing_postings_are_refused() {
    let mut paused = text_posting();
    paused.status = PostingStatus::Paused;
    let gateway = Arc::new(RecordingGateway::with_posting(paused));
    let clock: Arc<dyn crate::assessment::clock::Clock> = Arc::new(manual_clock());

    let inactive = AssessmentFlow::open(
        Arc::clone(&gateway),
        SessionStore::new(MemoryBackend::default()),
        Arc::clone(&clock),
        &PostingId("post-text".to_string()),
        FlowOptions::default(),
    );
    assert!(matches!(
        inactive,
        Err(FlowError::PostingInactive {
            status: "paused",
            ..
        })
    ));

    let missing = AssessmentFlow::open(
        gateway,
        SessionStore::new(MemoryBackend::default()),
        clock,
        &PostingId("post-gone".to_string()),
        FlowOptions::default(),
    );
    assert!(matches!(
        missing,
        Err(FlowError::PostingUnavailable { .. })
    ));
}

#[test]
fn posting_without_questions_goes_straight_to_completion() {
    let gateway = Arc::new(RecordingGateway::with_posting(posting("post-empty", Vec::new())));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-empty");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");

    assert!(matches!(flow.view(), FlowView::Complete(_)));
    assert_eq!(
        gateway.count_matching(|call| matches!(call, GatewayCall::RecordResponse(_))),
        0
    );
}

#[test]
fn invalid_personal_data_never_reaches_the_network() {
    let gateway = Arc::new(RecordingGateway::with_posting(text_posting()));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-text");
    flow.start().expect("start");

    let mut data = candidate(true);
    data.email = "maya.example.org".to_string();
    assert!(matches!(
        flow.submit_personal_info(data, ""),
        Err(FlowError::Intake(IntakeViolation::InvalidEmail(_)))
    ));
    assert_eq!(gateway.count(&GatewayCall::CreateSession), 0);
}

#[test]
fn candidate_may_leave_only_before_recording_starts() {
    let gateway = Arc::new(RecordingGateway::with_posting(voice_posting(None)));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-voice");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");

    let microphone = SimulatedMicrophone::default();
    let stats = microphone.stats();
    let mut engine = flow.voice_capture(Box::new(microphone)).expect("recorder");
    engine.request_permission().expect("granted");
    engine.begin().expect("begin");
    for _ in 0..3 {
        clock.advance_secs(1);
        engine.tick().expect("countdown");
    }
    assert!(matches!(
        flow.abandon(Some(&mut engine)),
        Err(FlowError::Capture(CaptureError::NotCancellable(_)))
    ));
    assert!(matches!(flow.abandon(None), Err(FlowError::RecordingInProgress(0))));
    drop(engine);
    assert_eq!(stats.open_streams(), 0);

    let backend = MemoryBackend::default();
    let mut fresh = open_flow(&gateway, &backend, &clock, "post-voice");
    fresh.start().expect("start");
    fresh
        .submit_personal_info(candidate(true), "")
        .expect("screening passes");
    let mut ready = fresh
        .voice_capture(Box::new(SimulatedMicrophone::default()))
        .expect("recorder");
    ready.request_permission().expect("granted");

    fresh.abandon(Some(&mut ready)).expect("leave from ready");
    assert_eq!(fresh.view(), &FlowView::Landing { attempt: 1 });
    assert!(!ready.is_stream_open());
    assert!(backend.keys().is_empty(), "session destroyed");
}

#[test]
fn recorder_torn_down_before_recording_frees_the_question() {
    let gateway = Arc::new(RecordingGateway::with_posting(voice_posting(None)));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-voice");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");

    let microphone = SimulatedMicrophone::default();
    let stats = microphone.stats();
    let mut engine = flow.voice_capture(Box::new(microphone)).expect("recorder");
    engine.request_permission().expect("granted");
    assert!(matches!(
        flow.voice_capture(Box::new(SimulatedMicrophone::default())),
        Err(FlowError::CaptureAlreadyIssued(0))
    ));
    drop(engine);
    assert_eq!(stats.open_streams(), 0);

    let mut replacement = flow
        .voice_capture(Box::new(SimulatedMicrophone::default()))
        .expect("replacement recorder after unused teardown");
    replacement.cancel().expect("cancel from permission");
    let spare = flow
        .voice_capture(Box::new(SimulatedMicrophone::default()))
        .expect("replacement recorder after cancel");
    drop(replacement);
    drop(spare);

    flow.abandon(None).expect("nothing left to cancel");
    assert_eq!(flow.view(), &FlowView::Landing { attempt: 1 });
    assert!(backend.keys().is_empty(), "session destroyed");
}

#[test]
fn recorder_dropped_mid_recording_still_holds_the_question() {
    let gateway = Arc::new(RecordingGateway::with_posting(voice_posting(None)));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-voice");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");

    let mut engine = flow
        .voice_capture(Box::new(SimulatedMicrophone::default()))
        .expect("recorder");
    engine.request_permission().expect("granted");
    engine.begin().expect("begin");
    while !engine.is_recording() {
        clock.advance_secs(1);
        engine.tick().expect("countdown");
    }
    let claim = engine.claim();
    drop(engine);

    assert!(claim.recording_started());
    assert!(matches!(
        flow.voice_capture(Box::new(SimulatedMicrophone::default())),
        Err(FlowError::CaptureAlreadyIssued(0))
    ));
    assert!(matches!(flow.abandon(None), Err(FlowError::RecordingInProgress(0))));
    assert_eq!(
        flow.view(),
        &FlowView::Question {
            index: 0,
            kind: QuestionKind::Voice
        }
    );
}

#[test]
fn retake_policy_reopens_landing_for_a_new_attempt() {
    let mut retakeable = text_posting();
    retakeable.retake_policy = RetakePolicy::Allowed { max_attempts: 2 };
    let gateway = Arc::new(RecordingGateway::with_posting(retakeable));
    let backend = MemoryBackend::default();
    let clock = manual_clock();

    let mut flow = open_flow(&gateway, &backend, &clock, "post-text");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");
    answer_text(&mut flow, &clock, "First attempt");
    assert!(matches!(flow.view(), FlowView::Complete(_)));

    let second = open_flow(&gateway, &backend, &clock, "post-text");
    assert_eq!(second.view(), &FlowView::Landing { attempt: 2 });
}

#[test]
fn seal_failure_error_reaches_the_caller() {
    let gateway = Arc::new(RecordingGateway::with_posting(upload_posting()).flaky_finalize(1));
    let backend = MemoryBackend::default();
    let clock = manual_clock();
    let mut flow = open_flow(&gateway, &backend, &clock, "post-upload");
    flow.start().expect("start");
    flow.submit_personal_info(candidate(true), "")
        .expect("screening passes");
    answer_text(&mut flow, &clock, "first");
    answer_text(&mut flow, &clock, "second");
    flow.upload(cv_file()).expect("cv uploaded");

    assert!(matches!(
        flow.complete_upload(),
        Err(FlowError::Submission(SubmissionError::SealFailed(_)))
    ));
    flow.seal().expect("retry");
    assert!(matches!(flow.view(), FlowView::Complete(_)));
}
