mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{chat, CapturingDelivery, FakeSurface, OneSurface, PageLog};
use scribe::config::{Config, ScribeConfig};
use scribe::db;
use scribe::invite::{
    ChangeOperation, Invite, InviteChangeEvent, InviteStatus, InviteStore, Platform,
    SqliteInviteStore,
};
use scribe::platform::{
    ChimeAdapter, JoinError, Locator, PlatformAdapter, SessionFlow, SessionOutcome,
    SurfaceFactory,
};
use scribe::runner::{RunReport, TaskRunner};
use scribe::scheduler::{RetryPolicy, ScheduleReconciler, SqliteTriggerBackend, TriggerBackend};
use scribe::session::{
    RecordingEngine, RecordingState, RecordingStateMachine, SessionContext, SessionEvent,
};
use scribe::transcription::{NoopTranscriptionService, TranscriptionService};

const CHIME_MEETING_END: &str = ".MeetingEndContainer__subTitle, .Hq90rPeHQDqoB-F07ML2t";
const TEAMS_NAME_INPUT: &str = r#"input[placeholder="Enter name"]"#;

fn noop_transcription() -> Arc<dyn TranscriptionService> {
    Arc::new(NoopTranscriptionService::default())
}

struct Harness {
    store: Arc<SqliteInviteStore>,
    triggers: Arc<SqliteTriggerBackend>,
    delivery: Arc<CapturingDelivery>,
}

impl Harness {
    fn new() -> Self {
        let conn = db::in_memory().unwrap();
        Self {
            store: Arc::new(SqliteInviteStore::new(conn.clone())),
            triggers: Arc::new(SqliteTriggerBackend::new(conn)),
            delivery: Arc::new(CapturingDelivery::default()),
        }
    }

    fn runner(&self, surfaces: Arc<dyn SurfaceFactory>) -> TaskRunner {
        self.runner_with(Config::default(), surfaces)
    }

    fn runner_with(&self, config: Config, surfaces: Arc<dyn SurfaceFactory>) -> TaskRunner {
        TaskRunner::new(
            config,
            self.store.clone(),
            self.triggers.clone(),
            surfaces,
            noop_transcription(),
            self.delivery.clone(),
        )
    }

    async fn status(&self, invite_id: &str) -> InviteStatus {
        self.store.get(invite_id).await.unwrap().unwrap().status
    }
}

#[tokio::test(start_paused = true)]
async fn chime_session_records_lines_between_start_and_end() {
    let harness = Harness::new();
    let now = chrono::Utc::now().timestamp();
    let invite = Invite::new("Weekly sync", Platform::Chime, "1234567890", Some(now + 120))
        .with_recipients(vec!["ana@example.com".to_string()]);
    harness.store.create(&invite).await.unwrap();

    let reconciler = ScheduleReconciler::new(
        harness.triggers.clone(),
        RetryPolicy::immediate(3),
        10,
        "Scribe",
    );
    reconciler
        .apply_at(
            &InviteChangeEvent::from_invite(ChangeOperation::Insert, &invite),
            now,
        )
        .await
        .unwrap();
    let entry = harness.triggers.get(&invite.id).await.unwrap().unwrap();
    assert_eq!(entry.fires_at, now + 110);
    assert_eq!(entry.target.meeting_id, "1234567890");

    let log = Arc::new(PageLog::default());
    let surface = FakeSurface::new(log.clone())
        .missing(&Locator::css(CHIME_MEETING_END))
        .with_chat(vec![
            chat("Bo", "hello before start"),
            chat("Bo", "START"),
            chat("Bo", "first"),
            chat("Amazon Chime", "Cy joined the meeting"),
            chat("Cy", "second"),
            chat("Bo", "third"),
            chat("Bo", "END"),
            chat("Bo", "after the end"),
        ]);
    let runner = harness.runner(Arc::new(OneSurface::new(surface)));

    let report = runner.run(&entry.target).await.unwrap();

    let RunReport::Finished { status, summary } = report else {
        panic!("session was abandoned");
    };
    assert_eq!(status, InviteStatus::Completed);
    let summary = summary.unwrap();
    let lines: Vec<&str> = summary.chat.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("] Bo: first"));
    assert!(lines[1].ends_with("] Cy: second"));
    assert!(lines[2].ends_with("] Bo: third"));
    assert!(summary
        .body
        .starts_with("Your scribe has been removed from the meeting."));
    assert_eq!(summary.recipients, vec!["ana@example.com"]);
    assert_eq!(harness.delivery.delivered.lock().unwrap().len(), 1);

    assert_eq!(harness.status(&invite.id).await, InviteStatus::Completed);
    assert!(harness.triggers.get(&invite.id).await.unwrap().is_none());

    let visited = log.visited.lock().unwrap().clone();
    assert_eq!(visited.first().unwrap(), "https://app.chime.aws/meetings/1234567890");
    assert_eq!(visited.last().unwrap(), "about:blank");

    let typed = log.typed_text();
    assert_eq!(typed[0], "Scribe [Scribe]");
    assert!(typed[1].contains("invited by ana@example.com"));
    assert!(typed.contains(
        &"Saving new speakers, messages, and machine-generated captions.".to_string()
    ));
}

#[tokio::test(start_paused = true)]
async fn admission_timeout_returns_on_time_and_never_marks_joined() {
    let harness = Harness::new();
    let invite = Invite::new("Standup", Platform::Chime, "1234567890", None);
    harness.store.create(&invite).await.unwrap();

    let config = ScribeConfig {
        waiting_timeout_ms: 5_000,
        ..ScribeConfig::default()
    };
    let ctx = SessionContext::new(invite.clone(), "Scribe", &config);
    let RecordingEngine {
        handle,
        directives,
        task,
    } = RecordingEngine::spawn(RecordingStateMachine::new(ctx.clone()));

    let adapter = ChimeAdapter::new(Duration::from_secs(20));
    let log = Arc::new(PageLog::default());
    let surface = FakeSurface::new(log).missing(&adapter.admission_signal());
    let flow = SessionFlow::new(
        &ctx,
        harness.store.as_ref(),
        handle.clone(),
        directives,
        noop_transcription(),
        Duration::from_secs(20),
    );

    let started = tokio::time::Instant::now();
    let result = flow.initialize(&adapter, &surface).await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(JoinError::NotAdmitted { waited_ms: 5_000 })
    ));
    assert!(elapsed >= Duration::from_millis(5_000));
    assert!(elapsed <= Duration::from_millis(5_100));
    assert_eq!(harness.status(&invite.id).await, InviteStatus::Scheduled);

    handle.send(SessionEvent::Shutdown).await;
    assert!(task.await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_name_field_fails_the_invite() {
    let harness = Harness::new();
    let invite = Invite::new(
        "Planning",
        Platform::Teams,
        "https://teams.microsoft.com/l/meetup-join/abc",
        None,
    );
    harness.store.create(&invite).await.unwrap();

    let log = Arc::new(PageLog::default());
    let surface = FakeSurface::new(log.clone()).missing(&Locator::css(TEAMS_NAME_INPUT));
    let runner = harness.runner(Arc::new(OneSurface::new(surface)));
    let payload = InviteChangeEvent::from_invite(ChangeOperation::Insert, &invite)
        .trigger_payload("Scribe");

    let report = runner.run(&payload).await.unwrap();

    assert_eq!(report.status(), Some(InviteStatus::Failed));
    let RunReport::Finished { summary, .. } = report else {
        panic!("session was abandoned");
    };
    assert_eq!(
        summary.unwrap().body,
        "Your scribe was unable to join the meeting No meeting details were saved."
    );
    assert_eq!(harness.status(&invite.id).await, InviteStatus::Failed);
    assert!(log.typed_text().is_empty());
}

#[tokio::test(start_paused = true)]
async fn finished_invite_is_not_joined_again() {
    let harness = Harness::new();
    let invite = Invite::new("Retro", Platform::Webex, "2550000000", None);
    harness.store.create(&invite).await.unwrap();
    harness
        .store
        .update_status(&scribe::invite::InviteStatusUpdate {
            invite_id: invite.id.clone(),
            status: InviteStatus::Completed,
        })
        .await
        .unwrap();

    let log = Arc::new(PageLog::default());
    let runner = harness.runner(Arc::new(OneSurface::new(FakeSurface::new(log.clone()))));
    let payload = InviteChangeEvent::from_invite(ChangeOperation::Insert, &invite)
        .trigger_payload("Scribe");

    let report = runner.run(&payload).await.unwrap();

    assert!(matches!(report, RunReport::Abandoned { .. }));
    assert!(log.visited.lock().unwrap().is_empty());
    assert!(harness.delivery.delivered.lock().unwrap().is_empty());
}

async fn run_chime(harness: &Harness, config: Config, surface: FakeSurface) -> RunReport {
    let invite = Invite::new("Weekly sync", Platform::Chime, "1234567890", None);
    harness.store.create(&invite).await.unwrap();
    let payload = InviteChangeEvent::from_invite(ChangeOperation::Insert, &invite)
        .trigger_payload("Scribe");
    let report = harness
        .runner_with(config, Arc::new(OneSurface::new(surface)))
        .run(&payload)
        .await
        .unwrap();
    assert_eq!(harness.status(&invite.id).await, InviteStatus::Completed);
    report
}

#[tokio::test(start_paused = true)]
async fn speaker_observer_failure_keeps_chat_recording() {
    let harness = Harness::new();
    let surface = FakeSurface::new(Arc::new(PageLog::default()))
        .missing(&Locator::css(CHIME_MEETING_END))
        .failing_speaker_observer()
        .with_chat(vec![
            chat("Bo", "START"),
            chat("Bo", "one"),
            chat("Bo", "two"),
            chat("Bo", "END"),
        ]);

    let report = run_chime(&harness, Config::default(), surface).await;

    let RunReport::Finished { status, summary } = report else {
        panic!("session was abandoned");
    };
    assert_eq!(status, InviteStatus::Completed);
    let summary = summary.unwrap();
    assert_eq!(summary.chat.lines().count(), 2);
    assert!(!summary.body.contains("Speakers:"));
}

#[tokio::test(start_paused = true)]
async fn session_without_observers_still_ends_on_platform_signal() {
    let harness = Harness::new();
    let log = Arc::new(PageLog::default());
    let surface = FakeSurface::new(log.clone())
        .failing_speaker_observer()
        .failing_chat_observer();

    let report = run_chime(&harness, Config::default(), surface).await;

    let RunReport::Finished { summary, .. } = report else {
        panic!("session was abandoned");
    };
    assert_eq!(
        summary.unwrap().body,
        "The meeting has ended. No meeting details were saved."
    );
    // Introduction still went out before the observers were registered
    assert_eq!(log.typed_text().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn meeting_timeout_forces_idle_and_reports_timed_out() {
    let harness = Harness::new();
    let invite = Invite::new("Standup", Platform::Chime, "1234567890", None);
    harness.store.create(&invite).await.unwrap();

    let config = ScribeConfig {
        meeting_timeout_ms: 60_000,
        ..ScribeConfig::default()
    };
    let ctx = SessionContext::new(invite.clone(), "Scribe", &config);
    let RecordingEngine {
        handle,
        directives,
        task,
    } = RecordingEngine::spawn(RecordingStateMachine::new(ctx.clone()));

    let adapter = ChimeAdapter::new(Duration::from_secs(20));
    let surface = FakeSurface::new(Arc::new(PageLog::default()))
        .missing(&Locator::css(CHIME_MEETING_END))
        .with_chat(vec![chat("Bo", "START"), chat("Bo", "kept")]);
    let flow = SessionFlow::new(
        &ctx,
        harness.store.as_ref(),
        handle.clone(),
        directives,
        noop_transcription(),
        Duration::from_secs(20),
    );

    let started = tokio::time::Instant::now();
    let outcome = flow.initialize(&adapter, &surface).await.unwrap();

    assert_eq!(outcome, SessionOutcome::TimedOut);
    assert!(started.elapsed() >= Duration::from_millis(60_000));
    assert_eq!(harness.status(&invite.id).await, InviteStatus::Joined);

    handle.send(SessionEvent::Shutdown).await;
    let session = task.await.unwrap();
    assert_eq!(session.messages.len(), 1);
    assert!(session.messages[0].ends_with("] Bo: kept"));
    assert_eq!(handle.state(), RecordingState::Idle);
}

#[tokio::test(start_paused = true)]
async fn timed_out_session_is_completed() {
    let harness = Harness::new();
    let mut config = Config::default();
    config.scribe.meeting_timeout_ms = 60_000;
    let surface = FakeSurface::new(Arc::new(PageLog::default()))
        .missing(&Locator::css(CHIME_MEETING_END))
        .with_chat(vec![chat("Bo", "START"), chat("Bo", "kept")]);

    let report = run_chime(&harness, config, surface).await;

    let RunReport::Finished { status, summary } = report else {
        panic!("session was abandoned");
    };
    assert_eq!(status, InviteStatus::Completed);
    assert!(summary
        .unwrap()
        .body
        .starts_with("Your scribe left because the meeting reached its time limit."));
}
