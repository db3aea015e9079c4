//! Integration tests for a complete run: runner, engine, dispatcher and a
//! headless display
//!
//! These tests verify:
//! - The displayed text after a typical run
//! - The start control is disabled during a run and re-enabled exactly once
//! - A second start while running is rejected
//! - Engine, decode and provisioning failures still end the run
//! - The settings document handed to the engine

use camino::Utf8PathBuf;
use mknettest::metrics::Metrics;
use mknettest::models::{OptionValue, RunOutcome};
use mknettest::services::options::keys;
use mknettest::services::{
    BundledResource, NettestProfile, NettestRunner, ResourceBundle, ResourceProvisioner,
    ScriptStep, ScriptedEngine, StartError,
};
use mknettest::state::{StateError, StateManager};
use mknettest::ui::{DisplaySink, EventDispatcher, TextDisplay, UiQueue};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    _temp_dir: TempDir,
    storage_dir: Utf8PathBuf,
    engine: Arc<ScriptedEngine>,
    state: Arc<StateManager>,
    metrics: Arc<Metrics>,
    runner: NettestRunner<TextDisplay>,
}

fn harness(engine: ScriptedEngine) -> Harness {
    harness_with_profile(engine, NettestProfile::default())
}

fn harness_with_profile(engine: ScriptedEngine, profile: NettestProfile) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let storage_dir = Utf8PathBuf::try_from(temp_dir.path().join("files")).unwrap();
    let engine = Arc::new(engine);
    let state = Arc::new(StateManager::new());
    let metrics = Arc::new(Metrics::new());

    let bundle = ResourceBundle {
        geoip_country: BundledResource::embedded("GeoIP.dat", b"country database"),
        geoip_asn: BundledResource::embedded("GeoIPASNum.dat", b"asn database"),
        ca_bundle: profile
            .use_ca_bundle
            .then(|| BundledResource::embedded("ca-bundle.pem", b"certificates")),
    };

    let runner = NettestRunner::new(
        engine.clone(),
        ResourceProvisioner::new(storage_dir.clone()),
        bundle,
        profile,
        Arc::clone(&state),
        Arc::clone(&metrics),
    )
    .with_poll_timeout(Duration::from_millis(5));

    Harness {
        _temp_dir: temp_dir,
        storage_dir,
        engine,
        state,
        metrics,
        runner,
    }
}

fn typical_run() -> ScriptedEngine {
    ScriptedEngine::from_events([
        r#"{"key":"log","value":{"log_level":"INFO","message":"starting"}}"#,
        r#"{"key":"status.progress","value":{"percentage":0.5,"message":"halfway"}}"#,
        r#"{"key":"measurement","value":{"idx":0,"json_str":"{...}"}}"#,
        r#"{"key":"task_terminated","value":{}}"#,
    ])
}

#[test]
fn test_typical_run_display() {
    let h = harness(typical_run());
    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();

    h.runner.start(&display, Arc::new(handle)).unwrap();
    assert!(!display.start_enabled());

    assert!(queue.run_until_timeout(&display, |d| d.start_enabled(), WAIT));

    assert_eq!(display.log_text(), "starting\n");
    assert_eq!(display.progress_text(), "50% halfway\n");
    assert_eq!(display.result_text(), "{...}\n");
    assert_eq!(
        h.state.read(|s| s.last_outcome.clone()),
        Some(RunOutcome::Completed)
    );
    assert_eq!(h.metrics.events_dispatched.load(Ordering::Relaxed), 3);
    assert_eq!(h.metrics.runs_completed.load(Ordering::Relaxed), 1);
}

#[test]
fn test_start_while_running_is_rejected() {
    let h = harness(typical_run());
    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();

    let first = h.runner.start(&display, Arc::new(handle.clone())).unwrap();

    // Completion is applied on this thread, so nothing can finish the run
    // until the queue is pumped
    let second = h.runner.start(&display, Arc::new(handle));
    assert!(matches!(
        second,
        Err(StartError::AlreadyRunning(StateError::AlreadyRunning(id))) if id == first
    ));
    assert_eq!(h.engine.started_with().len(), 1);

    assert!(queue.run_until_timeout(&display, |d| d.start_enabled(), WAIT));
    assert_eq!(h.state.read(|s| s.runs_started), 1);
}

#[test]
fn test_consecutive_runs_start_from_empty_display() {
    let h = harness(typical_run());
    let display = TextDisplay::new();

    for _ in 0..2 {
        let (mut queue, handle) = UiQueue::<TextDisplay>::new();
        h.runner.start(&display, Arc::new(handle)).unwrap();
        assert!(queue.run_until_timeout(&display, |d| d.start_enabled(), WAIT));
    }

    assert_eq!(display.log_text(), "starting\n");
    assert_eq!(display.progress_text(), "50% halfway\n");
    assert_eq!(h.state.read(|s| s.runs_succeeded), 2);
    assert_eq!(h.engine.started_with().len(), 2);
}

#[test]
fn test_unknown_events_are_skipped() {
    let h = harness(ScriptedEngine::from_events([
        r#"{"key":"status.queued","value":{}}"#,
        r#"{"value":{"no":"key"}}"#,
        r#"{"key":"log","value":{"message":"still here"}}"#,
    ]));
    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();

    h.runner.start(&display, Arc::new(handle)).unwrap();
    assert!(queue.run_until_timeout(&display, |d| d.start_enabled(), WAIT));

    assert_eq!(display.log_text(), "still here\n");
    assert_eq!(h.metrics.events_unhandled.load(Ordering::Relaxed), 2);
    assert_eq!(
        h.state.read(|s| s.last_outcome.clone()),
        Some(RunOutcome::Completed)
    );
}

#[test]
fn test_completion_without_task_terminated() {
    let h = harness(ScriptedEngine::new(vec![
        ScriptStep::Pending,
        ScriptStep::Event(r#"{"key":"log","value":{"message":"only line"}}"#.to_string()),
        ScriptStep::Pending,
    ]));
    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();

    h.runner.start(&display, Arc::new(handle)).unwrap();

    assert!(queue.run_until(&display, |d| d.start_enabled()));
    assert_eq!(display.log_text(), "only line\n");
    assert!(h.state.read(|s| s.can_start()));
}

#[test]
fn test_decode_failure_ends_run() {
    let h = harness(ScriptedEngine::from_events([
        r#"{"key":"log","value":{"message":"before"}}"#,
        "this is not json",
        r#"{"key":"log","value":{"message":"never shown"}}"#,
    ]));
    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();

    h.runner.start(&display, Arc::new(handle)).unwrap();
    assert!(queue.run_until_timeout(&display, |d| d.start_enabled(), WAIT));

    let log = display.log_text();
    assert!(log.starts_with("before\ncannot decode event: "), "log was {:?}", log);
    assert!(!log.contains("never shown"));
    assert!(matches!(
        h.state.read(|s| s.last_outcome.clone()),
        Some(RunOutcome::DecodeFailed(_))
    ));
    assert_eq!(h.metrics.decode_failures.load(Ordering::Relaxed), 1);
}

#[test]
fn test_engine_failure_ends_run() {
    let h = harness(ScriptedEngine::new(vec![
        ScriptStep::Event(r#"{"key":"failure.startup","value":{"failure":"no_servers"}}"#.to_string()),
        ScriptStep::Fail("engine crashed".to_string()),
    ]));
    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();

    h.runner.start(&display, Arc::new(handle)).unwrap();
    assert!(queue.run_until_timeout(&display, |d| d.start_enabled(), WAIT));

    assert_eq!(
        display.log_text(),
        "failure: no_servers\nengine error: engine failure: engine crashed\n"
    );
    assert_eq!(
        h.state.read(|s| s.last_outcome.clone()),
        Some(RunOutcome::EngineFailed("engine failure: engine crashed".to_string()))
    );
}

#[test]
fn test_settings_document() {
    let profile = NettestProfile {
        dns_engine: Some("system".to_string()),
        use_ca_bundle: true,
        ..NettestProfile::default()
    };
    let h = harness_with_profile(ScriptedEngine::from_events(Vec::<String>::new()), profile);
    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();

    h.runner.start(&display, Arc::new(handle)).unwrap();
    assert!(queue.run_until_timeout(&display, |d| d.start_enabled(), WAIT));

    let started = h.engine.started_with();
    assert_eq!(started.len(), 1);
    let settings = &started[0];

    assert_eq!(settings.name, "Ndt");
    assert_eq!(
        settings.text_option(keys::GEOIP_COUNTRY_PATH),
        Some(h.storage_dir.join("GeoIP.dat").as_str())
    );
    assert_eq!(
        settings.text_option(keys::GEOIP_ASN_PATH),
        Some(h.storage_dir.join("GeoIPASNum.dat").as_str())
    );
    assert_eq!(
        settings.text_option(keys::CA_BUNDLE_PATH),
        Some(h.storage_dir.join("ca-bundle.pem").as_str())
    );
    assert_eq!(settings.option(keys::NO_FILE_REPORT), Some(&OptionValue::Int(1)));
    assert_eq!(settings.text_option(keys::DNS_ENGINE), Some("system"));

    assert!(h.storage_dir.join("GeoIP.dat").is_file());
}

#[test]
fn test_provisioning_failure_reenables_start() {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let engine = Arc::new(typical_run());
    let state = Arc::new(StateManager::new());

    let runner: NettestRunner<TextDisplay> = NettestRunner::new(
        engine.clone(),
        ResourceProvisioner::new(root.join("files")),
        ResourceBundle::from_dir(&root.join("no-bundle"), false),
        NettestProfile::default(),
        Arc::clone(&state),
        Arc::new(Metrics::new()),
    );

    let (_queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();
    let result = runner.start(&display, Arc::new(handle));

    assert!(matches!(result, Err(StartError::Provisioning(_))));
    assert!(display.start_enabled());
    assert!(display.log_text().starts_with("cannot start: "));
    assert!(engine.started_with().is_empty());
    assert!(matches!(
        state.read(|s| s.last_outcome.clone()),
        Some(RunOutcome::Aborted(_))
    ));
}

#[test]
fn test_custom_dispatcher() {
    let mut dispatcher = EventDispatcher::<TextDisplay>::for_display();
    dispatcher.register(
        mknettest::EventKind::Log,
        |sink: &TextDisplay, payload: &mknettest::EventPayload| {
            if let mknettest::EventPayload::Log { message, .. } = payload {
                sink.append_log(&format!("[engine] {}\n", message));
            }
        },
    );

    let h = harness(typical_run());
    let runner = h.runner.with_dispatcher(dispatcher);
    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();

    runner.start(&display, Arc::new(handle)).unwrap();
    assert!(queue.run_until_timeout(&display, |d| d.start_enabled(), WAIT));

    assert_eq!(display.log_text(), "[engine] starting\n");
    assert_eq!(display.result_text(), "{...}\n");
}

#[cfg(unix)]
#[test]
fn test_external_engine_run() {
    use mknettest::services::ProcessEngine;

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let script = concat!(
        "cat > /dev/null; ",
        "echo '{\"key\":\"log\",\"value\":{\"message\":\"starting\"}}'; ",
        "echo '{\"key\":\"status.progress\",\"value\":{\"percentage\":0.5,\"message\":\"halfway\"}}'; ",
        "echo '{\"key\":\"measurement\",\"value\":{\"json_str\":\"{...}\"}}'; ",
        "echo '{\"key\":\"task_terminated\",\"value\":{}}'",
    );
    let engine = Arc::new(ProcessEngine::new(
        Utf8PathBuf::from("sh"),
        vec!["-c".to_string(), script.to_string()],
        runtime.handle().clone(),
    ));

    let temp_dir = TempDir::new().unwrap();
    let storage_dir = Utf8PathBuf::try_from(temp_dir.path().join("files")).unwrap();
    let state = Arc::new(StateManager::new());
    let runner: NettestRunner<TextDisplay> = NettestRunner::new(
        engine,
        ResourceProvisioner::new(storage_dir),
        ResourceBundle {
            geoip_country: BundledResource::embedded("GeoIP.dat", b"country database"),
            geoip_asn: BundledResource::embedded("GeoIPASNum.dat", b"asn database"),
            ca_bundle: None,
        },
        NettestProfile::default(),
        Arc::clone(&state),
        Arc::new(Metrics::new()),
    )
    .with_poll_timeout(Duration::from_millis(50));

    let (mut queue, handle) = UiQueue::<TextDisplay>::new();
    let display = TextDisplay::new();

    runner.start(&display, Arc::new(handle)).unwrap();
    assert!(queue.run_until_timeout(&display, |d| d.start_enabled(), WAIT));

    assert_eq!(display.log_text(), "starting\n");
    assert_eq!(display.progress_text(), "50% halfway\n");
    assert_eq!(display.result_text(), "{...}\n");
    assert_eq!(
        state.read(|s| s.last_outcome.clone()),
        Some(RunOutcome::Completed)
    );
}
