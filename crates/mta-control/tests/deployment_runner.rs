//! End-to-end runs of the standard pipeline against the in-memory platform.

use chrono::{Duration as ChronoDuration, Utc};
use mta_control::{
    DeploymentRunner, InMemoryProgressStore, InMemoryVariableStore, ProgressLevel, RunStatus,
    SchedulerConfig, StepServices,
};
use mta_platform::{InMemoryPlatform, PlatformError, PlatformReader};
use mta_polling::MemoryLogSink;
use mta_types::{
    AppState, ApplicationColor, BuildState, DeploymentPolicy, DesiredApplication, DesiredService,
    DesiredServiceKey, DesiredState, ErrorKind, ExecuteSettings, ExistingApplication,
    ExistingService, InstanceState, LogLine, LogStream, OwnershipMetadata, PackageId,
    PollingConfig, Staging,
};
use serde_json::json;
use std::sync::Arc;

struct Harness {
    platform: Arc<InMemoryPlatform>,
    sink: Arc<MemoryLogSink>,
    runner: DeploymentRunner,
}

fn harness(platform: InMemoryPlatform, policy: DeploymentPolicy, polling: PollingConfig) -> Harness {
    let platform = Arc::new(platform);
    let sink = Arc::new(MemoryLogSink::new());
    let services = StepServices::new(
        platform.clone(),
        platform.clone(),
        sink.clone(),
        policy,
        polling,
    );
    let runner = DeploymentRunner::new(
        services,
        Arc::new(InMemoryVariableStore::new()),
        Arc::new(InMemoryProgressStore::new()),
    );
    Harness {
        platform,
        sink,
        runner,
    }
}

fn scheduler() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 5,
        max_ticks: Some(100),
    }
}

fn metadata(module: &str, color: Option<ApplicationColor>, services: &[&str]) -> OwnershipMetadata {
    OwnershipMetadata {
        package_id: PackageId::new("shop"),
        package_version: None,
        module_name: module.into(),
        color,
        services: services.iter().map(|s| s.to_string()).collect(),
    }
}

fn existing_app(
    name: &str,
    state: AppState,
    running: bool,
    metadata: Option<OwnershipMetadata>,
) -> ExistingApplication {
    ExistingApplication {
        name: name.into(),
        state,
        instances: 1,
        instance_states: if running {
            vec![InstanceState::Running]
        } else {
            vec![]
        },
        memory_mb: None,
        disk_mb: None,
        staging: Staging::default(),
        routes: vec![],
        services: vec![],
        env: Default::default(),
        metadata,
        build: BuildState::Staged,
        executed: false,
        created_at: Utc::now() - ChronoDuration::hours(1),
    }
}

fn desired(apps: Vec<DesiredApplication>, services: Vec<DesiredService>) -> DesiredState {
    let mut desired = DesiredState::new(PackageId::new("shop"));
    desired.applications = apps;
    desired.services = services;
    desired
}

#[tokio::test]
async fn test_stopped_application_is_only_started() {
    let platform = InMemoryPlatform::new();
    platform.insert_application(existing_app(
        "web",
        AppState::Stopped,
        false,
        Some(metadata("web", None, &[])),
    ));
    let h = harness(platform, DeploymentPolicy::default(), PollingConfig::default());

    let run_id = h
        .runner
        .start(&desired(vec![DesiredApplication::new("web", "web")], vec![]))
        .await
        .unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let mutations = h.platform.mutations().await;
    assert_eq!(mutations, vec!["start_application web".to_string()]);

    let web = h.platform.get_application("web").await.unwrap().unwrap();
    assert_eq!(web.state, AppState::Started);
}

#[tokio::test]
async fn test_fresh_deployment_creates_service_then_application() {
    let platform = InMemoryPlatform::new();
    platform.set_async_services(true);
    let h = harness(platform, DeploymentPolicy::default(), PollingConfig::default());

    let mut web = DesiredApplication::new("web", "web");
    web.services = vec!["db".into()];
    web.content_changed = true;
    let run_id = h
        .runner
        .start(&desired(
            vec![web],
            vec![DesiredService::managed("db", "postgres", "small")],
        ))
        .await
        .unwrap();

    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let mutations = h.platform.mutations().await;
    let position = |entry: &str| {
        mutations
            .iter()
            .position(|m| m == entry)
            .unwrap_or_else(|| panic!("missing {entry} in {mutations:?}"))
    };
    assert!(position("create_service db") < position("create_application web"));
    assert!(position("create_application web") < position("bind_service web/db"));
    assert!(position("restage_application web") < position("start_application web"));

    let web = h.platform.get_application("web").await.unwrap().unwrap();
    assert_eq!(web.instance_counts().running, 1);
    assert_eq!(web.metadata, Some(metadata("web", None, &["db"])));
}

#[tokio::test]
async fn test_standalone_application_is_a_content_error() {
    let platform = InMemoryPlatform::new();
    platform.insert_application(existing_app("web", AppState::Started, true, None));
    let h = harness(platform, DeploymentPolicy::default(), PollingConfig::default());

    let run_id = h
        .runner
        .start(&desired(vec![DesiredApplication::new("web", "web")], vec![]))
        .await
        .unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();

    match state.status {
        RunStatus::Failed { step, kind, .. } => {
            assert_eq!(step, "check-conflicts");
            assert_eq!(kind, ErrorKind::Content);
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert!(h.platform.mutations().await.is_empty());
}

#[tokio::test]
async fn test_start_timeout_is_retried_after_resume() {
    let platform = InMemoryPlatform::new();
    platform.insert_application(existing_app(
        "web",
        AppState::Stopped,
        false,
        Some(metadata("web", None, &[])),
    ));
    platform.script_instance_states("web", vec![InstanceState::Crashed]);

    let policy = DeploymentPolicy {
        fail_on_crashed: false,
        ..Default::default()
    };
    let polling = PollingConfig {
        start_timeout_secs: 0,
        ..Default::default()
    };
    let h = harness(platform, policy, polling);

    let run_id = h
        .runner
        .start(&desired(vec![DesiredApplication::new("web", "web")], vec![]))
        .await
        .unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    match &state.status {
        RunStatus::Retry { step, .. } => assert_eq!(step, "deploy-applications"),
        other => panic!("unexpected status {other:?}"),
    }

    h.runner.resume(run_id).await.unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let starts = h
        .platform
        .mutations()
        .await
        .into_iter()
        .filter(|m| m == "start_application web")
        .count();
    assert_eq!(starts, 2);
}

#[tokio::test]
async fn test_abort_during_polling() {
    let platform = InMemoryPlatform::new();
    platform.set_async_services(true);
    let h = harness(platform, DeploymentPolicy::default(), PollingConfig::default());

    let run_id = h
        .runner
        .start(&desired(
            vec![],
            vec![DesiredService::managed("db", "postgres", "small")],
        ))
        .await
        .unwrap();

    let mut state = h.runner.tick(run_id).await.unwrap();
    while state.cursor < 4 {
        state = h.runner.tick(run_id).await.unwrap();
    }
    // The service step started the asynchronous create and is polling.
    state = h.runner.tick(run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Running);
    assert_eq!(state.cursor, 4);

    h.runner.abort(run_id).await.unwrap();
    let state = h.runner.tick(run_id).await.unwrap();
    assert_eq!(state.status, RunStatus::Aborted);
    assert!(h.runner.resume(run_id).await.is_err());
}

#[tokio::test]
async fn test_blue_green_replaces_live_generation() {
    let platform = InMemoryPlatform::new();
    platform.insert_application(existing_app(
        "web-blue",
        AppState::Started,
        true,
        Some(metadata("web", Some(ApplicationColor::Blue), &[])),
    ));
    let policy = DeploymentPolicy {
        blue_green: true,
        ..Default::default()
    };
    let h = harness(platform, policy, PollingConfig::default());

    let mut web = DesiredApplication::new("web", "web");
    web.content_changed = true;
    let run_id = h.runner.start(&desired(vec![web], vec![])).await.unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let names: Vec<String> = h
        .platform
        .list_applications()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["web-green".to_string()]);

    let green = h.platform.get_application("web-green").await.unwrap().unwrap();
    assert_eq!(
        green.metadata.and_then(|m| m.color),
        Some(ApplicationColor::Green)
    );
}

#[tokio::test]
async fn test_executed_application_is_stopped_and_marked() {
    let platform = InMemoryPlatform::new();
    platform.push_log(
        "migrate",
        LogLine {
            timestamp: Utc::now() + ChronoDuration::hours(1),
            stream: LogStream::Stdout,
            source: "APP/PROC/WEB/0".into(),
            message: "SUCCESS".into(),
        },
    );
    let h = harness(platform, DeploymentPolicy::default(), PollingConfig::default());

    let mut job = DesiredApplication::new("migrate", "migrate");
    job.execute = Some(ExecuteSettings::default());
    let run_id = h.runner.start(&desired(vec![job], vec![])).await.unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let migrate = h.platform.get_application("migrate").await.unwrap().unwrap();
    assert_eq!(migrate.state, AppState::Stopped);
    assert!(migrate.executed);
    assert_eq!(h.sink.lines("migrate").len(), 1);

    let progress = h.runner.progress(run_id).await.unwrap();
    assert!(progress
        .iter()
        .any(|m| m.text == "Application migrate executed successfully"));
}

fn count(mutations: &[String], entry: &str) -> usize {
    mutations.iter().filter(|m| *m == entry).count()
}

fn position(mutations: &[String], entry: &str) -> usize {
    mutations
        .iter()
        .position(|m| m == entry)
        .unwrap_or_else(|| panic!("missing {entry} in {mutations:?}"))
}

#[tokio::test]
async fn test_legacy_rename_is_replanned_after_resume() {
    let platform = InMemoryPlatform::new();
    platform.insert_application(existing_app(
        "a",
        AppState::Started,
        true,
        Some(metadata("a", None, &[])),
    ));
    platform.insert_application(existing_app(
        "a-live",
        AppState::Started,
        true,
        Some(metadata("a", None, &[])),
    ));
    platform.fail_next(
        "rename_application",
        "a",
        PlatformError::Unavailable("gateway timeout".into()),
    );
    let policy = DeploymentPolicy {
        blue_green: true,
        keep_original_app_names: true,
        ..Default::default()
    };
    let h = harness(platform, policy, PollingConfig::default());

    let mut a = DesiredApplication::new("a", "a");
    a.content_changed = true;
    let run_id = h.runner.start(&desired(vec![a], vec![])).await.unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    match &state.status {
        RunStatus::Retry { step, .. } => assert_eq!(step, "prepare-generation"),
        other => panic!("unexpected status {other:?}"),
    }

    // The stale live generation is gone, the rename still has to happen.
    h.runner.resume(run_id).await.unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let names: Vec<String> = h
        .platform
        .list_applications()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["a".to_string()]);

    let mutations = h.platform.mutations().await;
    assert_eq!(count(&mutations, "delete_application a-live"), 2);
    assert_eq!(count(&mutations, "rename_application a"), 1);
}

#[tokio::test]
async fn test_changed_binding_parameters_are_rebound() {
    let platform = InMemoryPlatform::new();
    platform.insert_service(ExistingService {
        name: "db".into(),
        label: None,
        plan: None,
        user_provided: true,
        credentials: Default::default(),
        tags: Some(vec![]),
        syslog_drain_url: None,
        last_operation: None,
    });
    let mut existing = existing_app(
        "web",
        AppState::Started,
        true,
        Some(metadata("web", None, &["db"])),
    );
    existing.services = vec!["db".into()];
    platform.insert_application(existing);
    let h = harness(platform, DeploymentPolicy::default(), PollingConfig::default());

    let mut web = DesiredApplication::new("web", "web");
    web.services = vec!["db".into()];
    web.binding_parameters.insert("db".into(), json!({ "role": "reader" }));
    let run_id = h
        .runner
        .start(&desired(vec![web], vec![DesiredService::user_provided("db")]))
        .await
        .unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let mutations = h.platform.mutations().await;
    assert!(
        position(&mutations, "unbind_service web/db") < position(&mutations, "bind_service web/db")
    );

    let bindings = h.platform.list_service_bindings("db").await.unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].parameters, Some(json!({ "role": "reader" })));
}

#[tokio::test]
async fn test_recreate_waits_for_asynchronous_delete() {
    let platform = InMemoryPlatform::new();
    platform.set_async_services(true);
    platform.insert_service(ExistingService {
        name: "db".into(),
        label: Some("mysql".into()),
        plan: Some("small".into()),
        user_provided: false,
        credentials: Default::default(),
        tags: Some(vec![]),
        syslog_drain_url: None,
        last_operation: None,
    });
    let policy = DeploymentPolicy {
        delete_services: true,
        ..Default::default()
    };
    let h = harness(platform, policy, PollingConfig::default());

    let run_id = h
        .runner
        .start(&desired(
            vec![],
            vec![DesiredService::managed("db", "postgres", "small")],
        ))
        .await
        .unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let mutations = h.platform.mutations().await;
    assert!(
        position(&mutations, "delete_service db") < position(&mutations, "create_service db")
    );
    assert_eq!(count(&mutations, "create_service db"), 1);

    let db = h.platform.get_service_instance("db").await.unwrap().unwrap();
    assert_eq!(db.label.as_deref(), Some("postgres"));

    let progress = h.runner.progress(run_id).await.unwrap();
    assert!(progress
        .iter()
        .any(|m| m.text == "Waiting for service db to be deleted"));
}

#[tokio::test]
async fn test_rejected_optional_service_is_a_warning() {
    let platform = InMemoryPlatform::new();
    platform.fail_next(
        "create_service",
        "db",
        PlatformError::rejected(502, "broker unavailable"),
    );
    let h = harness(platform, DeploymentPolicy::default(), PollingConfig::default());

    let mut db = DesiredService::managed("db", "postgres", "small");
    db.optional = true;
    let run_id = h.runner.start(&desired(vec![], vec![db])).await.unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert!(h.platform.get_service_instance("db").await.unwrap().is_none());

    let progress = h.runner.progress(run_id).await.unwrap();
    assert!(progress.iter().any(|m| m.level == ProgressLevel::Warning
        && m.step_name == "deploy-services"
        && m.text.contains("Ignoring failure of optional resource")));
}

#[tokio::test]
async fn test_failed_optional_service_skips_its_keys() {
    let platform = InMemoryPlatform::new();
    platform.set_async_services(true);
    platform.script_service_failure("db");
    let h = harness(platform, DeploymentPolicy::default(), PollingConfig::default());

    let mut db = DesiredService::managed("db", "postgres", "small");
    db.optional = true;
    db.keys = vec![DesiredServiceKey::new("reader")];
    let run_id = h.runner.start(&desired(vec![], vec![db])).await.unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);

    let mutations = h.platform.mutations().await;
    assert_eq!(count(&mutations, "create_service_key db/reader"), 0);

    let progress = h.runner.progress(run_id).await.unwrap();
    assert!(progress
        .iter()
        .any(|m| m.text == "Skipping remaining operations on optional service db"));
    assert!(!progress.iter().any(|m| m.text == "Service db is ready"));
}

#[tokio::test]
async fn test_rejected_required_service_fails_the_run() {
    let platform = InMemoryPlatform::new();
    platform.fail_next(
        "create_service",
        "db",
        PlatformError::rejected(502, "broker unavailable"),
    );
    let h = harness(platform, DeploymentPolicy::default(), PollingConfig::default());

    let run_id = h
        .runner
        .start(&desired(
            vec![],
            vec![DesiredService::managed("db", "postgres", "small")],
        ))
        .await
        .unwrap();
    let state = h.runner.run_to_completion(run_id, &scheduler()).await.unwrap();
    match state.status {
        RunStatus::Failed { step, kind, .. } => {
            assert_eq!(step, "deploy-services");
            assert_eq!(kind, ErrorKind::Platform);
        }
        other => panic!("unexpected status {other:?}"),
    }
}
