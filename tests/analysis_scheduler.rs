mod common;
use crate::common::builders::{service_with, EngineInstanceBuilder};
use crate::common::{init_tracing, with_timeout, FakeConnector, RecordingSink, TestResult};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use enginesched::analysis::{
    AnalysisPhase, AnalysisSettings, ComponentSnapshot, ModelSnapshot, ModelSource,
    TomlModelSource,
};
use enginesched::exec::QueryResponse;
use enginesched::fs::mock::MockFileSystem;
use enginesched::service::QueryService;
use enginesched::types::{LocationKey, LocationState};

fn settings() -> AnalysisSettings {
    AnalysisSettings {
        debounce: Duration::from_millis(500),
        ..AnalysisSettings::default()
    }
}

fn two_components() -> ModelSnapshot {
    ModelSnapshot::new(vec![
        ComponentSnapshot::new("A", ["l0", "l1"]),
        ComponentSnapshot::new("B", ["x"]).excluded(),
    ])
}

async fn reveaal(connector: &FakeConnector) -> QueryService {
    service_with(
        vec![EngineInstanceBuilder::local("reveaal").ports(5040, 5042).build()],
        Arc::new(connector.clone()),
    )
    .await
}

#[tokio::test(start_paused = true)]
async fn burst_of_changes_starts_a_single_run_after_quiet_period() -> TestResult {
    init_tracing();
    let connector = FakeConnector::new();
    connector.reply("reachability: A.l1", Ok(QueryResponse::new(false, "")));
    let service = reveaal(&connector).await;
    let sink = RecordingSink::new();

    let handle = service.spawn_analysis(settings(), Arc::new(two_components()), sink.as_sink());

    // Ten edits over 200ms; the last one lands at 180ms.
    for _ in 0..10 {
        handle.notify_model_changed();
        sleep(Duration::from_millis(20)).await;
    }

    sleep(Duration::from_millis(400)).await;
    assert_eq!(handle.status().runs_started, 0, "ran before the quiet period");
    assert_eq!(handle.status().phase, AnalysisPhase::Debouncing);

    sleep(Duration::from_millis(200)).await;
    let status = handle.status();
    assert_eq!(status.runs_started, 1);
    assert_eq!(status.phase, AnalysisPhase::Idle);

    assert_eq!(sink.state_of("A", "l0"), Some(LocationState::Reachable));
    assert_eq!(sink.state_of("A", "l1"), Some(LocationState::Unreachable));
    assert_eq!(sink.state_of("B", "x"), Some(LocationState::Excluded));

    let queries: Vec<String> = connector.executed().into_iter().map(|(_, q)| q).collect();
    assert_eq!(queries.len(), 2);
    assert!(!queries.iter().any(|q| q.contains("B.x")));

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn change_during_run_supersedes_it() -> TestResult {
    init_tracing();
    let connector = FakeConnector::new();
    connector.with_delay(Duration::from_secs(1));
    let service = reveaal(&connector).await;
    let sink = RecordingSink::new();

    let handle = service.spawn_analysis(settings(), Arc::new(two_components()), sink.as_sink());

    handle.notify_model_changed();
    sleep(Duration::from_millis(700)).await;
    assert!(matches!(handle.status().phase, AnalysisPhase::Running { epoch: 1 }));

    // The run of epoch 1 is still busy with A.l0 when this fires at 1200ms.
    handle.notify_model_changed();
    sleep(Duration::from_millis(600)).await;
    assert_eq!(handle.status().runs_started, 2);
    assert_eq!(handle.status().epoch, 2);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.status().phase, AnalysisPhase::Idle);

    let l0 = LocationKey::new("A", "l0");
    let l0_history: Vec<LocationState> = sink
        .history()
        .into_iter()
        .filter(|(k, _)| *k == l0)
        .map(|(_, s)| s)
        .collect();
    assert_eq!(
        l0_history,
        vec![LocationState::Unknown, LocationState::Reachable]
    );
    assert_eq!(sink.state_of("A", "l1"), Some(LocationState::Reachable));

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn worker_pool_caps_concurrent_checks() -> TestResult {
    init_tracing();
    let connector = FakeConnector::new();
    connector.with_delay(Duration::from_millis(100));
    let service = service_with(
        vec![
            EngineInstanceBuilder::local("wide")
                .ports(7000, 7009)
                .thread_safe()
                .build(),
        ],
        Arc::new(connector.clone()),
    )
    .await;
    let sink = RecordingSink::new();

    let model = ModelSnapshot::new(vec![ComponentSnapshot::new(
        "A",
        ["l0", "l1", "l2", "l3", "l4"],
    )]);
    let settings = AnalysisSettings {
        worker_pool_size: 2,
        ..settings()
    };
    let handle = service.spawn_analysis(settings, Arc::new(model), sink.as_sink());

    handle.notify_model_changed();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(connector.executed().len(), 5);
    assert_eq!(connector.max_in_flight("wide"), 2);
    assert_eq!(sink.latest().len(), 5);

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn once_mode_exits_after_the_first_run() -> TestResult {
    init_tracing();
    let connector = FakeConnector::new();
    let service = reveaal(&connector).await;
    let sink = RecordingSink::new();

    let fs = MockFileSystem::new();
    fs.add_file(
        "/models/train.toml",
        r#"
[[component]]
name = "Train"
locations = ["Safe", "Cross"]

[[component]]
name = "Gate"
include_in_periodic_check = false
locations = ["Open"]
"#,
    );
    let source = TomlModelSource::new("/models/train.toml", Arc::new(fs));

    let settings = AnalysisSettings {
        exit_when_idle: true,
        ..settings()
    };
    let mut handle = service.spawn_analysis(settings, Arc::new(source), sink.as_sink());
    handle.notify_model_changed();

    with_timeout(handle.wait()).await;
    assert!(handle.is_finished());
    assert_eq!(handle.status().runs_started, 1);

    assert_eq!(sink.state_of("Train", "Safe"), Some(LocationState::Reachable));
    assert_eq!(sink.state_of("Train", "Cross"), Some(LocationState::Reachable));
    assert_eq!(sink.state_of("Gate", "Open"), Some(LocationState::Excluded));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_the_active_run() -> TestResult {
    init_tracing();
    let connector = FakeConnector::new();
    connector.with_delay(Duration::from_secs(60));
    let service = reveaal(&connector).await;
    let sink = RecordingSink::new();

    let handle = service.spawn_analysis(settings(), Arc::new(two_components()), sink.as_sink());
    handle.notify_model_changed();
    sleep(Duration::from_millis(600)).await;
    assert_eq!(connector.in_flight("reveaal"), 1);

    with_timeout(handle.shutdown()).await;

    assert_eq!(sink.state_of("A", "l0"), Some(LocationState::Unknown));
    assert_eq!(sink.state_of("A", "l1"), Some(LocationState::Unknown));
    Ok(())
}

struct BrokenModel;

impl ModelSource for BrokenModel {
    fn snapshot(&self) -> anyhow::Result<ModelSnapshot> {
        anyhow::bail!("model is mid-edit")
    }
}

#[tokio::test(start_paused = true)]
async fn unreadable_model_skips_the_run() -> TestResult {
    init_tracing();
    let connector = FakeConnector::new();
    let service = reveaal(&connector).await;
    let sink = RecordingSink::new();

    let handle = service.spawn_analysis(settings(), Arc::new(BrokenModel), sink.as_sink());
    handle.notify_model_changed();
    sleep(Duration::from_secs(1)).await;

    let status = handle.status();
    assert_eq!(status.runs_started, 1);
    assert_eq!(status.phase, AnalysisPhase::Idle);
    assert!(connector.executed().is_empty());
    assert!(sink.history().is_empty());

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_workers_still_checks_one_location_at_a_time() -> TestResult {
    init_tracing();
    let connector = FakeConnector::new();
    connector.with_delay(Duration::from_millis(100));
    let service = reveaal(&connector).await;
    let sink = RecordingSink::new();

    let settings = AnalysisSettings {
        worker_pool_size: 0,
        ..settings()
    };
    let handle = service.spawn_analysis(settings, Arc::new(two_components()), sink.as_sink());
    handle.notify_model_changed();
    sleep(Duration::from_secs(2)).await;

    let status = handle.status();
    assert_eq!(status.runs_started, 1);
    assert_eq!(status.phase, AnalysisPhase::Idle);
    assert_eq!(connector.executed().len(), 2);
    assert_eq!(connector.max_in_flight("reveaal"), 1);

    handle.shutdown().await;
    Ok(())
}
