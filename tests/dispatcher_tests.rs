mod common;

use common::fault_injection::FlakyAppendStore;
use common::{count_scheduled, fast_options, in_memory_store, wait_for_history, WAIT};
use durable_tasks::providers::in_memory::InMemoryHistoryStore;
use durable_tasks::providers::HistoryStore;
use durable_tasks::runtime::RetryPolicy;
use durable_tasks::{
    samples, ActivityRegistry, Error, Event, OrchestrationContext, OrchestrationRegistry, OrchestrationStatus,
    Runtime, WaitError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Orchestration that waits on an activity nobody ever registers a real
/// handler for, so tests can drive completions by hand.
fn manual_registries() -> (Arc<ActivityRegistry>, OrchestrationRegistry) {
    let activities = ActivityRegistry::builder()
        .register("Never", |_input: String| async move {
            std::future::pending::<()>().await;
            Ok(String::new())
        })
        .build();
    let orchestrations = OrchestrationRegistry::builder()
        .register("Manual", |ctx: OrchestrationContext, _input: String| async move {
            let a = ctx.schedule_activity("Never", "a").await?;
            Ok(format!("got {a}"))
        })
        .build();
    (Arc::new(activities), orchestrations)
}

async fn start_manual(store: Arc<dyn HistoryStore>) -> (Arc<Runtime>, String) {
    let (acts, orchs) = manual_registries();
    let rt = Runtime::start_with_options(store.clone(), acts, orchs, fast_options())
        .await
        .unwrap();
    let id = rt.start_orchestration("Manual", "").await.unwrap();
    assert!(wait_for_history(store, &id, |h| count_scheduled(h) == 1, 2000).await);
    (rt, id)
}

#[tokio::test]
async fn duplicate_report_is_a_no_op() {
    let store = in_memory_store();
    let (rt, id) = start_manual(store.clone()).await;

    assert!(rt.report_completion(&id, 1, Ok("first".into())).await.unwrap());
    let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
    assert_eq!(snap.output(), Some("got first"));
    let before = store.read(&id).await.unwrap();

    assert!(!rt.report_completion(&id, 1, Ok("second".into())).await.unwrap());
    assert!(!rt.report_completion(&id, 1, Err("late failure".into())).await.unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.read(&id).await.unwrap(), before);
    assert_eq!(rt.get_status(&id).await.unwrap().output(), Some("got first"));
    rt.shutdown().await;
}

#[tokio::test]
async fn duplicate_report_while_running_keeps_first_result() {
    let store = in_memory_store();
    let activities = ActivityRegistry::builder()
        .register("Never", |_input: String| async move {
            std::future::pending::<()>().await;
            Ok(String::new())
        })
        .build();
    let orchestrations = OrchestrationRegistry::builder()
        .register("TwoSteps", |ctx: OrchestrationContext, _input: String| async move {
            let a = ctx.schedule_activity("Never", "a").await?;
            let b = ctx.schedule_activity("Never", "b").await?;
            Ok(format!("{a}+{b}"))
        })
        .build();
    let rt = Runtime::start_with_options(store.clone(), Arc::new(activities), orchestrations, fast_options())
        .await
        .unwrap();
    let id = rt.start_orchestration("TwoSteps", "").await.unwrap();
    assert!(wait_for_history(store.clone(), &id, |h| count_scheduled(h) == 1, 2000).await);

    assert!(rt.report_completion(&id, 1, Ok("x".into())).await.unwrap());
    assert!(!rt.report_completion(&id, 1, Ok("y".into())).await.unwrap());
    assert!(wait_for_history(store.clone(), &id, |h| count_scheduled(h) == 2, 2000).await);

    assert!(rt.report_completion(&id, 2, Ok("z".into())).await.unwrap());
    let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
    assert_eq!(snap.output(), Some("x+z"));
    assert_eq!(count_scheduled(&store.read(&id).await.unwrap()), 2);
    rt.shutdown().await;
}

#[tokio::test]
async fn report_for_unscheduled_task_is_out_of_order() {
    let store = in_memory_store();
    let (rt, id) = start_manual(store.clone()).await;
    let err = rt.report_completion(&id, 7, Ok("?".into())).await.unwrap_err();
    assert_eq!(err, Error::OutOfOrder { task_id: 7 });
    assert_eq!(
        rt.report_completion("ghost", 1, Ok("?".into())).await.unwrap_err(),
        Error::not_found("ghost")
    );
    rt.shutdown().await;
}

#[tokio::test]
async fn terminate_discards_later_completions() {
    let store = in_memory_store();
    let (rt, id) = start_manual(store.clone()).await;

    rt.terminate(&id, "operator request").await.unwrap();
    let snap = rt.get_status(&id).await.unwrap();
    assert_eq!(
        snap.status,
        OrchestrationStatus::Terminated {
            reason: "operator request".into()
        }
    );

    assert!(!rt.report_completion(&id, 1, Ok("late".into())).await.unwrap());
    let hist = store.read(&id).await.unwrap();
    assert!(matches!(hist.last(), Some(Event::OrchestratorTerminated { .. })));
    assert!(!hist.iter().any(|e| matches!(e, Event::TaskCompleted { .. })));

    let again = rt.terminate(&id, "again").await.unwrap_err();
    assert!(matches!(again, Error::InvalidState { .. }));
    rt.shutdown().await;
}

#[tokio::test]
async fn completed_instance_cannot_be_terminated() {
    let rt = common::start_samples(in_memory_store()).await;
    let id = rt.start_orchestration(samples::CHAIN, "").await.unwrap();
    rt.wait_for_orchestration(&id, WAIT).await.unwrap();
    assert!(matches!(
        rt.terminate(&id, "too late").await,
        Err(Error::InvalidState { .. })
    ));
    rt.shutdown().await;
}

#[tokio::test]
async fn wait_times_out_on_suspended_instance() {
    let (rt, id) = start_manual(in_memory_store()).await;
    let res = rt.wait_for_orchestration(&id, Duration::from_millis(50)).await;
    assert_eq!(res.unwrap_err(), WaitError::Timeout);
    assert_eq!(rt.get_status(&id).await.unwrap().status, OrchestrationStatus::Running);
    rt.shutdown().await;
}

fn flaky_registries(
    calls: Arc<AtomicU32>,
    panics_before_success: u32,
) -> (Arc<ActivityRegistry>, OrchestrationRegistry) {
    let activities = ActivityRegistry::builder()
        .register("Flaky", move |input: String| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= panics_before_success {
                    panic!("worker crashed on attempt {n}");
                }
                Ok(format!("{input} ok after {n}"))
            }
        })
        .build();
    let orchestrations = OrchestrationRegistry::builder()
        .register("UsesFlaky", |ctx: OrchestrationContext, input: String| async move {
            ctx.schedule_activity("Flaky", input).await
        })
        .build();
    (Arc::new(activities), orchestrations)
}

#[tokio::test]
async fn panicking_activity_is_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let (acts, orchs) = flaky_registries(calls.clone(), 2);
    let rt = Runtime::start_with_options(in_memory_store(), acts, orchs, fast_options())
        .await
        .unwrap();
    let id = rt.start_orchestration("UsesFlaky", "job").await.unwrap();
    let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
    assert_eq!(snap.output(), Some("job ok after 3"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    rt.shutdown().await;
}

#[tokio::test]
async fn retries_are_bounded() {
    let calls = Arc::new(AtomicU32::new(0));
    let (acts, orchs) = flaky_registries(calls.clone(), u32::MAX);
    let mut opts = fast_options();
    opts.activity_retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        backoff_multiplier: 2.0,
        max_backoff: Duration::from_millis(4),
    };
    let rt = Runtime::start_with_options(in_memory_store(), acts, orchs, opts)
        .await
        .unwrap();
    let id = rt.start_orchestration("UsesFlaky", "job").await.unwrap();
    let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
    match snap.status {
        OrchestrationStatus::Failed {
            error: Error::Activity(e),
        } => assert!(e.message.contains("after 3 attempt(s)"), "{}", e.message),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    rt.shutdown().await;
}

#[tokio::test]
async fn application_errors_are_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let activities = ActivityRegistry::builder()
        .register("Refuses", move |_input: String| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>("rejected".to_string())
            }
        })
        .build();
    let orchestrations = OrchestrationRegistry::builder()
        .register("UsesRefuses", |ctx: OrchestrationContext, _input: String| async move {
            ctx.schedule_activity("Refuses", "").await
        })
        .build();
    let rt = Runtime::start_with_options(in_memory_store(), Arc::new(activities), orchestrations, fast_options())
        .await
        .unwrap();
    let id = rt.start_orchestration("UsesRefuses", "").await.unwrap();
    let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
    assert!(matches!(snap.status, OrchestrationStatus::Failed { error: Error::Activity(_) }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    rt.shutdown().await;
}

#[tokio::test]
async fn unregistered_activity_fails_the_task() {
    let orchestrations = OrchestrationRegistry::builder()
        .register("CallsMissing", |ctx: OrchestrationContext, _input: String| async move {
            ctx.schedule_activity("Missing", "").await
        })
        .build();
    let rt = Runtime::start_with_options(
        in_memory_store(),
        Arc::new(ActivityRegistry::builder().build()),
        orchestrations,
        fast_options(),
    )
    .await
    .unwrap();
    let id = rt.start_orchestration("CallsMissing", "").await.unwrap();
    let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
    match snap.status {
        OrchestrationStatus::Failed {
            error: Error::Activity(e),
        } => assert_eq!(e.message, "unregistered:Missing"),
        other => panic!("unexpected status {other:?}"),
    }
    rt.shutdown().await;
}

#[tokio::test]
async fn fail_fast_fan_out_fails_without_waiting() {
    let activities = ActivityRegistry::builder()
        .register("Slow", |_input: String| async move {
            std::future::pending::<()>().await;
            Ok(String::new())
        })
        .register("Broken", |_input: String| async move { Err::<String, _>("boom".to_string()) })
        .build();
    let orchestrations = OrchestrationRegistry::builder()
        .register("Mixed", |ctx: OrchestrationContext, _input: String| async move {
            let futs = vec![
                ctx.schedule_activity("Slow", "1"),
                ctx.schedule_activity("Broken", "2"),
                ctx.schedule_activity("Slow", "3"),
            ];
            let values = ctx.fan_in(futs, durable_tasks::JoinPolicy::FailFast).await?;
            Ok(values.join(","))
        })
        .build();
    let store = in_memory_store();
    let rt = Runtime::start_with_options(store.clone(), Arc::new(activities), orchestrations, fast_options())
        .await
        .unwrap();
    let id = rt.start_orchestration("Mixed", "").await.unwrap();
    let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
    match snap.status {
        OrchestrationStatus::Failed {
            error: Error::Activity(e),
        } => {
            assert_eq!(e.task_id, 2);
            assert_eq!(e.message, "boom");
        }
        other => panic!("unexpected status {other:?}"),
    }
    let hist = store.read(&id).await.unwrap();
    assert!(!hist
        .iter()
        .any(|e| matches!(e, Event::TaskCompleted { task_id: 1 | 3, .. })));
    rt.shutdown().await;
}

#[tokio::test]
async fn concurrent_instances_complete_independently() {
    let rt = common::start_samples(in_memory_store()).await;
    let mut ids = Vec::new();
    for i in 0..10 {
        let name = if i % 2 == 0 { samples::CHAIN } else { samples::FAN_OUT_FAN_IN };
        ids.push((name, rt.start_orchestration(name, "").await.unwrap()));
    }
    for (name, id) in ids {
        let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
        let expected = if name == samples::CHAIN {
            "TOKYO, LONDON, SEATTLE, AUSTIN"
        } else {
            "120"
        };
        assert_eq!(snap.output(), Some(expected), "instance {id}");
    }
    rt.shutdown().await;
}

#[tokio::test]
async fn transient_store_errors_are_retried() {
    let flaky = Arc::new(FlakyAppendStore::new(in_memory_store()));
    let store: Arc<dyn HistoryStore> = flaky.clone();
    let rt = common::start_samples(store).await;
    flaky.fail_next_appends(2);
    let id = rt.start_orchestration(samples::CHAIN, "").await.unwrap();
    let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
    assert_eq!(snap.output(), Some("TOKYO, LONDON, SEATTLE, AUSTIN"));
    assert_eq!(flaky.injected(), 2);
    rt.shutdown().await;
}

/// Cap 7 refuses the pass that schedules the fourth city; cap 8 refuses the
/// worker's report for the fourth completion. Both must end the instance.
#[tokio::test]
async fn refused_append_fails_the_instance() {
    for cap in [7, 8] {
        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::with_cap(cap));
        let rt = common::start_samples(store.clone()).await;
        let id = rt.start_orchestration(samples::CHAIN, "").await.unwrap();

        let snap = rt.wait_for_orchestration(&id, WAIT).await.unwrap();
        match &snap.status {
            OrchestrationStatus::Failed {
                error: Error::Provider(p),
            } => assert!(!p.is_retryable(), "cap {cap}"),
            other => panic!("cap {cap}: expected provider failure, got {other:?}"),
        }

        let hist = store.read(&id).await.unwrap();
        assert_eq!(hist.len(), cap + 1, "cap {cap}");
        assert!(matches!(hist.last(), Some(Event::OrchestratorFailed { .. })));
        assert_eq!(count_scheduled(&hist), 3 + (cap - 7), "cap {cap}");
        rt.shutdown().await;
    }
}

#[tokio::test]
async fn long_chain_completes_on_default_store() {
    let store = in_memory_store();
    let rt = common::start_samples(store.clone()).await;
    let cities: Vec<String> = (0..600).map(|i| format!("city{i}")).collect();
    let id = rt
        .start_orchestration(samples::CHAIN, serde_json::to_string(&cities).unwrap())
        .await
        .unwrap();

    let snap = rt.wait_for_orchestration(&id, Duration::from_secs(60)).await.unwrap();
    let expected: Vec<String> = cities.iter().map(|c| c.to_uppercase()).collect();
    assert_eq!(snap.output(), Some(expected.join(", ").as_str()));
    assert_eq!(count_scheduled(&store.read(&id).await.unwrap()), 600);
    rt.shutdown().await;
}

#[tokio::test]
async fn failed_start_leaves_no_instance_behind() {
    let flaky = Arc::new(FlakyAppendStore::new(in_memory_store()));
    let store: Arc<dyn HistoryStore> = flaky.clone();
    let rt = common::start_samples(store.clone()).await;

    flaky.fail_next_appends_permanently(1);
    let err = rt
        .start_orchestration_with_id("retry-me", samples::CHAIN, "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider(ref p) if !p.is_retryable()));
    assert_eq!(flaky.injected(), 1);
    assert!(rt.list_instances().await.unwrap().is_empty());
    assert_eq!(rt.get_status("retry-me").await.unwrap_err(), Error::not_found("retry-me"));

    rt.start_orchestration_with_id("retry-me", samples::CHAIN, "")
        .await
        .unwrap();
    let snap = rt.wait_for_orchestration("retry-me", WAIT).await.unwrap();
    assert_eq!(snap.output(), Some("TOKYO, LONDON, SEATTLE, AUSTIN"));
    rt.shutdown().await;
}
