//! Engine and runner integration tests
//!
//! These drive the full engine against an in-memory execution target and
//! verify summary accounting, hook timeouts, recovery, settings restoration,
//! cancellation and observer ordering.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use scenario::runtime::{
    ConcreteSettings, CurrentStep, ExecutionTarget, Hook, HookPhase, LogLevel, ObserverChain,
    Predicate, RecoverySequence, Reporter, Runner, Script, Step, StepResult, StructuredError,
    SummaryStep, TestData, TestEngine, TestSettings, TraceEvent, TraceObserver,
};
use scenario::Error;

/// In-memory execution target recording everything the engine asks of it
#[derive(Default)]
struct MockTarget {
    settings: Mutex<ConcreteSettings>,
    current: Mutex<Option<CurrentStep>>,
    directives: Mutex<Vec<String>>,
}

impl MockTarget {
    /// Perform an action attributed to the current step
    async fn act(&self, action: &str) {
        let current = self.current.lock().unwrap().clone();
        if let Some(current) = current {
            current.action(action, tokio::task::yield_now()).await;
        }
    }

    fn directives(&self) -> Vec<String> {
        self.directives.lock().unwrap().clone()
    }

    fn record(&self, directive: String) {
        self.directives.lock().unwrap().push(directive);
    }
}

#[async_trait]
impl ExecutionTarget for MockTarget {
    fn settings(&self) -> ConcreteSettings {
        self.settings.lock().unwrap().clone()
    }

    fn apply_settings(&self, settings: ConcreteSettings) {
        *self.settings.lock().unwrap() = settings;
    }

    fn set_current_step(&self, step: Option<CurrentStep>) {
        *self.current.lock().unwrap() = step;
    }

    async fn clear_cache(&self) -> anyhow::Result<()> {
        self.record("clear_cache".to_string());
        Ok(())
    }

    async fn clear_cookies(&self) -> anyhow::Result<()> {
        self.record("clear_cookies".to_string());
        Ok(())
    }

    async fn emulate_device(&self, device: &str) -> anyhow::Result<()> {
        self.record(format!("device {device}"));
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> anyhow::Result<()> {
        self.record(format!("user_agent {user_agent}"));
        Ok(())
    }

    async fn set_cache_disabled(&self, disabled: bool) -> anyhow::Result<()> {
        self.record(format!("cache_disabled {disabled}"));
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> anyhow::Result<()> {
        self.record(format!("headers {}", headers.len()));
        Ok(())
    }
}

/// Reporter keeping every line it receives
#[derive(Default)]
struct RecordingReporter {
    lines: Mutex<Vec<String>>,
}

impl RecordingReporter {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn test_internal_error(&self, message: &str, _error: &(dyn std::error::Error + 'static)) {
        self.lines.lock().unwrap().push(format!("internal: {message}"));
    }

    fn test_assertion_error(&self, error: &StructuredError) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("assertion: {}", error.message()));
    }

    fn test_step_error(&self, error: &StructuredError) {
        self.lines
            .lock()
            .unwrap()
            .push(format!("step: {}", error.message()));
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.lines.lock().unwrap().push(format!("{level}: {message}"));
    }
}

struct Harness {
    target: Arc<MockTarget>,
    trace: Arc<TraceObserver>,
    reporter: Arc<RecordingReporter>,
}

impl Harness {
    fn new() -> Self {
        Self {
            target: Arc::new(MockTarget::default()),
            trace: Arc::new(TraceObserver::new()),
            reporter: Arc::new(RecordingReporter::default()),
        }
    }

    fn engine(&self) -> TestEngine {
        let observers = ObserverChain::standard(self.reporter.clone()).with(self.trace.clone());
        TestEngine::new(self.target.clone())
            .with_reporter(self.reporter.clone())
            .with_observers(Arc::new(observers))
    }

    fn enqueued(&self, script: Script) -> TestEngine {
        let mut engine = self.engine();
        engine
            .enqueue_script(script, &TestSettings::default())
            .unwrap();
        engine
    }
}

fn pass(name: &str) -> Step {
    Step::new(name, |_| async { Ok(()) })
}

fn fail(name: &str) -> Step {
    Step::new(name, |_| async { anyhow::bail!("element not found") })
}

fn rows(engine: &TestEngine) -> Vec<(String, StepResult)> {
    engine
        .summarize_step()
        .iter()
        .map(|row| (row.step_name.clone(), row.result))
        .collect()
}

fn row(name: &str, result: StepResult) -> (String, StepResult) {
    (name.to_string(), result)
}

fn loops(count: i64) -> TestSettings {
    TestSettings {
        loop_count: Some(count),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_unrecoverable_failure_aborts_iteration() {
    let harness = Harness::new();
    let mut engine = harness.enqueued(
        Script::default()
            .step(pass("A"))
            .step(fail("B"))
            .step(pass("C")),
    );

    let err = engine.run(Some(1)).await.unwrap_err();
    assert!(matches!(&err, Error::StepFailed { step, .. } if step == "B"));
    assert!(engine.failed());
    assert_eq!(
        rows(&engine),
        vec![
            row("A", StepResult::Passed),
            row("B", StepResult::Failed),
            row("C", StepResult::Unexecuted),
        ]
    );
    // generic failures go to the reporter as internal errors
    assert!(harness
        .reporter
        .lines()
        .contains(&"internal: Step 'B' failed".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_before_all_timeout_runs_no_steps() {
    let harness = Harness::new();
    let after_all = Arc::new(AtomicU32::new(0));
    let after_all_calls = after_all.clone();

    let mut engine = harness.enqueued(
        Script::default()
            .step(pass("A"))
            .step(pass("B"))
            .hook(
                HookPhase::BeforeAll,
                Hook::new(Duration::from_secs(1), |_| async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }),
            )
            .hook(
                HookPhase::AfterAll,
                Hook::new(Duration::from_secs(1), move |_| {
                    let calls = after_all_calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            ),
    );

    let started = tokio::time::Instant::now();
    let err = engine.run(Some(1)).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        err,
        Error::HookTimeout {
            phase: HookPhase::BeforeAll,
            ..
        }
    ));
    assert_eq!(
        rows(&engine),
        vec![row("A", StepResult::Unexecuted), row("B", StepResult::Unexecuted)]
    );
    assert_eq!(after_all.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.trace.events().last(),
        Some(&TraceEvent::After {
            iteration: 1,
            failed: true
        })
    );
}

#[tokio::test]
async fn test_abort_mid_repeat_counts_remaining_repetitions() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicU32::new(0));
    let hook_calls = calls.clone();

    let mut engine = harness.enqueued(
        Script::default()
            .step(pass("A").repeat(3))
            .step(pass("B"))
            .hook(
                HookPhase::BeforeEach,
                Hook::new(Duration::from_secs(1), move |_| {
                    let calls = hook_calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                            anyhow::bail!("session expired");
                        }
                        Ok(())
                    }
                }),
            ),
    );

    let err = engine.run(Some(1)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Hook {
            phase: HookPhase::BeforeEach,
            ..
        }
    ));
    assert_eq!(
        rows(&engine),
        vec![
            row("A", StepResult::Passed),
            row("A", StepResult::Unexecuted),
            row("A", StepResult::Unexecuted),
            row("B", StepResult::Unexecuted),
        ]
    );
}

#[tokio::test]
async fn test_repeat_labels_each_repetition() {
    let harness = Harness::new();
    let mut engine = harness.enqueued(Script::default().step(pass("search").repeat(2)));
    engine.run(Some(1)).await.unwrap();

    assert_eq!(
        rows(&engine),
        vec![row("search", StepResult::Passed), row("search", StepResult::Passed)]
    );
    let passed: Vec<TraceEvent> = harness
        .trace
        .events()
        .into_iter()
        .filter(|e| matches!(e, TraceEvent::Passed { .. }))
        .collect();
    assert_eq!(
        passed,
        vec![
            TraceEvent::Passed {
                step: "search (1/2)".into()
            },
            TraceEvent::Passed {
                step: "search (2/2)".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_successful_recovery_continues_iteration() {
    let harness = Harness::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let recovery_attempts = attempts.clone();

    let relogin = Step::new("relogin", move |_| {
        let attempts = recovery_attempts.clone();
        async move {
            // fails on the 1st recovery attempt, succeeds on the 2nd
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("still logged out");
            }
            Ok(())
        }
    });

    let mut engine = harness.enqueued(
        Script::new(TestSettings {
            tries: Some(3),
            ..Default::default()
        })
        .step(pass("A"))
        .step(fail("B"))
        .step(pass("C"))
        .recover("B", RecoverySequence::new(vec![relogin])),
    );

    engine.run(Some(1)).await.unwrap();
    assert!(!engine.failed());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(
        rows(&engine),
        vec![
            row("A", StepResult::Passed),
            row("B", StepResult::Failed),
            row("C", StepResult::Passed),
        ]
    );
    assert!(harness
        .reporter
        .lines()
        .iter()
        .any(|line| line.contains("B (2nd recovery)")));
}

#[tokio::test]
async fn test_recovery_steps_are_bracketed() {
    let harness = Harness::new();
    let target = harness.target.clone();

    let fix = Step::new("fix", move |_| {
        let target = target.clone();
        async move {
            target.act("click").await;
            Ok(())
        }
    });
    let mut engine = harness.enqueued(
        Script::default()
            .step(fail("a"))
            .recover("a", RecoverySequence::new(vec![fix])),
    );

    engine.run(Some(1)).await.unwrap();
    let recovery = "a (1st recovery)".to_string();
    assert_eq!(
        harness.trace.events(),
        vec![
            TraceEvent::Before { iteration: 1 },
            TraceEvent::BeforeStep { step: "a".into() },
            TraceEvent::Error {
                step: "a".into(),
                kind: scenario::runtime::ErrorKind::Empty
            },
            TraceEvent::AfterStep { step: "a".into() },
            TraceEvent::BeforeStep {
                step: recovery.clone()
            },
            TraceEvent::BeforeAction {
                step: recovery.clone(),
                action: "click".into()
            },
            TraceEvent::AfterAction {
                step: recovery.clone(),
                action: "click".into()
            },
            TraceEvent::Passed {
                step: recovery.clone()
            },
            TraceEvent::AfterStep { step: recovery },
            TraceEvent::After {
                iteration: 1,
                failed: false
            },
        ]
    );
}

#[tokio::test]
async fn test_failed_recovery_step_reports_error() {
    let harness = Harness::new();
    let mut engine = harness.enqueued(
        Script::default()
            .step(fail("a"))
            .recover("a", RecoverySequence::new(vec![fail("reset")])),
    );

    assert!(engine.run(Some(1)).await.is_err());
    let events = harness.trace.events();
    let recovery = "a (1st recovery)".to_string();
    let start = events
        .iter()
        .position(|e| *e == TraceEvent::BeforeStep { step: recovery.clone() })
        .unwrap();
    assert_eq!(
        events[start + 1..start + 3],
        [
            TraceEvent::Error {
                step: recovery.clone(),
                kind: scenario::runtime::ErrorKind::Empty
            },
            TraceEvent::AfterStep { step: recovery },
        ]
    );
}

#[tokio::test]
async fn test_exhausted_recovery_aborts_iteration() {
    let harness = Harness::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let recovery_attempts = attempts.clone();

    let reset = Step::new("reset", move |_| {
        let attempts = recovery_attempts.clone();
        async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("reset failed")
        }
    });

    let mut engine = harness.enqueued(
        Script::default()
            .step(fail("B"))
            .step(pass("C"))
            .recover("B", RecoverySequence::new(vec![reset]).tries(2)),
    );

    let err = engine.run(Some(1)).await.unwrap_err();
    assert!(matches!(err, Error::StepFailed { .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(
        rows(&engine),
        vec![row("B", StepResult::Failed), row("C", StepResult::Unexecuted)]
    );
}

#[tokio::test]
async fn test_step_settings_are_restored() {
    let harness = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let overrides = TestSettings {
        user_agent: Some("step-agent".to_string()),
        wait_timeout_secs: Some(5.0),
        ..Default::default()
    };
    let record = |name: &str, fails: bool| {
        let seen = seen.clone();
        Step::new(name, move |ctx| {
            let seen = seen.clone();
            async move {
                let settings = ctx.target.settings();
                seen.lock()
                    .unwrap()
                    .push((settings.user_agent.clone(), settings.wait_timeout));
                if fails {
                    anyhow::bail!("boom");
                }
                Ok(())
            }
        })
    };

    let mut engine = harness.enqueued(
        Script::default()
            .step(record("passes", false).settings(overrides.clone()))
            .step(record("fails", true).settings(overrides)),
    );
    let before = harness.target.settings();

    assert!(engine.run(Some(1)).await.is_err());
    assert_eq!(harness.target.settings(), before);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (Some("step-agent".to_string()), Duration::from_secs(5)),
            (Some("step-agent".to_string()), Duration::from_secs(5)),
        ]
    );
}

#[tokio::test]
async fn test_step_cannot_override_iteration_settings() {
    let harness = Harness::new();
    let seen = Arc::new(Mutex::new(None));

    let overrides = TestSettings {
        name: Some("renamed".to_string()),
        loop_count: Some(7),
        fail_fast: Some(true),
        user_agent: Some("step-agent".to_string()),
        ..Default::default()
    };
    let step = {
        let seen = seen.clone();
        Step::new("scoped", move |ctx| {
            let seen = seen.clone();
            async move {
                *seen.lock().unwrap() = Some(ctx.target.settings());
                Ok(())
            }
        })
        .settings(overrides)
    };

    let mut engine = harness.enqueued(Script::default().step(step));
    let before = harness.target.settings();

    engine.run(Some(1)).await.unwrap();
    let during = seen.lock().unwrap().clone().unwrap();
    assert_eq!(during.user_agent.as_deref(), Some("step-agent"));
    assert_eq!(during.name, before.name);
    assert_eq!(during.loop_count, before.loop_count);
    assert_eq!(during.fail_fast, before.fail_fast);
}

#[tokio::test]
async fn test_hook_runs_with_its_own_wait_timeout() {
    let harness = Harness::new();
    let seen = Arc::new(Mutex::new(None));
    let hook_seen = seen.clone();

    let mut engine = harness.enqueued(Script::default().step(pass("A")).hook(
        HookPhase::BeforeEach,
        Hook::new(Duration::from_secs(7), move |ctx| {
            let seen = hook_seen.clone();
            async move {
                *seen.lock().unwrap() = Some(ctx.target.settings().wait_timeout);
                Ok(())
            }
        }),
    ));
    let before = harness.target.settings();

    engine.run(Some(1)).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(Duration::from_secs(7)));
    assert_eq!(harness.target.settings(), before);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_abandons_running_step() {
    let harness = Harness::new();
    let after_all = Arc::new(AtomicU32::new(0));
    let after_all_calls = after_all.clone();

    let mut engine = harness.enqueued(
        Script::default()
            .step(Step::new("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(())
            }))
            .step(pass("next"))
            .hook(
                HookPhase::AfterAll,
                Hook::new(Duration::from_secs(1), move |_| {
                    let calls = after_all_calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            ),
    );

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = engine.run(Some(1)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(engine.failed());
    assert_eq!(after_all.load(Ordering::SeqCst), 1);
    assert_eq!(
        rows(&engine),
        vec![
            row("slow", StepResult::Unexecuted),
            row("next", StepResult::Unexecuted)
        ]
    );

    let events = harness.trace.events();
    assert!(events.contains(&TraceEvent::AfterStep {
        step: "slow".into()
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, TraceEvent::Passed { .. } | TraceEvent::Error { .. })));
}

#[tokio::test]
async fn test_cancel_marks_failed_and_notifies_after() {
    let harness = Harness::new();
    let mut engine = harness.enqueued(Script::default().step(pass("A")));

    engine.cancel().await;
    assert!(engine.failed());
    assert!(engine.cancellation_token().is_cancellation_requested());
    assert_eq!(
        harness.trace.events(),
        vec![TraceEvent::After {
            iteration: 0,
            failed: true
        }]
    );

    // a cancelled engine refuses to start steps
    let err = engine.run(Some(1)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(rows(&engine), vec![row("A", StepResult::Unexecuted)]);
}

#[tokio::test]
async fn test_observer_notification_order() {
    let harness = Harness::new();
    let target = harness.target.clone();

    let mut engine = harness.enqueued(
        Script::default()
            .step(Step::new("open", move |_| {
                let target = target.clone();
                async move {
                    target.act("navigate").await;
                    target.act("click").await;
                    Ok(())
                }
            }))
            .step(fail("check")),
    );

    assert!(engine.run(Some(1)).await.is_err());
    assert_eq!(
        harness.trace.events(),
        vec![
            TraceEvent::Before { iteration: 1 },
            TraceEvent::BeforeStep {
                step: "open".into()
            },
            TraceEvent::BeforeAction {
                step: "open".into(),
                action: "navigate".into()
            },
            TraceEvent::AfterAction {
                step: "open".into(),
                action: "navigate".into()
            },
            TraceEvent::BeforeAction {
                step: "open".into(),
                action: "click".into()
            },
            TraceEvent::AfterAction {
                step: "open".into(),
                action: "click".into()
            },
            TraceEvent::Passed {
                step: "open".into()
            },
            TraceEvent::AfterStep {
                step: "open".into()
            },
            TraceEvent::BeforeStep {
                step: "check".into()
            },
            TraceEvent::Error {
                step: "check".into(),
                kind: scenario::runtime::ErrorKind::Empty
            },
            TraceEvent::AfterStep {
                step: "check".into()
            },
            TraceEvent::After {
                iteration: 1,
                failed: true
            },
        ]
    );
    assert_eq!(harness.trace.actions_for("open"), vec!["navigate", "click"]);
}

#[tokio::test]
async fn test_assertion_failures_are_reported_as_assertions() {
    let harness = Harness::new();
    let mut engine = harness.enqueued(Script::default().step(Step::new("total", |ctx| async move {
        let total = ctx.data.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
        scenario::runtime::ensure(total == 3, "cart total mismatch")
    })));

    assert!(engine.run(Some(1)).await.is_err());
    assert!(harness
        .reporter
        .lines()
        .contains(&"assertion: AssertionError: cart total mismatch".to_string()));
}

#[tokio::test]
async fn test_gating_across_iterations() {
    let harness = Harness::new();
    let mut runner = Runner::new(harness.engine());

    let report = runner
        .run(
            Script::new(loops(2))
                .step(pass("skipped").skip())
                .step(pass("pending").pending())
                .step(pass("first-only").once())
                .step(pass("silent").predicate(Predicate::constant(false)))
                .step(
                    pass("unless").condition(scenario::runtime::Condition::Unless(
                        Predicate::constant(true),
                    )),
                )
                .step(pass("plain")),
        )
        .await
        .unwrap();

    assert!(report.passed());
    assert_eq!(
        report.outcomes[0].summary,
        vec![
            SummaryStep::new("skipped", StepResult::Skipped),
            SummaryStep::new("pending", StepResult::Unexecuted),
            SummaryStep::new("first-only", StepResult::Passed),
            SummaryStep::new("unless", StepResult::Skipped),
            SummaryStep::new("plain", StepResult::Passed),
        ]
    );
    assert_eq!(
        report.outcomes[1].summary,
        vec![
            SummaryStep::new("skipped", StepResult::Skipped),
            SummaryStep::new("pending", StepResult::Unexecuted),
            SummaryStep::new("first-only", StepResult::Unexecuted),
            SummaryStep::new("unless", StepResult::Skipped),
            SummaryStep::new("plain", StepResult::Passed),
        ]
    );
}

#[tokio::test]
async fn test_data_is_fed_per_iteration_until_exhausted() {
    let harness = Harness::new();
    let users = Arc::new(Mutex::new(Vec::new()));
    let seen = users.clone();

    let script = Script::new(loops(3))
        .step(Step::new("login", move |ctx| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(ctx.data["user"].clone());
                Ok(())
            }
        }))
        .data(TestData::from_records(vec![
            json!({ "user": "alice" }),
            json!({ "user": "bob" }),
        ]));

    let report = Runner::new(harness.engine()).run(script).await.unwrap();
    assert_eq!(report.iterations, 3);
    assert_eq!(*users.lock().unwrap(), vec![json!("alice"), json!("bob")]);

    let last = &report.outcomes[2];
    assert!(!last.passed);
    assert_eq!(last.code, Some("DATA_EXHAUSTED"));
    assert_eq!(last.summary, vec![SummaryStep::new("login", StepResult::Unexecuted)]);
}

#[tokio::test]
async fn test_directives_applied_in_fixed_order() {
    let harness = Harness::new();
    let mut headers = BTreeMap::new();
    headers.insert("x-env".to_string(), "staging".to_string());

    let mut engine = harness.enqueued(
        Script::new(TestSettings {
            extra_headers: Some(headers),
            disable_cache: Some(true),
            user_agent: Some("bot".to_string()),
            device: Some("pixel".to_string()),
            clear_cookies: Some(true),
            clear_cache: Some(true),
            ..Default::default()
        })
        .step(pass("A")),
    );
    engine.run(Some(1)).await.unwrap();

    assert_eq!(
        harness.target.directives(),
        vec![
            "clear_cache",
            "clear_cookies",
            "device pixel",
            "user_agent bot",
            "cache_disabled true",
            "headers 1",
        ]
    );
}

#[tokio::test]
async fn test_unconfigured_directives_are_not_applied() {
    let harness = Harness::new();
    let mut engine = harness.enqueued(Script::default().step(pass("A")));
    engine.run(Some(1)).await.unwrap();
    assert!(harness.target.directives().is_empty());
}

#[tokio::test]
async fn test_after_all_failure_fails_clean_iteration() {
    let harness = Harness::new();
    let mut engine = harness.enqueued(Script::default().step(pass("A")).hook(
        HookPhase::AfterAll,
        Hook::new(Duration::from_secs(1), |_| async {
            anyhow::bail!("teardown failed")
        }),
    ));

    let err = engine.run(Some(1)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Hook {
            phase: HookPhase::AfterAll,
            ..
        }
    ));
    assert!(engine.failed());
    assert_eq!(rows(&engine), vec![row("A", StepResult::Passed)]);
}

#[tokio::test(start_paused = true)]
async fn test_step_delay_between_steps() {
    let harness = Harness::new();
    let mut engine = harness.enqueued(
        Script::new(TestSettings {
            step_delay_secs: Some(2.0),
            ..Default::default()
        })
        .step(pass("A"))
        .step(pass("B")),
    );

    let started = tokio::time::Instant::now();
    engine.run(Some(1)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_duration_bounds_unbounded_run() {
    let harness = Harness::new();
    let script = Script::new(TestSettings {
        loop_count: Some(0),
        duration_secs: Some(3.0),
        ..Default::default()
    })
    .step(Step::new("wait", |_| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(())
    }));

    let report = Runner::new(harness.engine()).run(script).await.unwrap();
    assert_eq!(report.iterations, 3);
    assert!(report.passed());
}

#[tokio::test(start_paused = true)]
async fn test_runner_handle_cancels_unbounded_run() {
    let harness = Harness::new();
    let script = Script::new(loops(0)).step(Step::new("wait", |_| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(())
    }));

    let mut runner = Runner::new(harness.engine());
    let handle = runner.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.cancel();
    });

    let report = runner.run(script).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.outcomes[2].code, Some("CANCELLED"));
    assert!(report.outcomes[..2].iter().all(|o| o.passed));
}
