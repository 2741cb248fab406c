//! Orchestrator behavior against scripted collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use warden_engine::config::{ApprovalConfig, WardenConfig};
use warden_engine::{
    ApprovalDecision, Approver, ApprovalFut, ConfirmationRequest, EngineError, EventSink,
    FixedApprover, ModelClient, ModelError, ModelFut, ModelTurn, RepairRequest, ToolEvent,
    ToolEventKind, ToolOrchestrator, TurnCancellation, TurnOutcome, TurnPhase, TurnRequest,
    bootstrap, build_settings,
};
use warden_tools::config::DynamicToolConfig;
use warden_tools::{ApprovalMode, ToolCtx, ToolError, ToolExecutor, ToolFut, ToolRegistry};
use warden_types::{InteractionClass, Message, ToolCall, ToolOutput, ToolResult, ToolStatus};

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Default)]
struct ScriptedModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    repairs: Mutex<VecDeque<Result<String, ModelError>>>,
    /// Returned on every completion when set.
    looping: Option<ModelTurn>,
    completions: AtomicUsize,
    repair_requests: Mutex<Vec<RepairRequest>>,
}

impl ScriptedModel {
    fn with_turns(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Self::default()
        }
    }

    fn with_repairs(repairs: Vec<Result<String, ModelError>>) -> Self {
        Self {
            repairs: Mutex::new(repairs.into()),
            ..Self::default()
        }
    }

    fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    fn repair_count(&self) -> usize {
        self.repair_requests.lock().unwrap().len()
    }
}

impl ModelClient for ScriptedModel {
    fn complete<'a>(
        &'a self,
        _request: TurnRequest,
        _deltas: mpsc::Sender<String>,
        _cancel: CancellationToken,
    ) -> ModelFut<'a, ModelTurn> {
        Box::pin(async move {
            self.completions.fetch_add(1, Ordering::SeqCst);
            if let Some(turn) = &self.looping {
                return Ok(turn.clone());
            }
            let next = self.turns.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| text_turn("done")))
        })
    }

    fn repair_arguments<'a>(
        &'a self,
        request: RepairRequest,
        _cancel: CancellationToken,
    ) -> ModelFut<'a, String> {
        Box::pin(async move {
            self.repair_requests.lock().unwrap().push(request);
            self.repairs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Request("no repair scripted".into())))
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ToolEvent>>,
}

impl RecordingSink {
    fn for_call(&self, id: &str) -> Vec<ToolEventKind> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.tool_call_id == id)
            .map(|e| e.kind.clone())
            .collect()
    }

    /// Init first, exactly one terminal event, and it comes last.
    fn assert_lifecycle(&self, id: &str) {
        let events = self.for_call(id);
        assert!(
            matches!(events.first(), Some(ToolEventKind::Init { .. })),
            "{id}: {events:?}"
        );
        let terminals = events
            .iter()
            .filter(|k| matches!(k, ToolEventKind::Completion { .. } | ToolEventKind::Error { .. }))
            .count();
        assert_eq!(terminals, 1, "{id}: {events:?}");
        assert!(
            matches!(
                events.last(),
                Some(ToolEventKind::Completion { .. } | ToolEventKind::Error { .. })
            ),
            "{id}: {events:?}"
        );
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ToolEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
struct RecordingApprover {
    requests: Mutex<Vec<ConfirmationRequest>>,
}

impl Approver for RecordingApprover {
    fn confirm<'a>(&'a self, request: ConfirmationRequest) -> ApprovalFut<'a> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            ApprovalDecision::Approve
        })
    }
}

// ============================================================================
// Test tools
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Copy)]
enum Behavior {
    Echo,
    Sleep,
    Panic,
    Progress,
}

struct TestTool {
    name: &'static str,
    class: InteractionClass,
    behavior: Behavior,
    timeout: Option<Duration>,
    log: Log,
}

impl TestTool {
    fn new(name: &'static str, class: InteractionClass, behavior: Behavior, log: &Log) -> Self {
        Self {
            name,
            class,
            behavior,
            timeout: None,
            log: Arc::clone(log),
        }
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl ToolExecutor for TestTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn schema(&self) -> Value {
        match self.behavior {
            Behavior::Sleep => json!({
                "type": "object",
                "properties": { "ms": { "type": "integer" } },
                "required": ["ms"]
            }),
            _ => json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }

    fn interaction_class(&self) -> InteractionClass {
        self.class
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        Ok(format!("{} {args}", self.name))
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            match self.behavior {
                Behavior::Echo => {
                    let text = args["text"].as_str().unwrap_or_default().to_string();
                    self.record(format!("start:{text}"));
                    tokio::task::yield_now().await;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    self.record(format!("end:{text}"));
                    Ok(ToolOutput::Text(text))
                }
                Behavior::Sleep => {
                    let ms = args["ms"].as_u64().unwrap_or_default();
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    self.record(format!("slept:{ms}"));
                    Ok(ToolOutput::Text(format!("slept {ms}ms")))
                }
                Behavior::Panic => panic!("kaboom"),
                Behavior::Progress => {
                    ctx.progress().send("chunk one", None);
                    ctx.progress().send("chunk two", Some("stdout"));
                    Ok(ToolOutput::Json(json!({"ok": true})))
                }
            }
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    _dir: tempfile::TempDir,
    log: Log,
    sink: Arc<RecordingSink>,
    orchestrator: ToolOrchestrator,
}

fn harness_with(approver: Arc<dyn Approver>, extra: impl FnOnce(&mut ToolRegistry, &Log)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = build_settings(&WardenConfig::default(), dir.path()).unwrap();
    let log: Log = Arc::default();

    let mut registry = ToolRegistry::new(ApprovalMode::Permissive);
    for (name, class, behavior) in [
        ("Echo", InteractionClass::ReadOnly, Behavior::Echo),
        ("Touch", InteractionClass::Mutating, Behavior::Echo),
        ("Confirm", InteractionClass::Interactive, Behavior::Echo),
        ("Sleep", InteractionClass::ReadOnly, Behavior::Sleep),
        ("Explode", InteractionClass::ReadOnly, Behavior::Panic),
        ("Stream", InteractionClass::ReadOnly, Behavior::Progress),
    ] {
        registry
            .register(Box::new(TestTool::new(name, class, behavior, &log)))
            .unwrap();
    }
    extra(&mut registry, &log);

    let sink = Arc::new(RecordingSink::default());
    let orchestrator = ToolOrchestrator::new(
        Arc::new(registry),
        settings,
        Arc::clone(&sink) as Arc<dyn EventSink>,
        approver,
    );
    Harness {
        _dir: dir,
        log,
        sink,
        orchestrator,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(RecordingApprover::default()), |_, _| {})
}

fn echo(id: &str, text: &str) -> ToolCall {
    ToolCall::new(id, "Echo", &json!({ "text": text }))
}

fn text_turn(text: &str) -> ModelTurn {
    ModelTurn {
        text: text.to_string(),
        tool_calls: Vec::new(),
    }
}

fn tool_turn(calls: Vec<ToolCall>) -> ModelTurn {
    ModelTurn {
        text: String::new(),
        tool_calls: calls,
    }
}

fn position(log: &Log, entry: &str) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("missing log entry {entry}"))
}

fn deltas() -> mpsc::Sender<String> {
    mpsc::channel(16).0
}

fn tool_results(conversation: &[Message]) -> Vec<&ToolResult> {
    conversation.iter().filter_map(Message::tool_result).collect()
}

// ============================================================================
// Turn loop
// ============================================================================

#[tokio::test]
async fn turn_without_tool_calls_completes() {
    let mut h = harness();
    let model = ScriptedModel::with_turns(vec![text_turn("hello")]);
    let mut conversation = vec![Message::user("hi")];

    let outcome = h
        .orchestrator
        .run_turn(&mut conversation, &model, deltas(), &TurnCancellation::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: "hello".into(),
            iterations: 0
        }
    );
    assert_eq!(conversation.len(), 2);
    assert_eq!(h.orchestrator.phase(), TurnPhase::Idle);
}

#[tokio::test]
async fn tool_results_feed_the_next_completion() {
    let mut h = harness();
    let model = ScriptedModel::with_turns(vec![
        tool_turn(vec![echo("c1", "one")]),
        tool_turn(vec![echo("c2", "two")]),
        text_turn("finished"),
    ]);
    let mut conversation = vec![Message::user("go")];

    let outcome = h
        .orchestrator
        .run_turn(&mut conversation, &model, deltas(), &TurnCancellation::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: "finished".into(),
            iterations: 2
        }
    );
    assert_eq!(model.completions(), 3);
    let results = tool_results(&conversation);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].output, ToolOutput::Text("one".into()));
    assert_eq!(results[1].output, ToolOutput::Text("two".into()));
}

#[tokio::test]
async fn iteration_limit_stops_runaway_loops() {
    let mut h = harness();
    h.orchestrator = h.orchestrator.with_max_iterations(2);
    let model = ScriptedModel {
        looping: Some(tool_turn(vec![echo("loop", "again")])),
        ..ScriptedModel::default()
    };
    let mut conversation = vec![Message::user("go")];

    let err = h
        .orchestrator
        .run_turn(&mut conversation, &model, deltas(), &TurnCancellation::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::IterationLimit { limit: 2 }));
    assert_eq!(model.completions(), 3);
    let last = conversation.last().and_then(Message::tool_result).unwrap();
    assert_eq!(last.status, ToolStatus::Error);
    assert!(last.output.to_text().contains("iteration limit"));
}

#[tokio::test]
async fn model_failure_ends_the_turn() {
    struct Failing;
    impl ModelClient for Failing {
        fn complete<'a>(
            &'a self,
            _request: TurnRequest,
            _deltas: mpsc::Sender<String>,
            _cancel: CancellationToken,
        ) -> ModelFut<'a, ModelTurn> {
            Box::pin(async { Err(ModelError::Request("503".into())) })
        }

        fn repair_arguments<'a>(
            &'a self,
            _request: RepairRequest,
            _cancel: CancellationToken,
        ) -> ModelFut<'a, String> {
            Box::pin(async { Err(ModelError::Request("503".into())) })
        }
    }

    let mut h = harness();
    let mut conversation = vec![Message::user("go")];
    let err = h
        .orchestrator
        .run_turn(&mut conversation, &Failing, deltas(), &TurnCancellation::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Model(ModelError::Request(_))));
    assert_eq!(conversation.len(), 1);
}

// ============================================================================
// Dispatch planning
// ============================================================================

#[tokio::test]
async fn concurrent_wave_keeps_request_order() {
    let mut h = harness();
    let calls = vec![
        ToolCall::new("slow", "Sleep", &json!({"ms": 300})),
        ToolCall::new("fast", "Sleep", &json!({"ms": 10})),
        echo("echo", "x"),
    ];

    let results = h
        .orchestrator
        .dispatch(&calls, None, &TurnCancellation::new())
        .await;

    let ids: Vec<&str> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
    assert_eq!(ids, vec!["slow", "fast", "echo"]);
    assert!(results.iter().all(|r| r.status == ToolStatus::Ok));
    // Both sleeps ran in the same wave.
    assert!(position(&h.log, "slept:10") < position(&h.log, "slept:300"));
}

#[tokio::test]
async fn interactive_calls_run_alone_after_confirmation() {
    let approver = Arc::new(RecordingApprover::default());
    let mut h = harness_with(Arc::clone(&approver) as Arc<dyn Approver>, |_, _| {});
    let calls = vec![
        echo("a", "a"),
        ToolCall::new("c", "Touch", &json!({"text": "t"})),
        ToolCall::new("confirm", "Confirm", &json!({"text": "c"})),
        echo("b", "b"),
    ];

    let results = h
        .orchestrator
        .dispatch(&calls, None, &TurnCancellation::new())
        .await;
    assert!(results.iter().all(|r| r.status == ToolStatus::Ok));

    assert!(position(&h.log, "end:a") < position(&h.log, "start:c"));
    assert!(position(&h.log, "end:t") < position(&h.log, "start:c"));
    assert!(position(&h.log, "end:c") < position(&h.log, "start:b"));

    let requests = approver.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tool_name, "Confirm");
    assert_eq!(requests[0].arguments, json!({"text": "c"}));
}

#[tokio::test]
async fn denied_call_is_blocked_and_never_runs() {
    let mut h = harness_with(Arc::new(FixedApprover(ApprovalDecision::Deny)), |_, _| {});
    let calls = vec![ToolCall::new("confirm", "Confirm", &json!({"text": "c"})), echo("after", "after")];

    let results = h
        .orchestrator
        .dispatch(&calls, None, &TurnCancellation::new())
        .await;

    assert_eq!(results[0].status, ToolStatus::Blocked);
    assert!(results[0].output.to_text().contains("User denied"));
    assert_eq!(results[1].status, ToolStatus::Ok);
    assert!(!h.log.lock().unwrap().iter().any(|e| e == "start:c"));
    h.sink.assert_lifecycle("confirm");
    assert!(matches!(
        h.sink.for_call("confirm").last(),
        Some(ToolEventKind::Error {
            status: ToolStatus::Blocked,
            ..
        })
    ));
}

// ============================================================================
// Validation and repair
// ============================================================================

#[tokio::test]
async fn unknown_tool_is_not_repaired() {
    let mut h = harness();
    let model = ScriptedModel::with_repairs(vec![Ok("{}".into())]);
    let calls = vec![ToolCall::from_raw("x", "Nope", "{not json")];

    let results = h
        .orchestrator
        .dispatch(&calls, Some(&model as &dyn ModelClient), &TurnCancellation::new())
        .await;

    assert_eq!(results[0].status, ToolStatus::Error);
    assert_eq!(results[0].output.to_text(), "Unknown tool: Nope");
    assert_eq!(model.repair_count(), 0);
    h.sink.assert_lifecycle("x");
}

#[tokio::test]
async fn malformed_arguments_get_one_repair() {
    let mut h = harness();
    let model = ScriptedModel::with_repairs(vec![Ok(r#"{"text": "fixed"}"#.into())]);
    let calls = vec![ToolCall::from_raw("r1", "Echo", r#"{"text": "unterminated"#)];

    let results = h
        .orchestrator
        .dispatch(&calls, Some(&model as &dyn ModelClient), &TurnCancellation::new())
        .await;

    assert_eq!(results[0].status, ToolStatus::Ok);
    assert_eq!(results[0].output, ToolOutput::Text("fixed".into()));
    let requests = model.repair_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].call.id, "r1");
    assert_eq!(requests[0].schema["required"], json!(["text"]));
    assert!(requests[0].error.contains("not valid JSON"));
}

#[tokio::test]
async fn second_invalid_arguments_are_a_hard_error() {
    let mut h = harness();
    let model = ScriptedModel::with_repairs(vec![Ok(r#"{"text": 5}"#.into()), Ok(r#"{"text": "late"}"#.into())]);
    let calls = vec![ToolCall::new("r1", "Echo", &json!({}))];

    let results = h
        .orchestrator
        .dispatch(&calls, Some(&model as &dyn ModelClient), &TurnCancellation::new())
        .await;

    assert_eq!(results[0].status, ToolStatus::Error);
    assert!(results[0].output.to_text().contains("still invalid after repair"));
    assert_eq!(model.repair_count(), 1);
    assert!(h.log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_arguments_without_a_model_fail() {
    let mut h = harness();
    let calls = vec![ToolCall::from_raw("r1", "Echo", "[1, 2]")];

    let results = h
        .orchestrator
        .dispatch(&calls, None, &TurnCancellation::new())
        .await;

    assert_eq!(results[0].status, ToolStatus::Error);
    assert!(results[0].output.to_text().starts_with("Bad args:"));
}

// ============================================================================
// Failure containment
// ============================================================================

#[tokio::test]
async fn timeout_is_per_call() {
    let mut h = harness_with(Arc::new(RecordingApprover::default()), |registry, log| {
        let mut slow = TestTool::new("Slow", InteractionClass::ReadOnly, Behavior::Sleep, log);
        slow.timeout = Some(Duration::from_millis(50));
        registry.register(Box::new(slow)).unwrap();
    });
    let calls = vec![ToolCall::new("slow", "Slow", &json!({"ms": 5_000})), echo("sibling", "ok")];

    let results = h
        .orchestrator
        .dispatch(&calls, None, &TurnCancellation::new())
        .await;

    assert_eq!(results[0].status, ToolStatus::Timeout);
    assert_eq!(results[1].status, ToolStatus::Ok);
    h.sink.assert_lifecycle("slow");
    h.sink.assert_lifecycle("sibling");
}

#[tokio::test]
async fn panicking_tool_becomes_an_error_result() {
    let mut h = harness();
    let calls = vec![
        ToolCall::new("boom", "Explode", &json!({"text": "x"})),
        echo("fine", "fine"),
    ];

    let results = h
        .orchestrator
        .dispatch(&calls, None, &TurnCancellation::new())
        .await;

    assert_eq!(results[0].status, ToolStatus::Error);
    assert_eq!(results[0].output.to_text(), "Tool panicked: kaboom");
    assert_eq!(results[1].status, ToolStatus::Ok);
}

#[tokio::test]
async fn progress_updates_arrive_between_init_and_completion() {
    let mut h = harness();
    let calls = vec![ToolCall::new("s", "Stream", &json!({"text": "x"}))];

    let results = h
        .orchestrator
        .dispatch(&calls, None, &TurnCancellation::new())
        .await;
    assert_eq!(results[0].output, ToolOutput::Json(json!({"ok": true})));

    let events = h.sink.for_call("s");
    assert_eq!(events.len(), 4, "{events:?}");
    assert!(matches!(&events[1], ToolEventKind::Update { text, .. } if text == "chunk one"));
    assert!(matches!(
        &events[2],
        ToolEventKind::Update { detail: Some(detail), .. } if detail == "stdout"
    ));
    h.sink.assert_lifecycle("s");
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancellation_aborts_in_flight_and_pending_calls() {
    let mut h = harness();
    let cancel = TurnCancellation::new();
    let calls = vec![
        ToolCall::new("long", "Sleep", &json!({"ms": 10_000})),
        ToolCall::new("confirm", "Confirm", &json!({"text": "c"})),
        echo("later", "later"),
    ];

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let results = h.orchestrator.dispatch(&calls, None, &cancel).await;

    assert!(results.iter().all(|r| r.status == ToolStatus::Aborted), "{results:?}");
    for id in ["long", "confirm", "later"] {
        h.sink.assert_lifecycle(id);
    }
    assert!(h.log.lock().unwrap().is_empty());
    assert_eq!(h.orchestrator.phase(), TurnPhase::Cancelled);
}

#[tokio::test]
async fn cancelled_turn_does_not_return_to_the_model() {
    let mut h = harness();
    let cancel = TurnCancellation::new();
    let model = ScriptedModel::with_turns(vec![
        tool_turn(vec![ToolCall::new("long", "Sleep", &json!({"ms": 10_000}))]),
        text_turn("should not be reached"),
    ]);
    let mut conversation = vec![Message::user("go")];

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
        canceller.cancel();
    });
    let outcome = h
        .orchestrator
        .run_turn(&mut conversation, &model, deltas(), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert_eq!(model.completions(), 1);
    let results = tool_results(&conversation);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ToolStatus::Aborted);
    h.sink.assert_lifecycle("long");
}

// ============================================================================
// Built-in tools end to end
// ============================================================================

#[tokio::test]
async fn builtins_through_the_turn_loop() {
    let dir = tempfile::tempdir().unwrap();
    let config = WardenConfig {
        approval: Some(ApprovalConfig {
            mode: Some("permissive".into()),
        }),
        dynamic: Some(DynamicToolConfig {
            enabled: false,
            ..DynamicToolConfig::default()
        }),
        ..WardenConfig::default()
    };
    let session = bootstrap(&config, dir.path()).await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let mut orchestrator = ToolOrchestrator::new(
        Arc::clone(&session.registry),
        session.settings.clone(),
        Arc::clone(&sink) as Arc<dyn EventSink>,
        Arc::new(FixedApprover(ApprovalDecision::Deny)),
    );

    let model = ScriptedModel::with_turns(vec![
        tool_turn(vec![ToolCall::new(
            "w",
            "Write",
            &json!({"path": "notes/a.txt", "content": "hello warden\n"}),
        )]),
        tool_turn(vec![
            ToolCall::new("r", "Read", &json!({"path": "notes/a.txt"})),
            ToolCall::new("rm", "Run", &json!({"command": "rm -rf ./"})),
            ToolCall::new("ssh", "Read", &json!({"path": "~/.ssh/id_rsa"})),
        ]),
        text_turn("done"),
    ]);
    let mut conversation = vec![Message::user("go")];
    orchestrator
        .run_turn(&mut conversation, &model, deltas(), &TurnCancellation::new())
        .await
        .unwrap();

    let results = tool_results(&conversation);
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].status, ToolStatus::Ok, "{:?}", results[0]);
    assert!(dir.path().join("notes/a.txt").exists());
    assert_eq!(results[1].status, ToolStatus::Ok);
    assert!(results[1].output.to_text().contains("hello warden"));
    assert_eq!(results[2].status, ToolStatus::Blocked);
    assert!(results[2].output.to_text().contains("Command blocked"));
    assert_eq!(results[3].status, ToolStatus::Blocked);
    for id in ["w", "r", "rm", "ssh"] {
        sink.assert_lifecycle(id);
    }
}
