//! End-to-end scheduler scenarios against mock collaborators: burst
//! bundling, busy pending-drain, format retry, cancellation, intervention
//! scoping, delayed jobs, and recovery give-up.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sentra_domain::config::{Config, ConfigHandle};
use sentra_domain::{IncomingMessage, MessageKind};
use sentra_llm::MockLlm;
use sentra_mcp::MockExecutor;
use sentra_protocol::AdapterFrame;
use sentra_runtime::bundler::MessageBundler;
use sentra_runtime::emo::NullEmo;
use sentra_runtime::gate::{ActiveTaskRegistry, DefaultReplyPolicy};
use sentra_runtime::overlays::OverlayStore;
use sentra_runtime::runs::RunRegistry;
use sentra_runtime::transport::MockPort;
use sentra_runtime::{delay_worker, handlers, intervention, recovery, turn, AppState};
use sentra_stores::{
    ContextMemoryStore, DelayQueue, DelayedJob, HistoryStore, MessageCache, PersonaStore,
    RecoveryJournal, TaskRecoveryRecord,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    state: AppState,
    llm: Arc<MockLlm>,
    mcp: Arc<MockExecutor>,
    port: Arc<MockPort>,
    shutdown: CancellationToken,
    _tmp: tempfile::TempDir,
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn harness_with(tune: impl FnOnce(&mut Config)) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let mut cfg = Config::default();
    cfg.bundler.window_ms = 120;
    cfg.bundler.max_ms = 500;
    cfg.llm.max_response_retries = 2;
    cfg.persona.enabled = false;
    tune(&mut cfg);
    let config = ConfigHandle::new(cfg);

    let llm = Arc::new(MockLlm::new());
    let mcp = MockExecutor::new();
    let port = MockPort::new();

    let state = AppState {
        config,
        llm: llm.clone(),
        mcp: mcp.clone(),
        port: port.clone(),
        emo: Arc::new(NullEmo),
        history: Arc::new(HistoryStore::new(&root.join("history")).unwrap()),
        personas: Arc::new(PersonaStore::new(&root.join("personas")).unwrap()),
        message_cache: Arc::new(MessageCache::new(&root.join("messageCache")).unwrap()),
        delay_queue: Arc::new(DelayQueue::new(&root.join("delayQueue")).unwrap()),
        journal: Arc::new(RecoveryJournal::new(&root.join("taskData")).unwrap()),
        context_memory: Arc::new(ContextMemoryStore::new(&root.join("contextMemory")).unwrap()),
        overlays: Arc::new(OverlayStore::new(&root.join("overlays")).unwrap()),
        tasks: Arc::new(ActiveTaskRegistry::new()),
        runs: Arc::new(RunRegistry::new()),
        bundler: Arc::new(MessageBundler::new()),
        policy: Arc::new(DefaultReplyPolicy),
    };

    Harness { state, llm, mcp, port, shutdown: CancellationToken::new(), _tmp: tmp }
}

fn private_msg(sender: &str, id: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        kind: MessageKind::Private,
        sender_id: sender.into(),
        sender_name: Some(sender.into()),
        group_id: None,
        message_id: id.into(),
        text: text.into(),
        summary: None,
        at_users: vec![],
        reply_to_bot: false,
        time_str: "2024-06-15 10:00:00".into(),
        proactive: false,
        recovery_attempt: None,
        disable_pre_reply: false,
        root_directive_xml: None,
    }
}

fn group_msg(sender: &str, gid: &str, id: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        kind: MessageKind::Group,
        group_id: Some(gid.into()),
        ..private_msg(sender, id, text)
    }
}

async fn deliver_message(h: &Harness, msg: IncomingMessage) {
    handlers::handle_frame(&h.state, AdapterFrame::Message { data: msg }, &h.shutdown).await;
}

fn wrapped(text: &str) -> String {
    format!("<sentra-response>{text}</sentra-response>")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Burst bundling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn burst_coalesces_into_one_turn() {
    let h = harness();
    h.mcp.push_judge_no("r1");
    h.llm.push_ok(wrapped("哈喽"));

    deliver_message(&h, private_msg("u1", "m1", "你")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    deliver_message(&h, private_msg("u1", "m2", "好")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    deliver_message(&h, private_msg("u1", "m3", "啊")).await;

    // The window closes once the burst goes quiet.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let inputs = h.mcp.run_inputs();
    assert_eq!(inputs.len(), 1, "exactly one turn for the whole burst");
    assert!(
        inputs[0].objective.contains("你\n好\n啊"),
        "synthesized text joins the burst: {}",
        inputs[0].objective
    );
    assert_eq!(h.port.sent_texts(), vec!["哈喽".to_string()]);
}

#[tokio::test]
async fn duplicate_message_ids_bundle_once() {
    let h = harness();
    h.mcp.push_judge_no("r1");
    h.llm.push_ok(wrapped("ok"));

    deliver_message(&h, private_msg("u1", "m1", "hello")).await;
    deliver_message(&h, private_msg("u1", "m1", "hello")).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let inputs = h.mcp.run_inputs();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].objective.matches("hello").count(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Busy pending-drain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn messages_during_active_task_drain_into_one_follow_up_turn() {
    let h = harness();
    // First run is slow enough that A and B arrive mid-task.
    h.mcp.set_event_delay_ms(120);
    h.mcp.push_judge_no("r1");
    h.mcp.push_judge_no("r2");
    h.llm.push_ok(wrapped("first"));
    h.llm.push_ok(wrapped("second"));

    // Start the first turn directly (bypassing the bundle window).
    turn::dispatch_bundle(h.state.clone(), private_msg("u1", "m1", "start")).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.state.tasks.has_task_for_sender("u1"));

    deliver_message(&h, private_msg("u1", "m2", "A")).await;
    deliver_message(&h, private_msg("u1", "m3", "B")).await;
    assert_eq!(h.state.tasks.pending_count("u1"), 2);

    // Let the first turn finish and the drained bundle chain.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let inputs = h.mcp.run_inputs();
    assert_eq!(inputs.len(), 2, "exactly one follow-up turn");
    assert!(inputs[1].objective.contains("A\nB"));
    assert_eq!(h.state.tasks.pending_count("u1"), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool rounds & quoting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tool_rounds_reply_per_round_and_quote_only_first() {
    let h = harness();
    h.mcp.push_tool_rounds("r1", 2);
    h.llm.push_ok(wrapped("round one"));
    h.llm.push_ok(wrapped("round two"));

    let outcome =
        turn::run_admitted(h.state.clone(), private_msg("u1", "m1", "do the thing")).await;
    assert_eq!(outcome, turn::TurnOutcome::Completed);

    assert_eq!(
        h.port.sent_texts(),
        vec!["round one".to_string(), "round two".to_string()]
    );
    let quotes = h.port.sent_quotes();
    assert_eq!(quotes[0].as_deref(), Some("m1"), "first reply quotes the message");
    assert_eq!(quotes[1], None, "later replies don't quote");

    // Exactly one pair, holding both rounds.
    let key = sentra_domain::ConversationKey::user("u1");
    let pairs = h.state.history.recent_pairs(&key, 10).unwrap();
    assert_eq!(pairs.len(), 1);
    assert!(pairs[0].assistant_xml.contains("round one"));
    assert!(pairs[0].assistant_xml.contains("round two"));
    assert!(pairs[0].saved_at.is_some());
}

#[tokio::test]
async fn slot_frees_after_turn_completes() {
    let h = harness();
    h.mcp.push_judge_no("r1");
    h.mcp.push_judge_no("r2");
    h.llm.push_ok(wrapped("a"));
    h.llm.push_ok(wrapped("b"));

    let msg = private_msg("u1", "m1", "one");
    assert_eq!(turn::run_admitted(h.state.clone(), msg).await, turn::TurnOutcome::Completed);
    assert_eq!(h.state.tasks.active_task_count("private_u1"), 0);

    let msg2 = private_msg("u1", "m2", "two");
    assert_eq!(turn::run_admitted(h.state.clone(), msg2).await, turn::TurnOutcome::Completed);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Format retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn malformed_responses_retry_then_send_once() {
    let h = harness();
    h.mcp.push_judge_no("r1");
    h.llm.push_ok("no tag at all");
    h.llm.push_ok("still bare");
    h.llm.push_ok(wrapped("third time lucky"));

    let outcome = turn::run_admitted(h.state.clone(), private_msg("u1", "m1", "hi")).await;
    assert_eq!(outcome, turn::TurnOutcome::Completed);
    assert_eq!(h.llm.call_count(), 3, "two retries means three calls");
    assert_eq!(h.port.sent_texts(), vec!["third time lucky".to_string()]);
}

#[tokio::test]
async fn exhausted_retries_cancel_the_pair_and_send_nothing() {
    let h = harness();
    h.mcp.push_judge_no("r1");
    h.llm.push_ok("bad 1");
    h.llm.push_ok("bad 2");
    h.llm.push_ok("bad 3");

    let outcome = turn::run_admitted(h.state.clone(), private_msg("u1", "m1", "hi")).await;
    assert!(matches!(outcome, turn::TurnOutcome::Failed(_)));
    assert!(h.port.sent_texts().is_empty());

    let key = sentra_domain::ConversationKey::user("u1");
    assert_eq!(h.state.history.pair_count(&key).unwrap(), 0, "nothing persisted");
    // The slot is released even on failure.
    assert_eq!(h.state.tasks.active_task_count("private_u1"), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cancelled_mid_run_sends_nothing_and_saves_nothing() {
    let h = harness();
    h.mcp.set_event_delay_ms(100);
    h.mcp.push_tool_rounds("r1", 2);
    h.llm.push_ok(wrapped("should never go out"));

    let state = h.state.clone();
    let task = tokio::spawn(async move {
        turn::run_admitted(state, private_msg("u1", "m1", "long job")).await
    });

    // Cancel while the run is still streaming.
    tokio::time::sleep(Duration::from_millis(30)).await;
    h.state.tasks.mark_tasks_cancelled_for_sender("u1");

    let outcome = task.await.unwrap();
    assert_eq!(outcome, turn::TurnOutcome::Cancelled);
    assert!(h.port.sent_texts().is_empty());
    let key = sentra_domain::ConversationKey::user("u1");
    assert_eq!(h.state.history.pair_count(&key).unwrap(), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intervention scoping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn intervention_cancels_only_this_conversation_up_to_cutoff() {
    let h = harness();
    let group = sentra_domain::ConversationKey::group("g1");
    let private = sentra_domain::ConversationKey::user("u1");

    h.state.runs.track_at("u1", &group, "r-g1", 1_000);
    h.state.runs.track_at("u1", &group, "r-g1-new", 3_000);
    h.state.runs.track_at("u1", &private, "r-priv", 1_500);

    h.llm.push_ok(r#"{"overrideIntent": true, "cutoffTs": 2000}"#);
    let fired =
        intervention::handle_intervention(&h.state, &group_msg("u1", "g1", "m9", "算了别弄了"))
            .await;

    assert!(fired);
    assert_eq!(h.mcp.cancelled_runs(), vec!["r-g1".to_string()], "cutoff spares the newer run");
    assert_eq!(h.state.runs.run_count("u1", &group), 1);
    assert_eq!(h.state.runs.run_count("u1", &private), 1, "private chat untouched");
}

#[tokio::test]
async fn intervention_without_intent_cancels_nothing() {
    let h = harness();
    let group = sentra_domain::ConversationKey::group("g1");
    h.state.runs.track_at("u1", &group, "r1", 1_000);

    h.llm.push_ok(r#"{"overrideIntent": false, "cutoffTs": null}"#);
    let fired =
        intervention::handle_intervention(&h.state, &group_msg("u1", "g1", "m9", "算了吧"))
            .await;

    assert!(!fired);
    assert!(h.mcp.cancelled_runs().is_empty());
    assert_eq!(h.state.runs.run_count("u1", &group), 1);
}

#[tokio::test]
async fn plain_messages_skip_the_classifier() {
    let h = harness();
    let fired =
        intervention::handle_intervention(&h.state, &group_msg("u1", "g1", "m1", "今天天气如何"))
            .await;
    assert!(!fired);
    assert_eq!(h.llm.call_count(), 0, "no LLM call without a heuristic hit");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delayed jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn due_delayed_job_runs_through_the_pipeline() {
    let h = harness_with(|cfg| cfg.delay_queue.poll_interval_ms = 20);
    h.mcp.push_judge_no("r1");
    h.llm.push_ok(wrapped("记得带伞"));

    let payload = serde_json::to_value(delay_worker::DelayedAction {
        user_id: "u1".into(),
        group_id: None,
        prompt: "提醒用户明天下雨".into(),
    })
    .unwrap();
    h.state
        .delay_queue
        .push(DelayedJob::new(sentra_runtime::now_ms() - 10, payload))
        .unwrap();

    let worker = tokio::spawn(delay_worker::run(h.state.clone(), h.shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    h.shutdown.cancel();
    let _ = worker.await;

    let inputs = h.mcp.run_inputs();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].objective.contains("提醒用户明天下雨"));
    assert_eq!(h.port.sent_texts(), vec!["记得带伞".to_string()]);
    assert!(h.state.delay_queue.is_empty());
}

#[tokio::test]
async fn busy_target_defers_the_job() {
    let h = harness_with(|cfg| cfg.delay_queue.poll_interval_ms = 20);

    // Hold the sender's slot so the job can't dispatch.
    let held = h
        .state
        .tasks
        .try_begin_task(&private_msg("u1", "m0", "working"))
        .unwrap();

    let payload = serde_json::to_value(delay_worker::DelayedAction {
        user_id: "u1".into(),
        group_id: None,
        prompt: "follow up".into(),
    })
    .unwrap();
    h.state
        .delay_queue
        .push(DelayedJob::new(sentra_runtime::now_ms() - 10, payload))
        .unwrap();

    let worker = tokio::spawn(delay_worker::run(h.state.clone(), h.shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(h.mcp.stream_count(), 0, "job must not dispatch while busy");
    assert!(!h.state.delay_queue.is_empty(), "job is requeued, not dropped");

    h.shutdown.cancel();
    let _ = worker.await;
    h.state.tasks.complete_task("u1", &held);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn write_recovery_record(h: &Harness, task_id: &str, recovery_count: u32) -> std::path::PathBuf {
    let record = TaskRecoveryRecord {
        task_id: task_id.into(),
        summary: Some("整理资料发给用户".into()),
        reason: None,
        user_id: "u1".into(),
        group_id: None,
        is_complete: false,
        recovery_count,
        created_at: chrono::Utc::now(),
        expires_at: None,
        last_recovery_at: None,
        last_recovery_status: None,
        promises: vec![],
        tool_calls: vec![],
    };
    let path = h.state.journal.root().join(format!("{task_id}.json"));
    std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();
    path
}

#[tokio::test]
async fn successful_recovery_deletes_artifacts() {
    let h = harness();
    h.mcp.push_judge_no("r1");
    h.llm.push_ok(wrapped("资料好了,发你"));

    let path = write_recovery_record(&h, "t-ok", 0);
    let md = path.with_extension("md");
    std::fs::write(&md, "scratch").unwrap();

    recovery::scan_once(&h.state).await;

    assert!(!path.exists());
    assert!(!md.exists());
    assert_eq!(h.port.sent_texts().len(), 1);
    let inputs = h.mcp.run_inputs();
    assert!(inputs[0].objective.contains("整理资料发给用户"));
}

#[tokio::test]
async fn failed_recovery_at_cap_gives_up_and_deletes() {
    let h = harness_with(|cfg| cfg.recovery.max_failure_attempts = 2);
    h.mcp.set_fail_streams(true);

    let path = write_recovery_record(&h, "t-give-up", 1);
    let md = path.with_extension("md");
    std::fs::write(&md, "scratch").unwrap();

    recovery::scan_once(&h.state).await;

    assert!(!path.exists(), "record deleted after hitting the attempt cap");
    assert!(!md.exists(), "sibling scratchpad deleted too");
}

#[tokio::test]
async fn failed_recovery_below_cap_increments_counter() {
    let h = harness_with(|cfg| cfg.recovery.max_failure_attempts = 3);
    h.mcp.set_fail_streams(true);

    let path = write_recovery_record(&h, "t-retry", 0);
    recovery::scan_once(&h.state).await;

    assert!(path.exists());
    let reloaded: TaskRecoveryRecord =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(reloaded.recovery_count, 1);
    assert!(reloaded.last_recovery_status.is_some());
}

#[tokio::test]
async fn recovery_defers_while_user_is_busy() {
    let h = harness();
    let held = h
        .state
        .tasks
        .try_begin_task(&private_msg("u1", "m0", "busy"))
        .unwrap();
    let path = write_recovery_record(&h, "t-busy", 0);

    recovery::scan_once(&h.state).await;

    assert!(path.exists(), "record kept for the next scan");
    assert_eq!(h.mcp.stream_count(), 0);
    h.state.tasks.complete_task("u1", &held);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skipped messages still land in history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn gate_skip_records_history_without_a_turn() {
    // Group message with an unreachable threshold: never admitted.
    let h = harness_with(|cfg| {
        cfg.reply.base_threshold = 1.0;
        cfg.reply.private_always_reply = false;
    });

    turn::dispatch_bundle(h.state.clone(), group_msg("u1", "g1", "m1", "闲聊而已")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.mcp.stream_count(), 0);
    let key = sentra_domain::ConversationKey::group("g1");
    let pairs = h.state.history.recent_pairs(&key, 10).unwrap();
    assert_eq!(pairs.len(), 1);
    assert!(pairs[0].assistant_xml.is_empty());
}
