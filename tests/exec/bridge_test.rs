//! End-to-end tests for the bridge, using `sh` scripts as the child process.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::Duration;

use codex_bridge::exec::{Bridge, Event, ExecError, ExecOptions, ExecStream, SpawnError};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const TEST_TIMEOUT: Duration = Duration::from_secs(20);

fn sh(script: &str, cancel: CancellationToken) -> ExecStream {
    sh_with_env(script, BTreeMap::new(), cancel)
}

fn sh_with_env(
    script: &str,
    env: BTreeMap<String, String>,
    cancel: CancellationToken,
) -> ExecStream {
    Bridge::new("sh")
        .terminate_timeout(Duration::from_millis(200))
        .run_with_args(vec!["-c".to_string(), script.to_string()], env, cancel)
}

/// Drain a stream into its events and final error.
async fn drain<T>(mut stream: ExecStream<T>) -> (Vec<T>, Option<ExecError>)
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    let mut events = Vec::new();
    let mut error = None;
    let result = tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => events.push(event),
                Err(e) => {
                    assert!(error.is_none(), "more than one error surfaced");
                    error = Some(e);
                }
            }
        }
    })
    .await;
    assert!(result.is_ok(), "stream did not finish in time");
    (events, error)
}

fn types(events: &[Event]) -> Vec<&str> {
    events.iter().filter_map(Event::msg_type).collect()
}

#[tokio::test]
async fn clean_exit_with_no_events() {
    let (events, error) = drain(sh("exit 0", CancellationToken::new())).await;
    assert!(events.is_empty());
    assert!(error.is_none());
}

#[tokio::test]
async fn events_in_order_then_clean_end() {
    let script = r#"
        echo '{"id":"0","msg":{"type":"task_started"}}'
        echo '{"id":"0","msg":{"type":"agent_message","message":"hi"}}'
        echo '{"id":"0","msg":{"type":"task_complete"}}'
    "#;
    let (events, error) = drain(sh(script, CancellationToken::new())).await;
    assert!(error.is_none());
    assert_eq!(
        types(&events),
        vec!["task_started", "agent_message", "task_complete"]
    );
}

#[tokio::test]
async fn nonzero_exit_after_events() {
    let script = r#"
        echo '{"id":"0","msg":{"type":"task_started"}}'
        exit 2
    "#;
    let (events, error) = drain(sh(script, CancellationToken::new())).await;
    assert_eq!(types(&events), vec!["task_started"]);
    let error = error.expect("expected exit error");
    assert_eq!(error.exit_code(), Some(2));
}

#[tokio::test]
async fn trailing_line_without_newline() {
    let script = r#"printf '{"id":"0","msg":{"type":"task_complete"}}'"#;
    let (events, error) = drain(sh(script, CancellationToken::new())).await;
    assert!(error.is_none());
    assert_eq!(types(&events), vec!["task_complete"]);
}

#[tokio::test]
async fn trailing_line_survives_nonzero_exit() {
    let script = r#"printf '{"id":"0","msg":{"type":"error","message":"x"}}'; exit 1"#;
    let (events, error) = drain(sh(script, CancellationToken::new())).await;
    assert_eq!(types(&events), vec!["error"]);
    assert_eq!(error.unwrap().exit_code(), Some(1));
}

#[tokio::test]
async fn malformed_lines_are_skipped() {
    let script = r#"
        echo '{"a":1}'
        echo 'NOT-JSON'
        echo '{"b":2}'
    "#;
    let stream: ExecStream<Value> = Bridge::new("sh").run_with_args(
        vec!["-c".to_string(), script.to_string()],
        BTreeMap::new(),
        CancellationToken::new(),
    );
    let (records, error) = drain(stream).await;
    assert!(error.is_none());
    assert_eq!(records, vec![json!({"a": 1}), json!({"b": 2})]);
}

#[tokio::test]
async fn stderr_does_not_reach_the_stream() {
    let script = r#"
        echo 'warning: something' >&2
        echo '{"id":"0","msg":{"type":"task_started"}}'
        echo '{"id":"0","msg":{"type":"not json' >&2
    "#;
    let (events, error) = drain(sh(script, CancellationToken::new())).await;
    assert!(error.is_none());
    assert_eq!(types(&events), vec!["task_started"]);
}

#[tokio::test]
async fn extra_env_is_passed_to_child() {
    let mut env = BTreeMap::new();
    env.insert("BRIDGE_TEST_ID".to_string(), "from-env".to_string());
    let script = r#"printf '{"id":"%s","msg":{"type":"task_started"}}\n' "$BRIDGE_TEST_ID""#;
    let (events, error) = drain(sh_with_env(script, env, CancellationToken::new())).await;
    assert!(error.is_none());
    assert_eq!(events[0].id, "from-env");
}

#[tokio::test]
async fn signal_without_cancel_is_signal_error() {
    let script = r#"
        echo '{"id":"0","msg":{"type":"task_started"}}'
        kill -KILL $$
    "#;
    let (events, error) = drain(sh(script, CancellationToken::new())).await;
    assert_eq!(types(&events), vec!["task_started"]);
    match error {
        Some(ExecError::Signal { signal }) => assert_eq!(signal, "SIGKILL"),
        other => panic!("Expected signal error, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_then_signal_is_cancelled() {
    let cancel = CancellationToken::new();
    let script = r#"
        echo '{"id":"0","msg":{"type":"task_started"}}'
        exec sleep 30
    "#;
    let mut stream = sh(script, cancel.clone());

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.msg_type(), Some("task_started"));

    cancel.cancel();
    let (rest, error) = drain(stream).await;
    assert!(rest.is_empty());
    assert!(error.expect("expected cancellation").is_cancelled());
}

#[tokio::test]
async fn cancel_escalates_to_kill_when_term_ignored() {
    let cancel = CancellationToken::new();
    let script = r#"
        trap '' TERM
        echo '{"id":"0","msg":{"type":"task_started"}}'
        exec sleep 30
    "#;
    let mut stream = sh(script, cancel.clone());
    assert!(stream.next().await.unwrap().is_ok());

    cancel.cancel();
    let (_, error) = drain(stream).await;
    assert!(error.expect("expected cancellation").is_cancelled());
}

#[tokio::test]
async fn cancel_with_handled_term_is_cancelled() {
    let cancel = CancellationToken::new();
    let script = r#"
        trap 'exit 3' TERM
        echo '{"id":"0","msg":{"type":"task_started"}}'
        while :; do sleep 0.1; done
    "#;
    let mut stream = sh(script, cancel.clone());
    assert!(stream.next().await.unwrap().is_ok());

    cancel.cancel();
    let (_, error) = drain(stream).await;
    assert!(error.expect("expected cancellation").is_cancelled());
}

#[tokio::test]
async fn stdout_drains_while_child_handles_term() {
    let cancel = CancellationToken::new();
    // On SIGTERM the child flushes far more than a pipe buffer of records.
    let script = r#"
        trap 'i=0
              while [ $i -lt 3000 ]; do
                  printf "{\"id\":\"%d\",\"msg\":{\"type\":\"background_event\",\"message\":\"%s\"}}\n" $i "$PAD"
                  i=$((i+1))
              done
              exit 3' TERM
        echo '{"id":"ready","msg":{"type":"task_started"}}'
        while :; do sleep 0.05; done
    "#;
    let mut env = BTreeMap::new();
    env.insert("PAD".to_string(), "x".repeat(200));
    let mut stream: ExecStream = Bridge::new("sh")
        .terminate_timeout(Duration::from_secs(10))
        .run_with_args(vec!["-c".to_string(), script.to_string()], env, cancel.clone());

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.id, "ready");

    cancel.cancel();
    let started = std::time::Instant::now();
    let (rest, error) = drain(stream).await;
    assert!(error.expect("expected cancellation").is_cancelled());
    assert_eq!(rest.len(), 3000);
    assert_eq!(rest.last().unwrap().id, "2999");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn spawn_failure_produces_no_events() {
    let stream: ExecStream = Bridge::new("/nonexistent/codex-bridge-test").run_with_args(
        Vec::new(),
        BTreeMap::new(),
        CancellationToken::new(),
    );
    let (events, error) = drain(stream).await;
    assert!(events.is_empty());
    assert!(matches!(
        error,
        Some(ExecError::Spawn(SpawnError::NotFound(_)))
    ));
}

#[tokio::test]
async fn many_events_through_slow_consumer() {
    let script = r#"
        i=0
        while [ $i -lt 300 ]; do
            printf '{"id":"%d","msg":{"type":"token_count"}}\n' $i
            i=$((i+1))
        done
    "#;
    let mut stream = sh(script, CancellationToken::new());
    let mut expected = 0;
    while let Some(item) = stream.next().await {
        let event = item.unwrap();
        assert_eq!(event.id, expected.to_string());
        expected += 1;
        if expected == 1 {
            // Let the producer run far ahead.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    assert_eq!(expected, 300);
}

#[tokio::test]
async fn into_stream_combinators() {
    let script = r#"
        echo '{"id":"0","msg":{"type":"task_started"}}'
        echo '{"id":"0","msg":{"type":"task_complete"}}'
        exit 4
    "#;
    let results: Vec<_> = sh(script, CancellationToken::new())
        .into_stream()
        .collect()
        .await;
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert_eq!(results[2].as_ref().unwrap_err().exit_code(), Some(4));
}

#[tokio::test]
async fn collect_all_returns_error() {
    let err = sh("exit 5", CancellationToken::new())
        .collect_all()
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), Some(5));
}

#[tokio::test]
async fn options_reach_the_child_as_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("fake-codex.sh");
    std::fs::write(
        &script,
        r#"printf '{"id":"argv","msg":{"type":"args","argv":"%s"}}\n' "$*""#,
    )
    .unwrap();

    let options = ExecOptions::new("do it").model("o3").full_auto(true);
    let mut args = vec![script.display().to_string()];
    args.extend(options.build_args());

    let stream: ExecStream = Bridge::new("sh").run_with_args(
        args,
        options.get_env().clone(),
        CancellationToken::new(),
    );
    let (events, error) = drain(stream).await;
    assert!(error.is_none());
    assert_eq!(
        events[0].msg["argv"],
        json!("exec --json --model o3 --full-auto -- do it")
    );
}
